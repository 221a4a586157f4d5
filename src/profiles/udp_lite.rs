//! Profile 0x0008: UDP-Lite/IP.
//!
//! Like the UDP profile, but the checksum coverage can change per packet,
//! so coverage and checksum both travel behind every UO header.

use crate::generic_profile_handler;
use crate::profiles::RohcProfile;

generic_profile_handler!(
    /// Handler for UDP-Lite/IP flows.
    UdpLiteHandler => RohcProfile::UdpLite
);
