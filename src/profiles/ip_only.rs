//! Profile 0x0004: IP-only.
//!
//! Compresses a bare IP header (any next protocol the other profiles do
//! not claim) with a synthetic sequence number, leaving everything after
//! the IP header as payload.

use crate::generic_profile_handler;
use crate::profiles::RohcProfile;

generic_profile_handler!(
    /// Handler for IP-only flows.
    IpOnlyHandler => RohcProfile::Ip
);
