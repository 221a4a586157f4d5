//! Profile 0x0002: UDP/IP.
//!
//! UDP flows have no native sequence number; the compressor generates a
//! 16-bit synthetic SN carried in the dynamic chain, and the UDP checksum,
//! when in use, travels uncompressed behind every UO header.

use crate::generic_profile_handler;
use crate::profiles::RohcProfile;

generic_profile_handler!(
    /// Handler for UDP/IP flows.
    UdpHandler => RohcProfile::Udp
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ProfileHandler;

    #[test]
    fn handler_reports_udp_profile() {
        assert_eq!(UdpHandler::new().profile_id(), RohcProfile::Udp);
        assert!(RohcProfile::Udp.uses_synthetic_sn());
    }
}
