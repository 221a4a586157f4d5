//! Profile 0x0003: ESP/IP.
//!
//! ESP flows are keyed by SPI and sequenced by the 32-bit ESP sequence
//! number; everything behind the ESP header is opaque payload.

use crate::generic_profile_handler;
use crate::profiles::RohcProfile;

generic_profile_handler!(
    /// Handler for ESP/IP flows.
    EspHandler => RohcProfile::Esp
);
