//! Profile-independent compression core.
//!
//! The chain formats, per-flow contexts and both state machines live here;
//! the profile modules wrap them behind [`ProfileHandler`] implementations
//! via [`generic_profile_handler!`].
//!
//! [`ProfileHandler`]: crate::traits::ProfileHandler
//! [`generic_profile_handler!`]: crate::generic_profile_handler

pub mod chains;
pub mod compressor;
pub mod context;
pub mod decompressor;

/// Defines a `ProfileHandler` that drives the generic core for one profile.
///
/// The handlers differ only in their profile identifier; everything
/// behavioral is derived from [`RohcProfile`] inside the core.
///
/// [`RohcProfile`]: crate::profiles::RohcProfile
#[macro_export]
macro_rules! generic_profile_handler {
    (
        $(#[$meta:meta])*
        $name:ident => $profile:expr
    ) => {
        $(#[$meta])*
        #[derive(Debug, Default)]
        pub struct $name;

        impl $name {
            /// Creates the handler.
            pub fn new() -> Self {
                Self
            }
        }

        impl $crate::traits::ProfileHandler for $name {
            fn profile_id(&self) -> $crate::profiles::RohcProfile {
                $profile
            }

            fn create_compressor_context(
                &self,
                cid: $crate::types::ContextId,
                config: &$crate::config::CompressorConfig,
                now: std::time::Instant,
            ) -> Box<dyn $crate::traits::RohcCompressorContext> {
                Box::new(
                    $crate::profiles::generic::context::GenericCompressorContext::new(
                        $profile, cid, config, now,
                    ),
                )
            }

            fn create_decompressor_context(
                &self,
                cid: $crate::types::ContextId,
                config: &$crate::config::DecompressorConfig,
                now: std::time::Instant,
            ) -> Box<dyn $crate::traits::RohcDecompressorContext> {
                Box::new(
                    $crate::profiles::generic::context::GenericDecompressorContext::new(
                        $profile, cid, config, now,
                    ),
                )
            }

            fn compress(
                &self,
                context: &mut dyn $crate::traits::RohcCompressorContext,
                crc: &$crate::crc::CrcCalculators,
                headers: &$crate::headers::PacketHeaders,
                payload: &[u8],
                now: std::time::Instant,
                out: &mut [u8],
            ) -> Result<usize, $crate::error::RohcError> {
                let ctx = context
                    .as_any_mut()
                    .downcast_mut::<$crate::profiles::generic::context::GenericCompressorContext>()
                    .ok_or($crate::error::RohcError::Internal(
                        "compressor context type mismatch",
                    ))?;
                $crate::profiles::generic::compressor::compress(
                    ctx, crc, headers, payload, now, out,
                )
            }

            fn decompress(
                &self,
                context: &mut dyn $crate::traits::RohcDecompressorContext,
                crc: &$crate::crc::CrcCalculators,
                core_packet: &[u8],
                out: &mut [u8],
            ) -> $crate::traits::DecompressOutcome {
                let Some(ctx) = context
                    .as_any_mut()
                    .downcast_mut::<$crate::profiles::generic::context::GenericDecompressorContext>()
                else {
                    return $crate::traits::DecompressOutcome::err(
                        $crate::error::RohcError::Internal(
                            "decompressor context type mismatch",
                        ),
                    );
                };
                $crate::profiles::generic::decompressor::decompress(ctx, crc, core_packet, out)
            }
        }
    };
}
