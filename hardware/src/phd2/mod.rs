//! PHD2 autoguider control.
//!
//! [`Phd2Client`] talks to PHD2's JSON-RPC event server. Sequencing code
//! depends on the narrower [`Guider`] trait so it can run against
//! [`mock::MockGuider`] in tests.

mod client;
mod messages;
pub mod mock;

pub use client::{Phd2Client, DEFAULT_PORT};
pub use messages::{Phd2Error, Phd2Event, Phd2Result, SettleParams};

/// Guiding operations used while imaging.
pub trait Guider: Send + Sync {
    fn set_dec_guide_mode(&self, mode: &str) -> Phd2Result<()>;

    /// Start guiding, returning once settled.
    fn start(&self, settle: &SettleParams) -> Phd2Result<()>;

    /// Dither and wait for guiding to settle again.
    fn dither(&self, pixels: f64, settle: &SettleParams) -> Phd2Result<()>;

    fn stop(&self) -> Phd2Result<()>;
}
