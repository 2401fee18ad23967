//! Observatory automation on top of INDI and PHD2.
//!
//! Commands such as opening the roof, slewing to a target or running an
//! imaging sequence are modelled as [`Command`] values and executed by an
//! [`Observatory`], either one at a time from the command line or in order
//! from a plan file.

pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod plan;
pub mod sequence;
pub mod targeting;

pub use commands::{Command, Observatory, Outcome};
pub use config::ObservatoryConfig;
pub use error::{ObservatoryError, ObservatoryResult};
pub use sequence::{SequenceReport, SequenceRequest};
pub use targeting::{AlwaysConfirm, Confirm, TargetPosition};
