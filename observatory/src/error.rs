use std::path::PathBuf;

use ephemeris::EphemerisError;
use hardware::indi::IndiError;
use hardware::phd2::Phd2Error;
use thiserror::Error;

/// Errors produced while running observatory commands.
#[derive(Error, Debug)]
pub enum ObservatoryError {
    #[error("INDI: {0}")]
    Indi(#[from] IndiError),

    #[error("guider: {0}")]
    Guider(#[from] Phd2Error),

    #[error(transparent)]
    Ephemeris(#[from] EphemerisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown filter '{name}' (configured: {known})")]
    UnknownFilter { name: String, known: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("no observing site: the mount does not report one and none is configured")]
    NoSite,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("image not found: {}", .0.display())]
    ImageNotFound(PathBuf),
}

pub type ObservatoryResult<T> = Result<T, ObservatoryError>;
