use thiserror::Error;

/// Errors produced by the INDI client and the drivers built on it.
#[derive(Error, Debug)]
pub enum IndiError {
    #[error("I/O error talking to INDI server: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed INDI XML: {0}")]
    Xml(String),

    #[error("failed to parse INDI value: {0}")]
    Parse(String),

    #[error("invalid BLOB payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("timed out waiting for {device}.{property}")]
    Timeout { device: String, property: String },

    #[error("{device}.{property} reported Alert")]
    PropertyAlert { device: String, property: String },

    #[error("{device}.{property} has no element {element}")]
    UnknownElement {
        device: String,
        property: String,
        element: String,
    },

    #[error("INDI server connection closed")]
    Disconnected,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for INDI operations
pub type IndiResult<T> = Result<T, IndiError>;

impl IndiError {
    pub(crate) fn timeout(device: &str, property: &str) -> Self {
        IndiError::Timeout {
            device: device.to_string(),
            property: property.to_string(),
        }
    }
}
