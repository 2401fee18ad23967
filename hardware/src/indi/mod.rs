//! INDI protocol client.
//!
//! INDI (Instrument Neutral Distributed Interface) exposes astronomical
//! devices as named property vectors over an XML stream, normally served by
//! `indiserver` on TCP port 7624. This module provides:
//!
//! - [`protocol`]: encoding of client commands and decoding of server messages
//! - [`PropertyStore`]: the client-side cache of announced properties
//! - [`IndiClient`]: a blocking connection with a background reader thread

mod client;
mod error;
mod property;
pub mod protocol;

pub use client::{IndiClient, DEFAULT_PORT};
pub use error::{IndiError, IndiResult};
pub use property::{
    Property, PropertyKind, PropertyState, PropertyStore, PropertyUpdate, PropertyValue,
    SwitchState,
};
pub use protocol::{BlobMode, BlobPayload, IndiMessage};
