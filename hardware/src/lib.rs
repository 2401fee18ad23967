//! Hardware control for the observatory.
//!
//! - [`indi`]: client for an INDI server and its property model
//! - [`devices`]: typed mount, camera, filter wheel, focuser and accessory drivers
//! - [`phd2`]: client for the PHD2 autoguider

pub mod devices;
pub mod indi;
mod net;
pub mod phd2;
