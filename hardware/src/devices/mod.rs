//! Typed drivers for the observatory's INDI devices.
//!
//! Drivers talk to the INDI server through the [`DeviceBus`] trait, so the
//! same code runs against a live [`IndiClient`] or the recording
//! [`mock::MockBus`] used in tests.

mod accessory;
mod camera;
mod filter_wheel;
mod focuser;
pub mod mock;
mod mount;

use std::time::Duration;

use crate::indi::{
    BlobMode, BlobPayload, IndiClient, IndiResult, Property, SwitchState,
};

pub use accessory::Accessory;
pub use camera::Camera;
pub use filter_wheel::FilterWheel;
pub use focuser::{FocusDirection, Focuser};
pub use mount::{Mount, MotionDirection};

/// Transport used by the device drivers.
///
/// All methods take `&self`; implementations synchronise internally so a
/// single connection can be shared by every driver.
pub trait DeviceBus: Send + Sync {
    fn set_switch(&self, device: &str, property: &str, elements: &[(&str, SwitchState)]) -> IndiResult<()>;

    fn set_number(&self, device: &str, property: &str, elements: &[(&str, f64)]) -> IndiResult<()>;

    fn set_text(&self, device: &str, property: &str, elements: &[(&str, &str)]) -> IndiResult<()>;

    fn enable_blob(&self, device: &str, mode: BlobMode) -> IndiResult<()>;

    /// Cached property, if the device has defined it.
    fn property(&self, device: &str, property: &str) -> Option<Property>;

    /// Wait for a property definition to arrive.
    fn wait_for_property(&self, device: &str, property: &str, timeout: Duration) -> IndiResult<Property>;

    /// Update counter used as the starting point for [`wait_settled`](Self::wait_settled).
    fn update_count(&self, device: &str, property: &str) -> u64;

    /// Wait until the property settles (Ok/Idle) after update `after`.
    fn wait_settled(&self, device: &str, property: &str, after: u64, timeout: Duration) -> IndiResult<Property>;

    /// Discard queued BLOBs.
    fn drain_blobs(&self);

    fn receive_blob(&self, timeout: Duration) -> IndiResult<BlobPayload>;
}

impl DeviceBus for IndiClient {
    fn set_switch(&self, device: &str, property: &str, elements: &[(&str, SwitchState)]) -> IndiResult<()> {
        self.send_switch(device, property, elements)
    }

    fn set_number(&self, device: &str, property: &str, elements: &[(&str, f64)]) -> IndiResult<()> {
        self.send_number(device, property, elements)
    }

    fn set_text(&self, device: &str, property: &str, elements: &[(&str, &str)]) -> IndiResult<()> {
        self.send_text(device, property, elements)
    }

    fn enable_blob(&self, device: &str, mode: BlobMode) -> IndiResult<()> {
        IndiClient::enable_blob(self, device, mode)
    }

    fn property(&self, device: &str, property: &str) -> Option<Property> {
        IndiClient::property(self, device, property)
    }

    fn wait_for_property(&self, device: &str, property: &str, timeout: Duration) -> IndiResult<Property> {
        IndiClient::wait_for_property(self, device, property, timeout)
    }

    fn update_count(&self, device: &str, property: &str) -> u64 {
        IndiClient::update_count(self, device, property)
    }

    fn wait_settled(&self, device: &str, property: &str, after: u64, timeout: Duration) -> IndiResult<Property> {
        IndiClient::wait_settled(self, device, property, after, timeout)
    }

    fn drain_blobs(&self) {
        IndiClient::drain_blobs(self);
    }

    fn receive_blob(&self, timeout: Duration) -> IndiResult<BlobPayload> {
        self.recv_blob(timeout)
    }
}

/// Send a number vector and block until the device reports it settled.
pub(crate) fn set_number_and_wait(
    bus: &dyn DeviceBus,
    device: &str,
    property: &str,
    elements: &[(&str, f64)],
    timeout: Duration,
) -> IndiResult<Property> {
    let after = bus.update_count(device, property);
    bus.set_number(device, property, elements)?;
    bus.wait_settled(device, property, after, timeout)
}

/// Send a switch vector and block until the device reports it settled.
pub(crate) fn set_switch_and_wait(
    bus: &dyn DeviceBus,
    device: &str,
    property: &str,
    elements: &[(&str, SwitchState)],
    timeout: Duration,
) -> IndiResult<Property> {
    let after = bus.update_count(device, property);
    bus.set_switch(device, property, elements)?;
    bus.wait_settled(device, property, after, timeout)
}
