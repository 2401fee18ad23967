use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::{set_number_and_wait, DeviceBus};
use crate::indi::{IndiError, IndiResult};

const FILTER_SLOT: &str = "FILTER_SLOT";
const FILTER_SLOT_VALUE: &str = "FILTER_SLOT_VALUE";

/// Default time allowed for the wheel to rotate.
pub const DEFAULT_FILTER_TIMEOUT: Duration = Duration::from_secs(30);

/// INDI filter wheel (`FILTER_SLOT`, 1-based slots).
pub struct FilterWheel {
    bus: Arc<dyn DeviceBus>,
    device: String,
    timeout: Duration,
}

impl FilterWheel {
    pub fn new(bus: Arc<dyn DeviceBus>, device: &str) -> Self {
        Self {
            bus,
            device: device.to_string(),
            timeout: DEFAULT_FILTER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Slot currently reported by the wheel.
    pub fn current_slot(&self) -> Option<u32> {
        self.bus
            .property(&self.device, FILTER_SLOT)
            .and_then(|prop| prop.number(FILTER_SLOT_VALUE).ok())
            .map(|slot| slot.round() as u32)
    }

    /// Rotate to `slot` and wait for the wheel to stop.
    pub fn select(&self, slot: u32) -> IndiResult<()> {
        if slot == 0 {
            return Err(IndiError::InvalidArgument(
                "filter slots are numbered from 1".to_string(),
            ));
        }
        set_number_and_wait(
            self.bus.as_ref(),
            &self.device,
            FILTER_SLOT,
            &[(FILTER_SLOT_VALUE, f64::from(slot))],
            self.timeout,
        )?;
        info!("{} at slot {slot}", self.device);
        Ok(())
    }
}
