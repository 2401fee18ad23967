use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::{set_switch_and_wait, DeviceBus};
use crate::indi::{IndiError, IndiResult, SwitchState};

/// Default time allowed for an accessory to reach its new state.
pub const DEFAULT_ACCESSORY_TIMEOUT: Duration = Duration::from_secs(120);

/// Switch-controlled accessory such as a light, dust cover or roll-off roof.
///
/// Each user-facing state name maps onto one element of a one-of-many switch
/// property; selecting a state turns that element on and every other off.
pub struct Accessory {
    bus: Arc<dyn DeviceBus>,
    device: String,
    property: String,
    states: BTreeMap<String, String>,
    timeout: Duration,
}

impl Accessory {
    pub fn new(
        bus: Arc<dyn DeviceBus>,
        device: &str,
        property: &str,
        states: BTreeMap<String, String>,
    ) -> Self {
        let states = states
            .into_iter()
            .map(|(name, element)| (name.to_ascii_lowercase(), element))
            .collect();
        Self {
            bus,
            device: device.to_string(),
            property: property.to_string(),
            states,
            timeout: DEFAULT_ACCESSORY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Accepted state names, sorted.
    pub fn state_names(&self) -> Vec<&str> {
        self.states.keys().map(String::as_str).collect()
    }

    /// Currently active state name, if the device reported one we know.
    pub fn current_state(&self) -> Option<String> {
        let prop = self.bus.property(&self.device, &self.property)?;
        let active = prop.active_switch()?;
        self.states
            .iter()
            .find(|(_, element)| element.as_str() == active)
            .map(|(name, _)| name.clone())
    }

    /// Switch to the named state and wait for the device to confirm.
    pub fn set_state(&self, state: &str) -> IndiResult<()> {
        let wanted = state.trim().to_ascii_lowercase();
        let target = self.states.get(&wanted).ok_or_else(|| {
            IndiError::InvalidArgument(format!(
                "unknown state '{state}' for {} (expected one of: {})",
                self.device,
                self.state_names().join(", ")
            ))
        })?;

        let mut elements: Vec<&str> = self.states.values().map(String::as_str).collect();
        elements.sort_unstable();
        elements.dedup();
        let switches: Vec<(&str, SwitchState)> = elements
            .into_iter()
            .map(|element| {
                let value = if element == target.as_str() {
                    SwitchState::On
                } else {
                    SwitchState::Off
                };
                (element, value)
            })
            .collect();

        set_switch_and_wait(
            self.bus.as_ref(),
            &self.device,
            &self.property,
            &switches,
            self.timeout,
        )?;
        info!("Set {} {} to {wanted}", self.device, self.property);
        Ok(())
    }
}
