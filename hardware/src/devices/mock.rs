//! Recording [`DeviceBus`] for tests.
//!
//! Every command is recorded and applied to an in-memory property store as
//! an immediate `Ok` report, so drivers see their commands settle without a
//! server. Individual properties can be made to answer `Alert`, and camera
//! exposures can be made to produce a BLOB.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::DeviceBus;
use crate::indi::{
    BlobMode, BlobPayload, IndiError, IndiResult, Property, PropertyKind, PropertyState,
    PropertyStore, PropertyUpdate, PropertyValue, SwitchState,
};

/// Command issued through the mock bus.
#[derive(Debug, Clone, PartialEq)]
pub enum SentCommand {
    Switch {
        device: String,
        property: String,
        elements: Vec<(String, SwitchState)>,
    },
    Number {
        device: String,
        property: String,
        elements: Vec<(String, f64)>,
    },
    Text {
        device: String,
        property: String,
        elements: Vec<(String, String)>,
    },
    EnableBlob {
        device: String,
        mode: BlobMode,
    },
}

impl SentCommand {
    pub fn property(&self) -> Option<&str> {
        match self {
            SentCommand::Switch { property, .. }
            | SentCommand::Number { property, .. }
            | SentCommand::Text { property, .. } => Some(property),
            SentCommand::EnableBlob { .. } => None,
        }
    }
}

#[derive(Default)]
struct MockState {
    sent: Vec<SentCommand>,
    properties: PropertyStore,
    alerts: HashSet<(String, String)>,
    blobs: VecDeque<BlobPayload>,
    exposure_blobs: Vec<(String, Vec<u8>)>,
}

#[derive(Default)]
pub struct MockBus {
    state: Mutex<MockState>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pre-populate a property as if the server had defined it.
    pub fn with_property(self, property: Property) -> Self {
        self.lock().properties.define(property);
        self
    }

    /// Make every command on this property answer with `Alert`.
    pub fn with_alert(self, device: &str, property: &str) -> Self {
        self.lock()
            .alerts
            .insert((device.to_string(), property.to_string()));
        self
    }

    /// Deliver `data` as a `CCD1` BLOB whenever an exposure is started.
    pub fn with_exposure_blob(self, data: Vec<u8>) -> Self {
        self.with_exposure_blob_on("CCD1", data)
    }

    /// Deliver `data` on BLOB vector `property` whenever an exposure is
    /// started. BLOBs arrive in the order they were configured.
    pub fn with_exposure_blob_on(self, property: &str, data: Vec<u8>) -> Self {
        self.lock().exposure_blobs.push((property.to_string(), data));
        self
    }

    /// All commands sent so far, in order.
    pub fn sent(&self) -> Vec<SentCommand> {
        self.lock().sent.clone()
    }

    /// Commands that targeted one property.
    pub fn sent_to(&self, property: &str) -> Vec<SentCommand> {
        self.lock()
            .sent
            .iter()
            .filter(|cmd| cmd.property() == Some(property))
            .cloned()
            .collect()
    }

    fn record(&self, command: SentCommand, update: PropertyUpdate) {
        let mut state = self.lock();
        let key = (update.device.clone(), update.name.clone());
        let report = if state.alerts.contains(&key) {
            update.with_state(PropertyState::Alert)
        } else {
            update.with_state(PropertyState::Ok)
        };

        if report.name == "CCD_EXPOSURE" && report.state == Some(PropertyState::Ok) {
            let blobs: Vec<BlobPayload> = state
                .exposure_blobs
                .iter()
                .map(|(property, data)| BlobPayload {
                    device: report.device.clone(),
                    property: property.clone(),
                    element: property.clone(),
                    format: ".fits".to_string(),
                    data: data.clone(),
                })
                .collect();
            state.blobs.extend(blobs);
        }

        state.properties.update(report);
        state.sent.push(command);
    }
}

impl DeviceBus for MockBus {
    fn set_switch(&self, device: &str, property: &str, elements: &[(&str, SwitchState)]) -> IndiResult<()> {
        let mut update = PropertyUpdate::new(device, property, PropertyKind::Switch);
        for (name, value) in elements {
            update = update.with_element(name, PropertyValue::Switch(*value));
        }
        self.record(
            SentCommand::Switch {
                device: device.to_string(),
                property: property.to_string(),
                elements: elements.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
            },
            update,
        );
        Ok(())
    }

    fn set_number(&self, device: &str, property: &str, elements: &[(&str, f64)]) -> IndiResult<()> {
        let mut update = PropertyUpdate::new(device, property, PropertyKind::Number);
        for (name, value) in elements {
            update = update.with_element(name, PropertyValue::Number(*value));
        }
        self.record(
            SentCommand::Number {
                device: device.to_string(),
                property: property.to_string(),
                elements: elements.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
            },
            update,
        );
        Ok(())
    }

    fn set_text(&self, device: &str, property: &str, elements: &[(&str, &str)]) -> IndiResult<()> {
        let mut update = PropertyUpdate::new(device, property, PropertyKind::Text);
        for (name, value) in elements {
            update = update.with_element(name, PropertyValue::Text(value.to_string()));
        }
        self.record(
            SentCommand::Text {
                device: device.to_string(),
                property: property.to_string(),
                elements: elements
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect(),
            },
            update,
        );
        Ok(())
    }

    fn enable_blob(&self, device: &str, mode: BlobMode) -> IndiResult<()> {
        self.lock().sent.push(SentCommand::EnableBlob {
            device: device.to_string(),
            mode,
        });
        Ok(())
    }

    fn property(&self, device: &str, property: &str) -> Option<Property> {
        self.lock().properties.get(device, property).cloned()
    }

    fn wait_for_property(&self, device: &str, property: &str, _timeout: Duration) -> IndiResult<Property> {
        self.property(device, property).ok_or_else(|| IndiError::Timeout {
            device: device.to_string(),
            property: property.to_string(),
        })
    }

    fn update_count(&self, device: &str, property: &str) -> u64 {
        self.lock().properties.update_count(device, property)
    }

    fn wait_settled(&self, device: &str, property: &str, after: u64, _timeout: Duration) -> IndiResult<Property> {
        let state = self.lock();
        let timeout = || IndiError::Timeout {
            device: device.to_string(),
            property: property.to_string(),
        };
        if state.properties.update_count(device, property) <= after {
            return Err(timeout());
        }
        let prop = state.properties.get(device, property).ok_or_else(timeout)?;
        match prop.state {
            state if state.is_settled() => Ok(prop.clone()),
            PropertyState::Alert => Err(IndiError::PropertyAlert {
                device: device.to_string(),
                property: property.to_string(),
            }),
            _ => Err(timeout()),
        }
    }

    fn drain_blobs(&self) {
        self.lock().blobs.clear();
    }

    fn receive_blob(&self, _timeout: Duration) -> IndiResult<BlobPayload> {
        self.lock()
            .blobs
            .pop_front()
            .ok_or_else(|| IndiError::Timeout {
                device: "*".to_string(),
                property: "BLOB".to_string(),
            })
    }
}
