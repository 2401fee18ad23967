//! INDI property model and the client-side property cache.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::error::{IndiError, IndiResult};

/// State attribute carried by every INDI property vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropertyState {
    #[default]
    Idle,
    Ok,
    Busy,
    Alert,
}

impl PropertyState {
    /// A property is settled once the device left `Busy` without raising `Alert`.
    pub fn is_settled(&self) -> bool {
        matches!(self, PropertyState::Idle | PropertyState::Ok)
    }
}

impl FromStr for PropertyState {
    type Err = IndiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Idle" => Ok(PropertyState::Idle),
            "Ok" => Ok(PropertyState::Ok),
            "Busy" => Ok(PropertyState::Busy),
            "Alert" => Ok(PropertyState::Alert),
            other => Err(IndiError::Parse(format!("unknown property state '{other}'"))),
        }
    }
}

impl fmt::Display for PropertyState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            PropertyState::Idle => "Idle",
            PropertyState::Ok => "Ok",
            PropertyState::Busy => "Busy",
            PropertyState::Alert => "Alert",
        };
        f.write_str(s)
    }
}

/// Value of a single switch element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    On,
    Off,
}

impl FromStr for SwitchState {
    type Err = IndiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "On" => Ok(SwitchState::On),
            "Off" => Ok(SwitchState::Off),
            other => Err(IndiError::Parse(format!("unknown switch state '{other}'"))),
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            SwitchState::On => "On",
            SwitchState::Off => "Off",
        })
    }
}

/// Kind of property vector, derived from the XML element name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Number,
    Switch,
    Text,
    Light,
    Blob,
}

impl PropertyKind {
    /// Suffix used in element names, e.g. `Number` in `defNumberVector`.
    pub fn tag(&self) -> &'static str {
        match self {
            PropertyKind::Number => "Number",
            PropertyKind::Switch => "Switch",
            PropertyKind::Text => "Text",
            PropertyKind::Light => "Light",
            PropertyKind::Blob => "BLOB",
        }
    }

    pub(crate) fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Number" => Some(PropertyKind::Number),
            "Switch" => Some(PropertyKind::Switch),
            "Text" => Some(PropertyKind::Text),
            "Light" => Some(PropertyKind::Light),
            "BLOB" => Some(PropertyKind::Blob),
            _ => None,
        }
    }
}

/// Value held by one element of a property vector.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Number(f64),
    Switch(SwitchState),
    Text(String),
    Light(PropertyState),
    /// BLOB elements only keep their metadata in the cache; payloads are
    /// delivered separately.
    Blob { format: String, size: usize },
}

impl PropertyValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_switch(&self) -> Option<SwitchState> {
        match self {
            PropertyValue::Switch(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// A device property vector as last reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub device: String,
    pub name: String,
    pub kind: PropertyKind,
    pub state: PropertyState,
    pub label: Option<String>,
    pub group: Option<String>,
    /// Elements in the order the driver defined them.
    pub elements: Vec<(String, PropertyValue)>,
}

impl Property {
    pub fn new(device: &str, name: &str, kind: PropertyKind) -> Self {
        Self {
            device: device.to_string(),
            name: name.to_string(),
            kind,
            state: PropertyState::Idle,
            label: None,
            group: None,
            elements: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: PropertyState) -> Self {
        self.state = state;
        self
    }

    pub fn with_element(mut self, name: &str, value: PropertyValue) -> Self {
        self.set_element(name, value);
        self
    }

    pub fn element(&self, name: &str) -> Option<&PropertyValue> {
        self.elements
            .iter()
            .find(|(element, _)| element == name)
            .map(|(_, value)| value)
    }

    /// Insert or overwrite an element, keeping definition order.
    pub fn set_element(&mut self, name: &str, value: PropertyValue) {
        match self.elements.iter_mut().find(|(element, _)| element == name) {
            Some((_, slot)) => *slot = value,
            None => self.elements.push((name.to_string(), value)),
        }
    }

    /// Numeric value of an element, with a descriptive error when absent.
    pub fn number(&self, element: &str) -> IndiResult<f64> {
        self.element(element)
            .and_then(PropertyValue::as_number)
            .ok_or_else(|| IndiError::UnknownElement {
                device: self.device.clone(),
                property: self.name.clone(),
                element: element.to_string(),
            })
    }

    /// Name of the first switch element that is `On`.
    pub fn active_switch(&self) -> Option<&str> {
        self.elements
            .iter()
            .find(|(_, value)| value.as_switch() == Some(SwitchState::On))
            .map(|(name, _)| name.as_str())
    }
}

/// Partial property report (`set*Vector`): only changed elements are present.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyUpdate {
    pub device: String,
    pub name: String,
    pub kind: PropertyKind,
    pub state: Option<PropertyState>,
    pub elements: Vec<(String, PropertyValue)>,
}

impl PropertyUpdate {
    pub fn new(device: &str, name: &str, kind: PropertyKind) -> Self {
        Self {
            device: device.to_string(),
            name: name.to_string(),
            kind,
            state: None,
            elements: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: PropertyState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_element(mut self, name: &str, value: PropertyValue) -> Self {
        self.elements.push((name.to_string(), value));
        self
    }
}

#[derive(Debug, Clone)]
struct Entry {
    property: Property,
    updates: u64,
}

/// Client-side cache of every property the server has announced.
///
/// Each property carries an update counter so callers can wait for the first
/// report that arrives after they issued a command.
#[derive(Debug, Default)]
pub struct PropertyStore {
    entries: HashMap<(String, String), Entry>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(device: &str, name: &str) -> (String, String) {
        (device.to_string(), name.to_string())
    }

    /// Record a full definition, replacing any previous one.
    pub fn define(&mut self, property: Property) {
        let key = Self::key(&property.device, &property.name);
        let updates = self.entries.get(&key).map_or(0, |e| e.updates) + 1;
        self.entries.insert(key, Entry { property, updates });
    }

    /// Merge an update into the cached property.
    ///
    /// Updates for properties that were never defined are stored as a
    /// definition. A missing state keeps the cached one.
    pub fn update(&mut self, update: PropertyUpdate) {
        let key = Self::key(&update.device, &update.name);
        match self.entries.get_mut(&key) {
            Some(entry) => {
                if let Some(state) = update.state {
                    entry.property.state = state;
                }
                for (name, value) in update.elements {
                    entry.property.set_element(&name, value);
                }
                entry.updates += 1;
            }
            None => {
                let property = Property {
                    device: update.device,
                    name: update.name,
                    kind: update.kind,
                    state: update.state.unwrap_or_default(),
                    label: None,
                    group: None,
                    elements: update.elements,
                };
                self.entries.insert(
                    key,
                    Entry {
                        property,
                        updates: 1,
                    },
                );
            }
        }
    }

    /// Remove one property, or every property of a device when `name` is None.
    pub fn delete(&mut self, device: &str, name: Option<&str>) {
        match name {
            Some(name) => {
                self.entries.remove(&Self::key(device, name));
            }
            None => self.entries.retain(|(dev, _), _| dev != device),
        }
    }

    pub fn get(&self, device: &str, name: &str) -> Option<&Property> {
        self.entries
            .get(&Self::key(device, name))
            .map(|entry| &entry.property)
    }

    /// Number of definitions and updates seen for a property (0 if unknown).
    pub fn update_count(&self, device: &str, name: &str) -> u64 {
        self.entries
            .get(&Self::key(device, name))
            .map_or(0, |entry| entry.updates)
    }

    /// Names of all devices that announced at least one property.
    pub fn devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.entries.keys().map(|(dev, _)| dev.clone()).collect();
        devices.sort();
        devices.dedup();
        devices
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
