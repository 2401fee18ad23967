//! Observatory configuration.
//!
//! Stored as JSON. Every field has a default, so a config file only needs to
//! list what differs from the stock setup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ephemeris::{CelestialCoordinate, ObserverSite};
use hardware::devices::FocusDirection;
use hardware::phd2::SettleParams;
use serde::{Deserialize, Serialize};
use crate::error::{ObservatoryError, ObservatoryResult};

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/observatory/config.json";

/// Log file tailed for monitoring.
pub const DEFAULT_LOG_FILE: &str = "/var/log/observatory_control.log";

/// INDI device names of the imaging train.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceNames {
    pub mount: String,
    pub camera: String,
    pub filter_wheel: String,
    pub focuser: String,
}

impl Default for DeviceNames {
    fn default() -> Self {
        Self {
            mount: "iOptron IEQ Pro".to_string(),
            camera: "ZWO CCD ASI183MM Pro".to_string(),
            filter_wheel: "ZWO EFW".to_string(),
            focuser: "ZWO EAF".to_string(),
        }
    }
}

/// A switch-controlled accessory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessoryConfig {
    /// INDI device name
    pub device: String,
    /// One-of-many switch property driving the accessory
    pub property: String,
    /// State name accepted on the command line -> switch element
    pub states: BTreeMap<String, String>,
}

impl AccessoryConfig {
    fn new(device: &str, property: &str, states: &[(&str, &str)]) -> Self {
        Self {
            device: device.to_string(),
            property: property.to_string(),
            states: states
                .iter()
                .map(|(name, element)| (name.to_string(), element.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Accessories {
    pub light: AccessoryConfig,
    pub cover: AccessoryConfig,
    pub roof: AccessoryConfig,
}

impl Default for Accessories {
    fn default() -> Self {
        Self {
            light: AccessoryConfig::new(
                "Red Light",
                "LIGHT_STATE",
                &[("on", "LIGHT_ON"), ("off", "LIGHT_OFF")],
            ),
            cover: AccessoryConfig::new(
                "Telescope Cover",
                "COVER_STATE",
                &[("open", "COVER_OPEN"), ("closed", "COVER_CLOSED")],
            ),
            roof: AccessoryConfig::new(
                "Observatory Roof",
                "ROOF_STATE",
                &[("open", "ROOF_OPEN"), ("closed", "ROOF_CLOSED")],
            ),
        }
    }
}

/// How the pointing is offset between frames of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DitherMode {
    /// Short manual-motion pulses on the mount
    #[default]
    Mount,
    /// PHD2 `dither`, waiting for guiding to settle
    Guider,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DitherConfig {
    pub mode: DitherMode,
    /// Length of each mount motion pulse in seconds
    pub pulse_s: f64,
    /// Maximum PHD2 dither amount in guide camera pixels
    pub pixels: f64,
}

impl Default for DitherConfig {
    fn default() -> Self {
        Self {
            mode: DitherMode::Mount,
            pulse_s: 1.0,
            pixels: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidingConfig {
    /// PHD2 declination guide mode: Off, Auto, North or South
    pub dec_guide_mode: String,
    /// Abort a sequence if guiding cannot be started
    pub required: bool,
    pub settle: SettleParams,
}

impl Default for GuidingConfig {
    fn default() -> Self {
        Self {
            dec_guide_mode: "Auto".to_string(),
            required: false,
            settle: SettleParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    pub steps: u32,
    pub direction: FocusDirection,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            steps: 100,
            direction: FocusDirection::Outward,
        }
    }
}

/// Complete observatory configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservatoryConfig {
    /// INDI server, `host:port`
    pub indi_address: String,
    /// PHD2 event server, `host:port`
    pub phd2_address: String,
    pub log_file: PathBuf,
    pub devices: DeviceNames,
    pub accessories: Accessories,
    /// Filter name -> wheel slot (1-based)
    pub filters: BTreeMap<String, u32>,
    /// Targets below this altitude need confirmation before slewing
    pub min_altitude_deg: f64,
    pub slew_timeout_s: f64,
    pub filter_timeout_s: f64,
    pub focus_timeout_s: f64,
    pub accessory_timeout_s: f64,
    /// Allowed on top of the exposure time for the image to arrive
    pub download_timeout_s: f64,
    pub dither: DitherConfig,
    pub guiding: GuidingConfig,
    pub focus: FocusConfig,
    /// Program launched by `show-image`
    pub image_viewer: String,
    /// Used when the mount does not report its location
    pub site: Option<ObserverSite>,
    /// J2000 positions resolved without going online
    pub targets: BTreeMap<String, CelestialCoordinate>,
}

impl Default for ObservatoryConfig {
    fn default() -> Self {
        let filters = [("L", 1), ("R", 2), ("G", 3), ("B", 4), ("H", 5), ("O", 6)]
            .into_iter()
            .map(|(name, slot)| (name.to_string(), slot))
            .collect();
        Self {
            indi_address: "localhost:7624".to_string(),
            phd2_address: "localhost:4400".to_string(),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            devices: DeviceNames::default(),
            accessories: Accessories::default(),
            filters,
            min_altitude_deg: 20.0,
            slew_timeout_s: 180.0,
            filter_timeout_s: 30.0,
            focus_timeout_s: 60.0,
            accessory_timeout_s: 120.0,
            download_timeout_s: 60.0,
            dither: DitherConfig::default(),
            guiding: GuidingConfig::default(),
            focus: FocusConfig::default(),
            image_viewer: "ds9".to_string(),
            site: None,
            targets: BTreeMap::new(),
        }
    }
}

fn positive_seconds(name: &str, value: f64) -> ObservatoryResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ObservatoryError::InvalidConfig(format!(
            "{name} must be a positive number of seconds, got {value}"
        )))
    }
}

impl ObservatoryConfig {
    /// File that [`load`](Self::load) reads: an explicit `path`, else
    /// [`DEFAULT_CONFIG_PATH`] if present. `None` means built-in defaults.
    pub fn source(path: Option<&Path>) -> Option<PathBuf> {
        match path {
            Some(path) => Some(path.to_path_buf()),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Some(PathBuf::from(DEFAULT_CONFIG_PATH)),
            None => None,
        }
    }

    /// Load the configuration.
    ///
    /// An explicit `path` must exist. Runs before logging is set up, so it
    /// does not log; callers report [`source`](Self::source) afterwards.
    pub fn load(path: Option<&Path>) -> ObservatoryResult<Self> {
        let config = match Self::source(path) {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> ObservatoryResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save_to_file(&self, path: &Path) -> ObservatoryResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> ObservatoryResult<()> {
        if self.filters.is_empty() {
            return Err(ObservatoryError::InvalidConfig(
                "no filters configured".to_string(),
            ));
        }
        if let Some((name, _)) = self.filters.iter().find(|(_, slot)| **slot == 0) {
            return Err(ObservatoryError::InvalidConfig(format!(
                "filter {name} has slot 0; slots start at 1"
            )));
        }
        for (name, value) in [
            ("slew_timeout_s", self.slew_timeout_s),
            ("filter_timeout_s", self.filter_timeout_s),
            ("focus_timeout_s", self.focus_timeout_s),
            ("accessory_timeout_s", self.accessory_timeout_s),
            ("download_timeout_s", self.download_timeout_s),
        ] {
            positive_seconds(name, value)?;
        }
        if self.dither.mode == DitherMode::Mount {
            positive_seconds("dither.pulse_s", self.dither.pulse_s)?;
        }
        if !(-90.0..=90.0).contains(&self.min_altitude_deg) {
            return Err(ObservatoryError::InvalidConfig(format!(
                "min_altitude_deg {} is not an altitude",
                self.min_altitude_deg
            )));
        }
        for (label, accessory) in [
            ("light", &self.accessories.light),
            ("cover", &self.accessories.cover),
            ("roof", &self.accessories.roof),
        ] {
            if accessory.states.is_empty() {
                return Err(ObservatoryError::InvalidConfig(format!(
                    "accessory {label} has no states"
                )));
            }
        }
        Ok(())
    }

    /// Wheel slot for a filter name, matched case-insensitively.
    pub fn filter_slot(&self, name: &str) -> ObservatoryResult<u32> {
        self.filters
            .iter()
            .find(|(filter, _)| filter.eq_ignore_ascii_case(name))
            .map(|(_, slot)| *slot)
            .ok_or_else(|| ObservatoryError::UnknownFilter {
                name: name.to_string(),
                known: self.filters.keys().cloned().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn slew_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.slew_timeout_s)
    }

    pub fn filter_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.filter_timeout_s)
    }

    pub fn focus_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.focus_timeout_s)
    }

    pub fn accessory_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.accessory_timeout_s)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.download_timeout_s)
    }

    pub fn dither_pulse(&self) -> Duration {
        Duration::from_secs_f64(self.dither.pulse_s.max(0.0))
    }
}
