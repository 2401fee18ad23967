use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::{set_number_and_wait, DeviceBus};
use crate::indi::{IndiError, IndiResult, SwitchState};

const FOCUS_MOTION: &str = "FOCUS_MOTION";
const REL_FOCUS_POSITION: &str = "REL_FOCUS_POSITION";
const FOCUS_RELATIVE_POSITION: &str = "FOCUS_RELATIVE_POSITION";

/// Default time allowed for a focuser move.
pub const DEFAULT_FOCUS_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusDirection {
    Inward,
    #[default]
    Outward,
}

impl FocusDirection {
    fn element(&self) -> &'static str {
        match self {
            FocusDirection::Inward => "FOCUS_INWARD",
            FocusDirection::Outward => "FOCUS_OUTWARD",
        }
    }
}

impl FromStr for FocusDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" | "inward" => Ok(FocusDirection::Inward),
            "out" | "outward" => Ok(FocusDirection::Outward),
            other => Err(format!("invalid focus direction '{other}' (expected in/out)")),
        }
    }
}

impl fmt::Display for FocusDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            FocusDirection::Inward => "inward",
            FocusDirection::Outward => "outward",
        })
    }
}

/// INDI focuser driven by relative steps.
pub struct Focuser {
    bus: Arc<dyn DeviceBus>,
    device: String,
    timeout: Duration,
}

impl Focuser {
    pub fn new(bus: Arc<dyn DeviceBus>, device: &str) -> Self {
        Self {
            bus,
            device: device.to_string(),
            timeout: DEFAULT_FOCUS_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Move `steps` in `direction` and wait for the focuser to stop.
    pub fn move_relative(&self, direction: FocusDirection, steps: u32) -> IndiResult<()> {
        if steps == 0 {
            return Err(IndiError::InvalidArgument(
                "focus move needs at least one step".to_string(),
            ));
        }

        let state = |d: FocusDirection| {
            if d == direction {
                SwitchState::On
            } else {
                SwitchState::Off
            }
        };
        let elements = [
            (FocusDirection::Inward.element(), state(FocusDirection::Inward)),
            (FocusDirection::Outward.element(), state(FocusDirection::Outward)),
        ];
        self.bus.set_switch(&self.device, FOCUS_MOTION, &elements)?;

        set_number_and_wait(
            self.bus.as_ref(),
            &self.device,
            REL_FOCUS_POSITION,
            &[(FOCUS_RELATIVE_POSITION, f64::from(steps))],
            self.timeout,
        )?;
        info!("Focuser {} moved {steps} steps {direction}", self.device);
        Ok(())
    }
}
