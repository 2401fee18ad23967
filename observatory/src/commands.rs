//! Named observatory commands and their dispatcher.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use chrono::Utc;
use ephemeris::{ObserverSite, TargetResolver};
use hardware::devices::{
    Accessory, Camera, DeviceBus, FilterWheel, FocusDirection, Focuser, Mount,
};
use hardware::phd2::Guider;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

use crate::config::{AccessoryConfig, ObservatoryConfig};
use crate::error::{ObservatoryError, ObservatoryResult};
use crate::sequence::{run_sequence, SequenceReport, SequenceRequest};
use crate::targeting::{altitude_accepted, locate, AlwaysConfirm, Confirm, TargetPosition};

/// Command names accepted in plan files.
pub const COMMAND_NAMES: &[&str] = &[
    "set_light",
    "telescope_cover",
    "roof",
    "target",
    "sequence",
    "focus",
    "showimage",
    "show_image",
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SetLight {
        state: String,
    },
    TelescopeCover {
        state: String,
    },
    Roof {
        state: String,
    },
    Target {
        target_name: String,
    },
    Sequence(SequenceRequest),
    Focus {
        #[serde(default)]
        direction: Option<FocusDirection>,
        #[serde(default)]
        steps: Option<u32>,
    },
    #[serde(rename = "showimage", alias = "show_image")]
    ShowImage {
        directory: PathBuf,
        image_name: String,
    },
}

impl Command {
    /// Parse one `{"command": "...", ...}` object.
    pub fn from_value(value: Value) -> ObservatoryResult<Self> {
        let name = value
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ObservatoryError::InvalidParameter(format!("missing \"command\" in {value}"))
            })?;
        if !COMMAND_NAMES.contains(&name) {
            return Err(ObservatoryError::UnknownCommand(name.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::SetLight { .. } => "set_light",
            Command::TelescopeCover { .. } => "telescope_cover",
            Command::Roof { .. } => "roof",
            Command::Target { .. } => "target",
            Command::Sequence(_) => "sequence",
            Command::Focus { .. } => "focus",
            Command::ShowImage { .. } => "showimage",
        }
    }

    /// Whether running this command involves the autoguider.
    pub fn needs_guider(&self) -> bool {
        matches!(self, Command::Sequence(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done,
    /// The operator declined to continue.
    Aborted,
    Sequence(SequenceReport),
}

/// Everything a command needs: configuration, the INDI connection, an
/// optional guider, a name resolver and someone to ask for confirmation.
pub struct Observatory {
    config: ObservatoryConfig,
    bus: Arc<dyn DeviceBus>,
    guider: Option<Arc<dyn Guider>>,
    resolver: Box<dyn TargetResolver>,
    confirm: Box<dyn Confirm>,
}

impl Observatory {
    pub fn new(
        config: ObservatoryConfig,
        bus: Arc<dyn DeviceBus>,
        resolver: Box<dyn TargetResolver>,
    ) -> Self {
        Self {
            config,
            bus,
            guider: None,
            resolver,
            confirm: Box::new(AlwaysConfirm),
        }
    }

    pub fn with_guider(mut self, guider: Arc<dyn Guider>) -> Self {
        self.guider = Some(guider);
        self
    }

    pub fn with_confirm(mut self, confirm: Box<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn config(&self) -> &ObservatoryConfig {
        &self.config
    }

    pub fn guider(&self) -> Option<&dyn Guider> {
        self.guider.as_deref()
    }

    pub(crate) fn confirmer(&self) -> &dyn Confirm {
        self.confirm.as_ref()
    }

    pub fn mount(&self) -> Mount {
        Mount::new(Arc::clone(&self.bus), &self.config.devices.mount)
            .with_slew_timeout(self.config.slew_timeout())
    }

    pub fn camera(&self) -> Camera {
        Camera::new(Arc::clone(&self.bus), &self.config.devices.camera)
            .with_download_timeout(self.config.download_timeout())
    }

    pub fn filter_wheel(&self) -> FilterWheel {
        FilterWheel::new(Arc::clone(&self.bus), &self.config.devices.filter_wheel)
            .with_timeout(self.config.filter_timeout())
    }

    pub fn focuser(&self) -> Focuser {
        Focuser::new(Arc::clone(&self.bus), &self.config.devices.focuser)
            .with_timeout(self.config.focus_timeout())
    }

    fn accessory(&self, accessory: &AccessoryConfig) -> Accessory {
        Accessory::new(
            Arc::clone(&self.bus),
            &accessory.device,
            &accessory.property,
            accessory.states.clone(),
        )
        .with_timeout(self.config.accessory_timeout())
    }

    /// Observing site: as reported by the mount, else from the configuration.
    pub fn site(&self) -> ObservatoryResult<ObserverSite> {
        choose_site(self.mount().site()?, self.config.site)
    }

    /// Resolve `name` and compute where it is right now.
    pub fn locate(&self, name: &str) -> ObservatoryResult<TargetPosition> {
        let site = self.site()?;
        locate(self.resolver.as_ref(), name, &site, Utc::now())
    }

    /// Run one command, logging failures.
    pub fn execute(&self, command: &Command) -> ObservatoryResult<Outcome> {
        info!("Running {}", command.name());
        let result = self.dispatch(command);
        if let Err(e) = &result {
            error!("{} failed: {e}", command.name());
        }
        result
    }

    fn dispatch(&self, command: &Command) -> ObservatoryResult<Outcome> {
        match command {
            Command::SetLight { state } => self.set_accessory(&self.config.accessories.light, state),
            Command::TelescopeCover { state } => {
                self.set_accessory(&self.config.accessories.cover, state)
            }
            Command::Roof { state } => self.set_accessory(&self.config.accessories.roof, state),
            Command::Target { target_name } => self.target(target_name),
            Command::Sequence(request) => run_sequence(self, request),
            Command::Focus { direction, steps } => {
                let direction = direction.unwrap_or(self.config.focus.direction);
                let steps = steps.unwrap_or(self.config.focus.steps);
                self.focuser().move_relative(direction, steps)?;
                info!("Focusing complete.");
                Ok(Outcome::Done)
            }
            Command::ShowImage {
                directory,
                image_name,
            } => self.show_image(directory, image_name),
        }
    }

    fn set_accessory(&self, accessory: &AccessoryConfig, state: &str) -> ObservatoryResult<Outcome> {
        self.accessory(accessory).set_state(state)?;
        Ok(Outcome::Done)
    }

    fn target(&self, name: &str) -> ObservatoryResult<Outcome> {
        let position = self.locate(name)?;
        if !altitude_accepted(
            position.horizontal.altitude_deg,
            self.config.min_altitude_deg,
            self.confirm.as_ref(),
        ) {
            info!("Aborted slew due to low altitude.");
            return Ok(Outcome::Aborted);
        }
        self.mount().slew_to(&position.of_date)?;
        Ok(Outcome::Done)
    }

    fn show_image(&self, directory: &Path, image_name: &str) -> ObservatoryResult<Outcome> {
        show_image(&self.config.image_viewer, directory, image_name)?;
        Ok(Outcome::Done)
    }
}

/// The mount's reported site wins over the configured one.
pub fn choose_site(
    reported: Option<ObserverSite>,
    configured: Option<ObserverSite>,
) -> ObservatoryResult<ObserverSite> {
    reported.or(configured).ok_or(ObservatoryError::NoSite)
}

/// Open `{directory}/{image_name}.fits` in `viewer` without waiting for it.
pub fn show_image(viewer: &str, directory: &Path, image_name: &str) -> ObservatoryResult<PathBuf> {
    let path = directory.join(format!("{image_name}.fits"));
    if !path.is_file() {
        return Err(ObservatoryError::ImageNotFound(path));
    }
    std::process::Command::new(viewer)
        .arg(&path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    info!("Opened {} in {viewer}", path.display());
    Ok(path)
}
