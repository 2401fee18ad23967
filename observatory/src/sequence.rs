//! Imaging sequences: guided, dithered exposures through one filter.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hardware::phd2::{Guider, Phd2Error};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::commands::{Observatory, Outcome};
use crate::config::DitherMode;
use crate::error::{ObservatoryError, ObservatoryResult};
use crate::targeting::altitude_accepted;

fn default_slew() -> bool {
    true
}

/// Parameters of a `sequence` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRequest {
    pub target: String,
    pub base_directory: PathBuf,
    pub filter_name: String,
    pub exposure_count: u32,
    /// Seconds per frame
    pub exposure_time: f64,
    /// Point the mount at the target before guiding starts
    #[serde(default = "default_slew")]
    pub slew: bool,
}

/// Where a finished sequence left its frames.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceReport {
    pub directory: PathBuf,
    pub images: Vec<PathBuf>,
}

/// `20240807_2230UT`
pub fn timestamp_label(time: DateTime<Utc>) -> String {
    format!("{}UT", time.format("%Y%m%d_%H%M"))
}

fn path_safe(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_whitespace() || c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

/// `{base}/{target}_{YYYYMMDD_HHMM}UT`
pub fn session_directory(base: &Path, target: &str, time: DateTime<Utc>) -> PathBuf {
    base.join(format!("{}_{}", path_safe(target), timestamp_label(time)))
}

/// `{directory}/{filter}_{YYYYMMDD_HHMM}UT_{index:04}.fits`
pub fn image_path(directory: &Path, filter: &str, time: DateTime<Utc>, index: u32) -> PathBuf {
    directory.join(format!(
        "{}_{}_{index:04}.fits",
        path_safe(filter),
        timestamp_label(time)
    ))
}

impl SequenceRequest {
    fn validate(&self) -> ObservatoryResult<()> {
        if self.exposure_count == 0 {
            return Err(ObservatoryError::InvalidParameter(
                "exposure_count must be at least 1".to_string(),
            ));
        }
        if !self.exposure_time.is_finite() || self.exposure_time <= 0.0 {
            return Err(ObservatoryError::InvalidParameter(format!(
                "exposure_time must be positive, got {}",
                self.exposure_time
            )));
        }
        Ok(())
    }
}

/// Run a sequence. Guiding, if it was started, is stopped again whether
/// or not the frames succeed.
pub(crate) fn run_sequence(
    observatory: &Observatory,
    request: &SequenceRequest,
) -> ObservatoryResult<Outcome> {
    request.validate()?;
    let config = observatory.config();
    let slot = config.filter_slot(&request.filter_name)?;

    let position = observatory.locate(&request.target)?;
    if !altitude_accepted(
        position.horizontal.altitude_deg,
        config.min_altitude_deg,
        observatory.confirmer(),
    ) {
        info!("Sequence aborted due to low altitude.");
        return Ok(Outcome::Aborted);
    }

    let directory = session_directory(&request.base_directory, &request.target, Utc::now());
    std::fs::create_dir_all(&directory)?;
    info!("Storing {} frames in {}", request.exposure_count, directory.display());

    if request.slew {
        observatory.mount().slew_to(&position.of_date)?;
    }

    let guider = start_guiding(observatory)?;
    let result = capture_frames(observatory, request, slot, &directory, guider);
    if let Some(guider) = guider {
        match guider.stop() {
            Ok(()) => info!("Guiding stopped"),
            Err(e) => warn!("Failed to stop guiding: {e}"),
        }
    }

    let images = result?;
    info!("Sequence complete. Images stored in {}.", directory.display());
    Ok(Outcome::Sequence(SequenceReport { directory, images }))
}

/// Returns the guider if guiding is running.
fn start_guiding(observatory: &Observatory) -> ObservatoryResult<Option<&dyn Guider>> {
    let settings = &observatory.config().guiding;
    let Some(guider) = observatory.guider() else {
        if settings.required {
            return Err(ObservatoryError::Guider(Phd2Error::Disconnected));
        }
        warn!("No guider connected, imaging unguided");
        return Ok(None);
    };

    let started = guider
        .set_dec_guide_mode(&settings.dec_guide_mode)
        .and_then(|()| guider.start(&settings.settle));
    match started {
        Ok(()) => Ok(Some(guider)),
        Err(e) if settings.required => Err(e.into()),
        Err(e) => {
            warn!("Guiding failed to start, imaging unguided: {e}");
            if let Err(e) = guider.stop() {
                debug!("Stopping guider after failed start: {e}");
            }
            Ok(None)
        }
    }
}

fn capture_frames(
    observatory: &Observatory,
    request: &SequenceRequest,
    slot: u32,
    directory: &Path,
    guider: Option<&dyn Guider>,
) -> ObservatoryResult<Vec<PathBuf>> {
    let config = observatory.config();
    observatory.filter_wheel().select(slot)?;
    let camera = observatory.camera();
    let mut images = Vec::with_capacity(request.exposure_count as usize);

    for index in 1..=request.exposure_count {
        if index > 1 {
            dither(observatory, guider, index - 1)?;
        }
        let path = image_path(directory, &request.filter_name, Utc::now(), index);
        camera.expose(request.exposure_time, &path)?;
        images.push(path);
    }
    debug!("Captured {} frames with {}", images.len(), config.devices.camera);
    Ok(images)
}

fn dither(observatory: &Observatory, guider: Option<&dyn Guider>, index: u32) -> ObservatoryResult<()> {
    let config = observatory.config();
    match (config.dither.mode, guider) {
        (DitherMode::None, _) => Ok(()),
        (DitherMode::Mount, _) => {
            observatory
                .mount()
                .dither(index as usize, config.dither_pulse())?;
            Ok(())
        }
        (DitherMode::Guider, Some(guider)) => {
            match guider.dither(config.dither.pixels, &config.guiding.settle) {
                Ok(()) => Ok(()),
                Err(e) if config.guiding.required => Err(e.into()),
                Err(e) => {
                    warn!("Dither did not settle: {e}");
                    Ok(())
                }
            }
        }
        (DitherMode::Guider, None) => {
            debug!("Skipping dither, guiding is not running");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_naming() {
        let time = Utc.with_ymd_and_hms(2024, 8, 7, 22, 30, 59).unwrap();
        assert_eq!(timestamp_label(time), "20240807_2230UT");
        assert_eq!(
            session_directory(Path::new("/images"), "M42", time),
            PathBuf::from("/images/M42_20240807_2230UT")
        );
        assert_eq!(
            image_path(Path::new("/images/M42_20240807_2230UT"), "R", time, 7),
            PathBuf::from("/images/M42_20240807_2230UT/R_20240807_2230UT_0007.fits")
        );
    }

    #[test]
    fn test_target_names_are_path_safe() {
        let time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 0).unwrap();
        assert_eq!(
            session_directory(Path::new("/images"), "NGC 7000 / North America", time),
            PathBuf::from("/images/NGC_7000___North_America_20240102_0304UT")
        );
    }

    #[test]
    fn test_request_defaults_to_slewing() {
        let request: SequenceRequest = serde_json::from_str(
            r#"{"target":"M42","base_directory":"/images","filter_name":"R","exposure_count":5,"exposure_time":30}"#,
        )
        .unwrap();
        assert!(request.slew);
        request.validate().unwrap();

        let zero = SequenceRequest {
            exposure_count: 0,
            ..request.clone()
        };
        assert!(zero.validate().is_err());
        let negative = SequenceRequest {
            exposure_time: -1.0,
            ..request
        };
        assert!(negative.validate().is_err());
    }
}
