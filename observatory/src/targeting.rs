//! Resolving a target and deciding whether it is high enough to observe.

use chrono::{DateTime, Utc};
use ephemeris::{
    horizontal, CelestialCoordinate, CelestialObject, HorizontalCoordinate, ObserverSite,
    TargetResolver,
};
use tracing::info;

use crate::error::{ObservatoryError, ObservatoryResult};

/// Asks the operator a yes/no question.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Accepts everything; used for `--yes` and unattended runs.
pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Where a named target is right now.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetPosition {
    pub name: String,
    /// Catalog position
    pub j2000: CelestialCoordinate,
    /// Position for the mount, precessed to the current equinox
    pub of_date: CelestialCoordinate,
    pub horizontal: HorizontalCoordinate,
}

pub fn locate(
    resolver: &dyn TargetResolver,
    name: &str,
    site: &ObserverSite,
    time: DateTime<Utc>,
) -> ObservatoryResult<TargetPosition> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ObservatoryError::InvalidParameter(
            "target name is empty".to_string(),
        ));
    }
    let j2000 = resolver.resolve(name)?;
    let of_date = j2000.position_at(time)?;
    let horizontal = horizontal(&of_date, site, time);
    info!(
        "{name}: RA {:.4}° DEC {:+.4}°, altitude {:.2}°, azimuth {:.2}°",
        j2000.ra_deg, j2000.dec_deg, horizontal.altitude_deg, horizontal.azimuth_deg
    );
    Ok(TargetPosition {
        name: name.to_string(),
        j2000,
        of_date,
        horizontal,
    })
}

/// Prompt shown when a target is below the altitude limit.
pub fn low_altitude_prompt(altitude_deg: f64) -> String {
    format!("Target is at {altitude_deg:.2} degrees altitude, continue? (y/n): ")
}

/// True if the target is high enough or the operator accepts it anyway.
pub fn altitude_accepted(altitude_deg: f64, min_altitude_deg: f64, confirm: &dyn Confirm) -> bool {
    altitude_deg >= min_altitude_deg || confirm.confirm(&low_altitude_prompt(altitude_deg))
}
