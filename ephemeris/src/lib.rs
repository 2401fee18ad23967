//! Ephemeris calculations for pointing the telescope
//!
//! This crate converts catalog positions into something a mount can use:
//! sexagesimal parsing, precession to the current epoch, altitude/azimuth
//! for an observing site, and resolution of target names to coordinates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod celestial;
pub mod coordinates;
pub mod resolver;
pub mod time_utils;

pub use celestial::precess_j2000_to_date;
pub use coordinates::{horizontal, parse_dms, parse_hms, HorizontalCoordinate, ObserverSite};
pub use resolver::{CatalogResolver, ChainResolver, SimbadResolver, TargetResolver};
pub use time_utils::{greenwich_mean_sidereal_time_deg, julian_date, local_sidereal_time_deg};

/// Represents a point in the celestial sphere
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CelestialCoordinate {
    /// Right ascension in degrees, 0..360
    pub ra_deg: f64,
    /// Declination in degrees, -90..90
    pub dec_deg: f64,
}

impl CelestialCoordinate {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        Self {
            ra_deg: ra_deg.rem_euclid(360.0),
            dec_deg,
        }
    }

    pub fn from_hours(ra_hours: f64, dec_deg: f64) -> Self {
        Self::new(ra_hours * 15.0, dec_deg)
    }

    pub fn ra_hours(&self) -> f64 {
        self.ra_deg / 15.0
    }
}

/// Error types for ephemeris calculations
#[derive(Debug, Error)]
pub enum EphemerisError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Lookup failed: {0}")]
    Lookup(String),

    #[error("Cannot parse {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, EphemerisError>;

/// Trait for objects that have a position in the sky
pub trait CelestialObject {
    /// Get the position of the object at a specific time
    fn position_at(&self, time: DateTime<Utc>) -> Result<CelestialCoordinate>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_hours_round_trip() {
        let coord = CelestialCoordinate::from_hours(5.5880, -5.39);
        assert_abs_diff_eq!(coord.ra_deg, 83.82, epsilon = 1e-9);
        assert_abs_diff_eq!(coord.ra_hours(), 5.5880, epsilon = 1e-12);
    }

    #[test]
    fn test_ra_is_wrapped() {
        assert_abs_diff_eq!(CelestialCoordinate::new(-10.0, 0.0).ra_deg, 350.0);
        assert_abs_diff_eq!(CelestialCoordinate::new(370.0, 0.0).ra_deg, 10.0);
    }
}
