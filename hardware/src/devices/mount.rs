//! Equatorial mount driver.
//!
//! Uses the standard INDI telescope properties:
//!
//! - `GEOGRAPHIC_COORD` (`LAT`, `LONG` 0-360 east, `ELEV`) for the site
//! - `ON_COORD_SET` + `EQUATORIAL_EOD_COORD` (`RA` hours, `DEC` degrees) for slews
//! - `TELESCOPE_MOTION_NS` / `TELESCOPE_MOTION_WE` for manual motion pulses

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ephemeris::{CelestialCoordinate, ObserverSite};
use tracing::{debug, info};

use super::{set_number_and_wait, DeviceBus};
use crate::indi::{IndiError, IndiResult, SwitchState};

const GEOGRAPHIC_COORD: &str = "GEOGRAPHIC_COORD";
const ON_COORD_SET: &str = "ON_COORD_SET";
const EQUATORIAL_EOD_COORD: &str = "EQUATORIAL_EOD_COORD";

/// Default time allowed for a slew to complete.
pub const DEFAULT_SLEW_TIMEOUT: Duration = Duration::from_secs(180);

/// Time allowed for the site location to be announced after connecting.
const PROPERTY_TIMEOUT: Duration = Duration::from_secs(5);

/// Manual motion direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionDirection {
    North,
    South,
    East,
    West,
}

impl MotionDirection {
    /// INDI (property, element) pair driving this direction.
    fn switch(&self) -> (&'static str, &'static str) {
        match self {
            MotionDirection::North => ("TELESCOPE_MOTION_NS", "MOTION_NORTH"),
            MotionDirection::South => ("TELESCOPE_MOTION_NS", "MOTION_SOUTH"),
            MotionDirection::West => ("TELESCOPE_MOTION_WE", "MOTION_WEST"),
            MotionDirection::East => ("TELESCOPE_MOTION_WE", "MOTION_EAST"),
        }
    }
}

impl fmt::Display for MotionDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            MotionDirection::North => "north",
            MotionDirection::South => "south",
            MotionDirection::East => "east",
            MotionDirection::West => "west",
        };
        f.write_str(s)
    }
}

/// INDI equatorial mount.
pub struct Mount {
    bus: Arc<dyn DeviceBus>,
    device: String,
    slew_timeout: Duration,
}

impl Mount {
    pub fn new(bus: Arc<dyn DeviceBus>, device: &str) -> Self {
        Self {
            bus,
            device: device.to_string(),
            slew_timeout: DEFAULT_SLEW_TIMEOUT,
        }
    }

    pub fn with_slew_timeout(mut self, timeout: Duration) -> Self {
        self.slew_timeout = timeout;
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Site location as configured in the mount driver.
    ///
    /// Returns `Ok(None)` if the driver never announces `GEOGRAPHIC_COORD`.
    pub fn site(&self) -> IndiResult<Option<ObserverSite>> {
        let prop = match self
            .bus
            .wait_for_property(&self.device, GEOGRAPHIC_COORD, PROPERTY_TIMEOUT)
        {
            Ok(prop) => prop,
            Err(IndiError::Timeout { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let latitude = prop.number("LAT")?;
        let mut longitude = prop.number("LONG")?;
        if longitude > 180.0 {
            longitude -= 360.0;
        }
        let elevation = prop.number("ELEV").unwrap_or(0.0);
        Ok(Some(ObserverSite::new(latitude, longitude, elevation)))
    }

    /// Current pointing in epoch-of-date coordinates, if known.
    pub fn position(&self) -> Option<CelestialCoordinate> {
        let prop = self.bus.property(&self.device, EQUATORIAL_EOD_COORD)?;
        let ra_hours = prop.number("RA").ok()?;
        let dec = prop.number("DEC").ok()?;
        Some(CelestialCoordinate::from_hours(ra_hours, dec))
    }

    /// Slew to `target` (epoch-of-date) and keep tracking once there.
    ///
    /// Blocks until the driver reports the slew finished.
    pub fn slew_to(&self, target: &CelestialCoordinate) -> IndiResult<()> {
        self.bus.set_switch(
            &self.device,
            ON_COORD_SET,
            &[
                ("TRACK", SwitchState::On),
                ("SLEW", SwitchState::Off),
                ("SYNC", SwitchState::Off),
            ],
        )?;

        info!(
            "Slewing {} to RA {:.4}h DEC {:+.4}°",
            self.device,
            target.ra_hours(),
            target.dec_deg
        );
        set_number_and_wait(
            self.bus.as_ref(),
            &self.device,
            EQUATORIAL_EOD_COORD,
            &[("RA", target.ra_hours()), ("DEC", target.dec_deg)],
            self.slew_timeout,
        )?;
        info!(
            "Slewed to RA: {:.4}, DEC: {:.4}",
            target.ra_deg, target.dec_deg
        );
        Ok(())
    }

    /// Drive the mount in one direction for `duration`, then stop.
    pub fn pulse(&self, direction: MotionDirection, duration: Duration) -> IndiResult<()> {
        let (property, element) = direction.switch();
        debug!("Pulsing {} {direction} for {duration:?}", self.device);
        self.bus
            .set_switch(&self.device, property, &[(element, SwitchState::On)])?;
        std::thread::sleep(duration);
        self.bus
            .set_switch(&self.device, property, &[(element, SwitchState::Off)])
    }

    /// Offset the pointing slightly between frames.
    ///
    /// Odd frame indices move north-west, even ones south-east, so a run of
    /// dithers oscillates around the target instead of walking away from it.
    pub fn dither(&self, frame_index: usize, pulse: Duration) -> IndiResult<()> {
        let (ns, we) = if frame_index % 2 == 1 {
            (MotionDirection::North, MotionDirection::West)
        } else {
            (MotionDirection::South, MotionDirection::East)
        };
        self.pulse(ns, pulse)?;
        self.pulse(we, pulse)?;
        info!("Dithered {ns}-{we} before frame {}", frame_index + 1);
        Ok(())
    }
}
