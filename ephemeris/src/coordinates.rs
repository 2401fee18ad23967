//! Sexagesimal parsing and equatorial to horizontal conversion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time_utils::{julian_date, local_sidereal_time_deg};
use crate::{CelestialCoordinate, EphemerisError, Result};

/// Geographic location of the telescope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObserverSite {
    pub latitude_deg: f64,
    /// East-positive longitude, -180..180.
    pub longitude_deg: f64,
    #[serde(default)]
    pub elevation_m: f64,
}

impl ObserverSite {
    pub fn new(latitude_deg: f64, longitude_deg: f64, elevation_m: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            elevation_m,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizontalCoordinate {
    pub altitude_deg: f64,
    /// Measured from north through east, 0..360.
    pub azimuth_deg: f64,
}

/// Altitude and azimuth of `coord` as seen from `site` at `time`.
///
/// `coord` should already be referred to the equinox of date; refraction is
/// ignored.
pub fn horizontal(
    coord: &CelestialCoordinate,
    site: &ObserverSite,
    time: DateTime<Utc>,
) -> HorizontalCoordinate {
    let lst = local_sidereal_time_deg(julian_date(time), site.longitude_deg);
    let hour_angle = (lst - coord.ra_deg).to_radians();
    let lat = site.latitude_deg.to_radians();
    let dec = coord.dec_deg.to_radians();

    let sin_alt = lat.sin() * dec.sin() + lat.cos() * dec.cos() * hour_angle.cos();
    let altitude = sin_alt.clamp(-1.0, 1.0).asin();
    let azimuth = (-dec.cos() * hour_angle.sin())
        .atan2(dec.sin() * lat.cos() - dec.cos() * lat.sin() * hour_angle.cos());

    HorizontalCoordinate {
        altitude_deg: altitude.to_degrees(),
        azimuth_deg: azimuth.to_degrees().rem_euclid(360.0),
    }
}

fn split_fields(text: &str) -> Result<Vec<f64>> {
    let fields: Vec<&str> = text
        .split(|c: char| c == ':' || c.is_whitespace())
        .filter(|field| !field.is_empty())
        .collect();
    if fields.is_empty() || fields.len() > 3 {
        return Err(EphemerisError::Parse(format!("'{text}' as sexagesimal")));
    }
    fields
        .iter()
        .map(|field| {
            field
                .parse::<f64>()
                .map_err(|_| EphemerisError::Parse(format!("'{field}' in '{text}'")))
        })
        .collect()
}

fn sexagesimal_to_decimal(fields: &[f64], text: &str) -> Result<f64> {
    let minutes = fields.get(1).copied().unwrap_or(0.0);
    let seconds = fields.get(2).copied().unwrap_or(0.0);
    if !(0.0..60.0).contains(&minutes) || !(0.0..60.0).contains(&seconds) {
        return Err(EphemerisError::Parse(format!(
            "'{text}': minutes and seconds must be below 60"
        )));
    }
    Ok(fields[0] + minutes / 60.0 + seconds / 3600.0)
}

/// Parse right ascension given as `"hh mm ss.s"` or `"hh:mm:ss.s"` into degrees.
pub fn parse_hms(text: &str) -> Result<f64> {
    let fields = split_fields(text.trim())?;
    if fields[0] < 0.0 {
        return Err(EphemerisError::Parse(format!("'{text}': negative right ascension")));
    }
    let hours = sexagesimal_to_decimal(&fields, text)?;
    if hours >= 24.0 {
        return Err(EphemerisError::Parse(format!("'{text}': right ascension past 24h")));
    }
    Ok(hours * 15.0)
}

/// Parse declination given as `"+dd mm ss.s"` or `"-dd:mm:ss"` into degrees.
///
/// The sign applies to the whole value, so `"-00 30 00"` is -0.5.
pub fn parse_dms(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    let (sign, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let fields = split_fields(unsigned)?;
    if fields[0] < 0.0 {
        return Err(EphemerisError::Parse(format!("'{text}': misplaced sign")));
    }
    let degrees = sexagesimal_to_decimal(&fields, text)?;
    if degrees > 90.0 {
        return Err(EphemerisError::Parse(format!("'{text}': declination beyond 90°")));
    }
    Ok(sign * degrees)
}
