//! Julian dates and sidereal time.

use chrono::{DateTime, Utc};

/// Julian date of the Unix epoch.
const UNIX_EPOCH_JD: f64 = 2_440_587.5;

/// Julian date of J2000.0 (2000-01-01 12:00 TT).
pub const J2000_JD: f64 = 2_451_545.0;

pub fn julian_date(time: DateTime<Utc>) -> f64 {
    let seconds = time.timestamp() as f64 + time.timestamp_subsec_nanos() as f64 / 1e9;
    seconds / 86_400.0 + UNIX_EPOCH_JD
}

/// Julian centuries since J2000.0.
pub fn julian_centuries(jd: f64) -> f64 {
    (jd - J2000_JD) / 36_525.0
}

/// Greenwich mean sidereal time in degrees, 0..360 (Meeus eq. 12.4).
pub fn greenwich_mean_sidereal_time_deg(jd: f64) -> f64 {
    let t = julian_centuries(jd);
    let gmst = 280.460_618_37 + 360.985_647_366_29 * (jd - J2000_JD) + 0.000_387_933 * t * t
        - t * t * t / 38_710_000.0;
    gmst.rem_euclid(360.0)
}

/// Local mean sidereal time in degrees for an east-positive longitude.
pub fn local_sidereal_time_deg(jd: f64, longitude_deg: f64) -> f64 {
    (greenwich_mean_sidereal_time_deg(jd) + longitude_deg).rem_euclid(360.0)
}
