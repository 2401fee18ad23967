//! Catalog positions at the current epoch.

use chrono::{DateTime, Utc};

use crate::time_utils::{julian_centuries, julian_date};
use crate::{CelestialCoordinate, CelestialObject, Result};

const ARCSEC_TO_RAD: f64 = std::f64::consts::PI / (180.0 * 3600.0);

/// Precess a J2000.0 position to the mean equinox of `jd`.
///
/// Uses the IAU 1976 rigorous formulae (Meeus, ch. 21). Nutation and
/// aberration are below the pointing accuracy of the mount and are ignored.
pub fn precess_j2000_to_date(coord: &CelestialCoordinate, jd: f64) -> CelestialCoordinate {
    let t = julian_centuries(jd);
    let t2 = t * t;
    let t3 = t2 * t;
    let zeta = (2306.2181 * t + 0.301_88 * t2 + 0.017_998 * t3) * ARCSEC_TO_RAD;
    let z = (2306.2181 * t + 1.094_68 * t2 + 0.018_203 * t3) * ARCSEC_TO_RAD;
    let theta = (2004.3109 * t - 0.426_65 * t2 - 0.041_833 * t3) * ARCSEC_TO_RAD;

    let ra0 = coord.ra_deg.to_radians();
    let dec0 = coord.dec_deg.to_radians();

    let a = dec0.cos() * (ra0 + zeta).sin();
    let b = theta.cos() * dec0.cos() * (ra0 + zeta).cos() - theta.sin() * dec0.sin();
    let c = theta.sin() * dec0.cos() * (ra0 + zeta).cos() + theta.cos() * dec0.sin();

    let ra = a.atan2(b) + z;
    let dec = c.clamp(-1.0, 1.0).asin();
    CelestialCoordinate::new(ra.to_degrees(), dec.to_degrees())
}

/// Catalog (J2000) positions move only by precession over the lifetime of
/// an observing run.
impl CelestialObject for CelestialCoordinate {
    fn position_at(&self, time: DateTime<Utc>) -> Result<CelestialCoordinate> {
        Ok(precess_j2000_to_date(self, julian_date(time)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_utils::J2000_JD;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_no_precession_at_epoch() {
        let m42 = CelestialCoordinate::new(83.822, -5.391);
        let same = precess_j2000_to_date(&m42, J2000_JD);
        assert_abs_diff_eq!(same.ra_deg, m42.ra_deg, epsilon = 1e-12);
        assert_abs_diff_eq!(same.dec_deg, m42.dec_deg, epsilon = 1e-12);
    }

    #[test]
    fn test_meeus_theta_persei() {
        // Meeus example 21.b, position already corrected for proper motion
        let star = CelestialCoordinate::new(41.054_063, 49.227_750);
        let moved = precess_j2000_to_date(&star, 2_462_088.69);
        assert_abs_diff_eq!(moved.ra_deg, 41.547_214, epsilon = 1e-5);
        assert_abs_diff_eq!(moved.dec_deg, 49.348_483, epsilon = 1e-5);
    }

    #[test]
    fn test_position_at_uses_time() {
        use chrono::TimeZone;
        let vega = CelestialCoordinate::new(279.2347, 38.7837);
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let of_date = vega.position_at(now).unwrap();
        // roughly 50 arcsec per year along the ecliptic
        assert!((of_date.ra_deg - vega.ra_deg).abs() > 0.1);
        assert!((of_date.ra_deg - vega.ra_deg).abs() < 0.5);
    }
}
