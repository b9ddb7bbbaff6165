//! Spherical-earth geodesy.
//!
//! Haversine is accurate to well under 0.5% at sharing-radius distances,
//! which is all the proximity ordering needs.

use crate::core::{EARTH_RADIUS_METERS, GeoPoint};

/// Distances below this are treated as "same point" (no bearing).
pub const COINCIDENT_EPSILON_METERS: f64 = 1e-6;

/// Great-circle distance between two points in meters.
pub fn haversine_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h marginally above 1 for antipodal points.
    let c = 2.0 * h.min(1.0).sqrt().asin();
    EARTH_RADIUS_METERS * c
}

/// Initial bearing from `a` to `b` in degrees `[0, 360)`, clockwise from
/// true north. `None` when the points coincide.
pub fn initial_bearing(a: &GeoPoint, b: &GeoPoint) -> Option<f64> {
    if haversine_distance(a, b) < COINCIDENT_EPSILON_METERS {
        return None;
    }
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    Some(y.atan2(x).to_degrees().rem_euclid(360.0))
}

/// Point reached by travelling `distance_meters` from `origin` along the
/// great circle with initial `bearing_degrees`.
pub fn destination(origin: &GeoPoint, bearing_degrees: f64, distance_meters: f64) -> GeoPoint {
    let delta = distance_meters / EARTH_RADIUS_METERS;
    let theta = bearing_degrees.to_radians();
    let lat1 = origin.latitude.to_radians();
    let lon1 = origin.longitude.to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lon2 = lon1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    let longitude = (lon2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0;
    GeoPoint::new(lat2.to_degrees(), longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        let p = GeoPoint::new(48.8566, 2.3522);
        assert_eq!(haversine_distance(&p, &p), 0.0);
        assert_eq!(initial_bearing(&p, &p), None);
    }

    #[test]
    fn test_known_distance() {
        // One degree of latitude on the mean sphere.
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(1.0, 0.0);
        let d = haversine_distance(&a, &b);
        assert!((d - 111_195.08).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_cardinal_bearings() {
        let origin = GeoPoint::new(0.0, 0.0);
        let north = initial_bearing(&origin, &GeoPoint::new(0.001, 0.0));
        let east = initial_bearing(&origin, &GeoPoint::new(0.0, 0.001));
        let south = initial_bearing(&origin, &GeoPoint::new(-0.001, 0.0));
        let west = initial_bearing(&origin, &GeoPoint::new(0.0, -0.001));

        assert!(north.is_some_and(|b| b.abs() < 1e-9 || (360.0 - b) < 1e-9));
        assert!(east.is_some_and(|b| (b - 90.0).abs() < 1e-9));
        assert!(south.is_some_and(|b| (b - 180.0).abs() < 1e-9));
        assert!(west.is_some_and(|b| (b - 270.0).abs() < 1e-9));
    }

    #[test]
    fn test_destination_roundtrips_distance_and_bearing() {
        let origin = GeoPoint::new(37.7749, -122.4194);
        let target = destination(&origin, 60.0, 25.0);
        assert!((haversine_distance(&origin, &target) - 25.0).abs() < 1e-6);
        let bearing = initial_bearing(&origin, &target).unwrap_or_default();
        assert!((bearing - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_destination_wraps_antimeridian() {
        let origin = GeoPoint::new(0.0, 179.9999);
        let target = destination(&origin, 90.0, 100.0);
        assert!(target.longitude < -179.0);
        assert!(target.validate().is_ok());
    }
}
