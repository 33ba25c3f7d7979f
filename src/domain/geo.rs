//! Spherical distance and containment
//!
//! Haversine great-circle distance on a sphere with the IUGG mean Earth
//! radius. Accurate to ~0.5% which is well below GPS noise at geofence scale.

use crate::domain::types::{LatLon, Region};

/// Mean Earth radius in meters (IUGG)
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance between two points in meters
pub fn distance_meters(a: LatLon, b: LatLon) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Clamp guards against h drifting above 1.0 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

/// Whether a point lies inside (or on the boundary of) a region
#[inline]
pub fn is_inside(point: LatLon, region: &Region) -> bool {
    distance_meters(point, region.center) <= region.radius_meters
}

/// Point at `meters` due north of `origin` (test and replay helper)
pub fn offset_north(origin: LatLon, meters: f64) -> LatLon {
    let dlat = (meters / EARTH_RADIUS_M).to_degrees();
    LatLon::new(origin.lat + dlat, origin.lon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{RegionSpec, TransitionKind};

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} ± {tolerance}, got {actual}"
        );
    }

    #[test]
    fn test_zero_distance() {
        let p = LatLon::new(46.0, 14.5);
        assert_eq!(distance_meters(p, p), 0.0);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        // One degree along a meridian is R * pi / 180
        let d = distance_meters(LatLon::new(0.0, 0.0), LatLon::new(1.0, 0.0));
        assert_close(d, 111_195.08, 1.0);
    }

    #[test]
    fn test_symmetric() {
        let a = LatLon::new(46.0569, 14.5058);
        let b = LatLon::new(46.0500, 14.4690);
        assert_eq!(distance_meters(a, b), distance_meters(b, a));
    }

    #[test]
    fn test_known_city_pair() {
        // Ljubljana to Zagreb, roughly 117 km
        let lj = LatLon::new(46.0569, 14.5058);
        let zg = LatLon::new(45.8150, 15.9819);
        assert_close(distance_meters(lj, zg) / 1000.0, 117.0, 2.0);
    }

    #[test]
    fn test_antipodal_points() {
        let d = distance_meters(LatLon::new(0.0, 0.0), LatLon::new(0.0, 180.0));
        assert_close(d, std::f64::consts::PI * EARTH_RADIUS_M, 1.0);
    }

    #[test]
    fn test_offset_north_round_trip() {
        let origin = LatLon::new(46.0, 14.5);
        for meters in [50.0, 150.0, 500.0] {
            assert_close(distance_meters(origin, offset_north(origin, meters)), meters, 0.01);
        }
    }

    #[test]
    fn test_is_inside_boundary() {
        let region = RegionSpec::new("home", 46.0, 14.5, 200.0, &[TransitionKind::Enter])
            .into_region(0)
            .unwrap();
        let center = region.center;
        assert!(is_inside(center, &region));
        assert!(is_inside(offset_north(center, 150.0), &region));
        assert!(is_inside(offset_north(center, 199.9), &region));
        assert!(!is_inside(offset_north(center, 200.1), &region));
        assert!(!is_inside(offset_north(center, 500.0), &region));
    }
}
