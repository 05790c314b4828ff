//! Great-circle distance and zoom-level display policy.

use playmap_core::GeoPoint;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters. Used for both listing re-sort and the
/// nearest-facility endpoint so distances are comparable across endpoints.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Zoom-dependent score floors. Coarse zoom shows only high-score records;
/// the floor relaxes step by step until full detail at high zoom.
#[derive(Debug, Clone)]
pub struct ZoomPolicy {
    /// `(max_zoom, floor)` steps, ascending by zoom. The first step whose
    /// zoom is >= the requested zoom wins; past the last step the floor is 0.
    steps: Vec<(u8, f64)>,
}

impl Default for ZoomPolicy {
    fn default() -> Self {
        Self {
            steps: vec![(8, 50.0), (10, 30.0), (12, 10.0)],
        }
    }
}

impl ZoomPolicy {
    pub fn score_floor(&self, zoom: u8) -> f64 {
        self.steps
            .iter()
            .find(|(max_zoom, _)| zoom <= *max_zoom)
            .map(|(_, floor)| *floor)
            .unwrap_or(0.0)
    }

    /// Above the last step every record is shown; at or below it, unfiltered
    /// queries are restricted to district-cap eligible records.
    pub fn full_detail(&self, zoom: u8) -> bool {
        match self.steps.last() {
            Some((max_zoom, _)) => zoom > *max_zoom,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_floor_relaxes_with_zoom() {
        let policy = ZoomPolicy::default();
        assert_eq!(policy.score_floor(6), 50.0);
        assert_eq!(policy.score_floor(8), 50.0);
        assert_eq!(policy.score_floor(9), 30.0);
        assert_eq!(policy.score_floor(11), 10.0);
        assert_eq!(policy.score_floor(13), 0.0);
        assert!(!policy.full_detail(12));
        assert!(policy.full_detail(13));
    }

    #[test]
    fn haversine_matches_one_degree_of_latitude() {
        let a = GeoPoint { lat: 37.0, lng: 127.0 };
        let b = GeoPoint { lat: 38.0, lng: 127.0 };
        // One degree of latitude on a 6371km sphere is ~111.19km.
        let d = haversine_m(a, b);
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
        // Symmetric, and zero at the same point.
        assert_eq!(haversine_m(b, a), d);
        assert_eq!(haversine_m(a, a), 0.0);
    }
}
