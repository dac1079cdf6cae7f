use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Geographic point, longitude first like a GeoJSON coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lng: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// A point that cannot be a real position: non-finite, out of range, or the
    /// `0,0` placeholder written by a stale heartbeat.
    pub fn is_unset(&self) -> bool {
        !self.lng.is_finite()
            || !self.lat.is_finite()
            || self.lat.abs() > 90.0
            || self.lng.abs() > 180.0
            || (self.lng == 0.0 && self.lat == 0.0)
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = (other.lat - self.lat).to_radians();
        let dlng = (other.lng - self.lng).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }

    /// Lat/lng box enclosing the circle of `radius_m` around this point.
    /// Used as a cheap index prefilter before the exact distance check.
    pub fn bounding_box(&self, radius_m: f64) -> BoundingBox {
        let dlat = (radius_m / EARTH_RADIUS_M).to_degrees();
        let cos_lat = self.lat.to_radians().cos().abs().max(1e-6);
        let dlng = (radius_m / (EARTH_RADIUS_M * cos_lat)).to_degrees().min(180.0);
        BoundingBox {
            min_lat: self.lat - dlat,
            max_lat: self.lat + dlat,
            min_lng: self.lng - dlng,
            max_lng: self.lng + dlng,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn contains(&self, p: &GeoPoint) -> bool {
        p.lat >= self.min_lat && p.lat <= self.max_lat && p.lng >= self.min_lng && p.lng <= self.max_lng
    }
}

pub fn km(meters: f64) -> f64 {
    meters / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_known_points() {
        // Paris -> London, roughly 344 km
        let paris = GeoPoint::new(2.3522, 48.8566);
        let london = GeoPoint::new(-0.1276, 51.5072);
        let d = km(paris.distance_m(&london));
        assert!((d - 344.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn zero_distance_to_self() {
        let p = GeoPoint::new(77.59, 12.97);
        assert!(p.distance_m(&p) < 1e-6);
    }

    #[test]
    fn placeholder_location_is_unset() {
        assert!(GeoPoint::new(0.0, 0.0).is_unset());
        assert!(GeoPoint::new(f64::NAN, 10.0).is_unset());
        assert!(GeoPoint::new(10.0, 95.0).is_unset());
        assert!(!GeoPoint::new(77.59, 12.97).is_unset());
    }

    #[test]
    fn bounding_box_contains_points_within_radius() {
        let c = GeoPoint::new(77.59, 12.97);
        let bbox = c.bounding_box(15_000.0);
        let near = GeoPoint::new(77.65, 13.0);
        let far = GeoPoint::new(78.5, 12.97);
        assert!(c.distance_m(&near) < 15_000.0);
        assert!(bbox.contains(&near));
        assert!(!bbox.contains(&far));
    }
}
