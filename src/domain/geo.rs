//! Great-circle distance on a spherical Earth
//!
//! The haversine formula is the single shared distance primitive: the
//! detector's departure check, the proximity notifier and the tests all go
//! through `haversine_distance`, so results are bit-identical everywhere.

use crate::domain::types::GeoPoint;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two coordinates, in meters.
///
/// `a = sin²(Δφ/2) + cos(φ1)·cos(φ2)·sin²(Δλ/2)`,
/// `d = 2R·atan2(√a, √(1−a))`.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let delta_phi = (b.latitude - a.latitude).to_radians();
    let delta_lambda = (b.longitude - a.longitude).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}
