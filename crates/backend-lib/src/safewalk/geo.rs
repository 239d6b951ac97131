// ============================
// crates/backend-lib/src/safewalk/geo.rs
// ============================
//! Great-circle distance and the off-route heuristic.
use campus_safety_common::{GeoPoint, OffRouteCheck};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6371e3;

/// Haversine distance between two points, in meters
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Moving away from the destination by strictly more than `threshold_m`.
/// No previous distance means no verdict.
pub fn moved_away(previous_m: Option<f64>, current_m: f64, threshold_m: f64) -> bool {
    previous_m.is_some_and(|previous| current_m - previous > threshold_m)
}

pub fn check_off_route(
    current: &GeoPoint,
    destination: &GeoPoint,
    previous_m: Option<f64>,
    threshold_m: f64,
) -> OffRouteCheck {
    let current_distance = haversine_m(current, destination);
    OffRouteCheck {
        current_distance,
        is_off_route: moved_away(previous_m, current_distance, threshold_m),
    }
}
