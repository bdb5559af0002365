use crate::models::location::GeoPoint;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub const DEFAULT_AVERAGE_SPEED_KMH: f64 = 15.0;

/// Great-circle distance in meters.
pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lng = (b.longitude - a.longitude).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_M * central_angle
}

/// Whole minutes to cover `distance_m` at `average_speed_kmh`, never less than one.
pub fn eta_minutes(distance_m: f64, average_speed_kmh: f64) -> u32 {
    let meters_per_minute = (average_speed_kmh * 1000.0) / 60.0;
    if meters_per_minute.is_nan() || meters_per_minute <= 0.0 || !distance_m.is_finite() {
        return 1;
    }

    let minutes = (distance_m.max(0.0) / meters_per_minute).round();
    (minutes as u32).max(1)
}

pub fn format_coordinate(value: f64) -> String {
    format!("{value:.6}")
}

pub fn format_eta(minutes: u32) -> String {
    format!("{minutes} min")
}
