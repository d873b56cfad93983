//! Great-circle distance on the mean-radius sphere.

/// Mean Earth radius in kilometres, shared by the scalar distance here and
/// the columnar form the aggregator builds.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres between two (lat, lon) degree pairs.
///
/// Spherical law of cosines with the cosine clamped into the arccos domain.
/// The aggregator mirrors this exact operation sequence as a column
/// expression, so pointwise and columnar distances agree to the bit and a
/// threshold computed from one side holds exactly on the other.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let to_rad = std::f64::consts::PI / 180.0;
    let phi1 = lat1 * to_rad;
    let phi2 = lat2 * to_rad;
    let d_lambda = (lon2 - lon1) * to_rad;
    let cosine = phi1.sin() * phi2.sin() + phi1.cos() * phi2.cos() * d_lambda.cos();
    EARTH_RADIUS_KM * cosine.clamp(-1.0, 1.0).acos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_points_are_at_most_float_noise_apart() {
        let d = haversine_km(51.5, -3.0, 51.5, -3.0);
        // sub-metre residual from the arccos near 1.0
        assert!(d < 1e-3, "d = {d}");
    }

    #[test]
    fn newport_office_to_bus_station() {
        // Known pair roughly 217 m apart; tolerance one metre.
        let d = haversine_km(51.5886, -2.9997, 51.5879, -2.9967);
        assert!((d - 0.217).abs() < 0.001, "d = {d}");
    }

    #[test]
    fn symmetric() {
        let a = haversine_km(51.5886, -2.9997, 51.5879, -2.9967);
        let b = haversine_km(51.5879, -2.9967, 51.5886, -2.9997);
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn quarter_meridian() {
        // Pole to equator along a meridian is a quarter of the great circle.
        let d = haversine_km(0.0, 0.0, 90.0, 0.0);
        let expected = std::f64::consts::PI * EARTH_RADIUS_KM / 2.0;
        assert!((d - expected).abs() < 1e-6);
    }
}
