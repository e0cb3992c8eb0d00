//! Great-circle distance

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine distance between two WGS84 points, in meters
pub fn haversine_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// `1 - distance/D` inside the proximity radius, 0 outside
pub fn location_score(distance_meters: f64, proximity_meters: f64) -> f64 {
    if proximity_meters <= 0.0 || distance_meters >= proximity_meters {
        0.0
    } else {
        1.0 - distance_meters / proximity_meters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_point_is_zero() {
        assert_eq!(haversine_meters(40.7128, -74.0060, 40.7128, -74.0060), 0.0);
    }

    #[test]
    fn test_small_offset_in_manhattan() {
        let d = haversine_meters(40.7128, -74.0060, 40.7129, -74.0061);
        assert!((d - 13.9).abs() < 0.5, "got {}", d);
    }

    #[test]
    fn test_location_score_linear_inside_radius() {
        assert!((location_score(20.0, 50.0) - 0.6).abs() < 1e-12);
        assert_eq!(location_score(0.0, 50.0), 1.0);
        assert_eq!(location_score(50.0, 50.0), 0.0);
        assert_eq!(location_score(500.0, 50.0), 0.0);
    }
}
