//! Great-circle distance and distance-decay weights.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Calculate the distance between two points using the haversine formula.
///
/// Returns the distance in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push `a` marginally above 1 for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}

/// How a tile's weight falls off with distance from the query point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistanceDecay {
    /// `w = exp(-d / d0)`.
    Exponential {
        /// Characteristic distance in km (bigger means slower decay).
        d0_km: f64,
    },
    /// `w = 1 / (1 + d / d0)^gamma`.
    Rational {
        /// Characteristic distance in km.
        d0_km: f64,
        /// Falloff exponent; non-positive values fall back to 1.
        gamma: f64,
    },
}

impl Default for DistanceDecay {
    fn default() -> Self {
        DistanceDecay::Rational {
            d0_km: 30.0,
            gamma: 2.0,
        }
    }
}

impl DistanceDecay {
    /// Weight in `[0, 1]` for a tile `d_km` away.
    ///
    /// A non-positive characteristic distance yields weight 0.
    pub fn weight(&self, d_km: f64) -> f64 {
        match *self {
            DistanceDecay::Exponential { d0_km } => {
                if d0_km <= 0.0 {
                    return 0.0;
                }
                (-d_km / d0_km).exp()
            }
            DistanceDecay::Rational { d0_km, gamma } => {
                if d0_km <= 0.0 {
                    return 0.0;
                }
                let gamma = if gamma <= 0.0 { 1.0 } else { gamma };
                1.0 / (1.0 + d_km / d0_km).powf(gamma)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_haversine_distance() {
        // Malmö to Stockholm is approximately 513 km
        let dist = haversine_km(55.6050, 13.0038, 59.3293, 18.0686);
        assert!((dist - 513.0).abs() < 5.0, "got {}", dist);
    }

    #[test]
    fn test_haversine_zero_for_same_point() {
        assert_eq!(haversine_km(55.667, 13.35, 55.667, 13.35), 0.0);
    }

    #[test]
    fn test_exponential_decay() {
        let decay = DistanceDecay::Exponential { d0_km: 30.0 };
        assert_relative_eq!(decay.weight(0.0), 1.0);
        assert_relative_eq!(decay.weight(30.0), (-1.0f64).exp());
        assert_eq!(DistanceDecay::Exponential { d0_km: 0.0 }.weight(1.0), 0.0);
    }

    #[test]
    fn test_rational_decay() {
        let decay = DistanceDecay::Rational { d0_km: 30.0, gamma: 2.0 };
        assert_relative_eq!(decay.weight(0.0), 1.0);
        assert_relative_eq!(decay.weight(30.0), 0.25);

        // Non-positive gamma falls back to 1
        let linear = DistanceDecay::Rational { d0_km: 30.0, gamma: -1.0 };
        assert_relative_eq!(linear.weight(30.0), 0.5);
    }

    #[test]
    fn test_decay_is_monotonic() {
        for decay in [
            DistanceDecay::Exponential { d0_km: 10.0 },
            DistanceDecay::Rational { d0_km: 10.0, gamma: 2.0 },
        ] {
            let mut last = f64::INFINITY;
            for d in 0..200 {
                let w = decay.weight(d as f64);
                assert!(w <= last);
                last = w;
            }
        }
    }
}
