//! Ellipsoidal geodesy on the WGS84 ellipsoid
//!
//! Implements Vincenty's iterative solutions to the two classic geodesic problems:
//!
//! - **Inverse**: distance and azimuths between two known points
//! - **Direct**: destination point from a start point, azimuth and distance
//!
//! Azimuths are compass bearings (0° = north, clockwise). Mathematical angles
//! (0° = east, counter-clockwise) are converted with [`azimuth_to_angle`] and
//! [`angle_to_azimuth`].
//!
//! # References
//!
//! - Vincenty, T. (1975). "Direct and inverse solutions of geodesics on the ellipsoid
//!   with application of nested equations." Survey Review, 23(176), 88-93.

use thiserror::Error;

/// WGS84 semi-major axis (m)
pub const SEMI_MAJOR_AXIS: f64 = 6378137.0;

/// WGS84 flattening
pub const FLATTENING: f64 = 1.0 / 298.257223563;

/// WGS84 semi-minor axis (m)
pub const SEMI_MINOR_AXIS: f64 = SEMI_MAJOR_AXIS * (1.0 - FLATTENING);

/// Successive iterations closer than this (radians) are considered converged
const CONVERGENCE_THRESHOLD: f64 = 1e-9;

/// Upper bound on refinement iterations (nearly antipodal points converge slowly or never)
const MAX_ITERATIONS: usize = 200;

/// Points closer than this (degrees) on both axes are treated as identical
const IDENTICAL_POINT_EPSILON: f64 = 1e-12;

/// Errors raised by the iterative solvers
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum GeodesyError {
    /// Iteration did not settle, typically for nearly antipodal points
    #[error("geodesic iteration failed to converge after {0} iterations")]
    NoConvergence(usize),
}

/// Result of the inverse problem
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Inverse {
    /// Ellipsoidal distance in meters
    pub distance: f64,
    /// Bearing from the first point towards the second (degrees, 0..360)
    pub azimuth_forward: f64,
    /// Bearing from the second point back towards the first (degrees, 0..360)
    pub azimuth_reverse: f64,
}

/// Result of the direct problem
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub latitude: f64,
    pub longitude: f64,
    /// Bearing from the projected point back towards the start (degrees, 0..360)
    pub azimuth_reverse: f64,
}

/// Normalize a bearing into `[0, 360)`.
#[inline]
pub fn normalize_azimuth(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Normalize a longitude into `[-180, 180)`.
#[inline]
pub fn normalize_longitude(degrees: f64) -> f64 {
    (degrees + 180.0).rem_euclid(360.0) - 180.0
}

/// Convert a compass azimuth into a mathematical angle.
///
/// ```text
/// angle = (90 - azimuth) mod 360
/// ```
#[inline]
pub fn azimuth_to_angle(azimuth: f64) -> f64 {
    normalize_azimuth(90.0 - azimuth)
}

/// Convert a mathematical angle into a compass azimuth (inverse of [`azimuth_to_angle`]).
#[inline]
pub fn angle_to_azimuth(angle: f64) -> f64 {
    normalize_azimuth(90.0 - angle)
}

/// Series coefficients A and B shared by both problems
#[inline]
fn series_coefficients(cos_sq_alpha: f64) -> (f64, f64) {
    let a2 = SEMI_MAJOR_AXIS * SEMI_MAJOR_AXIS;
    let b2 = SEMI_MINOR_AXIS * SEMI_MINOR_AXIS;
    let u_sq = cos_sq_alpha * (a2 - b2) / b2;
    let big_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
    (big_a, big_b)
}

#[inline]
fn delta_sigma(big_b: f64, sin_sigma: f64, cos_sigma: f64, cos_2sigma_m: f64) -> f64 {
    let c2 = cos_2sigma_m * cos_2sigma_m;
    big_b
        * sin_sigma
        * (cos_2sigma_m
            + big_b / 4.0
                * (cos_sigma * (-1.0 + 2.0 * c2)
                    - big_b / 6.0
                        * cos_2sigma_m
                        * (-3.0 + 4.0 * sin_sigma * sin_sigma)
                        * (-3.0 + 4.0 * c2)))
}

/// Solve the inverse problem between two points given in decimal degrees.
///
/// Identical (or numerically identical) points short-circuit to a zero result
/// without iterating, which also avoids a division by zero in the azimuth terms.
pub fn distance_and_azimuth(
    lat1: f64,
    lon1: f64,
    lat2: f64,
    lon2: f64,
) -> Result<Inverse, GeodesyError> {
    let zero = Inverse {
        distance: 0.0,
        azimuth_forward: 0.0,
        azimuth_reverse: 0.0,
    };
    if (lat1 - lat2).abs() < IDENTICAL_POINT_EPSILON
        && (lon1 - lon2).abs() < IDENTICAL_POINT_EPSILON
    {
        return Ok(zero);
    }

    let f = FLATTENING;
    let big_l = normalize_longitude(lon2 - lon1).to_radians();
    let u1 = ((1.0 - f) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - f) * lat2.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = big_l;
    let mut converged = false;
    let (mut sin_sigma, mut cos_sigma, mut sigma) = (0.0, 0.0, 0.0);
    let (mut cos_sq_alpha, mut cos_2sigma_m) = (0.0, 0.0);
    let (mut sin_lambda, mut cos_lambda) = (0.0, 0.0);

    for _ in 0..MAX_ITERATIONS {
        (sin_lambda, cos_lambda) = lambda.sin_cos();
        let t1 = cos_u2 * sin_lambda;
        let t2 = cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda;
        sin_sigma = (t1 * t1 + t2 * t2).sqrt();
        if sin_sigma == 0.0 {
            return Ok(zero);
        }
        cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // Equatorial lines have cos²α = 0
        cos_2sigma_m = if cos_sq_alpha == 0.0 {
            0.0
        } else {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        };
        let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
        let previous = lambda;
        lambda = big_l
            + (1.0 - c)
                * f
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));
        if (lambda - previous).abs() < CONVERGENCE_THRESHOLD {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(GeodesyError::NoConvergence(MAX_ITERATIONS));
    }

    let (big_a, big_b) = series_coefficients(cos_sq_alpha);
    let distance =
        SEMI_MINOR_AXIS * big_a * (sigma - delta_sigma(big_b, sin_sigma, cos_sigma, cos_2sigma_m));

    let alpha1 = (cos_u2 * sin_lambda).atan2(cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda);
    let alpha2 = (cos_u1 * sin_lambda).atan2(-sin_u1 * cos_u2 + cos_u1 * sin_u2 * cos_lambda);

    Ok(Inverse {
        distance,
        azimuth_forward: normalize_azimuth(alpha1.to_degrees()),
        azimuth_reverse: normalize_azimuth(alpha2.to_degrees() + 180.0),
    })
}

/// Solve the direct problem: project a new point `distance` meters from
/// (`lat`, `lon`) along the compass bearing `azimuth`.
pub fn project(lat: f64, lon: f64, azimuth: f64, distance: f64) -> Result<Projection, GeodesyError> {
    if distance == 0.0 {
        return Ok(Projection {
            latitude: lat,
            longitude: lon,
            azimuth_reverse: normalize_azimuth(azimuth + 180.0),
        });
    }

    let f = FLATTENING;
    let (sin_alpha1, cos_alpha1) = azimuth.to_radians().sin_cos();
    let tan_u1 = (1.0 - f) * lat.to_radians().tan();
    let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
    let sin_u1 = tan_u1 * cos_u1;
    let sigma1 = tan_u1.atan2(cos_alpha1);
    let sin_alpha = cos_u1 * sin_alpha1;
    let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
    let (big_a, big_b) = series_coefficients(cos_sq_alpha);

    let sigma0 = distance / (SEMI_MINOR_AXIS * big_a);
    let mut sigma = sigma0;
    let mut converged = false;
    for _ in 0..MAX_ITERATIONS {
        let cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
        let (sin_sigma, cos_sigma) = sigma.sin_cos();
        let previous = sigma;
        sigma = sigma0 + delta_sigma(big_b, sin_sigma, cos_sigma, cos_2sigma_m);
        if (sigma - previous).abs() < CONVERGENCE_THRESHOLD {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(GeodesyError::NoConvergence(MAX_ITERATIONS));
    }

    let cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
    let (sin_sigma, cos_sigma) = sigma.sin_cos();
    let tmp = sin_u1 * sin_sigma - cos_u1 * cos_sigma * cos_alpha1;
    let lat2 = (sin_u1 * cos_sigma + cos_u1 * sin_sigma * cos_alpha1)
        .atan2((1.0 - f) * (sin_alpha * sin_alpha + tmp * tmp).sqrt());
    let lambda = (sin_sigma * sin_alpha1).atan2(cos_u1 * cos_sigma - sin_u1 * sin_sigma * cos_alpha1);
    let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
    let big_l = lambda
        - (1.0 - c)
            * f
            * sin_alpha
            * (sigma
                + c * sin_sigma
                    * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));
    let alpha2 = sin_alpha.atan2(-tmp);

    Ok(Projection {
        latitude: lat2.to_degrees(),
        longitude: normalize_longitude(lon + big_l.to_degrees()),
        azimuth_reverse: normalize_azimuth(alpha2.to_degrees() + 180.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn angular_difference(a: f64, b: f64) -> f64 {
        let d = (a - b).rem_euclid(360.0);
        d.min(360.0 - d)
    }

    #[test]
    fn test_identical_points_short_circuit() {
        let r = distance_and_azimuth(42.1, -70.3, 42.1, -70.3).unwrap();
        assert_eq!(r.distance, 0.0);
        assert_eq!(r.azimuth_forward, 0.0);
        assert_eq!(r.azimuth_reverse, 0.0);
    }

    #[test]
    fn test_flinders_peak_to_buninyong() {
        // Vincenty's (1975) published test line
        let lat1 = -(37.0 + 57.0 / 60.0 + 3.72030 / 3600.0);
        let lon1 = 144.0 + 25.0 / 60.0 + 29.52440 / 3600.0;
        let lat2 = -(37.0 + 39.0 / 60.0 + 10.15610 / 3600.0);
        let lon2 = 143.0 + 55.0 / 60.0 + 35.38390 / 3600.0;
        let r = distance_and_azimuth(lat1, lon1, lat2, lon2).unwrap();
        assert_abs_diff_eq!(r.distance, 54972.271, epsilon = 1e-3);
        let expected_forward = 306.0 + 52.0 / 60.0 + 5.37 / 3600.0;
        assert_abs_diff_eq!(r.azimuth_forward, expected_forward, epsilon = 1e-4);
    }

    #[test]
    fn test_due_east_on_equator() {
        let p = project(0.0, 0.0, 90.0, 111_319.49).unwrap();
        assert_abs_diff_eq!(p.latitude, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(p.longitude, 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(p.azimuth_reverse, 270.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_distance_projection_is_exact() {
        let p = project(41.5, -69.25, 123.0, 0.0).unwrap();
        assert_eq!(p.latitude, 41.5);
        assert_eq!(p.longitude, -69.25);
        assert_abs_diff_eq!(p.azimuth_reverse, 303.0);
    }

    #[test]
    fn test_project_then_inverse_round_trip() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let lat = rng.random_range(-80.0..80.0);
            let lon = rng.random_range(-180.0..180.0);
            let azimuth = rng.random_range(0.0..360.0);
            let distance = rng.random_range(1.0..5_000_000.0);

            let p = project(lat, lon, azimuth, distance).unwrap();
            let forward = distance_and_azimuth(lat, lon, p.latitude, p.longitude).unwrap();
            assert_abs_diff_eq!(forward.distance, distance, epsilon = 1e-2);
            assert!(angular_difference(forward.azimuth_forward, azimuth) < 1e-5);
            assert!(angular_difference(forward.azimuth_reverse, p.azimuth_reverse) < 1e-5);

            let back = distance_and_azimuth(p.latitude, p.longitude, lat, lon).unwrap();
            assert_abs_diff_eq!(back.distance, distance, epsilon = 1e-2);
            assert!(angular_difference(back.azimuth_reverse, azimuth) < 1e-5);
        }
    }

    #[test]
    fn test_short_hop_reverse_is_opposite() {
        let p = project(10.0, 20.0, 45.0, 1_000.0).unwrap();
        assert!(angular_difference(p.azimuth_reverse, 225.0) < 0.01);
    }

    #[test]
    fn test_angle_conversions() {
        assert_eq!(azimuth_to_angle(0.0), 90.0);
        assert_eq!(azimuth_to_angle(90.0), 0.0);
        assert_eq!(azimuth_to_angle(180.0), 270.0);
        assert_eq!(azimuth_to_angle(270.0), 180.0);
        for a in [0.0, 17.5, 90.0, 200.0, 359.0] {
            assert_abs_diff_eq!(angle_to_azimuth(azimuth_to_angle(a)), a, epsilon = 1e-9);
        }
    }
}
