//! Angular arithmetic for planar pose estimation.
//!
//! All filter math works on headings in (-π, π]; these helpers keep that
//! invariant at every composition point.

use std::f64::consts::PI;

/// Normalize an angle to (-π, π].
///
/// # Example
/// ```
/// use disha_amcl::core::math::normalize_angle;
/// use std::f64::consts::PI;
///
/// assert!((normalize_angle(3.0 * PI) - PI).abs() < 1e-12);
/// assert_eq!(normalize_angle(-PI), PI);
/// ```
#[inline]
pub fn normalize_angle(angle: f64) -> f64 {
    let a = angle.sin().atan2(angle.cos());
    if a <= -PI {
        a + 2.0 * PI
    } else {
        a
    }
}

/// Shortest signed angular difference `a - b`.
///
/// Returns the signed angle you need to add to `b` to reach `a`, taking the
/// shortest path around the circle, so `normalize_angle(b + angle_diff(a, b))`
/// equals `normalize_angle(a)`.
///
/// # Example
/// ```
/// use disha_amcl::core::math::angle_diff;
/// use std::f64::consts::PI;
///
/// // Crossing the ±π boundary takes the short way
/// let d = angle_diff(-PI + 0.1, PI - 0.1);
/// assert!((d - 0.2).abs() < 1e-12);
/// ```
#[inline]
pub fn angle_diff(a: f64, b: f64) -> f64 {
    let a = normalize_angle(a);
    let b = normalize_angle(b);
    let d1 = a - b;
    let mut d2 = 2.0 * PI - d1.abs();
    if d1 > 0.0 {
        d2 = -d2;
    }
    if d1.abs() < d2.abs() {
        d1
    } else {
        d2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_normalize_zero() {
        assert_abs_diff_eq!(normalize_angle(0.0), 0.0);
    }

    #[test]
    fn test_normalize_wraps() {
        assert_abs_diff_eq!(normalize_angle(2.0 * PI), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_angle(3.0 * PI), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_angle(-2.0 * PI), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_half_open_interval() {
        // Both ±π inputs land on the closed end of (-π, π].
        assert_eq!(normalize_angle(PI), PI);
        assert_eq!(normalize_angle(-PI), PI);
        assert!(normalize_angle(PI + 0.001) < 0.0);
    }

    #[test]
    fn test_angle_diff_simple() {
        assert_abs_diff_eq!(angle_diff(PI / 2.0, 0.0), PI / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(angle_diff(0.0, PI / 2.0), -PI / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_angle_diff_crossing_pi() {
        assert_abs_diff_eq!(angle_diff(-PI + 0.1, PI - 0.1), 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(angle_diff(PI - 0.1, -PI + 0.1), -0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_angle_diff_range_and_roundtrip() {
        let angles = [-3.1, -1.0, 0.0, 0.5, 1.7, 3.1, 6.9, -6.9];
        for &a in &angles {
            for &b in &angles {
                let d = angle_diff(a, b);
                assert!(d > -PI && d <= PI, "diff out of range: {}", d);
                assert_abs_diff_eq!(
                    normalize_angle(b + d),
                    normalize_angle(a),
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_angle_diff_near_wrap_magnitude() {
        // 3.1 and -3.1 are 2π - 6.2 ≈ 0.083 apart, not 6.2.
        let d = angle_diff(3.1, -3.1);
        assert_abs_diff_eq!(d.abs(), 2.0 * PI - 6.2, epsilon = 1e-12);
        assert!((d.abs() - 0.083).abs() < 1e-3);
    }

    #[test]
    fn test_normalize_nan_propagates() {
        assert!(normalize_angle(f64::NAN).is_nan());
    }
}
