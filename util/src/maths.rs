//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Return the euclidian norm (distance between) of two points.
///
/// If the points do not have the same number of dimentions then `None` is 
/// returned.
pub fn norm<T>(point_0: &[T], point_1: &[T]) -> Option<T> 
where
    T: Float + std::ops::AddAssign
{
    // Check that the dimentions match
    if point_0.len() != point_1.len() {
        return None;
    }

    let mut sum = T::zero();

    for (a, b) in point_0.iter().zip(point_1.iter()) {
        sum += (*a - *b).powi(2);
    }

    Some(sum.sqrt())
}

/// Limit the magnitude of a value to `limit`, preserving its sign.
///
/// Returns the limited value and whether or not the limit was applied.
pub fn clamp_abs<T>(value: T, limit: T) -> (T, bool)
where
    T: Float
{
    let limit = limit.abs();

    if value > limit {
        (limit, true)
    }
    else if value < -limit {
        (-limit, true)
    }
    else {
        (value, false)
    }
}

/// True if `a` and `b` are no more than `tol` apart.
pub fn within_tol<T>(a: T, b: T, tol: T) -> bool
where
    T: Float
{
    (a - b).abs() <= tol
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_norm() {
        assert_eq!(norm(&[0f64, 0f64], &[3f64, 4f64]), Some(5f64));
        assert_eq!(norm(&[0f64], &[3f64, 4f64]), None);
    }

    #[test]
    fn test_clamp_abs() {
        assert_eq!(clamp_abs(5f64, 2f64), (2f64, true));
        assert_eq!(clamp_abs(-5f64, -2f64), (-2f64, true));
        assert_eq!(clamp_abs(1f64, 2f64), (1f64, false));
    }

    #[test]
    fn test_within_tol() {
        assert!(within_tol(1.0f64, 1.05, 0.1));
        assert!(!within_tol(1.0f64, 1.2, 0.1));
    }
}
