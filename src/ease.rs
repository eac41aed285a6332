//! Easing curves for a loop's completion fraction.
//!
//! All take `t` in [0, 1] and map 0 to 0 and 1 to 1. Inputs outside the
//! range are clamped.

use std::f64::consts::FRAC_PI_2;

fn clamp01(t: f64) -> f64 {
    t.clamp(0.0, 1.0)
}

pub fn smoothstep(t: f64) -> f64 {
    let t = clamp01(t);
    t * t * (3.0 - 2.0 * t)
}

pub fn smootherstep(t: f64) -> f64 {
    let t = clamp01(t);
    t * t * t * (t * (6.0 * t - 15.0) + 10.0)
}

pub fn ease_in_quad(t: f64) -> f64 {
    let t = clamp01(t);
    t * t
}

pub fn ease_in_sine(t: f64) -> f64 {
    1.0 - (clamp01(t) * FRAC_PI_2).cos()
}

pub fn ease_out_sine(t: f64) -> f64 {
    (clamp01(t) * FRAC_PI_2).sin()
}

/// Unclamped linear interpolation.
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURVES: [fn(f64) -> f64; 5] = [smoothstep, smootherstep, ease_in_quad, ease_in_sine, ease_out_sine];

    #[test]
    fn test_endpoints() {
        for ease in CURVES {
            assert!(ease(0.0).abs() < 1e-12);
            assert!((ease(1.0) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_clamped() {
        for ease in CURVES {
            assert_eq!(ease(-0.5), ease(0.0));
            assert_eq!(ease(1.5), ease(1.0));
        }
    }

    #[test]
    fn test_symmetric_steps() {
        assert!((smoothstep(0.5) - 0.5).abs() < 1e-12);
        assert!((smootherstep(0.5) - 0.5).abs() < 1e-12);
        assert!(ease_in_quad(0.5) < 0.5);
        assert!(ease_out_sine(0.5) > 0.5);
    }

    #[test]
    fn test_lerp() {
        assert_eq!(lerp(2.0, 4.0, 0.5), 3.0);
        assert_eq!(lerp(2.0, 4.0, 1.5), 5.0);
    }
}
