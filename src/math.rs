// math.rs — Field-of-view trigonometry for Hor+ correction.
//
// The engine keeps vertical FOV fixed for 16:9 and crops the sides on wider
// screens. Screen half-width is proportional to tan(fov / 2), so the angle
// is widened through its tangent: fov' = 2 * atan(tan(fov / 2) * k), where
// k = current aspect / 16:9. Scaling the angle linearly would overshoot.

use crate::presentation::REFERENCE_ASPECT;

/// Ratio of `width / height` to the 16:9 reference, or None for a degenerate size.
pub fn aspect_multiplier(width: i32, height: i32) -> Option<f32> {
    if width <= 0 || height <= 0 { return None; }
    Some((width as f32 / height as f32) / REFERENCE_ASPECT)
}

/// Corrected FOV in degrees for an incoming FOV, aspect multiplier and
/// additive offset (applied before the correction).
pub fn correct_fov(degrees: f32, multiplier: f32, offset_degrees: f32) -> f32 {
    let adjusted = (degrees + offset_degrees) as f64;
    let half_tan = (adjusted.to_radians() / 2.0).tan();
    let scaled = half_tan * multiplier as f64;
    (2.0 * scaled.atan()).to_degrees() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32, eps: f32) -> bool { (a - b).abs() < eps }

    #[test]
    fn identity_at_reference_aspect() {
        assert!(close(correct_fov(85.0, 1.0, 0.0), 85.0, 1e-4));
        assert!(close(correct_fov(60.0, 1.0, 0.0), 60.0, 1e-4));
    }

    #[test]
    fn super_ultrawide_worked_example() {
        // tan(42.5) = 0.9163, x2 = 1.8326, atan = 61.38, x2 = 122.76
        assert!(close(correct_fov(85.0, 2.0, 0.0), 122.76, 0.01));
    }

    #[test]
    fn offset_is_added_before_correction() {
        assert!(close(correct_fov(85.0, 1.0, 5.0), 90.0, 1e-4));
        assert!(close(correct_fov(80.0, 2.0, 5.0), correct_fov(85.0, 2.0, 0.0), 1e-4));
    }

    #[test]
    fn monotonic_in_multiplier() {
        for degrees in [1.0f32, 30.0, 85.0, 120.0, 179.0] {
            let mut previous = correct_fov(degrees, 0.5, 0.0);
            for step in 1..40 {
                let k = 0.5 + step as f32 * 0.1;
                let next = correct_fov(degrees, k, 0.0);
                assert!(next > previous, "fov {degrees} not increasing at k={k}");
                previous = next;
            }
        }
    }

    #[test]
    fn never_reaches_180_degrees() {
        assert!(correct_fov(170.0, 4.0, 0.0) < 180.0);
    }

    #[test]
    fn multiplier_for_common_ratios() {
        assert!(close(aspect_multiplier(1920, 1080).unwrap(), 1.0, 1e-5));
        assert!(close(aspect_multiplier(3840, 1080).unwrap(), 2.0, 1e-5));
        assert!(close(aspect_multiplier(2560, 1080).unwrap(), 1.3333, 1e-3));
        assert!(aspect_multiplier(0, 1080).is_none());
        assert!(aspect_multiplier(1920, -1).is_none());
    }
}
