//! Canvas-size arithmetic shared by the geometric stages.
//!
//! All bounds are computed in `f64` and converted to pixel counts at the
//! very end through [`to_pixels`], which saturates instead of wrapping.

/// Distance from an integer below which a bound counts as that integer.
const INTEGER_TOLERANCE: f64 = 1e-9;

/// `ceil`, except values within [`INTEGER_TOLERANCE`] of an integer snap
/// to it. `100 * cos(90 deg)` is `6e-15`, not zero.
#[must_use]
pub fn ceil_tolerant(value: f64) -> f64 {
    let nearest = value.round();
    if (value - nearest).abs() < INTEGER_TOLERANCE {
        nearest
    } else {
        value.ceil()
    }
}

/// Convert a non-negative float to a pixel count, saturating at the
/// `u32` range. NaN maps to 0.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_pixels(value: f64) -> u32 {
    if value.is_nan() || value <= 0.0 {
        0
    } else if value >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        value as u32
    }
}

/// Round a 0..=255 float to a channel value, clamping out-of-range input.
#[must_use]
pub fn to_channel(value: f64) -> u8 {
    u8::try_from(to_pixels(value.round().min(255.0))).unwrap_or(u8::MAX)
}

/// Canvas that holds a `width` x `height` image rotated by `degrees`.
#[must_use]
pub fn rotated_bounds(width: u32, height: u32, degrees: f64) -> (u32, u32) {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (sin, cos) = (sin.abs(), cos.abs());
    let (w, h) = (f64::from(width), f64::from(height));
    (
        to_pixels(ceil_tolerant(w.mul_add(cos, h * sin))),
        to_pixels(ceil_tolerant(w.mul_add(sin, h * cos))),
    )
}

/// Canvas that holds a `width` x `height` image sheared by
/// `skew_x`/`skew_y` degrees.
#[must_use]
pub fn skewed_bounds(width: u32, height: u32, skew_x: f64, skew_y: f64) -> (u32, u32) {
    let (w, h) = (f64::from(width), f64::from(height));
    let tan_x = skew_x.to_radians().tan();
    let tan_y = skew_y.to_radians().tan();
    (
        to_pixels(ceil_tolerant(w + (h * tan_x).abs())),
        to_pixels(ceil_tolerant(h + (w * tan_y).abs())),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ceil_tolerant_snaps_float_noise() {
        assert!((ceil_tolerant(50.000_000_000_001) - 50.0).abs() < f64::EPSILON);
        assert!((ceil_tolerant(49.999_999_999_999) - 50.0).abs() < f64::EPSILON);
        assert!((ceil_tolerant(50.2) - 51.0).abs() < f64::EPSILON);
    }

    #[test]
    fn quarter_turn_swaps_sides() {
        assert_eq!(rotated_bounds(100, 50, 90.0), (50, 100));
        assert_eq!(rotated_bounds(100, 50, -90.0), (50, 100));
        assert_eq!(rotated_bounds(100, 50, 180.0), (100, 50));
        assert_eq!(rotated_bounds(100, 50, 0.0), (100, 50));
    }

    #[test]
    fn diagonal_rotation_grows_canvas() {
        // 100 * (cos 45 + sin 45) = 141.42...
        assert_eq!(rotated_bounds(100, 100, 45.0), (142, 142));
    }

    #[test]
    fn skew_bounds_grow_by_tangent() {
        assert_eq!(skewed_bounds(100, 50, 45.0, 0.0), (150, 50));
        assert_eq!(skewed_bounds(100, 50, 0.0, -45.0), (100, 150));
        assert_eq!(skewed_bounds(100, 50, 0.0, 0.0), (100, 50));
    }

    #[test]
    fn to_pixels_saturates() {
        assert_eq!(to_pixels(f64::NAN), 0);
        assert_eq!(to_pixels(-3.0), 0);
        assert_eq!(to_pixels(1e20), u32::MAX);
        assert_eq!(to_pixels(12.0), 12);
    }

    #[test]
    fn to_channel_clamps_and_rounds() {
        assert_eq!(to_channel(-4.0), 0);
        assert_eq!(to_channel(127.5), 128);
        assert_eq!(to_channel(300.0), 255);
    }
}
