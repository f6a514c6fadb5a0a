//! Geometric transform stage: rotate, then flip, then skew.
//!
//! Each sub-step computes its own canvas, warps the pixels into it and
//! re-encodes at full quality in the input's format before the next
//! sub-step decodes that output. A sub-step whose map is the identity
//! skips the warp but still goes through the re-encode, so the bytes
//! are the same as if it had warped.
//!
//! Rotation and flips act about the image center. Quarter turns move
//! pixels exactly; other angles are resampled. Skew shears from the
//! top-left corner without recentering, so negative skews push content
//! off the left/top edge of the grown canvas. A shear that collapses
//! the plane onto a line draws nothing and leaves a blank canvas.
//!
//! Warps go through `imageproc` with bilinear sampling on premultiplied
//! alpha. The source gets a one-pixel transparent border first, so its
//! edges fade out over one pixel instead of being cut hard.

use image::Rgba;
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use tracing::debug;

use crate::alpha::{Premultiplied, premultiply_padded, unpremultiply_cropped};
use crate::codec::{Codec, MAX_QUALITY};
use crate::geometry::{rotated_bounds, skewed_bounds};
use crate::options::{StageKind, TransformOptions, check_canvas, check_range};
use crate::types::{EncodedImage, PipelineError, RgbaImage};

/// Transparent margin added around a source before warping.
const BORDER: u32 = 1;

/// Apply rotate, flip and skew in that order.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] for a non-finite or
/// out-of-range angle or skew, or a rotated or sheared canvas larger
/// than [`MAX_CANVAS_PIXELS`](crate::options::MAX_CANVAS_PIXELS).
/// Decode/encode errors propagate.
pub fn transform(
    codec: &Codec,
    image: &EncodedImage,
    options: &TransformOptions,
) -> Result<EncodedImage, PipelineError> {
    validate(options)?;

    let rotated = reencode(codec, image, |pixels| rotate(pixels, options.angle))?;
    debug!(angle = options.angle, size = %rotated.dimensions(), "rotated");

    let flipped = reencode(codec, &rotated, |pixels| {
        Ok(flip(pixels, options.horizontal, options.vertical))
    })?;
    debug!(
        horizontal = options.horizontal,
        vertical = options.vertical,
        "flipped"
    );

    let skewed = reencode(codec, &flipped, |pixels| {
        skew(pixels, options.skew_x, options.skew_y)
    })?;
    debug!(
        skew_x = options.skew_x,
        skew_y = options.skew_y,
        size = %skewed.dimensions(),
        "skewed"
    );

    Ok(skewed)
}

fn validate(options: &TransformOptions) -> Result<(), PipelineError> {
    let max_angle = TransformOptions::MAX_ANGLE;
    let max_skew = TransformOptions::MAX_SKEW;
    check_range(StageKind::Transform, "angle", options.angle, -max_angle, max_angle)?;
    check_range(StageKind::Transform, "skewX", options.skew_x, -max_skew, max_skew)?;
    check_range(StageKind::Transform, "skewY", options.skew_y, -max_skew, max_skew)
}

/// Decode, run one sub-step, re-encode in the same format at full quality.
fn reencode(
    codec: &Codec,
    image: &EncodedImage,
    step: impl FnOnce(&RgbaImage) -> Result<RgbaImage, PipelineError>,
) -> Result<EncodedImage, PipelineError> {
    let pixels = codec.decode(image)?;
    let out = step(&pixels)?;
    codec.encode(&out, image.format(), MAX_QUALITY)
}

/// Rotate clockwise by `degrees` about the center onto a canvas large
/// enough to hold every corner.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] if that canvas exceeds
/// the canvas budget.
pub fn rotate(pixels: &RgbaImage, degrees: f64) -> Result<RgbaImage, PipelineError> {
    let turn = degrees.rem_euclid(360.0);
    let at = |quarter: f64| is_zero(turn - quarter);
    if at(0.0) || at(360.0) {
        return Ok(pixels.clone());
    }
    if at(90.0) {
        return Ok(image::imageops::rotate90(pixels));
    }
    if at(180.0) {
        return Ok(image::imageops::rotate180(pixels));
    }
    if at(270.0) {
        return Ok(image::imageops::rotate270(pixels));
    }

    let (width, height) = pixels.dimensions();
    let (out_w, out_h) = rotated_bounds(width, height, degrees);
    check_canvas(StageKind::Transform, out_w, out_h)?;
    let map = Projection::translate(-center(width), -center(height))
        .and_then(Projection::rotate(narrow(degrees.to_radians())))
        .and_then(Projection::translate(center(out_w), center(out_h)));
    Ok(warp(pixels, out_w, out_h, map))
}

/// Mirror horizontally and/or vertically. The canvas keeps its size.
#[must_use]
pub fn flip(pixels: &RgbaImage, horizontal: bool, vertical: bool) -> RgbaImage {
    match (horizontal, vertical) {
        (false, false) => pixels.clone(),
        (true, false) => image::imageops::flip_horizontal(pixels),
        (false, true) => image::imageops::flip_vertical(pixels),
        (true, true) => image::imageops::rotate180(pixels),
    }
}

/// Shear by `skew_x`/`skew_y` degrees from the top-left origin onto the
/// grown canvas.
///
/// A shear with no inverse (both at 45 degrees with the same sign)
/// yields a fully transparent canvas of the grown size.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] if the grown canvas
/// exceeds the canvas budget.
pub fn skew(pixels: &RgbaImage, skew_x: f64, skew_y: f64) -> Result<RgbaImage, PipelineError> {
    if is_zero(skew_x) && is_zero(skew_y) {
        return Ok(pixels.clone());
    }

    let (width, height) = pixels.dimensions();
    let (out_w, out_h) = skewed_bounds(width, height, skew_x, skew_y);
    check_canvas(StageKind::Transform, out_w, out_h)?;
    let tan_x = narrow(skew_x.to_radians().tan());
    let tan_y = narrow(skew_y.to_radians().tan());
    // Continuous shear expressed on pixel centers.
    #[rustfmt::skip]
    let shear = Projection::from_matrix([
        1.0,   tan_x, 0.5 * tan_x,
        tan_y, 1.0,   0.5 * tan_y,
        0.0,   0.0,   1.0,
    ]);

    let Some(map) = shear else {
        debug!(skew_x, skew_y, "shear is singular; nothing is drawn");
        return Ok(RgbaImage::new(out_w, out_h));
    };
    Ok(warp(pixels, out_w, out_h, map))
}

/// Center of a `len`-pixel axis in pixel-index coordinates.
fn center(len: u32) -> f32 {
    narrow((f64::from(len) - 1.0) / 2.0)
}

#[allow(clippy::cast_possible_truncation)]
fn narrow(value: f64) -> f32 {
    value as f32
}

fn is_zero(value: f64) -> bool {
    value.abs() < 1e-9
}

/// Render `pixels` through `map` onto a transparent `width` x `height`
/// canvas.
fn warp(pixels: &RgbaImage, width: u32, height: u32, map: Projection) -> RgbaImage {
    let border = narrow(f64::from(BORDER));
    let source = premultiply_padded(pixels, BORDER);
    let map = Projection::translate(-border, -border).and_then(map);
    let mut canvas = Premultiplied::new(width, height);
    warp_into(&source, &map, Interpolation::Bilinear, Rgba([0; 4]), &mut canvas);
    unpremultiply_cropped(&canvas, 0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::options::MAX_CANVAS_PIXELS;
    use crate::types::ImageFormat;

    const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

    /// Every pixel has a distinct, opaque color.
    fn labelled(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([
                u8::try_from(x % 256).unwrap(),
                u8::try_from(y % 256).unwrap(),
                200,
                255,
            ])
        })
    }

    fn png(pixels: &RgbaImage) -> EncodedImage {
        Codec::default().encode(pixels, ImageFormat::Png, 100).unwrap()
    }

    #[test]
    fn quarter_turn_moves_corners_clockwise() {
        let src = labelled(4, 2);
        let out = rotate(&src, 90.0).unwrap();
        assert_eq!(out.dimensions(), (2, 4));
        // Top-left of the source ends up top-right.
        assert_eq!(out.get_pixel(1, 0), src.get_pixel(0, 0));
        // Bottom-left of the source ends up top-left.
        assert_eq!(out.get_pixel(0, 0), src.get_pixel(0, 1));
        assert_eq!(out.get_pixel(0, 3), src.get_pixel(3, 1));
        assert_eq!(rotate(&src, -270.0).unwrap(), out);
    }

    #[test]
    fn half_turn_twice_restores_pixels() {
        let src = labelled(7, 5);
        let once = rotate(&src, 180.0).unwrap();
        assert_eq!(once.get_pixel(0, 0), src.get_pixel(6, 4));
        let twice = rotate(&once, 180.0).unwrap();
        assert_eq!(twice, src);
    }

    #[test]
    fn diagonal_rotation_leaves_transparent_corners() {
        let out = rotate(&labelled(20, 20), 45.0).unwrap();
        assert_eq!(out.dimensions(), (29, 29));
        assert_eq!(*out.get_pixel(0, 0), TRANSPARENT);
        assert_eq!(out.get_pixel(14, 14).0[3], 255);
    }

    #[test]
    fn rotated_edges_do_not_darken() {
        let white = RgbaImage::from_pixel(16, 16, Rgba([255, 255, 255, 255]));
        let out = rotate(&white, 30.0).unwrap();
        for pixel in out.pixels().filter(|p| p.0[3] > 0) {
            assert!(pixel.0[..3].iter().all(|&c| c >= 254), "{pixel:?}");
        }
        // The edge fades over about a pixel instead of being cut hard.
        assert!(out.pixels().any(|p| p.0[3] > 0 && p.0[3] < 255));
    }

    #[test]
    fn rotation_past_canvas_budget_is_rejected() {
        // A 1 x 15000 strip at 45 degrees needs a 10608 x 10608 canvas.
        let (width, height) = rotated_bounds(1, 15_000, 45.0);
        assert!(u64::from(width) * u64::from(height) > MAX_CANVAS_PIXELS);
        let err = rotate(&RgbaImage::new(1, 15_000), 45.0).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParameter(_)));
    }

    #[test]
    fn flips_mirror_about_center() {
        let src = labelled(3, 2);
        let h = flip(&src, true, false);
        assert_eq!(h.get_pixel(0, 0), src.get_pixel(2, 0));
        let v = flip(&src, false, true);
        assert_eq!(v.get_pixel(0, 0), src.get_pixel(0, 1));
        let both = flip(&src, true, true);
        assert_eq!(both.get_pixel(0, 0), src.get_pixel(2, 1));
        assert_eq!(flip(&src, false, false), src);
    }

    #[test]
    fn positive_skew_x_shifts_lower_rows_right() {
        let src = labelled(10, 10);
        let out = skew(&src, 45.0, 0.0).unwrap();
        assert_eq!(out.dimensions(), (20, 10));
        // Row 0 barely moves, row 9 is shifted by ~9 pixels.
        assert_eq!(out.get_pixel(1, 0).0[3], 255);
        // The first column straddles the left edge.
        assert!((1..255).contains(&out.get_pixel(0, 0).0[3]));
        assert_eq!(*out.get_pixel(0, 9), TRANSPARENT);
        assert_eq!(out.get_pixel(12, 9).0[3], 255);
        assert_eq!(*out.get_pixel(19, 0), TRANSPARENT);
    }

    #[test]
    fn negative_skew_crops_from_top_left() {
        let src = labelled(10, 10);
        let out = skew(&src, -45.0, 0.0).unwrap();
        assert_eq!(out.dimensions(), (20, 10));
        // Content shears off the left edge; the right half stays empty.
        assert_eq!(*out.get_pixel(15, 5), TRANSPARENT);
        assert_eq!(out.get_pixel(8, 0).0[3], 255);
    }

    #[test]
    fn singular_skew_draws_a_blank_canvas() {
        for (skew_x, skew_y) in [(45.0, 45.0), (-45.0, -45.0)] {
            let out = skew(&labelled(10, 10), skew_x, skew_y).unwrap();
            assert_eq!(out.dimensions(), (20, 20));
            assert!(out.pixels().all(|p| *p == TRANSPARENT));
        }
    }

    #[test]
    fn opposite_full_skews_still_draw() {
        let out = skew(&labelled(10, 10), 45.0, -45.0).unwrap();
        assert_eq!(out.dimensions(), (20, 20));
        assert!(out.pixels().any(|p| p.0[3] == 255));
    }

    #[test]
    fn stage_with_singular_skew_exports_blank_image() {
        let codec = Codec::default();
        let options = TransformOptions {
            skew_x: 45.0,
            skew_y: 45.0,
            ..TransformOptions::default()
        };
        let out = transform(&codec, &png(&labelled(10, 10)), &options).unwrap();
        assert_eq!((out.width(), out.height()), (20, 20));
        let pixels = codec.decode(&out).unwrap();
        assert!(pixels.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn stage_rotates_canvas() {
        let codec = Codec::default();
        let src = png(&labelled(100, 50));
        let options = TransformOptions {
            angle: 90.0,
            ..TransformOptions::default()
        };
        let out = transform(&codec, &src, &options).unwrap();
        assert_eq!((out.width(), out.height()), (50, 100));
        assert_eq!(out.format(), ImageFormat::Png);
    }

    #[test]
    fn identity_stage_is_lossless_for_png() {
        let codec = Codec::default();
        let pixels = labelled(9, 6);
        let out = transform(&codec, &png(&pixels), &TransformOptions::default()).unwrap();
        assert_eq!(codec.decode(&out).unwrap(), pixels);
    }

    #[test]
    fn stage_rejects_out_of_range_skew() {
        let codec = Codec::default();
        let options = TransformOptions {
            skew_x: 60.0,
            ..TransformOptions::default()
        };
        let err = transform(&codec, &png(&labelled(4, 4)), &options).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParameter(_)));
    }
}
