//! Resize stage: rescale the pixel grid, optionally keeping the source's
//! aspect ratio.
//!
//! With aspect-lock on, a zero side is derived from the other one, and
//! two non-zero sides act as a bounding box: the side that would distort
//! the image is recomputed from the native ratio.

use tracing::debug;

use crate::codec::{Codec, MAX_QUALITY};
use crate::geometry::to_pixels;
use crate::options::{MAX_DIMENSION, ResizeOptions, StageKind, check_canvas};
use crate::types::{Dimensions, EncodedImage, PipelineError};

/// Output size for resizing an image of `native` size with `options`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] if either side is zero
/// after derivation or exceeds [`MAX_DIMENSION`], or the area exceeds
/// [`MAX_CANVAS_PIXELS`](crate::options::MAX_CANVAS_PIXELS).
pub fn target_dimensions(
    native: Dimensions,
    options: &ResizeOptions,
) -> Result<Dimensions, PipelineError> {
    let (mut width, mut height) = (options.width, options.height);

    if options.maintain_aspect_ratio && !native.is_empty() {
        let aspect = native.aspect_ratio();
        let derive_height = |w: u32| to_pixels((f64::from(w) / aspect).round());
        let derive_width = |h: u32| to_pixels((f64::from(h) * aspect).round());

        match (width, height) {
            (0, 0) => {}
            (w, 0) => height = derive_height(w),
            (0, h) => width = derive_width(h),
            (w, h) => {
                if aspect > f64::from(w) / f64::from(h) {
                    height = derive_height(w);
                } else {
                    width = derive_width(h);
                }
            }
        }
    }

    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidParameter(format!(
            "{}: target size {width}x{height} has a zero side",
            StageKind::Resize
        )));
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(PipelineError::InvalidParameter(format!(
            "{}: target size {width}x{height} exceeds {MAX_DIMENSION}",
            StageKind::Resize
        )));
    }
    check_canvas(StageKind::Resize, width, height)?;
    Ok(Dimensions::new(width, height))
}

/// Resample `image` to the size given by [`target_dimensions`] and
/// re-encode it losslessly in its own format.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] for an impossible target
/// size, and decode/encode errors from the codec.
pub fn resize(
    codec: &Codec,
    image: &EncodedImage,
    options: &ResizeOptions,
) -> Result<EncodedImage, PipelineError> {
    let target = target_dimensions(image.dimensions(), options)?;
    let pixels = codec.decode(image)?;
    let scaled = codec.resample(&pixels, target.width, target.height);
    debug!(from = %image.dimensions(), to = %target, filter = %codec.config().resample, "resized");
    codec.encode(&scaled, image.format(), MAX_QUALITY)
}
