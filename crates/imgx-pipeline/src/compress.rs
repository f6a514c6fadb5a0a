//! Compress stage: lossy re-encode at a chosen quality.
//!
//! PNG has no quality axis, so PNG input is re-encoded as JPEG. Every
//! other format keeps its own encoder. Dimensions never change.

use tracing::debug;

use crate::codec::Codec;
use crate::options::{CompressOptions, StageKind, check_quality};
use crate::types::{EncodedImage, ImageFormat, PipelineError};

/// Format the compress stage writes for an input of `input` format.
#[must_use]
pub const fn output_format(input: ImageFormat) -> ImageFormat {
    match input {
        ImageFormat::Png => ImageFormat::Jpeg,
        other => other,
    }
}

/// Re-encode `image` at `options.quality`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] if quality is outside
/// 1..=100, and decode/encode errors from the codec.
pub fn compress(
    codec: &Codec,
    image: &EncodedImage,
    options: &CompressOptions,
) -> Result<EncodedImage, PipelineError> {
    check_quality(StageKind::Compress, options.quality)?;
    let pixels = codec.decode(image)?;
    let format = output_format(image.format());
    let out = codec.encode(&pixels, format, options.quality)?;
    debug!(
        quality = options.quality,
        from = %image.format(),
        to = %format,
        before = image.byte_size(),
        after = out.byte_size(),
        "compressed"
    );
    Ok(out)
}
