//! Convert stage: re-encode into another format.
//!
//! The working canvas starts transparent, so PNG, WebP and GIF targets
//! keep zero-alpha pixels. JPEG flattens them over black.

use tracing::debug;

use crate::codec::Codec;
use crate::options::{ConvertOptions, StageKind, check_quality};
use crate::types::{EncodedImage, PipelineError};

/// Re-encode `image` as `options.format`.
///
/// Quality defaults to 100 and is only consulted for formats with a
/// quality axis.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] if an explicit quality is
/// outside 1..=100, and decode/encode errors from the codec.
pub fn convert(
    codec: &Codec,
    image: &EncodedImage,
    options: &ConvertOptions,
) -> Result<EncodedImage, PipelineError> {
    let quality = options.effective_quality();
    check_quality(StageKind::Convert, quality)?;
    let pixels = codec.decode(image)?;
    let out = codec.encode(&pixels, options.format, quality)?;
    debug!(from = %image.format(), to = %options.format, quality, "converted");
    Ok(out)
}
