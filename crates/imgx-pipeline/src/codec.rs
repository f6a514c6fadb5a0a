//! Image codec context: decode encoded bytes into a working RGBA canvas
//! and encode a canvas back into one of the supported formats.
//!
//! Every stage receives a [`Codec`] instead of reaching for global state.
//! The codec owns the knobs that are not per-edit options: the
//! resampling filter used by resize and thumbnails, and the decoded
//! pixel budget for sources that protects against decompression bombs.
//!
//! Encoding follows the semantics of exporting an HTML canvas:
//!
//! - JPEG has no alpha, so pixels are composited over black first.
//! - PNG and GIF ignore quality.
//! - WebP at quality 100 is lossless; lower qualities are lossy.

use std::fmt;
use std::io::Cursor;

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::error::{LimitError, LimitErrorKind};
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};

use crate::geometry::to_pixels;
use crate::options::MAX_CANVAS_PIXELS;
use crate::types::{Dimensions, EncodedImage, ImageFormat, PipelineError, RgbaImage, SourceImage};

/// Quality used when a stage re-encodes "at maximum quality".
pub const MAX_QUALITY: u8 = 100;

/// Resampling filter used for resize and thumbnails.
///
/// Ordered from fastest/lowest-quality to slowest/highest-quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResampleFilter {
    /// Nearest-neighbor: fastest, blocky artifacts.
    Nearest,
    /// Bilinear interpolation: fast, decent quality.
    Triangle,
    /// Bicubic (Catmull-Rom): moderate speed, good quality.
    #[default]
    CatmullRom,
    /// Lanczos with 3 lobes: slowest, sharpest/best for photos.
    Lanczos3,
}

impl ResampleFilter {
    /// Convert to the `image` crate's `FilterType`.
    const fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            Self::Nearest => image::imageops::FilterType::Nearest,
            Self::Triangle => image::imageops::FilterType::Triangle,
            Self::CatmullRom => image::imageops::FilterType::CatmullRom,
            Self::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for ResampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => f.write_str("Nearest"),
            Self::Triangle => f.write_str("Triangle"),
            Self::CatmullRom => f.write_str("CatmullRom"),
            Self::Lanczos3 => f.write_str("Lanczos3"),
        }
    }
}

/// Codec configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Filter used whenever the pixel grid is rescaled.
    pub resample: ResampleFilter,

    /// Largest `width * height` accepted for a source image.
    pub max_decoded_pixels: u64,

    /// Longest side of a thumbnail, in pixels.
    pub thumbnail_max_side: u32,

    /// JPEG quality used for thumbnails.
    pub thumbnail_quality: u8,
}

impl CodecConfig {
    /// Default decoded pixel budget (40 megapixels).
    pub const DEFAULT_MAX_DECODED_PIXELS: u64 = 40_000_000;
    /// Default thumbnail bound.
    pub const DEFAULT_THUMBNAIL_MAX_SIDE: u32 = 120;
    /// Default thumbnail JPEG quality.
    pub const DEFAULT_THUMBNAIL_QUALITY: u8 = 70;
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            resample: ResampleFilter::default(),
            max_decoded_pixels: Self::DEFAULT_MAX_DECODED_PIXELS,
            thumbnail_max_side: Self::DEFAULT_THUMBNAIL_MAX_SIDE,
            thumbnail_quality: Self::DEFAULT_THUMBNAIL_QUALITY,
        }
    }
}

/// Decoder/encoder context passed into every stage.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    config: CodecConfig,
}

impl Codec {
    /// Create a codec with the given configuration.
    #[must_use]
    pub const fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Fail if `source` exceeds the decoded pixel budget for inputs,
    /// [`CodecConfig::max_decoded_pixels`] capped at
    /// [`MAX_CANVAS_PIXELS`].
    ///
    /// Only sources are held to this budget; the canvases stages
    /// produce are bounded where they are created.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ImageDecode`] with a dimension limit error.
    pub fn check_source(&self, source: &SourceImage) -> Result<(), PipelineError> {
        let budget = self.config.max_decoded_pixels.min(MAX_CANVAS_PIXELS);
        check_pixels(source.dimensions(), budget)
    }

    /// Decode an encoded image into an RGBA working canvas.
    ///
    /// Multi-frame formats yield their first frame.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyInput`] if the image has no bytes,
    /// and [`PipelineError::ImageDecode`] if the bytes do not parse or
    /// the pixel count exceeds [`MAX_CANVAS_PIXELS`].
    pub fn decode(&self, image: &EncodedImage) -> Result<RgbaImage, PipelineError> {
        if image.bytes().is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let format = image.format().to_image_format();
        let (width, height) =
            image::ImageReader::with_format(Cursor::new(image.bytes()), format).into_dimensions()?;
        check_pixels(Dimensions::new(width, height), MAX_CANVAS_PIXELS)?;

        let decoded = image::ImageReader::with_format(Cursor::new(image.bytes()), format).decode()?;
        Ok(decoded.to_rgba8())
    }

    /// Encode an RGBA canvas as `format`.
    ///
    /// `quality` is 1-100 and only affects formats with a quality axis.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ImageEncode`] for a zero-area canvas or
    /// when the underlying encoder fails.
    pub fn encode(
        &self,
        pixels: &RgbaImage,
        format: ImageFormat,
        quality: u8,
    ) -> Result<EncodedImage, PipelineError> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::encode(
                format,
                format!("cannot encode a {width}x{height} canvas"),
            ));
        }
        let quality = quality.clamp(1, MAX_QUALITY);

        let mut bytes = Vec::new();
        match format {
            ImageFormat::Jpeg => {
                let flattened = flatten_onto_black(pixels);
                JpegEncoder::new_with_quality(&mut bytes, quality)
                    .write_image(flattened.as_raw(), width, height, ExtendedColorType::Rgb8)
                    .map_err(|e| PipelineError::encode(format, e))?;
            }
            ImageFormat::Png => {
                PngEncoder::new(&mut bytes)
                    .write_image(pixels.as_raw(), width, height, ExtendedColorType::Rgba8)
                    .map_err(|e| PipelineError::encode(format, e))?;
            }
            ImageFormat::WebP => {
                let encoder = webp::Encoder::from_rgba(pixels.as_raw(), width, height);
                let lossless = quality == MAX_QUALITY;
                let encoded = encoder
                    .encode_simple(lossless, f32::from(quality))
                    .map_err(|e| PipelineError::encode(format, format!("{e:?}")))?;
                bytes.extend_from_slice(&encoded);
            }
            ImageFormat::Gif => {
                // The encoder writes the trailer when dropped.
                let mut encoder = GifEncoder::new(&mut bytes);
                encoder
                    .encode_frame(image::Frame::new(pixels.clone()))
                    .map_err(|e| PipelineError::encode(format, e))?;
            }
        }

        Ok(EncodedImage::from_parts(
            bytes,
            Dimensions::new(width, height),
            format,
        ))
    }

    /// Resample a canvas to exactly `width` x `height` with the
    /// configured filter.
    #[must_use]
    pub fn resample(&self, pixels: &RgbaImage, width: u32, height: u32) -> RgbaImage {
        if pixels.dimensions() == (width, height) {
            return pixels.clone();
        }
        image::imageops::resize(pixels, width, height, self.config.resample.to_image_filter())
    }

    /// Render a JPEG thumbnail whose longest side is at most
    /// [`CodecConfig::thumbnail_max_side`]. Small images are never
    /// upscaled.
    ///
    /// # Errors
    ///
    /// Propagates decode and encode failures.
    pub fn thumbnail(&self, image: &EncodedImage) -> Result<EncodedImage, PipelineError> {
        let pixels = self.decode(image)?;
        let (width, height) = thumbnail_size(pixels.dimensions(), self.config.thumbnail_max_side);
        let scaled = self.resample(&pixels, width, height);
        self.encode(&scaled, ImageFormat::Jpeg, self.config.thumbnail_quality)
    }
}

fn check_pixels(size: Dimensions, budget: u64) -> Result<(), PipelineError> {
    if size.pixel_count() > budget {
        return Err(PipelineError::ImageDecode(image::ImageError::Limits(
            LimitError::from_kind(LimitErrorKind::DimensionError),
        )));
    }
    Ok(())
}

/// Fit `(width, height)` inside a `max_side` square, keeping the ratio.
fn thumbnail_size((width, height): (u32, u32), max_side: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_side || longest == 0 {
        return (width, height);
    }
    let scale = f64::from(max_side) / f64::from(longest);
    let fit = |side: u32| to_pixels((f64::from(side) * scale).round().max(1.0));
    (fit(width), fit(height))
}

/// Composite RGBA over opaque black, the way a transparent canvas is
/// exported to a format without alpha.
#[must_use]
pub fn flatten_onto_black(pixels: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(pixels.width(), pixels.height(), |x, y| {
        let [r, g, b, a] = pixels.get_pixel(x, y).0;
        let scale = |c: u8| {
            let v = (u16::from(c) * u16::from(a) + 127) / 255;
            u8::try_from(v).unwrap_or(u8::MAX)
        };
        image::Rgb([scale(r), scale(g), scale(b)])
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        #[allow(clippy::cast_possible_truncation)]
        RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([
                ((x * 255) / width.max(1)) as u8,
                ((y * 255) / height.max(1)) as u8,
                128,
                255,
            ])
        })
    }

    #[test]
    fn default_filter_is_bicubic() {
        assert_eq!(ResampleFilter::default(), ResampleFilter::CatmullRom);
    }

    #[test]
    fn png_round_trip_is_exact() {
        let codec = Codec::default();
        let pixels = gradient(13, 7);
        let encoded = codec.encode(&pixels, ImageFormat::Png, 50).unwrap();
        assert_eq!(encoded.dimensions(), Dimensions::new(13, 7));
        assert_eq!(encoded.format(), ImageFormat::Png);
        assert_eq!(codec.decode(&encoded).unwrap(), pixels);
    }

    #[test]
    fn every_format_encodes_and_decodes() {
        let codec = Codec::default();
        let pixels = gradient(16, 9);
        for format in ImageFormat::ALL {
            let encoded = codec.encode(&pixels, format, 90).unwrap();
            assert_eq!(encoded.format(), format);
            let decoded = codec.decode(&encoded).unwrap();
            assert_eq!(decoded.dimensions(), (16, 9), "format {format}");
        }
    }

    #[test]
    fn encoded_header_matches_reported_dimensions() {
        let codec = Codec::default();
        let encoded = codec.encode(&gradient(21, 5), ImageFormat::Jpeg, 80).unwrap();
        let probed = EncodedImage::probe(encoded.bytes().to_vec(), ImageFormat::Jpeg).unwrap();
        assert_eq!(probed.dimensions(), encoded.dimensions());
    }

    #[test]
    fn zero_area_canvas_is_encode_error() {
        let codec = Codec::default();
        let result = codec.encode(&RgbaImage::new(0, 4), ImageFormat::Png, 100);
        assert!(matches!(result, Err(PipelineError::ImageEncode { .. })));
    }

    #[test]
    fn source_budget_rejects_oversized_sources() {
        let codec = Codec::new(CodecConfig {
            max_decoded_pixels: 10,
            ..CodecConfig::default()
        });
        let encoded = codec.encode(&gradient(4, 4), ImageFormat::Png, 100).unwrap();
        assert!(matches!(
            codec.check_source(&encoded),
            Err(PipelineError::ImageDecode(_))
        ));
        let small = codec.encode(&gradient(2, 5), ImageFormat::Png, 100).unwrap();
        assert!(codec.check_source(&small).is_ok());
    }

    #[test]
    fn source_budget_does_not_apply_to_intermediates() {
        let codec = Codec::new(CodecConfig {
            max_decoded_pixels: 10,
            ..CodecConfig::default()
        });
        let encoded = codec.encode(&gradient(4, 4), ImageFormat::Png, 100).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), gradient(4, 4));
    }

    #[test]
    fn jpeg_flattens_transparency_to_black() {
        let codec = Codec::default();
        let clear = RgbaImage::from_pixel(8, 8, image::Rgba([255, 255, 255, 0]));
        let encoded = codec.encode(&clear, ImageFormat::Jpeg, 100).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        for p in decoded.pixels() {
            assert_eq!(p.0[3], 255);
            assert!(p.0[0] < 8 && p.0[1] < 8 && p.0[2] < 8, "expected black, got {p:?}");
        }
    }

    #[test]
    fn flatten_scales_by_alpha() {
        let pixels = RgbaImage::from_pixel(1, 1, image::Rgba([200, 100, 50, 128]));
        let flat = flatten_onto_black(&pixels);
        assert_eq!(flat.get_pixel(0, 0).0, [100, 50, 25]);
    }

    #[test]
    fn lossless_webp_keeps_alpha() {
        let codec = Codec::default();
        let pixels = RgbaImage::from_fn(6, 6, |x, _| {
            if x == 0 {
                image::Rgba([0, 0, 0, 0])
            } else {
                image::Rgba([40, 80, 120, 255])
            }
        });
        let encoded = codec.encode(&pixels, ImageFormat::WebP, MAX_QUALITY).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded.get_pixel(0, 0).0[3], 0);
        assert_eq!(decoded.get_pixel(3, 3).0, [40, 80, 120, 255]);
    }

    #[test]
    fn thumbnail_bounds_longest_side() {
        assert_eq!(thumbnail_size((1200, 600), 120), (120, 60));
        assert_eq!(thumbnail_size((300, 900), 120), (40, 120));
        assert_eq!(thumbnail_size((80, 50), 120), (80, 50));
        assert_eq!(thumbnail_size((5000, 1), 120), (120, 1));
    }

    #[test]
    fn thumbnail_is_small_jpeg() {
        let codec = Codec::default();
        let src = codec.encode(&gradient(480, 240), ImageFormat::Png, 100).unwrap();
        let thumb = codec.thumbnail(&src).unwrap();
        assert_eq!(thumb.format(), ImageFormat::Jpeg);
        assert_eq!((thumb.width(), thumb.height()), (120, 60));
    }

    #[test]
    fn resample_same_size_is_identity() {
        let codec = Codec::default();
        let pixels = gradient(9, 9);
        assert_eq!(codec.resample(&pixels, 9, 9), pixels);
        assert_eq!(codec.resample(&pixels, 3, 5).dimensions(), (3, 5));
    }
}
