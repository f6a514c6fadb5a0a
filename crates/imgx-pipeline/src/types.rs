//! Shared types for the imgx transformation pipeline.

use std::fmt;
use std::io::Cursor;

use serde::{Deserialize, Serialize};

/// Re-export `RgbaImage` so downstream crates can reference decoded
/// working images without depending on `image` directly.
pub use image::RgbaImage;

/// The closed set of raster formats the pipeline reads and writes.
///
/// Serialized as the MIME type string (`"image/jpeg"`, ...), which is
/// also the form the acquisition and export collaborators exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    /// JPEG: lossy, no alpha channel.
    #[serde(rename = "image/jpeg")]
    Jpeg,
    /// PNG: lossless, alpha channel.
    #[serde(rename = "image/png")]
    Png,
    /// WebP: lossy or lossless, alpha channel.
    #[serde(rename = "image/webp")]
    WebP,
    /// GIF: palette based, 1-bit transparency. Only the first frame is used.
    #[serde(rename = "image/gif")]
    Gif,
}

impl ImageFormat {
    /// Every supported format, in menu order.
    pub const ALL: [Self; 4] = [Self::Jpeg, Self::Png, Self::WebP, Self::Gif];

    /// The MIME type, e.g. `image/webp`.
    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
            Self::Gif => "image/gif",
        }
    }

    /// The file extension, derived from the MIME subtype (`jpeg`, not `jpg`).
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Gif => "gif",
        }
    }

    /// Parse a MIME type. Matching is case-insensitive and ignores
    /// surrounding whitespace and MIME parameters (`image/png;charset=x`).
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        Self::ALL
            .into_iter()
            .find(|format| format.mime().eq_ignore_ascii_case(essence))
    }

    /// Whether encoding in this format has a meaningful quality axis.
    #[must_use]
    pub const fn has_quality(self) -> bool {
        matches!(self, Self::Jpeg | Self::WebP)
    }

    /// Whether this format can store per-pixel transparency.
    #[must_use]
    pub const fn has_alpha(self) -> bool {
        !matches!(self, Self::Jpeg)
    }

    /// The corresponding `image` crate format.
    #[must_use]
    pub const fn to_image_format(self) -> image::ImageFormat {
        match self {
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
            Self::WebP => image::ImageFormat::WebP,
            Self::Gif => image::ImageFormat::Gif,
        }
    }

    /// Map an `image` crate format back, if it is one we support.
    #[must_use]
    pub const fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::WebP => Some(Self::WebP),
            image::ImageFormat::Gif => Some(Self::Gif),
            _ => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create a new pair of dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// `width / height`. Non-finite for a zero height.
    #[must_use]
    pub fn aspect_ratio(self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }

    /// Whether either side is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An encoded raster image: the bytes of one file plus the metadata
/// every stage needs without decoding.
///
/// Immutable once built. Stages take `&EncodedImage` and return a new
/// one; nothing mutates an image in place.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    bytes: Vec<u8>,
    dimensions: Dimensions,
    format: ImageFormat,
}

/// The image the user uploaded or selected. Lives for the edit session.
pub type SourceImage = EncodedImage;

/// The output of one pipeline run.
pub type ProcessedImage = EncodedImage;

impl EncodedImage {
    /// Assemble an image from parts that are already known to agree,
    /// e.g. the output of an encoder.
    pub(crate) const fn from_parts(bytes: Vec<u8>, dimensions: Dimensions, format: ImageFormat) -> Self {
        Self {
            bytes,
            dimensions,
            format,
        }
    }

    /// Build an image from raw file bytes, reading only the header to
    /// learn its dimensions.
    ///
    /// `declared` is the format the collaborator claims (e.g. from a MIME
    /// type). If the bytes sniff as a different supported format the
    /// sniffed one wins, because that is what a decoder will actually see.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyInput`] for empty bytes,
    /// [`PipelineError::UnsupportedFormat`] if the bytes are a format
    /// outside the supported set, and [`PipelineError::ImageDecode`] if
    /// the header cannot be read.
    pub fn probe(bytes: Vec<u8>, declared: ImageFormat) -> Result<Self, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let format = match image::guess_format(&bytes) {
            Ok(sniffed) => ImageFormat::from_image_format(sniffed)
                .ok_or_else(|| PipelineError::UnsupportedFormat(format!("{sniffed:?}")))?,
            Err(_) => declared,
        };
        if format != declared {
            tracing::debug!(%declared, actual = %format, "declared format differs from content");
        }

        let reader = image::ImageReader::with_format(Cursor::new(&bytes), format.to_image_format());
        let (width, height) = reader.into_dimensions()?;

        Ok(Self {
            bytes,
            dimensions: Dimensions { width, height },
            format,
        })
    }

    /// The encoded file bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the image and return its encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Pixel dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.dimensions.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.dimensions.height
    }

    /// Size of the encoded bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }

    /// Encoded format.
    #[must_use]
    pub const fn format(&self) -> ImageFormat {
        self.format
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Byte dumps of whole images are useless in logs.
        f.debug_struct("EncodedImage")
            .field("format", &self.format)
            .field("dimensions", &self.dimensions)
            .field("byte_size", &self.bytes.len())
            .finish()
    }
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The encoder could not produce output.
    #[error("failed to encode {format} image: {reason}")]
    ImageEncode {
        /// Target format of the failed encode.
        format: ImageFormat,
        /// Human-readable cause.
        reason: String,
    },

    /// A stage option is non-finite or outside its documented domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The bytes are an image format the pipeline does not handle.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
}

impl PipelineError {
    /// Shorthand for an [`ImageEncode`](Self::ImageEncode) error.
    pub(crate) fn encode(format: ImageFormat, reason: impl fmt::Display) -> Self {
        Self::ImageEncode {
            format,
            reason: reason.to_string(),
        }
    }
}
