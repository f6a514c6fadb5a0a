//! Input acquisition: turn a file or raw bytes into a [`SourceImage`].
//!
//! Only JPEG, PNG, WebP and GIF are accepted, and inputs larger than
//! [`AcquireLimits::max_bytes`] are rejected before any decoding.

use std::path::Path;

use imgx_pipeline::{ImageFormat, PipelineError, SourceImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors for input that cannot become a [`SourceImage`].
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// The declared or detected type is not one of the accepted formats.
    #[error("unsupported image type {0:?} (expected JPEG, PNG, WebP or GIF)")]
    UnsupportedType(String),

    /// The input is larger than the configured limit.
    #[error("file is {size} bytes; the limit is {limit} bytes")]
    TooLarge {
        /// Input size in bytes.
        size: u64,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// Text that should have been a data URL or base64 payload is not.
    #[error("invalid base64 image: {0}")]
    MalformedBase64(String),

    /// Reading the input failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path being read.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The bytes are not a decodable image.
    #[error(transparent)]
    Decode(#[from] PipelineError),
}

/// Limits applied to every acquired input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquireLimits {
    /// Largest accepted input, in bytes.
    pub max_bytes: u64,
    /// Accepted formats.
    pub formats: Vec<ImageFormat>,
}

impl AcquireLimits {
    /// 10 MiB.
    pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

    /// Fail unless `mime` names an accepted format.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::UnsupportedType`].
    pub fn check_mime(&self, mime: &str) -> Result<ImageFormat, AcquireError> {
        ImageFormat::from_mime(mime)
            .filter(|format| self.formats.contains(format))
            .ok_or_else(|| AcquireError::UnsupportedType(mime.to_string()))
    }

    /// Fail if `size` exceeds [`Self::max_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::TooLarge`].
    pub const fn check_size(&self, size: u64) -> Result<(), AcquireError> {
        if size > self.max_bytes {
            Err(AcquireError::TooLarge {
                size,
                limit: self.max_bytes,
            })
        } else {
            Ok(())
        }
    }
}

impl Default for AcquireLimits {
    fn default() -> Self {
        Self {
            max_bytes: Self::DEFAULT_MAX_BYTES,
            formats: ImageFormat::ALL.to_vec(),
        }
    }
}

/// Accept `bytes` declared as `mime`.
///
/// The size and MIME checks run first. The bytes are then probed, and a
/// sniffed format that differs from `mime` wins.
///
/// # Errors
///
/// Returns [`AcquireError::UnsupportedType`], [`AcquireError::TooLarge`]
/// or [`AcquireError::Decode`].
pub fn from_bytes(
    bytes: Vec<u8>,
    mime: &str,
    limits: &AcquireLimits,
) -> Result<SourceImage, AcquireError> {
    limits.check_size(bytes.len() as u64)?;
    let declared = limits.check_mime(mime)?;
    let source = SourceImage::probe(bytes, declared)?;
    if !limits.formats.contains(&source.format()) {
        return Err(AcquireError::UnsupportedType(source.format().mime().to_string()));
    }
    debug!(
        size = %source.dimensions(),
        format = %source.format(),
        bytes = source.byte_size(),
        "acquired image"
    );
    Ok(source)
}

/// Read and accept an image file. The MIME type comes from the file
/// extension.
///
/// # Errors
///
/// Returns [`AcquireError::Io`] if the file cannot be read, otherwise as
/// [`from_bytes`].
pub fn from_path(path: &Path, limits: &AcquireLimits) -> Result<SourceImage, AcquireError> {
    let io_err = |source| AcquireError::Io {
        path: path.display().to_string(),
        source,
    };
    let size = std::fs::metadata(path).map_err(io_err)?.len();
    limits.check_size(size)?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    let mime = mime_for_extension(extension)
        .ok_or_else(|| AcquireError::UnsupportedType(format!(".{extension}")))?;
    let bytes = std::fs::read(path).map_err(io_err)?;
    from_bytes(bytes, mime, limits)
}

/// MIME type for a file extension, case-insensitively.
#[must_use]
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use imgx_pipeline::{Codec, RgbaImage};

    fn png_bytes() -> Vec<u8> {
        Codec::default()
            .encode(&RgbaImage::new(6, 4), ImageFormat::Png, 100)
            .unwrap()
            .into_bytes()
    }

    #[test]
    fn accepts_supported_types() {
        let source = from_bytes(png_bytes(), "image/png", &AcquireLimits::default()).unwrap();
        assert_eq!((source.width(), source.height()), (6, 4));
    }

    #[test]
    fn rejects_other_mime_types() {
        let err = from_bytes(png_bytes(), "image/bmp", &AcquireLimits::default()).unwrap_err();
        assert!(matches!(err, AcquireError::UnsupportedType(_)));
    }

    #[test]
    fn rejects_oversized_input_before_decoding() {
        let limits = AcquireLimits {
            max_bytes: 8,
            ..AcquireLimits::default()
        };
        let err = from_bytes(vec![0; 9], "image/png", &limits).unwrap_err();
        assert!(matches!(err, AcquireError::TooLarge { size: 9, limit: 8 }));
    }

    #[test]
    fn corrupt_bytes_are_a_decode_error() {
        let err = from_bytes(vec![1, 2, 3], "image/png", &AcquireLimits::default()).unwrap_err();
        assert!(matches!(err, AcquireError::Decode(_)));
    }

    #[test]
    fn restricted_format_list_is_honored() {
        let limits = AcquireLimits {
            formats: vec![ImageFormat::Jpeg],
            ..AcquireLimits::default()
        };
        assert!(limits.check_mime("image/png").is_err());
        assert_eq!(limits.check_mime("image/jpeg").unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn reads_files_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.PNG");
        std::fs::write(&path, png_bytes()).unwrap();
        let source = from_path(&path, &AcquireLimits::default()).unwrap();
        assert_eq!(source.format(), ImageFormat::Png);

        let bad = dir.path().join("pic.bmp");
        std::fs::write(&bad, png_bytes()).unwrap();
        assert!(matches!(
            from_path(&bad, &AcquireLimits::default()),
            Err(AcquireError::UnsupportedType(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = from_path(Path::new("/nonexistent/x.png"), &AcquireLimits::default()).unwrap_err();
        assert!(matches!(err, AcquireError::Io { .. }));
    }
}
