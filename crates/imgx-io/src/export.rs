//! Export helpers: file naming, size formatting and writing results.

use std::path::Path;

use imgx_pipeline::{ImageFormat, ProcessedImage};
use tracing::info;

/// Errors that can occur when exporting a processed image.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Writing the output file failed.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Destination path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Default download name for an image of `format`: `image.<ext>`.
#[must_use]
pub fn download_filename(format: ImageFormat) -> String {
    format!("image.{}", format.extension())
}

/// Human-readable size in base-1024 units with at most two decimals,
/// e.g. `"0 Bytes"`, `"512 Bytes"`, `"1.5 KB"`, `"2.25 MB"`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    let text = format!("{rounded:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{text} {}", UNITS[unit])
}

/// Percentage saved going from `original` to `compressed` bytes,
/// rounded to the nearest integer. Negative when the output grew.
/// Zero when `original` is zero.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn compression_ratio(original: u64, compressed: u64) -> i64 {
    if original == 0 {
        return 0;
    }
    let saved = (original as f64 - compressed as f64) / original as f64 * 100.0;
    saved.round() as i64
}

/// Write `image`'s encoded bytes to `path`.
///
/// # Errors
///
/// Returns [`ExportError::Write`] if the file cannot be written.
pub fn write_to_path(image: &ProcessedImage, path: &Path) -> Result<(), ExportError> {
    std::fs::write(path, image.bytes()).map_err(|source| ExportError::Write {
        path: path.display().to_string(),
        source,
    })?;
    info!(
        path = %path.display(),
        size = %format_file_size(image.byte_size() as u64),
        format = %image.format(),
        "wrote image"
    );
    Ok(())
}
