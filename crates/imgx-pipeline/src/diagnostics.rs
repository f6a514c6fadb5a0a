//! Pipeline diagnostics: per-stage timing and output geometry.
//!
//! Durations are [`std::time::Duration`] measured through a [`Clock`].
//! The default [`MonotonicClock`] reads the `web-time` crate, which uses
//! `performance.now()` on WASM and `std::time::Instant` on native.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::options::StageKind;
use crate::types::{EncodedImage, ImageFormat};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of monotonic time for stage measurements.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// [`Clock`] backed by `web_time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: web_time::Instant,
}

impl MonotonicClock {
    /// A clock whose origin is the moment of construction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: web_time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Size, byte count and format of one encoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Encoded size in bytes.
    pub bytes: usize,
    /// Encoded format.
    pub format: ImageFormat,
}

impl ImageSummary {
    /// Summarize an encoded image.
    #[must_use]
    pub fn of(image: &EncodedImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            bytes: image.byte_size(),
            format: image.format(),
        }
    }
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Which stage ran.
    pub stage: StageKind,
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// The stage's output.
    pub output: ImageSummary,
    /// Short description of the parameters the stage ran with.
    pub detail: String,
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// The pipeline input.
    pub source: ImageSummary,
    /// One entry per stage, in execution order.
    pub stages: Vec<StageDiagnostics>,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

impl PipelineDiagnostics {
    /// The final output, or the source if no stage ran.
    #[must_use]
    pub fn output(&self) -> ImageSummary {
        self.stages.last().map_or(self.source, |s| s.output)
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!("Source: {}", format_summary(&self.source)));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<12} {:>10} {:>9}  {:<34} {}",
            "Stage", "Duration", "% Total", "Output", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for diag in &self.stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            lines.push(format!(
                "{:<12} {ms:>8.3}ms {pct:>8.1}%  {:<34} {}",
                diag.stage.to_string(),
                format_summary(&diag.output),
                diag.detail,
            ));
        }

        let output = self.output();
        lines.push(String::new());
        lines.push(format!(
            "Output: {}  |  size change: {}",
            format_summary(&output),
            format_size_change(self.source.bytes, output.bytes),
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_summary(summary: &ImageSummary) -> String {
    format!(
        "{}x{} {} {} bytes",
        summary.width, summary.height, summary.format, summary.bytes
    )
}

#[allow(clippy::cast_precision_loss)]
fn format_size_change(before: usize, after: usize) -> String {
    if before == 0 {
        return "n/a".to_string();
    }
    let pct = (after as f64 - before as f64) / before as f64 * 100.0;
    format!("{pct:+.1}%")
}
