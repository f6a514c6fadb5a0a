//! Pipeline orchestrator: run the five stages in their fixed order.
//!
//! The order is Resize, Compress, Convert, Transform, Filter. Each
//! stage receives the previous stage's encoded output, so compression
//! and conversion see the resized grid and filters see final geometry.
//! The first failing stage aborts the run; there are no partial results.

use tracing::{debug, info, instrument};

use crate::codec::Codec;
use crate::compress::compress;
use crate::convert::convert;
use crate::diagnostics::{Clock, ImageSummary, MonotonicClock, PipelineDiagnostics, StageDiagnostics};
use crate::filter::{FilterChain, filter};
use crate::options::{PipelineOptions, StageKind};
use crate::resize::resize;
use crate::transform::transform;
use crate::types::{EncodedImage, PipelineError, ProcessedImage, SourceImage};

/// Run a single stage with its slice of `options`.
///
/// # Errors
///
/// Whatever the stage returns.
pub fn run_stage(
    codec: &Codec,
    stage: StageKind,
    image: &EncodedImage,
    options: &PipelineOptions,
) -> Result<EncodedImage, PipelineError> {
    match stage {
        StageKind::Resize => resize(codec, image, &options.resize),
        StageKind::Compress => compress(codec, image, &options.compress),
        StageKind::Convert => convert(codec, image, &options.convert),
        StageKind::Transform => transform(codec, image, &options.transform),
        StageKind::Filter => filter(codec, image, &options.filter),
    }
}

/// Run every stage over `source` and return the final image.
///
/// # Errors
///
/// Returns [`PipelineError::ImageDecode`] if `source` exceeds the
/// codec's source budget, otherwise the first stage error. See the
/// stage functions for the conditions.
pub fn run_pipeline(
    codec: &Codec,
    source: &SourceImage,
    options: &PipelineOptions,
) -> Result<ProcessedImage, PipelineError> {
    run_pipeline_with_diagnostics(codec, source, options, &MonotonicClock::new())
        .map(|(image, _)| image)
}

/// Like [`run_pipeline`], also collecting per-stage diagnostics timed
/// with `clock`.
///
/// # Errors
///
/// Returns [`PipelineError::ImageDecode`] if `source` exceeds the
/// codec's source budget, otherwise the first stage error.
#[instrument(level = "debug", skip_all, fields(source = %source.dimensions(), format = %source.format()))]
pub fn run_pipeline_with_diagnostics(
    codec: &Codec,
    source: &SourceImage,
    options: &PipelineOptions,
    clock: &impl Clock,
) -> Result<(ProcessedImage, PipelineDiagnostics), PipelineError> {
    codec.check_source(source)?;
    let started = clock.now();
    let mut stages = Vec::with_capacity(StageKind::ALL.len());

    let mut current: Option<EncodedImage> = None;
    for stage in StageKind::ALL {
        let input = current.as_ref().unwrap_or(source);
        let stage_started = clock.now();
        let output = run_stage(codec, stage, input, options)?;
        let duration = clock.now().saturating_sub(stage_started);

        debug!(
            %stage,
            ms = duration.as_secs_f64() * 1000.0,
            size = %output.dimensions(),
            format = %output.format(),
            bytes = output.byte_size(),
            "stage complete"
        );
        stages.push(StageDiagnostics {
            stage,
            duration,
            output: ImageSummary::of(&output),
            detail: stage_detail(stage, input, options),
        });
        current = Some(output);
    }

    let total_duration = clock.now().saturating_sub(started);
    let image = current.unwrap_or_else(|| source.clone());
    info!(
        ms = total_duration.as_secs_f64() * 1000.0,
        size = %image.dimensions(),
        format = %image.format(),
        bytes = image.byte_size(),
        "pipeline complete"
    );

    let diagnostics = PipelineDiagnostics {
        source: ImageSummary::of(source),
        stages,
        total_duration,
    };
    Ok((image, diagnostics))
}

fn stage_detail(stage: StageKind, input: &EncodedImage, options: &PipelineOptions) -> String {
    match stage {
        StageKind::Resize => {
            let r = &options.resize;
            let lock = if r.maintain_aspect_ratio { "locked" } else { "free" };
            format!("{} -> {}x{} ({lock})", input.dimensions(), r.width, r.height)
        }
        StageKind::Compress => format!("quality={}", options.compress.quality),
        StageKind::Convert => format!(
            "{} -> {} quality={}",
            input.format(),
            options.convert.format,
            options.convert.effective_quality()
        ),
        StageKind::Transform => {
            let t = &options.transform;
            format!(
                "angle={} flip={}{} skew=({}, {})",
                t.angle,
                if t.horizontal { "h" } else { "-" },
                if t.vertical { "v" } else { "-" },
                t.skew_x,
                t.skew_y
            )
        }
        StageKind::Filter => format!(
            "{} opacity={}",
            FilterChain::from_options(&options.filter),
            options.filter.opacity
        ),
    }
}
