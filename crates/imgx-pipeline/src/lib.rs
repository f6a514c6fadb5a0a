//! imgx-pipeline: chain raster image edits (sans-IO).
//!
//! An encoded [`SourceImage`] goes through five stages in a fixed order:
//! resize -> compress -> convert -> transform -> filter. Each stage
//! decodes its input, works on an RGBA canvas, and re-encodes, so every
//! intermediate is a real image in a real format.
//!
//! This crate has **no I/O dependencies**. It operates on in-memory
//! byte buffers and returns structured data. Files, clocks for
//! debouncing, text interchange and the recent-images cache live in
//! `imgx-io`.
//!
//! ```rust
//! # use imgx_pipeline::{Codec, ImageFormat, PipelineError, PipelineOptions, RgbaImage};
//! # fn run() -> Result<(), PipelineError> {
//! let codec = Codec::default();
//! let source = codec.encode(&RgbaImage::new(800, 600), ImageFormat::Png, 100)?;
//!
//! let mut options = PipelineOptions::for_source(&source);
//! options.resize.width = 400;
//! options.resize.height = 0;
//!
//! let out = imgx_pipeline::run_pipeline(&codec, &source, &options)?;
//! assert_eq!((out.width(), out.height()), (400, 300));
//! # Ok(())
//! # }
//! ```

pub mod alpha;
pub mod codec;
pub mod compress;
pub mod convert;
pub mod diagnostics;
pub mod filter;
pub mod geometry;
pub mod options;
pub mod pipeline;
pub mod resize;
pub mod transform;
pub mod types;

pub use codec::{Codec, CodecConfig, ResampleFilter};
pub use diagnostics::{Clock, ImageSummary, MonotonicClock, PipelineDiagnostics, StageDiagnostics};
pub use filter::FilterChain;
pub use options::{
    CompressOptions, ConvertOptions, FilterOptions, MAX_DIMENSION, PipelineOptions, ResizeOptions,
    ResizePreset, StageKind, TransformOptions,
};
pub use pipeline::{run_pipeline, run_pipeline_with_diagnostics, run_stage};
pub use types::{
    Dimensions, EncodedImage, ImageFormat, PipelineError, ProcessedImage, RgbaImage, SourceImage,
};
