//! Per-stage options, their source-derived defaults, and the clamping
//! applied at the option-setting boundary.
//!
//! Every field is always present with an explicit value. The only
//! "unspecified" marker is a zero resize dimension, which asks the
//! resize stage to derive that side from the aspect ratio.
//!
//! Stages validate their options and fail with
//! [`PipelineError::InvalidParameter`] when handed something out of
//! domain. Interactive callers are expected to run options through
//! [`PipelineOptions::clamped`] first so that never happens.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::to_pixels;
use crate::types::{Dimensions, ImageFormat, PipelineError, SourceImage};

/// Largest width or height a resize may request.
pub const MAX_DIMENSION: u32 = 16_384;

/// Largest `width * height` of any canvas a stage creates. A rotated
/// source at the default decode budget still fits.
pub const MAX_CANVAS_PIXELS: u64 = 100_000_000;

/// Identifier for one stage, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageKind {
    /// Rescale the pixel grid.
    Resize,
    /// Lossy re-encode.
    Compress,
    /// Change the encoded format.
    Convert,
    /// Rotate, flip, skew.
    Transform,
    /// Color filters and opacity.
    Filter,
}

impl StageKind {
    /// All stages in the fixed execution order.
    pub const ALL: [Self; 5] = [
        Self::Resize,
        Self::Compress,
        Self::Convert,
        Self::Transform,
        Self::Filter,
    ];
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resize => f.write_str("Resize"),
            Self::Compress => f.write_str("Compress"),
            Self::Convert => f.write_str("Convert"),
            Self::Transform => f.write_str("Transform"),
            Self::Filter => f.write_str("Filter"),
        }
    }
}

// ───────────────────────────── Resize ─────────────────────────────

/// Options for the resize stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeOptions {
    /// Target width in pixels. `0` derives it from `height`.
    pub width: u32,
    /// Target height in pixels. `0` derives it from `width`.
    pub height: u32,
    /// Preserve the input's width/height ratio when deriving sides.
    pub maintain_aspect_ratio: bool,
}

impl ResizeOptions {
    /// Native size with aspect-lock on.
    #[must_use]
    pub const fn for_dimensions(native: Dimensions) -> Self {
        Self {
            width: native.width,
            height: native.height,
            maintain_aspect_ratio: true,
        }
    }

    /// Cap both sides at [`MAX_DIMENSION`], then shrink an explicit
    /// box proportionally until it fits in [`MAX_CANVAS_PIXELS`].
    #[must_use]
    pub fn clamped(self) -> Self {
        let (width, height) = (self.width.min(MAX_DIMENSION), self.height.min(MAX_DIMENSION));
        let area = Dimensions::new(width, height).pixel_count();
        if area <= MAX_CANVAS_PIXELS {
            return Self {
                width,
                height,
                ..self
            };
        }

        #[allow(clippy::cast_precision_loss)]
        let scale = (MAX_CANVAS_PIXELS as f64 / area as f64).sqrt();
        let shrink = |side: u32| to_pixels((f64::from(side) * scale).floor()).max(1);
        Self {
            width: shrink(width),
            height: shrink(height),
            ..self
        }
    }

    /// Target the box of `preset`.
    ///
    /// With aspect-lock on, the result fits inside the box: the side
    /// that binds takes the box size and the other follows `native`'s
    /// ratio. With aspect-lock off, the box is used as is.
    #[must_use]
    pub fn with_preset(self, preset: ResizePreset, native: Dimensions) -> Self {
        let (box_w, box_h) = preset.size();
        if !self.maintain_aspect_ratio || native.is_empty() {
            return Self {
                width: box_w,
                height: box_h,
                ..self
            };
        }

        let ratio = native.aspect_ratio();
        let (width, height) = if ratio > f64::from(box_w) / f64::from(box_h) {
            (box_w, to_pixels((f64::from(box_w) / ratio).round().max(1.0)))
        } else {
            (to_pixels((f64::from(box_h) * ratio).round().max(1.0)), box_h)
        };
        Self {
            width,
            height,
            ..self
        }
    }
}

/// Common target sizes for the resize stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResizePreset {
    /// 150x150.
    Thumbnail,
    /// 640x480.
    Small,
    /// 1280x720.
    Medium,
    /// 1920x1080.
    Hd,
    /// 3840x2160.
    #[serde(rename = "4k")]
    Uhd4k,
}

impl ResizePreset {
    /// Every preset, smallest first.
    pub const ALL: [Self; 5] = [
        Self::Thumbnail,
        Self::Small,
        Self::Medium,
        Self::Hd,
        Self::Uhd4k,
    ];

    /// Box size as `(width, height)`.
    #[must_use]
    pub const fn size(self) -> (u32, u32) {
        match self {
            Self::Thumbnail => (150, 150),
            Self::Small => (640, 480),
            Self::Medium => (1280, 720),
            Self::Hd => (1920, 1080),
            Self::Uhd4k => (3840, 2160),
        }
    }
}

impl fmt::Display for ResizePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.size();
        let name = match self {
            Self::Thumbnail => "Thumbnail",
            Self::Small => "Small",
            Self::Medium => "Medium",
            Self::Hd => "HD",
            Self::Uhd4k => "4K",
        };
        write!(f, "{name} ({width}x{height})")
    }
}

// ──────────────────────────── Compress ────────────────────────────

/// Options for the compress stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressOptions {
    /// Encoder quality, 1 (smallest) to 100 (best).
    pub quality: u8,
}

impl CompressOptions {
    /// Quality applied to a freshly loaded image.
    pub const DEFAULT_QUALITY: u8 = 80;

    /// Clamp quality into 1..=100.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            quality: self.quality.clamp(1, 100),
        }
    }
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            quality: Self::DEFAULT_QUALITY,
        }
    }
}

// ──────────────────────────── Convert ─────────────────────────────

/// Options for the convert stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertOptions {
    /// Target format.
    pub format: ImageFormat,
    /// Encoder quality for JPEG/WebP targets. `None` means 100.
    #[serde(default)]
    pub quality: Option<u8>,
}

impl ConvertOptions {
    /// A no-op conversion to `format`.
    #[must_use]
    pub const fn to_format(format: ImageFormat) -> Self {
        Self {
            format,
            quality: None,
        }
    }

    /// Quality the encoder will actually use.
    #[must_use]
    pub fn effective_quality(self) -> u8 {
        self.quality.unwrap_or(100)
    }

    /// Clamp quality into 1..=100.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            quality: self.quality.map(|q| q.clamp(1, 100)),
            ..self
        }
    }
}

// ─────────────────────────── Transform ────────────────────────────

/// Options for the geometric transform stage.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransformOptions {
    /// Clockwise rotation in degrees.
    pub angle: f64,
    /// Mirror left-right.
    pub horizontal: bool,
    /// Mirror top-bottom.
    pub vertical: bool,
    /// Horizontal shear in degrees, within ±[`Self::MAX_SKEW`].
    pub skew_x: f64,
    /// Vertical shear in degrees, within ±[`Self::MAX_SKEW`].
    pub skew_y: f64,
}

impl TransformOptions {
    /// Largest rotation magnitude accepted at the option boundary.
    pub const MAX_ANGLE: f64 = 360.0;
    /// Largest skew magnitude, in degrees.
    pub const MAX_SKEW: f64 = 45.0;

    /// Clamp angle and skews into range; non-finite values become 0.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            angle: clamp_finite(self.angle, -Self::MAX_ANGLE, Self::MAX_ANGLE, 0.0),
            skew_x: clamp_finite(self.skew_x, -Self::MAX_SKEW, Self::MAX_SKEW, 0.0),
            skew_y: clamp_finite(self.skew_y, -Self::MAX_SKEW, Self::MAX_SKEW, 0.0),
            ..self
        }
    }

    /// Whether every field is at its default.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

// ───────────────────────────── Filter ─────────────────────────────

/// Options for the filter stage.
///
/// Defaults are the identity: opacity, brightness and contrast at 1,
/// everything else at 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Global alpha multiplier, 0..=1.
    pub opacity: f32,
    /// Linear brightness multiplier, 1 = unchanged.
    pub brightness: f32,
    /// Contrast multiplier around mid-gray, 1 = unchanged.
    pub contrast: f32,
    /// Grayscale amount, 0..=1.
    pub grayscale: f32,
    /// Sepia amount, 0..=1.
    pub sepia: f32,
    /// Invert amount, 0..=1.
    pub invert: f32,
    /// Gaussian blur radius (standard deviation) in pixels, >= 0.
    pub blur: f32,
}

impl FilterOptions {
    /// Upper bound for brightness and contrast at the option boundary.
    pub const MAX_MULTIPLIER: f32 = 2.0;
    /// Upper bound for blur at the option boundary.
    pub const MAX_BLUR: f32 = 10.0;

    /// Clamp every field into its slider range; non-finite values fall
    /// back to the field's default.
    #[must_use]
    pub fn clamped(self) -> Self {
        let d = Self::default();
        Self {
            opacity: clamp_finite(self.opacity, 0.0, 1.0, d.opacity),
            brightness: clamp_finite(self.brightness, 0.0, Self::MAX_MULTIPLIER, d.brightness),
            contrast: clamp_finite(self.contrast, 0.0, Self::MAX_MULTIPLIER, d.contrast),
            grayscale: clamp_finite(self.grayscale, 0.0, 1.0, d.grayscale),
            sepia: clamp_finite(self.sepia, 0.0, 1.0, d.sepia),
            invert: clamp_finite(self.invert, 0.0, 1.0, d.invert),
            blur: clamp_finite(self.blur, 0.0, Self::MAX_BLUR, d.blur),
        }
    }
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            brightness: 1.0,
            contrast: 1.0,
            grayscale: 0.0,
            sepia: 0.0,
            invert: 0.0,
            blur: 0.0,
        }
    }
}

// ──────────────────────────── Pipeline ────────────────────────────

/// One options record per stage, edited as a whole.
///
/// Always derived from a [`SourceImage`]; see [`Self::for_source`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Resize stage options.
    pub resize: ResizeOptions,
    /// Compress stage options.
    pub compress: CompressOptions,
    /// Convert stage options.
    pub convert: ConvertOptions,
    /// Geometric transform stage options.
    pub transform: TransformOptions,
    /// Filter stage options.
    pub filter: FilterOptions,
}

impl PipelineOptions {
    /// Defaults for a new source: native size with aspect-lock, quality
    /// 80, conversion to the source's own format, identity transform
    /// and identity filter.
    #[must_use]
    pub fn for_source(source: &SourceImage) -> Self {
        Self {
            resize: ResizeOptions::for_dimensions(source.dimensions()),
            compress: CompressOptions::default(),
            convert: ConvertOptions::to_format(source.format()),
            transform: TransformOptions::default(),
            filter: FilterOptions::default(),
        }
    }

    /// Restore one stage to its default, leaving the others untouched.
    ///
    /// Resize and convert defaults are recomputed from `source`.
    pub fn reset(&mut self, stage: StageKind, source: &SourceImage) {
        match stage {
            StageKind::Resize => self.resize = ResizeOptions::for_dimensions(source.dimensions()),
            StageKind::Compress => self.compress = CompressOptions::default(),
            StageKind::Convert => self.convert = ConvertOptions::to_format(source.format()),
            StageKind::Transform => self.transform = TransformOptions::default(),
            StageKind::Filter => self.filter = FilterOptions::default(),
        }
    }

    /// Clamp every stage's options into range.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            resize: self.resize.clamped(),
            compress: self.compress.clamped(),
            convert: self.convert.clamped(),
            transform: self.transform.clamped(),
            filter: self.filter.clamped(),
        }
    }
}

// ─────────────────────────── Validation ───────────────────────────

/// Fail with [`PipelineError::InvalidParameter`] unless `quality` is 1..=100.
pub(crate) fn check_quality(stage: StageKind, quality: u8) -> Result<(), PipelineError> {
    if (1..=100).contains(&quality) {
        Ok(())
    } else {
        Err(PipelineError::InvalidParameter(format!(
            "{stage}: quality {quality} is outside 1..=100"
        )))
    }
}

/// Fail unless `value` is finite and within `min..=max`.
pub(crate) fn check_range<T>(
    stage: StageKind,
    name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<(), PipelineError>
where
    T: Into<f64> + Copy + fmt::Display,
{
    let v: f64 = value.into();
    if v.is_finite() && v >= min.into() && v <= max.into() {
        Ok(())
    } else {
        Err(PipelineError::InvalidParameter(format!(
            "{stage}: {name} {value} is outside {min}..={max}"
        )))
    }
}

/// Fail unless a `width` x `height` canvas fits in [`MAX_CANVAS_PIXELS`].
pub(crate) fn check_canvas(stage: StageKind, width: u32, height: u32) -> Result<(), PipelineError> {
    let size = Dimensions::new(width, height);
    if size.pixel_count() <= MAX_CANVAS_PIXELS {
        Ok(())
    } else {
        Err(PipelineError::InvalidParameter(format!(
            "{stage}: a {size} canvas exceeds {MAX_CANVAS_PIXELS} pixels"
        )))
    }
}

/// Clamp a float into `min..=max`, replacing NaN/inf with `fallback`.
fn clamp_finite<T>(value: T, min: T, max: T, fallback: T) -> T
where
    T: num_like::Float,
{
    if value.is_finite() {
        value.clamp_to(min, max)
    } else {
        fallback
    }
}

/// Minimal float abstraction so [`clamp_finite`] serves both `f32`
/// (filter) and `f64` (geometry) fields.
mod num_like {
    pub trait Float: Copy {
        fn is_finite(self) -> bool;
        fn clamp_to(self, min: Self, max: Self) -> Self;
    }

    impl Float for f32 {
        fn is_finite(self) -> bool {
            Self::is_finite(self)
        }
        fn clamp_to(self, min: Self, max: Self) -> Self {
            self.clamp(min, max)
        }
    }

    impl Float for f64 {
        fn is_finite(self) -> bool {
            Self::is_finite(self)
        }
        fn clamp_to(self, min: Self, max: Self) -> Self {
            self.clamp(min, max)
        }
    }
}
