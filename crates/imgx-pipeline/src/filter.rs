//! Filter stage: color filters, blur and global opacity.
//!
//! [`FilterChain`] holds only the filters that differ from their
//! identity value, in the fixed order brightness, contrast, grayscale,
//! sepia, invert, blur. It renders as a CSS `filter` value and applies
//! each function with the CSS Filter Effects math, clamping to 0..=1
//! after every step. Opacity is not part of the chain; it scales alpha
//! after the chain has run.

use std::fmt;

use tracing::debug;

use crate::alpha::{premultiply_padded, unpremultiply_cropped};
use crate::codec::{Codec, MAX_QUALITY};
use crate::geometry::{to_channel, to_pixels};
use crate::options::{FilterOptions, StageKind, check_range};
use crate::types::{EncodedImage, PipelineError, RgbaImage};

/// One filter function with its argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterFn {
    /// Multiply each channel.
    Brightness(f32),
    /// Scale distance from mid-gray.
    Contrast(f32),
    /// Blend toward luminance.
    Grayscale(f32),
    /// Blend toward the sepia matrix.
    Sepia(f32),
    /// Blend toward the complement.
    Invert(f32),
    /// Gaussian blur with this standard deviation in pixels.
    Blur(f32),
}

impl fmt::Display for FilterFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Brightness(v) => write!(f, "brightness({v})"),
            Self::Contrast(v) => write!(f, "contrast({v})"),
            Self::Grayscale(v) => write!(f, "grayscale({v})"),
            Self::Sepia(v) => write!(f, "sepia({v})"),
            Self::Invert(v) => write!(f, "invert({v})"),
            Self::Blur(v) => write!(f, "blur({v}px)"),
        }
    }
}

/// The non-identity filters of a [`FilterOptions`], in application order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterChain {
    functions: Vec<FilterFn>,
}

impl FilterChain {
    /// Collect the filters whose value differs from the identity.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn from_options(options: &FilterOptions) -> Self {
        let candidates = [
            (options.brightness != 1.0, FilterFn::Brightness(options.brightness)),
            (options.contrast != 1.0, FilterFn::Contrast(options.contrast)),
            (options.grayscale != 0.0, FilterFn::Grayscale(options.grayscale)),
            (options.sepia != 0.0, FilterFn::Sepia(options.sepia)),
            (options.invert != 0.0, FilterFn::Invert(options.invert)),
            (options.blur > 0.0, FilterFn::Blur(options.blur)),
        ];
        Self {
            functions: candidates
                .into_iter()
                .filter_map(|(active, function)| active.then_some(function))
                .collect(),
        }
    }

    /// Whether no filter would change a pixel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// The active filters.
    #[must_use]
    pub fn functions(&self) -> &[FilterFn] {
        &self.functions
    }

    /// Run every filter over `pixels`.
    #[must_use]
    pub fn apply(&self, pixels: &RgbaImage) -> RgbaImage {
        let mut out = pixels.clone();
        for function in &self.functions {
            match *function {
                FilterFn::Blur(sigma) => out = gaussian_blur_premultiplied(&out, sigma),
                color => map_color(&mut out, |rgb| apply_color(color, rgb)),
            }
        }
        out
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.functions.is_empty() {
            return f.write_str("none");
        }
        for (i, function) in self.functions.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{function}")?;
        }
        Ok(())
    }
}

/// Apply the filter chain, then scale alpha by `options.opacity`, and
/// re-encode at full quality in the input's format.
///
/// An all-default options record returns the input unchanged.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] for a non-finite or
/// out-of-range value, and decode/encode errors from the codec.
pub fn filter(
    codec: &Codec,
    image: &EncodedImage,
    options: &FilterOptions,
) -> Result<EncodedImage, PipelineError> {
    validate(options)?;
    let chain = FilterChain::from_options(options);
    let opaque = (options.opacity - 1.0).abs() < f32::EPSILON;
    if chain.is_empty() && opaque {
        debug!("filter chain is empty");
        return Ok(image.clone());
    }

    let pixels = codec.decode(image)?;
    let mut out = chain.apply(&pixels);
    if !opaque {
        apply_opacity(&mut out, options.opacity);
    }
    debug!(filter = %chain, opacity = options.opacity, "filtered");
    codec.encode(&out, image.format(), MAX_QUALITY)
}

fn validate(options: &FilterOptions) -> Result<(), PipelineError> {
    let stage = StageKind::Filter;
    let max = FilterOptions::MAX_MULTIPLIER;
    check_range(stage, "opacity", options.opacity, 0.0, 1.0)?;
    check_range(stage, "brightness", options.brightness, 0.0, max)?;
    check_range(stage, "contrast", options.contrast, 0.0, max)?;
    check_range(stage, "grayscale", options.grayscale, 0.0, 1.0)?;
    check_range(stage, "sepia", options.sepia, 0.0, 1.0)?;
    check_range(stage, "invert", options.invert, 0.0, 1.0)?;
    check_range(stage, "blur", options.blur, 0.0, FilterOptions::MAX_BLUR)
}

/// Multiply every alpha value by `opacity`.
pub fn apply_opacity(pixels: &mut RgbaImage, opacity: f32) {
    let opacity = f64::from(opacity.clamp(0.0, 1.0));
    for pixel in pixels.pixels_mut() {
        pixel.0[3] = to_channel(f64::from(pixel.0[3]) * opacity);
    }
}

type Rgb = [f64; 3];

fn map_color(pixels: &mut RgbaImage, f: impl Fn(Rgb) -> Rgb) {
    for pixel in pixels.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let rgb = f([unit(r), unit(g), unit(b)]);
        pixel.0 = [
            to_channel(rgb[0] * 255.0),
            to_channel(rgb[1] * 255.0),
            to_channel(rgb[2] * 255.0),
            a,
        ];
    }
}

fn unit(channel: u8) -> f64 {
    f64::from(channel) / 255.0
}

fn apply_color(function: FilterFn, rgb: Rgb) -> Rgb {
    let out = match function {
        FilterFn::Brightness(b) => rgb.map(|c| c * f64::from(b)),
        FilterFn::Contrast(k) => {
            let k = f64::from(k);
            rgb.map(|c| (c - 0.5).mul_add(k, 0.5))
        }
        FilterFn::Grayscale(amount) => matrix(grayscale_matrix(amount), rgb),
        FilterFn::Sepia(amount) => matrix(sepia_matrix(amount), rgb),
        FilterFn::Invert(amount) => {
            let a = f64::from(amount);
            rgb.map(|c| a.mul_add(1.0 - c, (1.0 - a) * c))
        }
        FilterFn::Blur(_) => rgb,
    };
    out.map(|c| c.clamp(0.0, 1.0))
}

fn matrix(m: [Rgb; 3], [r, g, b]: Rgb) -> Rgb {
    m.map(|row| row[0].mul_add(r, row[1].mul_add(g, row[2] * b)))
}

fn grayscale_matrix(amount: f32) -> [Rgb; 3] {
    let s = 1.0 - f64::from(amount.clamp(0.0, 1.0));
    [
        [0.7874f64.mul_add(s, 0.2126), 0.7152 - 0.7152 * s, 0.0722 - 0.0722 * s],
        [0.2126 - 0.2126 * s, 0.2848f64.mul_add(s, 0.7152), 0.0722 - 0.0722 * s],
        [0.2126 - 0.2126 * s, 0.7152 - 0.7152 * s, 0.9278f64.mul_add(s, 0.0722)],
    ]
}

fn sepia_matrix(amount: f32) -> [Rgb; 3] {
    let s = 1.0 - f64::from(amount.clamp(0.0, 1.0));
    [
        [0.607f64.mul_add(s, 0.393), 0.769 - 0.769 * s, 0.189 - 0.189 * s],
        [0.349 - 0.349 * s, 0.314f64.mul_add(s, 0.686), 0.168 - 0.168 * s],
        [0.272 - 0.272 * s, 0.534 - 0.534 * s, 0.869f64.mul_add(s, 0.131)],
    ]
}

/// Gaussian blur of an RGBA image on premultiplied color so
/// transparent pixels do not bleed black.
///
/// Pixels outside the image count as transparent, so edges fade the way
/// a canvas `blur()` does. Non-positive sigma returns the image
/// unchanged; `imageproc` panics on `sigma <= 0.0`.
#[must_use = "returns the blurred RGBA image"]
pub fn gaussian_blur_premultiplied(image: &RgbaImage, sigma: f32) -> RgbaImage {
    if sigma <= 0.0 || !sigma.is_finite() {
        return image.clone();
    }

    // imageproc's kernel reaches 2 sigma either side.
    let reach = to_pixels(f64::from(sigma * 2.0).ceil());
    let padded = premultiply_padded(image, reach);
    let blurred = imageproc::filter::gaussian_blur_f32(&padded, sigma);
    unpremultiply_cropped(&blurred, reach)
}
