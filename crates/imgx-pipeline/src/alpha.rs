//! Premultiplied 16-bit working buffers for resampling.
//!
//! Interpolating straight RGBA lets the color of transparent pixels
//! bleed into their neighbours, so warps and blurs run on premultiplied
//! color. `imageproc` truncates when it writes a blended sample back, so
//! the buffers carry 16 bits per channel to keep that error below one
//! 8-bit step.

use image::{ImageBuffer, Rgba};

use crate::geometry::{to_channel, to_pixels};
use crate::types::RgbaImage;

/// Premultiplied RGBA at 16 bits per channel.
pub type Premultiplied = ImageBuffer<Rgba<u16>, Vec<u16>>;

/// Scale from an 8-bit channel to the 16-bit range.
const WIDEN: f64 = 257.0;

/// Premultiply `image` into a buffer with a `border`-pixel transparent
/// margin on every side.
#[must_use]
pub fn premultiply_padded(image: &RgbaImage, border: u32) -> Premultiplied {
    let (width, height) = image.dimensions();
    let grow = |side: u32| side.saturating_add(border.saturating_mul(2));
    let mut out = Premultiplied::new(grow(width), grow(height));
    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let weight = f64::from(a) / 255.0 * WIDEN;
        let scale = |c: u8| widen(f64::from(c) * weight);
        out.put_pixel(
            x + border,
            y + border,
            Rgba([scale(r), scale(g), scale(b), u16::from(a) * 257]),
        );
    }
    out
}

/// Undo [`premultiply_padded`], dropping `border` pixels from every side.
#[must_use]
pub fn unpremultiply_cropped(buffer: &Premultiplied, border: u32) -> RgbaImage {
    let shrink = |side: u32| side.saturating_sub(border.saturating_mul(2));
    RgbaImage::from_fn(shrink(buffer.width()), shrink(buffer.height()), |x, y| {
        let [r, g, b, a] = buffer.get_pixel(x + border, y + border).0;
        let alpha = to_channel(f64::from(a) / WIDEN);
        if alpha == 0 {
            return Rgba([0, 0, 0, 0]);
        }
        let scale = |c: u16| to_channel(f64::from(c) * 255.0 / f64::from(a));
        Rgba([scale(r), scale(g), scale(b), alpha])
    })
}

/// Round a 0..=65535 float to a 16-bit channel.
fn widen(value: f64) -> u16 {
    u16::try_from(to_pixels(value.round().min(65_535.0))).unwrap_or(u16::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_keeps_straight_color() {
        let image = RgbaImage::from_fn(5, 3, |x, y| {
            Rgba([
                u8::try_from(x * 50).unwrap(),
                u8::try_from(y * 90).unwrap(),
                7,
                u8::try_from(x * 60 + 15).unwrap(),
            ])
        });
        let buffer = premultiply_padded(&image, 2);
        assert_eq!(buffer.dimensions(), (9, 7));
        assert_eq!(unpremultiply_cropped(&buffer, 2), image);
    }

    #[test]
    fn border_is_transparent() {
        let image = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]));
        let buffer = premultiply_padded(&image, 1);
        assert_eq!(buffer.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(buffer.get_pixel(1, 1).0, [65_535; 4]);
    }

    #[test]
    fn fully_transparent_pixels_lose_their_color() {
        let image = RgbaImage::from_pixel(1, 1, Rgba([200, 10, 10, 0]));
        let back = unpremultiply_cropped(&premultiply_padded(&image, 0), 0);
        assert_eq!(back.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }
}
