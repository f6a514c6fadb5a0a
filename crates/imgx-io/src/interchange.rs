//! Base64 data-URL interchange.
//!
//! An image serializes to `data:<mime>;base64,<payload>`. Parsing also
//! accepts a bare base64 payload, which is taken to be PNG. Whitespace
//! anywhere in the text is ignored, so wrapped payloads paste cleanly.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use imgx_pipeline::{EncodedImage, ImageFormat, SourceImage};

use crate::acquire::{AcquireError, AcquireLimits, from_bytes};

/// Bare payloads shorter than this are not treated as images when
/// sniffing pasted text.
const MIN_BARE_PAYLOAD_LEN: usize = 100;

/// Serialize an image as a data URL.
#[must_use]
pub fn encode_data_url(image: &EncodedImage) -> String {
    format!(
        "data:{};base64,{}",
        image.format().mime(),
        STANDARD.encode(image.bytes())
    )
}

/// Parse a data URL or bare base64 payload into a [`SourceImage`].
///
/// The decoded size is computed from the payload length and padding and
/// checked against `limits` before decoding.
///
/// # Errors
///
/// Returns [`AcquireError::MalformedBase64`] for text that is not a
/// base64 image, and the errors of [`from_bytes`] otherwise.
pub fn decode_data_url(text: &str, limits: &AcquireLimits) -> Result<SourceImage, AcquireError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let (mime, payload) = split_data_url(&compact)?;
    limits.check_mime(mime)?;
    limits.check_size(decoded_len(payload))?;

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| AcquireError::MalformedBase64(e.to_string()))?;
    from_bytes(bytes, mime, limits)
}

/// Whether pasted text looks like a base64 image: a data-URL image
/// prefix, or a long run of base64 alphabet.
#[must_use]
pub fn looks_like_base64(text: &str) -> bool {
    let trimmed = text.trim_start();
    if has_image_data_prefix(trimmed) {
        return true;
    }
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() > MIN_BARE_PAYLOAD_LEN
        && compact
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}

/// `data:image/<subtype>;base64,` prefix, case-insensitive.
fn has_image_data_prefix(text: &str) -> bool {
    let Some(rest) = strip_prefix_ignore_case(text, "data:image/") else {
        return false;
    };
    let subtype_len = rest
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic() || *b == b'+')
        .count();
    subtype_len > 0 && strip_prefix_ignore_case(&rest[subtype_len..], ";base64,").is_some()
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

/// Split a compacted data URL into `(mime, payload)`.
fn split_data_url(compact: &str) -> Result<(&str, &str), AcquireError> {
    let Some(rest) = strip_prefix_ignore_case(compact, "data:") else {
        return Ok((ImageFormat::Png.mime(), compact));
    };
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| AcquireError::MalformedBase64("missing ',' after data URL header".into()))?;
    let mime = header
        .strip_suffix(";base64")
        .or_else(|| header.strip_suffix(";BASE64"))
        .ok_or_else(|| AcquireError::MalformedBase64("data URL is not base64 encoded".into()))?;
    Ok((mime, payload))
}

/// Byte count a well-formed base64 payload decodes to, padded or not.
fn decoded_len(payload: &str) -> u64 {
    let padding = payload.bytes().rev().take_while(|&b| b == b'=').count().min(2);
    let symbols = (payload.len() - padding) as u64;
    let tail = match symbols % 4 {
        2 => 1,
        3 => 2,
        _ => 0,
    };
    symbols / 4 * 3 + tail
}
