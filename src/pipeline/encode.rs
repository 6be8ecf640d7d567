//! Payload encoding: bytes → base64 `data:` locators, plus type classification.
//!
//! Every external reference in a page ends up as one of these locators, so
//! the unit is self-contained once written. A fixed 1×1 transparent PNG
//! stands in for anything that could not be retrieved.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// 1×1 transparent PNG, base64.
pub const PLACEHOLDER_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

/// `data:` locator substituted for unresolvable references.
pub fn placeholder_data_uri() -> String {
    format!("data:image/png;base64,{PLACEHOLDER_PNG_B64}")
}

/// Wrap a payload as a base64 `data:` locator.
pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded {} bytes of {} → {} chars base64", bytes.len(), mime, b64.len());
    format!("data:{mime};base64,{b64}")
}

/// The media type of a `Content-Type` header value, lowercased, parameters dropped.
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Whether a declared media type can be embedded as-is.
///
/// Images and web fonts both qualify; everything else goes through salvage.
pub fn is_embeddable(mime: &str) -> bool {
    mime.starts_with("image/")
        || mime.starts_with("font/")
        || mime.starts_with("application/font-")
        || mime.starts_with("application/x-font-")
}

/// Media type of a raster payload recognised from its leading bytes.
///
/// Covers servers that label images as `application/octet-stream` or
/// `text/plain`.
pub fn sniff_image(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

/// Whether a locator is already self-contained.
pub fn is_data_uri(value: &str) -> bool {
    value.trim_start().get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:"))
}
