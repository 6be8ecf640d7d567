//! Foreign content extraction for bodies fetched outside a viewer.
//!
//! A direct page download can return the vector document itself, an HTML
//! page with the document inlined somewhere in it, or an HTML wrapper
//! around a raster scan of the page. This module reduces all three to
//! vector markup, and falls back to an empty page rather than failing.

use crate::pipeline::encode::data_uri;
use crate::pipeline::resolve::salvage;
use crate::pipeline::http::SessionClient;
use crate::pipeline::sanitize::{SVG_NS, XLINK_NS};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

/// Portrait size used for raster wrappers that carry no size hint.
pub const DEFAULT_WRAPPER_SIZE: (u32, u32) = (595, 842);

/// Minimal valid document substituted when nothing can be salvaged.
pub const EMPTY_SVG: &str = concat!(
    r#"<svg xmlns="http://www.w3.org/2000/svg" width="595" height="842" "#,
    r#"viewBox="0 0 595 842"></svg>"#
);

/// Which route produced the markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionKind {
    /// The body already was a vector document.
    Native,
    /// An `<svg>…</svg>` span cut out of surrounding text.
    Embedded,
    /// A raster image from an HTML wrapper, wrapped in synthesized markup.
    RasterWrapped,
    /// Nothing usable; an empty document.
    Empty,
}

/// Markup extracted from a fetched body.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub markup: String,
    pub kind: ExtractionKind,
}

static RE_SVG_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^(?:<\?xml\b[^>]*\?>|<!--.*?-->|<!DOCTYPE\b[^>]*>|\s)*<svg\b").unwrap());

static RE_SVG_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<svg\b.*</svg\s*>").unwrap());

static RE_SIZE_HINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{2,5})\s*[x×]\s*(\d{2,5})").unwrap());

/// Whether `body` starts as a vector document (after any prolog).
pub fn looks_like_svg(body: &str) -> bool {
    RE_SVG_START.is_match(body.trim_start_matches('\u{feff}'))
}

/// The outermost `<svg>…</svg>` span in `body`, if any.
pub fn find_svg_span(body: &str) -> Option<&str> {
    RE_SVG_SPAN.find(body).map(|m| m.as_str())
}

/// First `W×H` (or `WxH`) pixel hint in surrounding text.
pub fn size_hint(text: &str) -> Option<(u32, u32)> {
    let caps = RE_SIZE_HINT.captures(text)?;
    let w: u32 = caps[1].parse().ok()?;
    let h: u32 = caps[2].parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// Minimal vector document showing one raster image at `width`×`height`.
pub fn raster_wrapper(mime: &str, bytes: &[u8], width: u32, height: u32) -> String {
    format!(
        concat!(
            r#"<svg xmlns="{ns}" xmlns:xlink="{xlink}" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            r#"<image x="0" y="0" width="{w}" height="{h}" xlink:href="{href}"/></svg>"#
        ),
        ns = SVG_NS,
        xlink = XLINK_NS,
        w = width,
        h = height,
        href = data_uri(mime, bytes)
    )
}

/// Reduce a fetched body to vector markup.
///
/// `location` is the URL the body came from; a raster wrapper's image
/// resolves against it.
pub async fn extract_markup(body: &str, location: &Url, client: &SessionClient) -> Extracted {
    if looks_like_svg(body) {
        return Extracted {
            markup: body.to_string(),
            kind: ExtractionKind::Native,
        };
    }

    if let Some(span) = find_svg_span(body) {
        debug!("{}: vector span of {} bytes inside foreign body", location, span.len());
        return Extracted {
            markup: span.to_string(),
            kind: ExtractionKind::Embedded,
        };
    }

    match salvage(body, location, location, client).await {
        Ok((mime, bytes, from)) => {
            let (w, h) = size_hint(body).unwrap_or(DEFAULT_WRAPPER_SIZE);
            debug!("{}: raster wrapper around {} ({}×{})", location, from, w, h);
            Extracted {
                markup: raster_wrapper(&mime, &bytes, w, h),
                kind: ExtractionKind::RasterWrapped,
            }
        }
        Err(reason) => {
            warn!("{}: no vector content ({}), using an empty page", location, reason);
            Extracted {
                markup: EMPTY_SVG.to_string(),
                kind: ExtractionKind::Empty,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_svg_with_prolog() {
        assert!(looks_like_svg("<svg/>"));
        assert!(looks_like_svg(
            "\u{feff}<?xml version=\"1.0\"?>\n<!-- gen -->\n<!DOCTYPE svg>\n<svg width=\"1\"/>"
        ));
        assert!(!looks_like_svg("<html><svg/></html>"));
        assert!(!looks_like_svg("<svgfoo/>"));
    }

    #[test]
    fn test_find_svg_span_is_outermost() {
        let body = "<div>x</div><svg a='1'><svg b='2'></svg></svg><p/>";
        assert_eq!(
            find_svg_span(body),
            Some("<svg a='1'><svg b='2'></svg></svg>")
        );
        assert_eq!(find_svg_span("<p>nothing</p>"), None);
    }

    #[test]
    fn test_size_hint() {
        assert_eq!(size_hint("scan 1240x1754 px"), Some((1240, 1754)));
        assert_eq!(size_hint("scan 800 × 600"), Some((800, 600)));
        assert_eq!(size_hint("no hint here"), None);
    }

    #[test]
    fn test_raster_wrapper_is_sized_and_embedded() {
        let svg = raster_wrapper("image/png", b"\x89PNG", 100, 200);
        assert!(svg.contains(r#"width="100" height="200" viewBox="0 0 100 200""#));
        assert!(svg.contains(r#"xlink:href="data:image/png;base64,"#));
        assert!(looks_like_svg(&svg));
    }

    #[test]
    fn test_empty_svg_is_valid_markup() {
        assert!(looks_like_svg(EMPTY_SVG));
        assert!(crate::pipeline::units::intrinsic_size(EMPTY_SVG).is_some());
    }
}
