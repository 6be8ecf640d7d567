//! Reference resolution: inline every external locator of a page.
//!
//! ## Fallback chain
//!
//! Viewer back-ends are inconsistent. The same image may come back with a
//! proper `image/png` type, as `application/octet-stream`, or wrapped in a
//! small HTML page that points at the real file. For each reference:
//!
//! 1. Non-success status → placeholder.
//! 2. Declared image or font type → embed with the declared type.
//! 3. Bytes recognisable as a raster format → embed with the sniffed type.
//! 4. HTML with an `<img src>` → re-fetch that source relative to the
//!    reference's own location and embed it if it is an image.
//! 5. Anything else → the 1×1 transparent placeholder.
//!
//! No step can fail the page; the page is resolved once every reference
//! has an embedded form.
//!
//! ## Substitution
//!
//! The markup is not parsed. Each original reference text is replaced
//! literally in a single left-to-right pass, longest reference first at any
//! given position, so a reference that is a prefix of another never
//! corrupts it and text inside inserted payloads is never revisited.

use crate::output::ReferenceStats;
use crate::pipeline::encode::{
    data_uri, is_data_uri, is_embeddable, placeholder_data_uri, sniff_image,
};
use crate::pipeline::http::{SessionClient, ACCEPT_FONT, ACCEPT_IMAGE};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use url::Url;

// ── Discovery ────────────────────────────────────────────────────────────────

static RE_ATTR_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\s(?:xlink:href|href|src)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

static RE_STYLE_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]+))\s*\)"#).unwrap()
});

/// Distinct external references in `markup`, in order of first appearance.
///
/// Attribute locators (`href`, `xlink:href`, `src`) and style locators
/// (`url(...)`) are collected; embedded `data:` values, pure `#anchors` and
/// empty values are not.
pub fn discover_references(markup: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    let attr = RE_ATTR_REF.captures_iter(markup);
    let style = RE_STYLE_REF.captures_iter(markup);
    for caps in attr.chain(style) {
        let Some(m) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        let value = m.as_str();
        if is_external(value) && seen.insert(value.to_string()) {
            found.push(value.to_string());
        }
    }
    found
}

/// Whether a locator points outside the unit.
pub fn is_external(value: &str) -> bool {
    let v = value.trim();
    !(v.is_empty() || v.starts_with('#') || is_data_uri(v))
}

/// Attribute values carry XML escaping; the fetchable locator does not.
fn unescape_locator(value: &str) -> String {
    value.trim().replace("&amp;", "&").replace("&#38;", "&")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReferenceKind {
    Image,
    Font,
}

impl ReferenceKind {
    fn of(locator: &str) -> Self {
        let path = locator.split(['?', '#']).next().unwrap_or("").to_ascii_lowercase();
        if [".woff2", ".woff", ".ttf", ".otf", ".eot"]
            .iter()
            .any(|ext| path.ends_with(ext))
        {
            ReferenceKind::Font
        } else {
            ReferenceKind::Image
        }
    }

    fn accept(self) -> &'static str {
        match self {
            ReferenceKind::Image => ACCEPT_IMAGE,
            ReferenceKind::Font => ACCEPT_FONT,
        }
    }
}

// ── Resolution ───────────────────────────────────────────────────────────────

/// How one reference ended up embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Declared type was embeddable.
    Embedded { mime: String },
    /// Type recognised from the payload bytes.
    Sniffed { mime: String },
    /// Image recovered from an HTML wrapper.
    Salvaged { mime: String, from: String },
    /// Nothing usable; the transparent placeholder was substituted.
    Placeholder { reason: String },
}

/// Resolution of one distinct reference.
#[derive(Debug, Clone)]
pub struct ResolvedReference {
    /// Reference text exactly as found in the markup.
    pub reference: String,
    /// Absolute locator it was resolved to, if resolvable.
    pub url: Option<Url>,
    pub resolution: Resolution,
    data_uri: String,
}

/// A self-contained page and how each reference was handled.
#[derive(Debug, Clone)]
pub struct ResolvedMarkup {
    pub markup: String,
    pub references: Vec<ResolvedReference>,
}

impl ResolvedMarkup {
    pub fn stats(&self) -> ReferenceStats {
        let mut stats = ReferenceStats {
            total: self.references.len(),
            ..ReferenceStats::default()
        };
        for r in &self.references {
            match r.resolution {
                Resolution::Embedded { .. } => stats.embedded += 1,
                Resolution::Sniffed { .. } => stats.sniffed += 1,
                Resolution::Salvaged { .. } => stats.salvaged += 1,
                Resolution::Placeholder { .. } => stats.placeholders += 1,
            }
        }
        stats
    }
}

/// Replace every external reference in `markup` with an embedded payload.
///
/// `origin` is the absolute location the markup was loaded from; relative
/// references resolve against it and it is sent as `Referer`. At most
/// `concurrency` fetches are in flight at once.
pub async fn resolve_references(
    markup: &str,
    origin: &Url,
    client: &SessionClient,
    concurrency: usize,
) -> ResolvedMarkup {
    let references = discover_references(markup);
    if references.is_empty() {
        return ResolvedMarkup {
            markup: markup.to_string(),
            references: Vec::new(),
        };
    }
    debug!("{}: {} references to resolve", origin, references.len());

    let order: HashMap<String, usize> = references
        .iter()
        .enumerate()
        .map(|(i, r)| (r.clone(), i))
        .collect();

    let mut resolved: Vec<ResolvedReference> = stream::iter(references)
        .map(|reference| resolve_one(reference, origin, client))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    resolved.sort_by_key(|r| order.get(&r.reference).copied().unwrap_or(usize::MAX));

    let replacements: Vec<(&str, &str)> = resolved
        .iter()
        .map(|r| (r.reference.as_str(), r.data_uri.as_str()))
        .collect();
    let markup = substitute_literals(markup, &replacements);

    let out = ResolvedMarkup {
        markup,
        references: resolved,
    };
    let stats = out.stats();
    info!(
        "{}: {} references ({} embedded, {} sniffed, {} salvaged, {} placeholders)",
        origin, stats.total, stats.embedded, stats.sniffed, stats.salvaged, stats.placeholders
    );
    out
}

async fn resolve_one(reference: String, origin: &Url, client: &SessionClient) -> ResolvedReference {
    let placeholder = |url: Option<Url>, reason: String| ResolvedReference {
        reference: reference.clone(),
        url,
        resolution: Resolution::Placeholder { reason },
        data_uri: placeholder_data_uri(),
    };

    let url = match origin.join(&unescape_locator(&reference)) {
        Ok(url) => url,
        Err(e) => {
            warn!("Unresolvable reference '{}' in {}: {}", reference, origin, e);
            return placeholder(None, format!("unresolvable: {e}"));
        }
    };
    let kind = ReferenceKind::of(url.path());

    let fetched = match client.fetch(&url, kind.accept(), Some(origin)).await {
        Ok(f) => f,
        Err(e) => {
            warn!("Reference '{}' → placeholder: {}", reference, e);
            return placeholder(Some(url), e.to_string());
        }
    };

    if !fetched.is_success() {
        warn!(
            "Reference '{}' ({}) returned HTTP {} → placeholder",
            reference, url, fetched.status
        );
        return placeholder(Some(url), format!("HTTP {}", fetched.status));
    }

    let declared = fetched.mime();
    if is_embeddable(&declared) {
        return ResolvedReference {
            data_uri: data_uri(&declared, &fetched.body),
            reference,
            url: Some(url),
            resolution: Resolution::Embedded { mime: declared },
        };
    }

    if let Some(mime) = sniff_image(&fetched.body) {
        debug!(
            "Reference '{}' declared '{}' but is {}",
            reference, declared, mime
        );
        return ResolvedReference {
            data_uri: data_uri(mime, &fetched.body),
            reference,
            url: Some(url),
            resolution: Resolution::Sniffed {
                mime: mime.to_string(),
            },
        };
    }

    match salvage(&fetched.text(), &url, origin, client).await {
        Ok((mime, bytes, from)) => ResolvedReference {
            data_uri: data_uri(&mime, &bytes),
            reference,
            url: Some(url),
            resolution: Resolution::Salvaged {
                mime,
                from: from.to_string(),
            },
        },
        Err(reason) => {
            warn!(
                "Reference '{}' ({}, declared '{}') → placeholder: {}",
                reference, url, declared, reason
            );
            placeholder(Some(url), reason)
        }
    }
}

static RE_IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap()
});

/// Source of the first `<img>` tag in an HTML-like body.
pub fn find_img_src(html: &str) -> Option<String> {
    let caps = RE_IMG_SRC.captures(html)?;
    let src = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))?
        .as_str();
    is_external(src).then(|| unescape_locator(src))
}

/// Recover an image from an HTML wrapper, re-fetching its `<img src>`
/// relative to the wrapper's own location.
pub(crate) async fn salvage(
    body: &str,
    location: &Url,
    referer: &Url,
    client: &SessionClient,
) -> Result<(String, Vec<u8>, Url), String> {
    let src = find_img_src(body).ok_or_else(|| "no <img> in response body".to_string())?;
    let target = location
        .join(&src)
        .map_err(|e| format!("salvage source '{src}' unresolvable: {e}"))?;

    let fetched = client
        .fetch_ok(&target, ACCEPT_IMAGE, Some(referer))
        .await
        .map_err(|e| format!("salvage fetch failed: {e}"))?;

    let declared = fetched.mime();
    if declared.starts_with("image/") {
        return Ok((declared, fetched.body, target));
    }
    match sniff_image(&fetched.body) {
        Some(mime) => Ok((mime.to_string(), fetched.body, target)),
        None => Err(format!("salvage source '{target}' is '{declared}', not an image")),
    }
}

// ── Substitution ─────────────────────────────────────────────────────────────

/// Replace each `(from, to)` literal in one pass, longest `from` first.
pub fn substitute_literals(markup: &str, replacements: &[(&str, &str)]) -> String {
    let mut ordered: Vec<&(&str, &str)> =
        replacements.iter().filter(|(from, _)| !from.is_empty()).collect();
    if ordered.is_empty() {
        return markup.to_string();
    }
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let alternation = ordered
        .iter()
        .map(|(from, _)| regex::escape(from))
        .collect::<Vec<_>>()
        .join("|");
    let lookup: HashMap<&str, &str> = ordered.iter().map(|(f, t)| (*f, *t)).collect();

    match Regex::new(&alternation) {
        Ok(re) => re
            .replace_all(markup, |caps: &regex::Captures| {
                let m = &caps[0];
                lookup.get(m).copied().unwrap_or(m).to_string()
            })
            .into_owned(),
        Err(e) => {
            // Too many references for one automaton: sequential fallback.
            debug!("Falling back to sequential substitution: {}", e);
            ordered
                .iter()
                .fold(markup.to_string(), |acc, (from, to)| acc.replace(from, to))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_attribute_and_style_references() {
        let svg = r##"<svg><image xlink:href="img/a.png"/><image href='b.jpg'/>
            <rect style="fill:url('c.png')"/><rect fill="url(#grad)"/>
            <style>@font-face{src:url(fonts/f.woff2)}</style>
            <image href="img/a.png"/><use xlink:href="#sym"/>
            <image href="data:image/png;base64,AAAA"/></svg>"##;
        assert_eq!(
            discover_references(svg),
            vec!["img/a.png", "b.jpg", "c.png", "fonts/f.woff2"]
        );
    }

    #[test]
    fn test_namespace_declarations_are_not_references() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink"/>"#;
        assert!(discover_references(svg).is_empty());
    }

    #[test]
    fn test_is_external() {
        assert!(is_external("a.png"));
        assert!(is_external("https://cdn/a.png"));
        assert!(!is_external("#a"));
        assert!(!is_external("  "));
        assert!(!is_external("data:image/png;base64,AA"));
    }

    #[test]
    fn test_unescape_for_fetch() {
        assert_eq!(unescape_locator("img?a=1&amp;b=2"), "img?a=1&b=2");
    }

    #[test]
    fn test_reference_kind() {
        assert_eq!(ReferenceKind::of("/f/font.WOFF2"), ReferenceKind::Font);
        assert_eq!(ReferenceKind::of("/f/a.ttf?v=1"), ReferenceKind::Font);
        assert_eq!(ReferenceKind::of("/i/a.png"), ReferenceKind::Image);
    }

    #[test]
    fn test_find_img_src() {
        let html = r#"<html><body><p>x</p><IMG class="p" SRC="../real/1.png"></body></html>"#;
        assert_eq!(find_img_src(html).as_deref(), Some("../real/1.png"));
        assert_eq!(find_img_src("<img src=plain.gif>").as_deref(), Some("plain.gif"));
        assert_eq!(find_img_src("<p>no image</p>"), None);
    }

    #[test]
    fn test_substitute_longest_first() {
        let markup = r#"<image href="a.png"/><image href="a.png?v=2"/>"#;
        let out = substitute_literals(markup, &[("a.png", "X"), ("a.png?v=2", "Y")]);
        assert_eq!(out, r#"<image href="X"/><image href="Y"/>"#);
    }

    #[test]
    fn test_substitute_every_occurrence_once() {
        let markup = "a b a";
        let out = substitute_literals(markup, &[("a", "ba"), ("b", "c")]);
        assert_eq!(out, "ba c ba");
    }

    #[test]
    fn test_stats_count_resolutions() {
        let r = |resolution| ResolvedReference {
            reference: "r".into(),
            url: None,
            resolution,
            data_uri: String::new(),
        };
        let resolved = ResolvedMarkup {
            markup: String::new(),
            references: vec![
                r(Resolution::Embedded { mime: "image/png".into() }),
                r(Resolution::Placeholder { reason: "HTTP 404".into() }),
                r(Resolution::Placeholder { reason: "HTTP 500".into() }),
            ],
        };
        let stats = resolved.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.embedded, 1);
        assert_eq!(stats.placeholders, 2);
    }
}
