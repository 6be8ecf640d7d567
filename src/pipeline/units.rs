//! Intrinsic page size: parse a unit's declared width/height into points.
//!
//! A PDF page is measured in points (1/72 in). Vector markup declares its
//! size in CSS units; unitless and `px` values follow the CSS reference
//! pixel of 96 DPI.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Points per inch.
const PT_PER_IN: f64 = 72.0;

/// Physical page size in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width_pt: f64,
    pub height_pt: f64,
}

impl PageSize {
    /// ISO A4 portrait.
    pub const A4: PageSize = PageSize {
        width_pt: 595.28,
        height_pt: 841.89,
    };

    pub fn new(width_pt: f64, height_pt: f64) -> Self {
        Self {
            width_pt,
            height_pt,
        }
    }
}

/// Length units accepted on a unit's root `width`/`height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    /// Unitless or `px`, at 96 per inch.
    Px,
    Pt,
    Mm,
    Cm,
    In,
}

impl LengthUnit {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix.to_ascii_lowercase().as_str() {
            "" | "px" => Some(LengthUnit::Px),
            "pt" => Some(LengthUnit::Pt),
            "mm" => Some(LengthUnit::Mm),
            "cm" => Some(LengthUnit::Cm),
            "in" => Some(LengthUnit::In),
            _ => None,
        }
    }

    /// Convert `value` in this unit to points.
    pub fn to_points(self, value: f64) -> f64 {
        match self {
            LengthUnit::Px => value * PT_PER_IN / 96.0,
            LengthUnit::Pt => value,
            LengthUnit::Mm => value * PT_PER_IN / 25.4,
            LengthUnit::Cm => value * PT_PER_IN / 2.54,
            LengthUnit::In => value * PT_PER_IN,
        }
    }
}

static RE_LENGTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\+?((?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)\s*([A-Za-z]*)\s*$").unwrap()
});

/// Parse a CSS length such as `96px`, `210mm`, `8.5in` or `612` into points.
///
/// Returns `None` for percentages, unknown units, zero or negative values.
pub fn parse_length(value: &str) -> Option<f64> {
    let caps = RE_LENGTH.captures(value)?;
    let number: f64 = caps[1].parse().ok()?;
    let unit = LengthUnit::from_suffix(&caps[2])?;
    let points = unit.to_points(number);
    (points.is_finite() && points > 0.0).then_some(points)
}

static RE_ROOT_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<svg\b[^>]*>").unwrap());
static RE_WIDTH_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)(?:^|\s)width\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());
static RE_HEIGHT_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)(?:^|\s)height\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

/// Declared size of the root `<svg>` element, in points.
///
/// `None` when the root has no parseable `width` and `height`.
pub fn intrinsic_size(markup: &str) -> Option<PageSize> {
    let root = RE_ROOT_TAG.find(markup)?.as_str();
    let attr = |re: &Regex| -> Option<f64> {
        let caps = re.captures(root)?;
        let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
        parse_length(raw)
    };
    Some(PageSize::new(attr(&RE_WIDTH_ATTR)?, attr(&RE_HEIGHT_ATTR)?))
}

/// Declared size, or `default` when it cannot be determined.
pub fn page_size_or(markup: &str, default: PageSize) -> PageSize {
    intrinsic_size(markup).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn converts_reference_lengths_to_72pt() {
        assert!(close(parse_length("96px").unwrap(), 72.0));
        assert!(close(parse_length("96").unwrap(), 72.0));
        assert!(close(parse_length("1in").unwrap(), 72.0));
        assert!(close(parse_length("25.4mm").unwrap(), 72.0));
        assert!(close(parse_length("2.54cm").unwrap(), 72.0));
        assert!(close(parse_length("72pt").unwrap(), 72.0));
    }

    #[test]
    fn tolerates_whitespace_and_case() {
        assert!(close(parse_length(" 1IN ").unwrap(), 72.0));
        assert!(close(parse_length("1.5e2").unwrap(), 112.5));
    }

    #[test]
    fn rejects_unsupported_units() {
        assert_eq!(parse_length("100%"), None);
        assert_eq!(parse_length("10em"), None);
        assert_eq!(parse_length("auto"), None);
        assert_eq!(parse_length("0"), None);
        assert_eq!(parse_length("-5px"), None);
    }

    #[test]
    fn intrinsic_size_reads_root_only() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="210mm" height="297mm"><rect width="5" height="5" stroke-width="3"/></svg>"#;
        let size = intrinsic_size(svg).unwrap();
        assert!((size.width_pt - 595.2756).abs() < 1e-3);
        assert!((size.height_pt - 841.8898).abs() < 1e-3);
    }

    #[test]
    fn stroke_width_is_not_width() {
        let svg = r#"<svg stroke-width="2" height="96"></svg>"#;
        assert_eq!(intrinsic_size(svg), None);
    }

    #[test]
    fn missing_size_falls_back() {
        let svg = r#"<svg viewBox="0 0 10 10"></svg>"#;
        assert_eq!(page_size_or(svg, PageSize::A4), PageSize::A4);
    }
}
