//! Sanitization: deterministic cleanup of third-party vector markup.
//!
//! ## Why a text pipeline and not a parser?
//!
//! Page markup arrives from viewers that wrap it in HTML, prepend BOMs,
//! leave stray `<script>` blocks or reference external style sheets. It is
//! not reliably well-formed XML until this module has run, so every rule is
//! a pure `&str → String` rewrite over the raw text. Each rule is
//! independently testable.
//!
//! ## Rule Order
//!
//! Dash patterns are fixed first so the later tag removal cannot leave a
//! half-rewritten attribute behind. Hostile tags go before comments so a
//! `<!--` inside a removed script block never swallows real content. The
//! namespace rule runs last because it only inspects the root element that
//! survives the earlier removals.
//!
//! The whole list is re-applied until the text stops changing, which makes
//! [`sanitize_markup`] idempotent.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Minimal positive dash length substituted for explicit zeros.
pub const DASH_EPSILON: &str = "0.001";

/// Standard vector-graphics namespace.
pub const SVG_NS: &str = "http://www.w3.org/2000/svg";

/// XLink namespace, needed for `xlink:href`.
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Elements removed together with their content.
const BLOCK_TAGS: &[&str] = &["script", "foreignObject", "head", "iframe"];

/// Elements whose tags are removed but whose content is kept.
const WRAPPER_TAGS: &[&str] = &["html", "body", "meta", "link"];

/// Apply all sanitization rules until the markup is stable.
///
/// Rules (applied in order, repeated to a fixpoint):
/// 1. Strip the byte-order mark and leading whitespace
/// 2. Rewrite zero dash lengths to [`DASH_EPSILON`]
/// 3. Strip hostile tags (scripts, foreign objects, HTML wrappers, linked style sheets)
/// 4. Strip comments and doctype declarations
/// 5. Declare the SVG (and XLink, if used) namespace on the root element
pub fn sanitize_markup(input: &str) -> String {
    // Every rule only deletes text, except the dash and namespace rules,
    // which rewrite each site once, so this reaches a fixpoint.
    let mut current = input.to_string();
    loop {
        let next = sanitize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn sanitize_once(input: &str) -> String {
    let s = strip_leading_noise(input);
    let s = fix_zero_dashes(&s);
    let s = strip_hostile_tags(&s);
    let s = strip_comments_and_doctype(&s);
    ensure_namespaces(&s)
}

// ── Rule 1: BOM and leading whitespace ───────────────────────────────────────

fn strip_leading_noise(input: &str) -> String {
    input.trim_start_matches('\u{feff}').trim_start().to_string()
}

// ── Rule 2: Degenerate dash patterns ─────────────────────────────────────────

static RE_DASH_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(stroke-dasharray\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

static RE_DASH_PROP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(stroke-dasharray\s*:\s*)([^;"'}>]*)"#).unwrap());

static RE_DASH_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\s,]+").unwrap());

/// Rewrite every zero entry of a dash list, keeping separators and the
/// other entries byte-for-byte.
pub fn fix_dash_list(value: &str) -> String {
    RE_DASH_TOKEN
        .replace_all(value, |caps: &Captures| {
            let token = &caps[0];
            if is_zero_length(token) {
                DASH_EPSILON.to_string()
            } else {
                token.to_string()
            }
        })
        .into_owned()
}

fn is_zero_length(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    let number = lower.strip_suffix("px").unwrap_or(&lower);
    number.parse::<f64>().is_ok_and(|v| v == 0.0)
}

fn fix_zero_dashes(input: &str) -> String {
    let s = RE_DASH_ATTR.replace_all(input, |caps: &Captures| {
        let (quote, value) = match (caps.get(2), caps.get(3)) {
            (Some(v), _) => ('"', v.as_str()),
            (None, Some(v)) => ('\'', v.as_str()),
            (None, None) => ('"', ""),
        };
        format!("{}{quote}{}{quote}", &caps[1], fix_dash_list(value))
    });
    RE_DASH_PROP
        .replace_all(&s, |caps: &Captures| {
            format!("{}{}", &caps[1], fix_dash_list(&caps[2]))
        })
        .into_owned()
}

// ── Rule 3: Hostile tags ─────────────────────────────────────────────────────

struct TagPatterns {
    self_closing: Regex,
    block: Option<Regex>,
    stray: Regex,
}

fn tag_patterns(name: &str, with_block: bool) -> TagPatterns {
    let n = regex::escape(name);
    TagPatterns {
        self_closing: Regex::new(&format!(r"(?is)<{n}\b[^>]*/\s*>")).unwrap(),
        block: with_block
            .then(|| Regex::new(&format!(r"(?is)<{n}\b[^>]*>.*?</{n}\s*>")).unwrap()),
        stray: Regex::new(&format!(r"(?is)</?{n}\b[^>]*>")).unwrap(),
    }
}

static BLOCK_PATTERNS: Lazy<Vec<TagPatterns>> =
    Lazy::new(|| BLOCK_TAGS.iter().map(|t| tag_patterns(t, true)).collect());

static WRAPPER_PATTERNS: Lazy<Vec<TagPatterns>> =
    Lazy::new(|| WRAPPER_TAGS.iter().map(|t| tag_patterns(t, false)).collect());

static RE_XML_STYLESHEET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<\?xml-stylesheet\b.*?\?>").unwrap());

/// Removing one tag can join the text around it into a new one, so the
/// single pass is repeated until nothing changes.
fn strip_hostile_tags(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let next = strip_hostile_tags_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_hostile_tags_once(input: &str) -> String {
    let mut s = RE_XML_STYLESHEET.replace_all(input, "").into_owned();
    for p in BLOCK_PATTERNS.iter() {
        s = p.self_closing.replace_all(&s, "").into_owned();
        if let Some(ref block) = p.block {
            s = block.replace_all(&s, "").into_owned();
        }
        // An unterminated opening tag still must not reach the renderer.
        s = p.stray.replace_all(&s, "").into_owned();
    }
    for p in WRAPPER_PATTERNS.iter() {
        s = p.self_closing.replace_all(&s, "").into_owned();
        s = p.stray.replace_all(&s, "").into_owned();
    }
    s
}

// ── Rule 4: Comments and doctype ─────────────────────────────────────────────

static RE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static RE_DOCTYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<!DOCTYPE\b[^\[>]*(?:\[.*?\])?\s*>").unwrap());

fn strip_comments_and_doctype(input: &str) -> String {
    let s = RE_COMMENT.replace_all(input, "");
    RE_DOCTYPE.replace_all(&s, "").into_owned()
}

// ── Rule 5: Namespaces ───────────────────────────────────────────────────────

static RE_ROOT_SVG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<svg\b[^>]*>").unwrap());
static RE_XMLNS_DEFAULT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\sxmlns\s*=").unwrap());
static RE_XMLNS_XLINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\sxmlns:xlink\s*=").unwrap());
static RE_XLINK_USE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)[\s<]xlink:\w").unwrap());

fn ensure_namespaces(input: &str) -> String {
    let Some(root) = RE_ROOT_SVG.find(input) else {
        return input.to_string();
    };
    let tag = root.as_str();

    let mut extra = String::new();
    if !RE_XMLNS_DEFAULT.is_match(tag) {
        extra.push_str(&format!(r#" xmlns="{SVG_NS}""#));
    }
    if !RE_XMLNS_XLINK.is_match(tag) && RE_XLINK_USE.is_match(input) {
        extra.push_str(&format!(r#" xmlns:xlink="{XLINK_NS}""#));
    }
    if extra.is_empty() {
        return input.to_string();
    }

    // Insert right after `<svg`, leaving the existing attributes untouched.
    let at = root.start() + "<svg".len();
    let mut out = String::with_capacity(input.len() + extra.len());
    out.push_str(&input[..at]);
    out.push_str(&extra);
    out.push_str(&input[at..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_dash_list_space_and_comma() {
        assert_eq!(fix_dash_list("0 5"), "0.001 5");
        assert_eq!(fix_dash_list("0,5"), "0.001,5");
        assert_eq!(fix_dash_list("3, 0px 2.5"), "3, 0.001 2.5");
        assert_eq!(fix_dash_list("0.0 0"), "0.001 0.001");
    }

    #[test]
    fn test_fix_dash_list_keeps_non_zero_verbatim() {
        assert_eq!(fix_dash_list("4.50 01 none"), "4.50 01 none");
        assert_eq!(fix_dash_list("0.001"), "0.001");
    }

    #[test]
    fn test_dash_attribute_and_style_property() {
        let input = r#"<path stroke-dasharray="0,4" style="fill:none;stroke-dasharray:0 2;stroke:red"/>"#;
        let out = fix_zero_dashes(input);
        assert!(out.contains(r#"stroke-dasharray="0.001,4""#), "got: {out}");
        assert!(out.contains("stroke-dasharray:0.001 2;"), "got: {out}");
        assert!(out.contains("stroke:red"));
    }

    #[test]
    fn test_single_quoted_dash_attribute() {
        let out = fix_zero_dashes("<line stroke-dasharray='0 0'/>");
        assert_eq!(out, "<line stroke-dasharray='0.001 0.001'/>");
    }

    #[test]
    fn test_strip_script_block_and_self_closing() {
        let input = r#"<svg><script type="text/javascript">alert("<rect/>")</script><rect/><script src="x.js"/></svg>"#;
        let out = strip_hostile_tags(input);
        assert_eq!(out, "<svg><rect/></svg>");
    }

    #[test]
    fn test_strip_foreign_object() {
        let input = "<svg><foreignObject width=\"10\"><div>html</div></foreignObject><g/></svg>";
        assert_eq!(strip_hostile_tags(input), "<svg><g/></svg>");
    }

    #[test]
    fn test_strip_html_wrapper_keeps_svg() {
        let input = "<html><head><meta charset=\"utf-8\"><title>x</title></head><body><svg><g/></svg></body></html>";
        assert_eq!(strip_hostile_tags(input), "<svg><g/></svg>");
    }

    #[test]
    fn test_strip_linked_stylesheets() {
        let input = r#"<?xml-stylesheet href="a.css" type="text/css"?><svg><link rel="stylesheet" href="b.css"/><g/></svg>"#;
        assert_eq!(strip_hostile_tags(input), "<svg><g/></svg>");
    }

    #[test]
    fn test_inline_style_is_kept() {
        let input = "<svg><style>.a{fill:red}</style></svg>";
        assert_eq!(strip_hostile_tags(input), input);
    }

    #[test]
    fn test_strip_comments_and_doctype() {
        let input = "<!DOCTYPE svg PUBLIC \"-//W3C//DTD SVG 1.1//EN\" \"x.dtd\"><!-- made by tool\n v2 --><svg/>";
        assert_eq!(strip_comments_and_doctype(input), "<svg/>");
    }

    #[test]
    fn test_inject_namespace_keeps_attributes() {
        let out = ensure_namespaces(r#"<svg width="10" height="20"><g/></svg>"#);
        assert_eq!(
            out,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="20"><g/></svg>"#
        );
    }

    #[test]
    fn test_inject_xlink_only_when_used() {
        let with = ensure_namespaces(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><image xlink:href="data:,"/></svg>"#,
        );
        assert!(with.contains(r#"xmlns:xlink="http://www.w3.org/1999/xlink""#));

        let without =
            ensure_namespaces(r#"<svg xmlns="http://www.w3.org/2000/svg"><g/></svg>"#);
        assert!(!without.contains("xmlns:xlink"));
    }

    #[test]
    fn test_existing_namespace_untouched() {
        let input = r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink"><use xlink:href="#a"/></svg>"##;
        assert_eq!(ensure_namespaces(input), input);
    }

    #[test]
    fn test_bom_and_whitespace_stripped() {
        let out = sanitize_markup("\u{feff}\n  <svg xmlns=\"http://www.w3.org/2000/svg\"/>");
        assert_eq!(out, "<svg xmlns=\"http://www.w3.org/2000/svg\"/>");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let inputs = [
            "",
            "<svg/>",
            "\u{feff}<!-- c --><html><body><svg width='1in'><script>x</script><path stroke-dasharray='0 1'/></svg></body></html>",
            "<scr<script></script>ipt>alert(1)</script><svg><g/></svg>",
            "<svg><image xlink:href='data:image/png;base64,AAAA'/><!--<script>--></svg>",
            "plain text with no markup",
        ];
        for input in inputs {
            let once = sanitize_markup(input);
            let twice = sanitize_markup(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    fn nested_script(layers: usize) -> String {
        let mut s = "<script>alert(1)</script>".to_string();
        for _ in 0..layers {
            s = format!("<scr{s}ipt>");
        }
        format!("{s}<svg><g/></svg>")
    }

    #[test]
    fn test_deeply_nested_script_is_removed() {
        let input = nested_script(40);
        let once = sanitize_markup(&input);
        assert!(!once.to_ascii_lowercase().contains("<script"), "got: {once}");
        assert!(once.contains("<g/>"));
        assert_eq!(sanitize_markup(&once), once);
    }

    #[test]
    fn test_strip_hostile_tags_rescans_joined_text() {
        let out = strip_hostile_tags(&nested_script(3));
        assert!(!out.contains("<script"), "got: {out}");
    }

    #[test]
    fn test_sanitize_full_pipeline() {
        let input = "<?xml-stylesheet href='s.css'?><!DOCTYPE svg><svg width=\"96px\" height=\"96px\"><!-- x --><script>1</script><path style=\"stroke-dasharray: 0, 3\" /><image xlink:href=\"data:image/png;base64,AA\"/></svg>";
        let out = sanitize_markup(input);
        assert!(out.starts_with("<svg xmlns=\"http://www.w3.org/2000/svg\" xmlns:xlink="));
        assert!(out.contains("stroke-dasharray: 0.001, 3"));
        assert!(!out.contains("script"));
        assert!(!out.contains("<!--"));
        assert!(!out.contains("DOCTYPE"));
        assert!(!out.contains("xml-stylesheet"));
    }
}
