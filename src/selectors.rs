//! Default selectors and patterns for the remote viewer.
//!
//! Centralising every selector here serves two purposes:
//!
//! 1. **Single source of truth** — when a viewer ships a new markup revision,
//!    the fix is an edit in exactly one place.
//!
//! 2. **Testability** — unit tests can inspect the defaults directly without
//!    a live viewer.
//!
//! Callers override any of them through
//! [`crate::config::ViewerSelectors`]; the constants here are used only when
//! no override is provided.

/// Entries of the authenticated document listing. Their text is matched
/// against the requested title.
pub const LISTING_ENTRY: &str = "a.book-title, .library-item a, .bookshelf-item a";

/// The per-page vector object the viewer attaches for the current page.
pub const VECTOR_CONTAINER: &str = "object[type='image/svg+xml'], embed[type='image/svg+xml']";

/// Attributes of the container that carry the page's vector reference,
/// checked in order.
pub const VECTOR_ATTRIBUTES: &[&str] = &["data", "src"];

/// The "next page" control.
pub const NEXT_CONTROL: &str = "button.next, .next-page, [aria-label='Next page']";

/// Guidance/tour overlay containers removed structurally on every page.
pub const OVERLAY_CONTAINERS: &[&str] = &[
    ".introjs-overlay",
    ".introjs-helperLayer",
    ".introjs-tooltipReferenceLayer",
    ".shepherd-modal-overlay-container",
    ".shepherd-element",
    ".tour-backdrop",
    ".joyride-overlay",
];

/// Controls that dismiss an overlay the viewer re-injected after removal.
pub const DISMISS_CONTROLS: &[&str] = &[
    ".introjs-skipbutton",
    ".shepherd-cancel-icon",
    ".tour-close",
    "button[aria-label='Close']",
    "button[data-action='skip-tour']",
];

/// Network responses captured passively: page-numbered vector files.
/// Capture group 1 is the page number.
pub const PASSIVE_PAGE_PATTERN: &str = r"(?i)/0*(\d+)\.svgz?(?:[?#]|$)";

/// Query parameter used by the default query addressing scheme.
pub const PAGE_QUERY_PARAM: &str = "page";

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn passive_pattern_extracts_page_number() {
        let re = Regex::new(PASSIVE_PAGE_PATTERN).unwrap();
        let caps = re.captures("https://cdn.host/books/9/pages/0012.svg?v=3").unwrap();
        assert_eq!(&caps[1], "12");
        let caps = re.captures("https://cdn.host/books/9/3.svg").unwrap();
        assert_eq!(&caps[1], "3");
    }

    #[test]
    fn passive_pattern_ignores_other_assets() {
        let re = Regex::new(PASSIVE_PAGE_PATTERN).unwrap();
        assert!(!re.is_match("https://cdn.host/app.js"));
        assert!(!re.is_match("https://cdn.host/img/logo.svg"));
        assert!(!re.is_match("https://cdn.host/12.svg.map"));
    }

    #[test]
    fn defaults_are_non_empty() {
        assert!(!OVERLAY_CONTAINERS.is_empty());
        assert!(!DISMISS_CONTROLS.is_empty());
        assert_eq!(VECTOR_ATTRIBUTES[0], "data");
    }
}
