//! Pipeline stages from raw page markup to an assembled PDF.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets the
//! capture driver and the direct downloader share them unchanged.
//!
//! ## Data Flow
//!
//! ```text
//! http ──▶ extract ──▶ resolve ──▶ sanitize ──▶ store ──▶ assemble
//! (fetch)  (direct     (inline     (pure        (NNNN     (svg2pdf,
//!           path only)  refs)       rewrites)    .svg)     spawn_blocking)
//! ```
//!
//! 1. [`http`]     — authenticated fetches sharing the session's cookies
//! 2. [`extract`]  — reduce a foreign body to vector markup (direct path only)
//! 3. [`resolve`]  — inline every external reference, concurrently, with a
//!    fallback chain that ends in a placeholder
//! 4. [`sanitize`] — ordered, idempotent text rewrites
//! 5. [`store`]    — atomic `NNNN.svg` unit files
//! 6. [`assemble`] — one PDF page per unit, sized from [`units`]
//!
//! [`encode`] holds the data-locator helpers shared by 2 and 3.

pub mod assemble;
pub mod encode;
pub mod extract;
pub mod http;
pub mod resolve;
pub mod sanitize;
pub mod store;
pub mod units;

use crate::output::ReferenceStats;
use crate::pipeline::http::SessionClient;
use url::Url;

/// A page run through resolution and sanitization, ready to persist.
#[derive(Debug, Clone)]
pub struct NormalizedPage {
    /// Where the raw markup was loaded from.
    pub origin: Url,
    pub markup: String,
    pub references: ReferenceStats,
}

/// Resolve every reference of `raw` against `origin`, then sanitize.
///
/// Never fails: unreachable references become placeholders.
pub async fn normalize_page(
    raw: &str,
    origin: &Url,
    client: &SessionClient,
    concurrency: usize,
) -> NormalizedPage {
    let resolved = resolve::resolve_references(raw, origin, client, concurrency).await;
    let references = resolved.stats();
    NormalizedPage {
        origin: origin.clone(),
        markup: sanitize::sanitize_markup(&resolved.markup),
        references,
    }
}
