//! Error types for the vecbook library.
//!
//! Four error types follow the four failure scopes of a capture run:
//!
//! * [`VecbookError`] — **Fatal to one Document**: the title is missing from
//!   the listing, the viewer never shows page 1, the directory holds no page
//!   units, the output file cannot be written. Returned as `Err` from the
//!   top-level capture and assembly functions; the orchestrator records it and
//!   moves on to the next title.
//!
//! * [`PageError`] — **Recoverable per page**: one page's container never
//!   appeared or its markup could not be fetched. Stored inside
//!   [`crate::output::CaptureReport`] and the page is skipped.
//!
//! * [`FetchError`] — one HTTP request failed. The reference resolver absorbs
//!   these into its fallback chain; they never fail a page on their own.
//!
//! * [`ViewError`] — an operation on the remote viewer failed.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the vecbook library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::CaptureReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum VecbookError {
    // ── Capture errors ────────────────────────────────────────────────────
    /// No listing entry matched the requested title.
    #[error("Document '{title}' not found in the listing ({candidates} entries searched)")]
    DocumentNotFound { title: String, candidates: usize },

    /// Navigation to the listing or the viewer did not finish in time.
    #[error("Navigation to '{url}' timed out after {secs}s")]
    NavigationTimeout { url: String, secs: u64 },

    /// Page 1 never materialized under any configured addressing scheme.
    #[error("Page container for '{title}' never appeared ({schemes} addressing schemes tried)")]
    ContainerNotFound { title: String, schemes: usize },

    /// Too many consecutive pages could not be reached.
    #[error("Gave up on '{title}' at page {page}: {misses} consecutive pages missing")]
    TooManyMisses {
        title: String,
        page: usize,
        misses: usize,
    },

    /// A remote viewer operation failed outside any retry policy.
    #[error("Viewer error: {0}")]
    View(#[from] ViewError),

    // ── Input errors ──────────────────────────────────────────────────────
    /// The input string is not a valid absolute HTTP/HTTPS URL.
    #[error("Invalid URL '{input}': {reason}")]
    InvalidUrl { input: String, reason: String },

    /// HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    // ── Assembly errors ───────────────────────────────────────────────────
    /// The document directory does not exist.
    #[error("Document directory not found: '{path}'")]
    DirectoryNotFound { path: PathBuf },

    /// The document directory holds no `NNNN.svg` page units.
    #[error("No page units found in '{path}'\nExpected zero-padded files such as 0001.svg.")]
    NoPageUnits { path: PathBuf },

    /// PDF composition failed as a whole.
    #[error("Assembly of '{path}' failed: {detail}")]
    AssemblyFailed { path: PathBuf, detail: String },

    /// The isolated assembly worker panicked or was cancelled.
    #[error("Assembly worker for '{path}' aborted: {detail}")]
    AssemblyAborted { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create, write, or finalize an output file.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A non-fatal error for a single viewer page.
///
/// The page is skipped and capture continues with the next one.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page's vector container did not attach in time.
    #[error("Page {page}: container did not appear within {secs}s")]
    ContainerTimeout { page: usize, secs: u64 },

    /// The container carried no usable reference attribute.
    #[error("Page {page}: container has no vector reference")]
    MissingReference { page: usize },

    /// Fetching the page's markup failed.
    #[error("Page {page}: fetch of '{url}' failed: {detail}")]
    FetchFailed {
        page: usize,
        url: String,
        detail: String,
    },

    /// Passive-only capture saw no response for this page.
    #[error("Page {page}: no page response observed on the network")]
    PassiveMiss { page: usize },

    /// The normalized unit could not be persisted.
    #[error("Page {page}: writing unit failed: {detail}")]
    WriteFailed { page: usize, detail: String },
}

impl PageError {
    /// Viewer page number the error refers to.
    pub fn page(&self) -> usize {
        match self {
            PageError::ContainerTimeout { page, .. }
            | PageError::MissingReference { page }
            | PageError::FetchFailed { page, .. }
            | PageError::PassiveMiss { page }
            | PageError::WriteFailed { page, .. } => *page,
        }
    }
}

/// Failure of a single authenticated HTTP request.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Connection, TLS, or body read failure.
    #[error("request to '{url}' failed: {reason}")]
    Network { url: String, reason: String },

    /// The request exceeded the configured fetch timeout.
    #[error("request to '{url}' timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// The server answered with a non-success status.
    #[error("'{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Failure of a remote viewer operation.
#[derive(Debug, Clone, Error)]
pub enum ViewError {
    /// A selector did not match within its bounded wait.
    #[error("'{selector}' did not appear within {millis}ms")]
    Timeout { selector: String, millis: u64 },

    /// Navigation was rejected or failed.
    #[error("navigation to '{url}' failed: {reason}")]
    Navigation { url: String, reason: String },

    /// Script evaluation or a protocol command failed.
    #[error("viewer command failed: {0}")]
    Command(String),

    /// The view context has been closed.
    #[error("viewer context is closed")]
    Closed,
}
