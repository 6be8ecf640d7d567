//! Progress-callback trait for per-page and per-document capture events.
//!
//! Inject an [`Arc<dyn CaptureProgressCallback>`] via
//! [`crate::config::CaptureConfigBuilder::progress_callback`] to receive
//! events as the capture driver walks each Document and the orchestrator
//! assembles it.
//!
//! # Example
//!
//! ```rust
//! use vecbook::{CaptureProgressCallback, CaptureConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     pages: AtomicUsize,
//! }
//!
//! impl CaptureProgressCallback for CountingCallback {
//!     fn on_page_captured(&self, title: &str, index: usize, bytes: usize) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{title}: unit {index} ({bytes} bytes)");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { pages: AtomicUsize::new(0) });
//!
//! let config = CaptureConfig::builder()
//!     .progress_callback(counter as Arc<dyn CaptureProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the capture driver and the orchestrator as work progresses.
///
/// Implementations must be `Send + Sync`: assembly events arrive from
/// worker tasks while capture of the next Document is still running. All
/// methods have default no-op implementations so callers only override
/// what they care about.
pub trait CaptureProgressCallback: Send + Sync {
    /// Called once the title has been located and capture begins.
    fn on_document_start(&self, title: &str) {
        let _ = title;
    }

    /// Called after a normalized unit has been written.
    ///
    /// # Arguments
    /// * `title` — Document title
    /// * `index` — 1-indexed unit number
    /// * `bytes` — size of the normalized markup
    fn on_page_captured(&self, title: &str, index: usize, bytes: usize) {
        let _ = (title, index, bytes);
    }

    /// Called when a viewer page is skipped after a recoverable error.
    fn on_page_skipped(&self, title: &str, viewer_page: usize, error: &str) {
        let _ = (title, viewer_page, error);
    }

    /// Called when the "next" control reports the end of the Document.
    fn on_document_complete(&self, title: &str, pages: usize) {
        let _ = (title, pages);
    }

    /// Called when capture of a Document fails fatally.
    fn on_document_failed(&self, title: &str, error: &str) {
        let _ = (title, error);
    }

    /// Called when the output file has been fully written.
    fn on_assembly_complete(&self, title: &str, output: &Path, pages: usize) {
        let _ = (title, output, pages);
    }

    /// Called when assembly of a Document fails.
    fn on_assembly_failed(&self, title: &str, error: &str) {
        let _ = (title, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl CaptureProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::CaptureConfig`].
pub type ProgressCallback = Arc<dyn CaptureProgressCallback>;
