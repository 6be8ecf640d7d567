//! # vecbook
//!
//! Capture paginated vector documents from an authenticated web viewer and
//! assemble them into self-contained, offline PDFs.
//!
//! ## Why this crate?
//!
//! Browser-based readers render every page as SVG that points at fonts and
//! images behind the same login. Saving the page markup is not enough: the
//! references break the moment the session ends, and the markup itself is
//! often not clean enough for an SVG renderer (scripts, HTML wrappers,
//! missing namespaces, zero dash lengths). This crate walks the viewer page
//! by page, inlines every reference it can fetch, repairs the markup, and
//! composes one PDF page per captured unit.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Listing ─┐
//!          ├─ 1. Locate   find the title, open it (same or new view)
//!          ├─ 2. Capture  per page: dismiss overlays, passive or active acquisition
//!          ├─ 3. Resolve  fetch references concurrently, embed as data: locators
//!          ├─ 4. Sanitize ordered rewrite passes until stable
//!          ├─ 5. Store    0001.svg, 0002.svg, … (atomic writes)
//!          └─ 6. Assemble natural order → SVG → PDF pages (isolated task)
//! ```
//!
//! ## Quick Start
//!
//! Assemble directories captured earlier:
//!
//! ```rust,no_run
//! use vecbook::{assemble_directory, CaptureConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CaptureConfig::builder().output_root("books").build()?;
//!     let report = assemble_directory("books/Linear_Algebra".as_ref(), &config).await?;
//!     println!("{} → {} pages", report.output.display(), report.pages);
//!     Ok(())
//! }
//! ```
//!
//! Capturing needs a [`RemoteView`]; with the `chromium` feature,
//! `view::chromium::ChromiumView` attaches to a logged-in browser and
//! [`capture_titles`] does the rest.
//!
//! ## Feature Flags
//!
//! | Feature    | Default | Description |
//! |------------|---------|-------------|
//! | `cli`      | on      | Enables the `vecbook` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `chromium` | off     | `ChromiumView` over the DevTools protocol and the `capture` subcommand |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! vecbook = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod capture;
pub mod config;
pub mod direct;
pub mod error;
pub mod naming;
pub mod orchestrate;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod selectors;
pub mod view;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use capture::{CaptureDriver, CaptureState};
pub use config::{AcquisitionMode, AddressingScheme, CaptureConfig, CaptureConfigBuilder, ViewerSelectors};
pub use direct::{download_document, download_pages, fetch_page, PageStream};
pub use error::{FetchError, PageError, VecbookError, ViewError};
pub use orchestrate::{assemble_directories, capture_titles, fetch_title};
pub use output::{
    AssemblyReport, CaptureReport, CapturedPage, DocumentSummary, PageSource, ReferenceStats,
    RunSummary,
};
pub use pipeline::assemble::assemble_directory;
pub use pipeline::http::SessionClient;
pub use pipeline::sanitize::sanitize_markup;
pub use pipeline::units::PageSize;
pub use progress::{CaptureProgressCallback, NoopProgressCallback, ProgressCallback};
pub use view::{NetworkResponse, OpenedView, RemoteView, SessionCookie};
