//! Report types returned by capture, assembly and the orchestrator.
//!
//! All of them are `Serialize` so the CLI can emit a run as JSON.

use crate::error::PageError;
use crate::pipeline::units::PageSize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where a page's markup came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSource {
    /// Observed on the viewer session's own network traffic.
    Passive,
    /// Fetched from the container's reference.
    Active,
    /// Downloaded from an absolute URL without a viewer.
    Direct,
}

/// Outcome counts of reference resolution for one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceStats {
    /// Distinct references discovered.
    pub total: usize,
    /// Declared an embeddable type.
    pub embedded: usize,
    /// Mislabeled, recognised from the payload bytes.
    pub sniffed: usize,
    /// Recovered from an HTML wrapper.
    pub salvaged: usize,
    /// Replaced by the transparent placeholder.
    pub placeholders: usize,
}

impl ReferenceStats {
    /// References that ended up with real content.
    pub fn resolved(&self) -> usize {
        self.embedded + self.sniffed + self.salvaged
    }
}

/// One persisted page unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedPage {
    /// 1-indexed unit number (file `NNNN.svg`).
    pub index: usize,
    /// Page number in the viewer, which can run ahead of `index` after skips.
    pub viewer_page: usize,
    pub source: PageSource,
    pub path: PathBuf,
    /// Size of the normalized markup in bytes.
    pub bytes: usize,
    /// Intrinsic size, if the markup declared one.
    pub size: Option<PageSize>,
    pub references: ReferenceStats,
}

/// Result of capturing one Document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureReport {
    pub title: String,
    pub directory: PathBuf,
    /// Label of the addressing scheme that opened page 1.
    pub addressing: Option<String>,
    pub pages: Vec<CapturedPage>,
    /// Viewer pages that were skipped after a recoverable error.
    pub skipped: Vec<PageError>,
    /// Stale units from an earlier run removed after capture.
    pub pruned: usize,
    pub duration_ms: u64,
}

impl CaptureReport {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Result of assembling one Document directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyReport {
    pub directory: PathBuf,
    pub output: PathBuf,
    pub pages: usize,
    /// Units that failed to parse and became blank pages.
    pub blank_pages: Vec<usize>,
    pub bytes: u64,
    pub duration_ms: u64,
}

/// Per-title outcome of an orchestrated run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assembly: Option<AssemblyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assembly_error: Option<String>,
}

impl DocumentSummary {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Captured and assembled without a fatal error.
    pub fn is_success(&self) -> bool {
        self.capture_error.is_none() && self.assembly_error.is_none() && self.assembly.is_some()
    }
}

/// Outcome of a whole run over several titles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub documents: Vec<DocumentSummary>,
    pub duration_ms: u64,
}

impl RunSummary {
    /// True when every Document was captured and assembled.
    pub fn is_success(&self) -> bool {
        self.documents.iter().all(DocumentSummary::is_success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &DocumentSummary> {
        self.documents.iter().filter(|d| !d.is_success())
    }

    pub fn total_pages(&self) -> usize {
        self.documents
            .iter()
            .filter_map(|d| d.assembly.as_ref())
            .map(|a| a.pages)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembled(title: &str, pages: usize) -> DocumentSummary {
        DocumentSummary {
            assembly: Some(AssemblyReport {
                directory: PathBuf::from(title),
                output: PathBuf::from(format!("{title}/{title}.pdf")),
                pages,
                blank_pages: vec![],
                bytes: 1024,
                duration_ms: 5,
            }),
            ..DocumentSummary::new(title)
        }
    }

    #[test]
    fn run_fails_when_any_assembly_fails() {
        let mut run = RunSummary {
            documents: vec![assembled("A", 3), assembled("B", 2)],
            duration_ms: 0,
        };
        assert!(run.is_success());
        assert_eq!(run.total_pages(), 5);

        run.documents.push(DocumentSummary {
            assembly_error: Some("boom".into()),
            ..DocumentSummary::new("C")
        });
        assert!(!run.is_success());
        assert_eq!(run.failed().count(), 1);
    }

    #[test]
    fn capture_failure_is_not_success() {
        let doc = DocumentSummary {
            capture_error: Some("not found".into()),
            ..DocumentSummary::new("Missing")
        };
        assert!(!doc.is_success());
    }

    #[test]
    fn summary_serializes_without_empty_fields() {
        let json = serde_json::to_string(&DocumentSummary::new("T")).unwrap();
        assert_eq!(json, r#"{"title":"T"}"#);
    }

    #[test]
    fn stats_resolved_count() {
        let s = ReferenceStats {
            total: 5,
            embedded: 2,
            sniffed: 1,
            salvaged: 1,
            placeholders: 1,
        };
        assert_eq!(s.resolved(), 4);
    }
}
