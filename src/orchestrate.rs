//! Run-level entry points: many titles, one session.
//!
//! Documents are captured strictly one after another with a cooldown
//! between them. A captured Document is handed to an isolated assembly task
//! straight away, so composing its PDF overlaps with capturing the next
//! title. A panic in one assembly task is reported against that Document
//! only; the run waits for every outstanding task before returning.

use crate::capture::CaptureDriver;
use crate::config::CaptureConfig;
use crate::direct::download_document;
use crate::error::VecbookError;
use crate::output::{AssemblyReport, DocumentSummary, RunSummary};
use crate::pipeline::assemble::assemble_isolated;
use crate::pipeline::http::SessionClient;
use crate::view::RemoteView;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use url::Url;

/// Capture every title in `titles` through `view`, assembling each one
/// that produced pages.
///
/// # Returns
/// A [`RunSummary`] with one entry per title, in request order. Failures
/// of individual Documents are recorded there rather than returned.
///
/// # Errors
/// Only when the session's cookies cannot be exported or the HTTP client
/// cannot be built; nothing has been captured at that point.
pub async fn capture_titles(
    view: Arc<dyn RemoteView>,
    titles: &[String],
    config: &CaptureConfig,
) -> Result<RunSummary, VecbookError> {
    let start = Instant::now();
    let cookies = view.cookies().await?;
    info!("Session exported {} cookies", cookies.len());
    let client = SessionClient::from_cookies(&cookies, config)?;

    let mut documents: Vec<DocumentSummary> =
        titles.iter().map(|t| DocumentSummary::new(t.as_str())).collect();
    let mut pool = AssemblyPool::new(config.clone());
    let mut driver = CaptureDriver::new(view, client, config.clone());

    for (i, title) in titles.iter().enumerate() {
        if i > 0 && !config.cooldown().is_zero() {
            info!("Cooling down for {}s before '{}'", config.cooldown_secs, title);
            tokio::time::sleep(config.cooldown()).await;
        }

        match driver.capture(title).await {
            Ok(report) => {
                info!(
                    "Captured '{}': {} pages, {} skipped",
                    title,
                    report.page_count(),
                    report.skipped.len()
                );
                if report.page_count() > 0 {
                    pool.spawn(i, report.directory.clone());
                } else {
                    warn!("'{}': no page could be captured", title);
                    documents[i].assembly_error = Some("no pages were captured".to_string());
                }
                documents[i].capture = Some(report);
            }
            Err(e) => {
                error!("'{}': {}", title, e);
                documents[i].capture_error = Some(e.to_string());
            }
        }
    }

    pool.drain(&mut documents).await;
    Ok(RunSummary {
        documents,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Download a Document page by page from absolute URLs, then assemble it.
pub async fn fetch_title(
    title: &str,
    urls: Vec<Url>,
    config: &CaptureConfig,
) -> Result<RunSummary, VecbookError> {
    let start = Instant::now();
    let client = SessionClient::new(config)?;
    let mut document = DocumentSummary::new(title);

    match download_document(title, urls, client, config).await {
        Ok(report) => {
            if report.page_count() > 0 {
                let mut pool = AssemblyPool::new(config.clone());
                pool.spawn(0, report.directory.clone());
                document.capture = Some(report);
                pool.drain(std::slice::from_mut(&mut document)).await;
            } else {
                warn!("'{}': no page could be downloaded", title);
                document.capture = Some(report);
                document.assembly_error = Some("no pages were downloaded".to_string());
            }
        }
        Err(e) => {
            error!("'{}': {}", title, e);
            document.capture_error = Some(e.to_string());
        }
    }

    Ok(RunSummary {
        documents: vec![document],
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Assemble already-captured Document directories, each in its own task.
pub async fn assemble_directories(dirs: &[PathBuf], config: &CaptureConfig) -> RunSummary {
    let start = Instant::now();
    let mut documents: Vec<DocumentSummary> = dirs
        .iter()
        .map(|d| DocumentSummary::new(directory_title(d)))
        .collect();
    let mut pool = AssemblyPool::new(config.clone());
    for (i, dir) in dirs.iter().enumerate() {
        pool.spawn(i, dir.clone());
    }
    pool.drain(&mut documents).await;
    RunSummary {
        documents,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

fn directory_title(dir: &std::path::Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

// ── Isolated assembly ────────────────────────────────────────────────────────

/// Outstanding assembly tasks, each tagged with the Document slot it fills.
struct AssemblyPool {
    config: CaptureConfig,
    tasks: JoinSet<(usize, Result<AssemblyReport, VecbookError>)>,
}

impl AssemblyPool {
    fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            tasks: JoinSet::new(),
        }
    }

    fn spawn(&mut self, slot: usize, dir: PathBuf) {
        let config = self.config.clone();
        self.tasks
            .spawn(async move { (slot, assemble_isolated(dir, config).await) });
    }

    /// Wait for every task and record its outcome in `documents[slot]`.
    async fn drain(&mut self, documents: &mut [DocumentSummary]) {
        while let Some(joined) = self.tasks.join_next().await {
            let (slot, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // assemble_isolated absorbs panics; only cancellation lands here.
                    warn!("Assembly task lost: {}", e);
                    continue;
                }
            };
            let Some(doc) = documents.get_mut(slot) else {
                continue;
            };
            match outcome {
                Ok(report) => {
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_assembly_complete(&doc.title, &report.output, report.pages);
                    }
                    doc.assembly = Some(report);
                }
                Err(e) => {
                    error!("Assembly of '{}' failed: {}", doc.title, e);
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_assembly_failed(&doc.title, &e.to_string());
                    }
                    doc.assembly_error = Some(e.to_string());
                }
            }
        }
    }
}
