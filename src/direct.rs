//! Direct page download: absolute page URLs in, normalized units out.
//!
//! ## Why a separate path?
//!
//! Some Documents expose every page under a predictable absolute URL. They
//! can be fetched without driving a viewer at all, through the same
//! resolution and sanitization stages the capture driver uses. Bodies on
//! this path are less trustworthy (HTML error pages, inlined documents,
//! raster wrappers), so foreign content extraction runs first.
//!
//! [`download_pages`] yields pages as they are written, in URL order;
//! [`download_document`] drives it to completion and returns a report.

use crate::config::CaptureConfig;
use crate::error::{PageError, VecbookError};
use crate::naming::document_dir;
use crate::output::{CaptureReport, CapturedPage, PageSource};
use crate::pipeline::extract::extract_markup;
use crate::pipeline::http::{SessionClient, ACCEPT_SVG};
use crate::pipeline::units::intrinsic_size;
use crate::pipeline::{normalize_page, store, NormalizedPage};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::Stream;
use tracing::{debug, info, warn};
use url::Url;

/// A boxed stream of persisted pages.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<CapturedPage, PageError>> + Send>>;

/// Fetch one absolute page URL and normalize it, without a viewer session.
///
/// `page` is only used to label errors.
pub async fn fetch_page(
    url: &Url,
    page: usize,
    client: &SessionClient,
    config: &CaptureConfig,
) -> Result<NormalizedPage, PageError> {
    let fetched = client
        .fetch_ok(url, ACCEPT_SVG, None)
        .await
        .map_err(|e| PageError::FetchFailed {
            page,
            url: url.to_string(),
            detail: e.to_string(),
        })?;

    let extracted = extract_markup(&fetched.text(), &fetched.url, client).await;
    debug!("{}: extracted as {:?}", url, extracted.kind);

    Ok(normalize_page(
        &extracted.markup,
        &fetched.url,
        client,
        config.reference_concurrency,
    )
    .await)
}

/// Download `urls` in order into `dir`, numbering units from 1.
///
/// Pages are fetched strictly one after another; a failed page yields an
/// `Err` item and does not consume a unit number.
pub fn download_pages(
    urls: Vec<Url>,
    dir: PathBuf,
    client: SessionClient,
    config: CaptureConfig,
) -> PageStream {
    let next_index = Arc::new(AtomicUsize::new(1));
    let s = stream::iter(urls.into_iter().enumerate()).then(move |(i, url)| {
        let next_index = Arc::clone(&next_index);
        let dir = dir.clone();
        let client = client.clone();
        let cfg = config.clone();
        async move {
            let page = i + 1;
            let normalized = fetch_page(&url, page, &client, &cfg).await?;
            let index = next_index.load(Ordering::SeqCst);
            let path = store::write_unit(&dir, index, &normalized.markup)
                .await
                .map_err(|e| PageError::WriteFailed {
                    page,
                    detail: e.to_string(),
                })?;
            next_index.fetch_add(1, Ordering::SeqCst);
            Ok(CapturedPage {
                index,
                viewer_page: page,
                source: PageSource::Direct,
                path,
                bytes: normalized.markup.len(),
                size: intrinsic_size(&normalized.markup),
                references: normalized.references,
            })
        }
    });
    Box::pin(s)
}

/// Download a whole Document from its page URLs into
/// `<output_root>/<safe title>/`.
pub async fn download_document(
    title: &str,
    urls: Vec<Url>,
    client: SessionClient,
    config: &CaptureConfig,
) -> Result<CaptureReport, VecbookError> {
    let start = Instant::now();
    let dir = document_dir(&config.output_root, title, config.max_name_len);
    store::ensure_dir(&dir).await?;
    info!("Downloading {} pages of '{}' into {}", urls.len(), title, dir.display());
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(title);
    }

    let mut pages = Vec::new();
    let mut skipped = Vec::new();
    let mut stream = download_pages(urls, dir.clone(), client, config.clone());
    while let Some(item) = stream.next().await {
        match item {
            Ok(page) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_captured(title, page.index, page.bytes);
                }
                pages.push(page);
            }
            Err(e) => {
                warn!("'{}': {}", title, e);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_skipped(title, e.page(), &e.to_string());
                }
                skipped.push(e);
            }
        }
    }

    let pruned = store::prune_units_after(&dir, pages.len()).await?;
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_complete(title, pages.len());
    }
    Ok(CaptureReport {
        title: title.to_string(),
        directory: dir,
        addressing: None,
        pages,
        skipped,
        pruned,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}
