//! Page capture driver: walk one Document in a remote viewer, page by page.
//!
//! ## State machine
//!
//! ```text
//! Idle ─▶ Locating(title) ─▶ Opened ─▶ PageReady(1) ─▶ Advancing(1→2) ─▶ PageReady(2) ─▶ …
//!                                                                              │
//!                                                     Done(pages) ◀── next disabled
//!   any fatal error ─▶ Failed(reason)
//! ```
//!
//! Every transition waits on a bounded condition (selector, navigation,
//! attribute change), never on a global deadline. Errors at `Locating` and
//! `Opened` are fatal for the Document; errors on a single page are
//! recorded and the page is skipped.
//!
//! ## Acquisition
//!
//! Page markup comes from two sources that feed the same pipeline:
//! passively captured network responses (matched by file name, each file
//! taken once) and an active authenticated fetch of the container's
//! reference, resolved against the *directory* of the viewer URL.

use crate::config::{AddressingScheme, CaptureConfig, ViewerSelectors};
use crate::error::{PageError, VecbookError, ViewError};
use crate::naming::document_dir;
use crate::output::{CaptureReport, CapturedPage, PageSource};
use crate::pipeline::http::{resolve_in_directory, SessionClient, ACCEPT_SVG};
use crate::pipeline::units::intrinsic_size;
use crate::pipeline::{normalize_page, store};
use crate::view::{NetworkResponse, OpenedView, RemoteView};
use futures::StreamExt;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Where the driver is in its walk through a Document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Locating { title: String },
    Opened,
    /// Viewer page `n` is displayed and being captured.
    PageReady(usize),
    Advancing { from: usize, to: usize },
    Done { pages: usize },
    Failed { reason: String },
}

// ── Listing ──────────────────────────────────────────────────────────────────

/// Index of the listing entry for `title`: exact match first, then
/// case-insensitive equality, then case-insensitive containment.
pub fn match_entry(entries: &[String], title: &str) -> Option<usize> {
    let wanted = title.trim();
    let lower = wanted.to_lowercase();
    entries
        .iter()
        .position(|e| e.trim() == wanted)
        .or_else(|| entries.iter().position(|e| e.trim().to_lowercase() == lower))
        .or_else(|| {
            entries
                .iter()
                .position(|e| !lower.is_empty() && e.to_lowercase().contains(&lower))
        })
}

// ── Overlays ─────────────────────────────────────────────────────────────────

/// What [`dismiss_overlays`] had to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dismissal {
    pub removed: usize,
    pub clicked: usize,
}

/// Remove tour/guidance overlays; click a dismissal control if the viewer
/// re-injects one. Idempotent, and a no-op when nothing is shown.
///
/// View errors are logged and swallowed: an overlay that cannot be
/// removed must not cost the page.
pub async fn dismiss_overlays(
    view: &dyn RemoteView,
    selectors: &ViewerSelectors,
    settle: Duration,
) -> Dismissal {
    let mut outcome = Dismissal::default();
    for sel in &selectors.overlay_containers {
        match view.remove_all(sel).await {
            Ok(n) => outcome.removed += n,
            Err(e) => debug!("Overlay removal '{}' failed: {}", sel, e),
        }
    }
    if outcome.removed == 0 {
        return outcome;
    }
    tokio::time::sleep(settle).await;

    let mut reinjected = false;
    for sel in &selectors.overlay_containers {
        if view.is_present(sel).await.unwrap_or(false) {
            reinjected = true;
            break;
        }
    }
    if reinjected {
        for control in &selectors.dismiss_controls {
            if view.click(control).await.unwrap_or(false) {
                outcome.clicked += 1;
            }
        }
        if outcome.clicked > 0 {
            tokio::time::sleep(settle).await;
        }
    }
    debug!(
        "Overlays: {} removed, {} dismissal clicks",
        outcome.removed, outcome.clicked
    );
    outcome
}

// ── Terminal detection ───────────────────────────────────────────────────────

/// Whether a class list marks a control as disabled.
pub fn class_marks_disabled(class: &str) -> bool {
    class
        .split_whitespace()
        .any(|c| c.eq_ignore_ascii_case("disabled") || c.to_ascii_lowercase().ends_with("-disabled"))
}

/// Whether the "next" control says the Document has ended.
///
/// Any one of: control absent, `disabled` attribute, `aria-disabled="true"`,
/// a disabled class, or computed `pointer-events: none`.
pub async fn next_is_terminal(view: &dyn RemoteView, next: &str) -> Result<bool, ViewError> {
    if !view.is_present(next).await? {
        debug!("Next control absent");
        return Ok(true);
    }
    if view.attribute(next, "disabled").await?.is_some() {
        return Ok(true);
    }
    if view
        .attribute(next, "aria-disabled")
        .await?
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    {
        return Ok(true);
    }
    if view
        .attribute(next, "class")
        .await?
        .is_some_and(|c| class_marks_disabled(&c))
    {
        return Ok(true);
    }
    Ok(view
        .computed_style(next, "pointer-events")
        .await?
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("none")))
}

// ── Passive capture ──────────────────────────────────────────────────────────

/// Page bodies observed on the network, waiting to be consumed.
#[derive(Debug, Default)]
pub struct PassiveBuffer {
    pending: HashMap<usize, NetworkResponse>,
    seen: HashSet<String>,
}

impl PassiveBuffer {
    /// Offer a response. Returns `false` if its file was already delivered
    /// or it carries no page number.
    pub fn offer(&mut self, pattern: &Regex, response: NetworkResponse) -> bool {
        if !(200..300).contains(&response.status) {
            return false;
        }
        let Some(page) = pattern
            .captures(response.url.as_str())
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok())
        else {
            return false;
        };
        let file = response
            .url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or("")
            .to_string();
        if !self.seen.insert(file) {
            debug!("Ignoring re-delivered {}", response.url);
            return false;
        }
        self.pending.insert(page, response);
        true
    }

    /// Take the body for viewer page `page`, if it has arrived.
    pub fn take(&mut self, page: usize) -> Option<NetworkResponse> {
        self.pending.remove(&page)
    }
}

/// Background task feeding a [`PassiveBuffer`]; aborted on drop.
struct PassiveListener {
    buffer: Arc<Mutex<PassiveBuffer>>,
    task: JoinHandle<()>,
}

impl PassiveListener {
    async fn start(view: &dyn RemoteView, pattern: Regex) -> Result<Self, ViewError> {
        let mut stream = view.observe_responses(&pattern).await?;
        let buffer = Arc::new(Mutex::new(PassiveBuffer::default()));
        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            while let Some(response) = stream.next().await {
                let url = response.url.clone();
                if sink.lock().await.offer(&pattern, response) {
                    debug!("Passively captured {}", url);
                }
            }
        });
        Ok(Self { buffer, task })
    }

    async fn wait_for(&self, page: usize, wait: Duration, poll: Duration) -> Option<NetworkResponse> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(r) = self.buffer.lock().await.take(page) {
                return Some(r);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(poll).await;
        }
    }
}

impl Drop for PassiveListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Driver ───────────────────────────────────────────────────────────────────

/// Drives one remote view through whole Documents.
pub struct CaptureDriver {
    view: Arc<dyn RemoteView>,
    client: SessionClient,
    config: CaptureConfig,
    state: CaptureState,
}

impl CaptureDriver {
    pub fn new(view: Arc<dyn RemoteView>, client: SessionClient, config: CaptureConfig) -> Self {
        Self {
            view,
            client,
            config,
            state: CaptureState::Idle,
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    /// The view currently driven; differs from the one passed to
    /// [`CaptureDriver::new`] once a Document opened in a new view.
    pub fn view(&self) -> &Arc<dyn RemoteView> {
        &self.view
    }

    fn transition(&mut self, next: CaptureState) {
        debug!("{:?} → {:?}", self.state, next);
        self.state = next;
    }

    /// Capture every page of `title` into `<output_root>/<safe title>/`.
    pub async fn capture(&mut self, title: &str) -> Result<CaptureReport, VecbookError> {
        let start = Instant::now();
        match self.run(title, start).await {
            Ok(report) => {
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_document_complete(title, report.page_count());
                }
                Ok(report)
            }
            Err(e) => {
                warn!("Capture of '{}' failed: {}", title, e);
                self.transition(CaptureState::Failed {
                    reason: e.to_string(),
                });
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_document_failed(title, &e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn run(&mut self, title: &str, start: Instant) -> Result<CaptureReport, VecbookError> {
        // ── Locating ─────────────────────────────────────────────────────
        self.transition(CaptureState::Locating {
            title: title.to_string(),
        });
        self.locate_and_open(title).await?;

        // ── Opened ───────────────────────────────────────────────────────
        self.transition(CaptureState::Opened);
        let base = self.view.current_url().await?;
        info!("Opened '{}' at {}", title, base);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_start(title);
        }

        let dir = document_dir(&self.config.output_root, title, self.config.max_name_len);
        store::ensure_dir(&dir).await?;

        let passive = if self.config.acquisition.passive() {
            let pattern = Regex::new(&self.config.selectors.passive_pattern)
                .map_err(|e| VecbookError::InvalidConfig(e.to_string()))?;
            match PassiveListener::start(self.view.as_ref(), pattern).await {
                Ok(listener) => Some(listener),
                Err(e) => {
                    warn!("Passive capture unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let scheme = self.open_first_page(title, &base).await?;

        // ── Page loop ────────────────────────────────────────────────────
        let mut pages: Vec<CapturedPage> = Vec::new();
        let mut skipped: Vec<PageError> = Vec::new();
        let mut misses = 0usize;
        let mut viewer_page = 1usize;

        loop {
            self.transition(CaptureState::PageReady(viewer_page));
            dismiss_overlays(
                self.view.as_ref(),
                &self.config.selectors,
                self.config.settle_delay(),
            )
            .await;

            match self
                .acquire_page(viewer_page, pages.len() + 1, &dir, passive.as_ref())
                .await
            {
                Ok(page) => {
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_page_captured(title, page.index, page.bytes);
                    }
                    pages.push(page);
                    misses = 0;
                }
                Err(e) => {
                    self.record_skip(title, e, &mut skipped, &mut misses)?;
                }
            }

            if viewer_page >= self.config.max_pages {
                warn!(
                    "'{}': stopping at the page limit ({})",
                    title, self.config.max_pages
                );
                break;
            }
            if next_is_terminal(self.view.as_ref(), &self.config.selectors.next_control).await? {
                debug!("Next control is terminal after page {}", viewer_page);
                break;
            }

            // ── Advancing ────────────────────────────────────────────────
            let mut target = viewer_page + 1;
            self.transition(CaptureState::Advancing {
                from: viewer_page,
                to: target,
            });
            let mut exhausted = false;
            if !self.advance_by_click().await {
                // Click did not attach the next page: navigate directly,
                // skipping pages that never materialize.
                loop {
                    if self.goto_page(&scheme, &base, target).await {
                        info!("Recovered page {} by direct navigation", target);
                        break;
                    }
                    let e = PageError::ContainerTimeout {
                        page: target,
                        secs: self.config.selector_timeout_secs,
                    };
                    self.record_skip(title, e, &mut skipped, &mut misses)?;
                    if target >= self.config.max_pages {
                        exhausted = true;
                        break;
                    }
                    target += 1;
                }
            }
            if exhausted {
                break;
            }
            viewer_page = target;
        }

        // ── Done ─────────────────────────────────────────────────────────
        let pruned = store::prune_units_after(&dir, pages.len()).await?;
        self.transition(CaptureState::Done { pages: pages.len() });
        info!(
            "Captured '{}': {} pages, {} skipped",
            title,
            pages.len(),
            skipped.len()
        );
        Ok(CaptureReport {
            title: title.to_string(),
            directory: dir,
            addressing: Some(scheme.label()),
            pages,
            skipped,
            pruned,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn record_skip(
        &self,
        title: &str,
        error: PageError,
        skipped: &mut Vec<PageError>,
        misses: &mut usize,
    ) -> Result<(), VecbookError> {
        warn!("'{}': {}", title, error);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_page_skipped(title, error.page(), &error.to_string());
        }
        let page = error.page();
        skipped.push(error);
        *misses += 1;
        if *misses > self.config.max_consecutive_misses {
            return Err(VecbookError::TooManyMisses {
                title: title.to_string(),
                page,
                misses: *misses,
            });
        }
        Ok(())
    }

    async fn goto_bounded(&self, url: &Url) -> Result<(), VecbookError> {
        match tokio::time::timeout(self.config.navigation_timeout(), self.view.goto(url)).await {
            Ok(result) => result.map_err(VecbookError::from),
            Err(_) => Err(VecbookError::NavigationTimeout {
                url: url.to_string(),
                secs: self.config.navigation_timeout_secs,
            }),
        }
    }

    async fn locate_and_open(&mut self, title: &str) -> Result<(), VecbookError> {
        if let Some(library) = self.config.library_url.clone() {
            self.goto_bounded(&library).await?;
        }
        let listing = &self.config.selectors.listing_entry;
        self.view
            .wait_for(listing, self.config.selector_timeout())
            .await?;
        let entries = self.view.entry_texts(listing).await?;
        let index = match_entry(&entries, title).ok_or_else(|| VecbookError::DocumentNotFound {
            title: title.to_string(),
            candidates: entries.len(),
        })?;
        debug!("'{}' matches listing entry {} ('{}')", title, index, entries[index]);

        let opened = tokio::time::timeout(
            self.config.navigation_timeout(),
            self.view.open_entry(listing, index),
        )
        .await
        .map_err(|_| VecbookError::NavigationTimeout {
            url: format!("listing entry '{}'", entries[index]),
            secs: self.config.navigation_timeout_secs,
        })??;
        if let OpenedView::NewView(view) = opened {
            self.view = view;
        }
        Ok(())
    }

    /// Force page 1 through each addressing scheme in turn; the first under
    /// which the container materializes is kept for the Document.
    async fn open_first_page(
        &self,
        title: &str,
        base: &Url,
    ) -> Result<AddressingScheme, VecbookError> {
        for scheme in &self.config.addressing {
            let url = scheme.page_url(base, 1)?;
            debug!("Trying {} → {}", scheme.label(), url);
            if let Err(e) = self.goto_bounded(&url).await {
                warn!("'{}': {} navigation failed: {}", title, scheme.label(), e);
                continue;
            }
            match self
                .view
                .wait_for(&self.config.selectors.container, self.config.selector_timeout())
                .await
            {
                Ok(()) => {
                    info!("'{}': page 1 opened via {}", title, scheme.label());
                    return Ok(scheme.clone());
                }
                Err(e) => warn!("'{}': no container via {}: {}", title, scheme.label(), e),
            }
        }
        Err(VecbookError::ContainerNotFound {
            title: title.to_string(),
            schemes: self.config.addressing.len(),
        })
    }

    async fn goto_page(&self, scheme: &AddressingScheme, base: &Url, page: usize) -> bool {
        let Ok(url) = scheme.page_url(base, page) else {
            return false;
        };
        if let Err(e) = self.goto_bounded(&url).await {
            debug!("Direct navigation to page {} failed: {}", page, e);
            return false;
        }
        self.view
            .wait_for(&self.config.selectors.container, self.config.selector_timeout())
            .await
            .is_ok()
    }

    /// The container's page reference, from the first attribute that has one.
    async fn container_reference(&self) -> Option<String> {
        for attr in &self.config.selectors.container_attributes {
            if let Ok(Some(value)) = self
                .view
                .attribute(&self.config.selectors.container, attr)
                .await
            {
                if !value.trim().is_empty() {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Click "next" while concurrently waiting for the container's reference
    /// (or the view URL) to change. `true` once the next page is attached.
    async fn advance_by_click(&self) -> bool {
        let before_ref = self.container_reference().await;
        let before_url = self.view.current_url().await.ok();

        let click = self.view.click(&self.config.selectors.next_control);
        let attached = async {
            let deadline = tokio::time::Instant::now() + self.config.selector_timeout();
            loop {
                tokio::time::sleep(self.config.poll_interval()).await;
                let now_ref = self.container_reference().await;
                if now_ref.is_some() && now_ref != before_ref {
                    return true;
                }
                let now_url = self.view.current_url().await.ok();
                if now_url.is_some()
                    && now_url != before_url
                    && self.view.is_present(&self.config.selectors.container).await.unwrap_or(false)
                {
                    return true;
                }
                if tokio::time::Instant::now() >= deadline {
                    return false;
                }
            }
        };
        let (clicked, attached) = tokio::join!(click, attached);
        match clicked {
            Ok(true) => attached,
            Ok(false) => {
                debug!("Next control vanished before the click");
                attached
            }
            Err(e) => {
                debug!("Click on next failed: {}", e);
                false
            }
        }
    }

    async fn acquire_page(
        &self,
        viewer_page: usize,
        index: usize,
        dir: &Path,
        passive: Option<&PassiveListener>,
    ) -> Result<CapturedPage, PageError> {
        let selectors = &self.config.selectors;
        if self
            .view
            .wait_for(&selectors.container, self.config.selector_timeout())
            .await
            .is_err()
        {
            return Err(PageError::ContainerTimeout {
                page: viewer_page,
                secs: self.config.selector_timeout_secs,
            });
        }

        let mut acquired: Option<(String, Url, PageSource)> = None;
        if let Some(listener) = passive {
            if let Some(response) = listener
                .wait_for(viewer_page, self.config.passive_wait(), self.config.poll_interval())
                .await
            {
                let text = String::from_utf8_lossy(&response.body).into_owned();
                acquired = Some((text, response.url, PageSource::Passive));
            }
        }

        if acquired.is_none() && self.config.acquisition.active() {
            let reference = self
                .container_reference()
                .await
                .ok_or(PageError::MissingReference { page: viewer_page })?;
            let current = self.view.current_url().await.map_err(|e| PageError::FetchFailed {
                page: viewer_page,
                url: reference.clone(),
                detail: e.to_string(),
            })?;
            let url = resolve_in_directory(&current, &reference).map_err(|e| {
                PageError::FetchFailed {
                    page: viewer_page,
                    url: reference.clone(),
                    detail: e.to_string(),
                }
            })?;
            let fetched = self
                .client
                .fetch_ok(&url, ACCEPT_SVG, Some(&current))
                .await
                .map_err(|e| PageError::FetchFailed {
                    page: viewer_page,
                    url: url.to_string(),
                    detail: e.to_string(),
                })?;
            acquired = Some((fetched.text(), fetched.url, PageSource::Active));
        }

        let (raw, origin, source) =
            acquired.ok_or(PageError::PassiveMiss { page: viewer_page })?;

        let normalized = normalize_page(
            &raw,
            &origin,
            &self.client,
            self.config.reference_concurrency,
        )
        .await;
        let path = store::write_unit(dir, index, &normalized.markup)
            .await
            .map_err(|e| PageError::WriteFailed {
                page: viewer_page,
                detail: e.to_string(),
            })?;

        debug!(
            "Page {} → unit {} ({:?}, {} bytes)",
            viewer_page,
            index,
            source,
            normalized.markup.len()
        );
        Ok(CapturedPage {
            index,
            viewer_page,
            source,
            path,
            bytes: normalized.markup.len(),
            size: intrinsic_size(&normalized.markup),
            references: normalized.references,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selectors::PASSIVE_PAGE_PATTERN;

    fn response(url: &str) -> NetworkResponse {
        NetworkResponse {
            url: Url::parse(url).unwrap(),
            status: 200,
            content_type: Some("image/svg+xml".into()),
            body: b"<svg/>".to_vec(),
        }
    }

    #[test]
    fn test_match_entry_prefers_exact() {
        let entries: Vec<String> = ["Algebra II", "Algebra", "Linear algebra"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(match_entry(&entries, "Algebra"), Some(1));
        assert_eq!(match_entry(&entries, "linear ALGEBRA"), Some(2));
        assert_eq!(match_entry(&entries, "gebra I"), Some(0));
        assert_eq!(match_entry(&entries, "Topology"), None);
        assert_eq!(match_entry(&entries, "  "), None);
    }

    #[test]
    fn test_class_marks_disabled() {
        assert!(class_marks_disabled("btn next disabled"));
        assert!(class_marks_disabled("nav-btn nav-btn--disabled"));
        assert!(class_marks_disabled("is-disabled"));
        assert!(!class_marks_disabled("btn next"));
        assert!(!class_marks_disabled("undisabledish"));
    }

    #[test]
    fn test_passive_buffer_dedupes_by_file_name() {
        let re = Regex::new(PASSIVE_PAGE_PATTERN).unwrap();
        let mut buffer = PassiveBuffer::default();
        assert!(buffer.offer(&re, response("https://cdn/b/0001.svg")));
        assert!(!buffer.offer(&re, response("https://cdn/b/0001.svg?retry=1")));
        assert!(buffer.offer(&re, response("https://cdn/b/0002.svg")));
        assert!(!buffer.offer(&re, response("https://cdn/app.js")));

        assert!(buffer.take(1).is_some());
        assert!(buffer.take(1).is_none());
        // Consumed files are not accepted again.
        assert!(!buffer.offer(&re, response("https://cdn/b/0001.svg")));
        assert!(buffer.take(2).is_some());
    }

    #[test]
    fn test_passive_buffer_ignores_errors() {
        let re = Regex::new(PASSIVE_PAGE_PATTERN).unwrap();
        let mut buffer = PassiveBuffer::default();
        let mut r = response("https://cdn/b/3.svg");
        r.status = 404;
        assert!(!buffer.offer(&re, r));
        assert!(buffer.take(3).is_none());
    }
}
