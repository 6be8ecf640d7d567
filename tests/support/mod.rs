//! Scripted in-memory viewer for driving the capture state machine.
//!
//! The viewer shows a listing with a few titles. Opening one lands on the
//! book's reader URL at an arbitrary "resumed" page; pages are addressed
//! with `?page=N`, and the container's `data` attribute is
//! `pages/N.svg`, which resolves to `<reader>/pages/N.svg` on the mock
//! server. The "next" control gets a `disabled` attribute on the last page.
//!
//! A nested-path viewer only understands `<reader>/N` and points its
//! container at `../pages/N.svg`, so both viewers fetch the same files.

#![allow(dead_code)]

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;
use vecbook::{
    NetworkResponse, OpenedView, RemoteView, SessionCookie, ViewError, ViewerSelectors,
};

#[derive(Debug)]
struct State {
    current: Option<Url>,
    listing_shown: bool,
    page: usize,
    attached: bool,
    overlays: usize,
    overlay_removals: usize,
    clicks: usize,
}

pub struct FakeView {
    server: String,
    selectors: ViewerSelectors,
    library: Url,
    reader: Url,
    entries: Vec<String>,
    total_pages: usize,
    /// Pages whose container never attaches.
    broken_pages: Vec<usize>,
    /// Bodies delivered through `observe_responses`.
    passive_feed: Vec<NetworkResponse>,
    /// Pages live at `<reader>/N` instead of `<reader>?page=N`.
    nested_paths: bool,
    /// Opening an entry hands back a fresh view instead of navigating.
    opens_new_view: bool,
    opened: Mutex<Option<Arc<FakeView>>>,
    state: Mutex<State>,
}

impl FakeView {
    /// A viewer on `server` holding `entries`, each a `total_pages` book.
    pub fn new(server: &str, entries: &[&str], total_pages: usize) -> Self {
        let library = Url::parse(&format!("{server}/library")).unwrap();
        let reader = Url::parse(&format!("{server}/reader/42")).unwrap();
        Self {
            server: server.to_string(),
            selectors: ViewerSelectors::default(),
            library: library.clone(),
            reader,
            entries: entries.iter().map(|s| s.to_string()).collect(),
            total_pages,
            broken_pages: Vec::new(),
            passive_feed: Vec::new(),
            nested_paths: false,
            opens_new_view: false,
            opened: Mutex::new(None),
            state: Mutex::new(State {
                current: Some(library),
                listing_shown: true,
                page: 0,
                attached: false,
                overlays: 0,
                overlay_removals: 0,
                clicks: 0,
            }),
        }
    }

    pub fn with_overlays(self, n: usize) -> Self {
        self.state.lock().unwrap().overlays = n;
        self
    }

    pub fn with_broken_pages(mut self, pages: &[usize]) -> Self {
        self.broken_pages = pages.to_vec();
        self
    }

    pub fn with_passive_feed(mut self, feed: Vec<NetworkResponse>) -> Self {
        self.passive_feed = feed;
        self
    }

    pub fn with_nested_paths(mut self) -> Self {
        self.nested_paths = true;
        self
    }

    pub fn opening_new_view(mut self) -> Self {
        self.opens_new_view = true;
        self
    }

    /// The view handed out by the last `open_entry`, if it made one.
    pub fn opened_view(&self) -> Option<Arc<FakeView>> {
        self.opened.lock().unwrap().clone()
    }

    pub fn clicks(&self) -> usize {
        self.state.lock().unwrap().clicks
    }

    pub fn current(&self) -> Option<Url> {
        self.state.lock().unwrap().current.clone()
    }

    pub fn library_url(&self) -> Url {
        self.library.clone()
    }

    pub fn overlay_removals(&self) -> usize {
        self.state.lock().unwrap().overlay_removals
    }

    pub fn current_page(&self) -> usize {
        self.state.lock().unwrap().page
    }

    fn page_url(&self, page: usize) -> Url {
        let mut url = self.reader.clone();
        if self.nested_paths {
            url.path_segments_mut().unwrap().push(&page.to_string());
        } else {
            url.query_pairs_mut().append_pair("page", &page.to_string());
        }
        url
    }

    fn open_reader(&self, state: &mut State) {
        state.listing_shown = false;
        // The reader resumes wherever it was last left.
        state.page = self.total_pages.min(2);
        state.attached = true;
        state.current = Some(self.reader.clone());
    }

    fn show_page(&self, state: &mut State, page: usize) {
        state.page = page;
        state.attached = page >= 1 && page <= self.total_pages && !self.broken_pages.contains(&page);
        state.current = Some(self.page_url(page));
    }

    fn requested_page(&self, url: &Url) -> Option<usize> {
        if self.nested_paths {
            let rest = url.path().strip_prefix(self.reader.path())?;
            return rest.strip_prefix('/')?.parse().ok();
        }
        if url.path() != self.reader.path() {
            return None;
        }
        url.query_pairs()
            .find(|(k, _)| k == "page")
            .and_then(|(_, v)| v.parse().ok())
    }
}

#[async_trait]
impl RemoteView for FakeView {
    async fn current_url(&self) -> Result<Url, ViewError> {
        self.state.lock().unwrap().current.clone().ok_or(ViewError::Closed)
    }

    async fn goto(&self, url: &Url) -> Result<(), ViewError> {
        let mut state = self.state.lock().unwrap();
        if *url == self.library {
            state.listing_shown = true;
            state.attached = false;
            state.current = Some(url.clone());
            return Ok(());
        }
        state.listing_shown = false;
        match self.requested_page(url) {
            Some(page) => self.show_page(&mut state, page),
            None => {
                state.attached = false;
                state.current = Some(url.clone());
            }
        }
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), ViewError> {
        if self.is_present(selector).await? {
            Ok(())
        } else {
            Err(ViewError::Timeout {
                selector: selector.to_string(),
                millis: timeout.as_millis() as u64,
            })
        }
    }

    async fn is_present(&self, selector: &str) -> Result<bool, ViewError> {
        let state = self.state.lock().unwrap();
        let s = &self.selectors;
        Ok(if selector == s.listing_entry {
            state.listing_shown
        } else if selector == s.container {
            state.attached
        } else if selector == s.next_control {
            !state.listing_shown
        } else if s.overlay_containers.iter().any(|o| o == selector) {
            state.overlays > 0
        } else {
            false
        })
    }

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>, ViewError> {
        let state = self.state.lock().unwrap();
        let s = &self.selectors;
        if selector == s.container && state.attached && name == "data" {
            let prefix = if self.nested_paths { "../" } else { "" };
            return Ok(Some(format!("{prefix}pages/{}.svg", state.page)));
        }
        if selector == s.next_control && name == "disabled" && state.page >= self.total_pages {
            return Ok(Some(String::new()));
        }
        Ok(None)
    }

    async fn computed_style(
        &self,
        _selector: &str,
        _property: &str,
    ) -> Result<Option<String>, ViewError> {
        Ok(None)
    }

    async fn click(&self, selector: &str) -> Result<bool, ViewError> {
        let mut state = self.state.lock().unwrap();
        if selector != self.selectors.next_control || state.listing_shown {
            return Ok(false);
        }
        state.clicks += 1;
        if state.page < self.total_pages {
            let next = state.page + 1;
            self.show_page(&mut state, next);
        }
        Ok(true)
    }

    async fn remove_all(&self, selector: &str) -> Result<usize, ViewError> {
        let mut state = self.state.lock().unwrap();
        if !self.selectors.overlay_containers.iter().any(|o| o == selector) {
            return Ok(0);
        }
        let removed = state.overlays;
        state.overlays = 0;
        state.overlay_removals += removed;
        Ok(removed)
    }

    async fn entry_texts(&self, selector: &str) -> Result<Vec<String>, ViewError> {
        let state = self.state.lock().unwrap();
        if selector == self.selectors.listing_entry && state.listing_shown {
            Ok(self.entries.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn open_entry(&self, _selector: &str, index: usize) -> Result<OpenedView, ViewError> {
        if index >= self.entries.len() {
            return Err(ViewError::Command(format!("no entry {index}")));
        }
        if self.opens_new_view {
            let entries: Vec<&str> = self.entries.iter().map(String::as_str).collect();
            let mut child = FakeView::new(&self.server, &entries, self.total_pages);
            child.nested_paths = self.nested_paths;
            child.broken_pages = self.broken_pages.clone();
            {
                let mut state = child.state.lock().unwrap();
                child.open_reader(&mut state);
            }
            let child = Arc::new(child);
            *self.opened.lock().unwrap() = Some(child.clone());
            return Ok(OpenedView::NewView(child));
        }
        let mut state = self.state.lock().unwrap();
        self.open_reader(&mut state);
        Ok(OpenedView::SameView)
    }

    async fn observe_responses(
        &self,
        pattern: &Regex,
    ) -> Result<vecbook::view::ResponseStream, ViewError> {
        let matching: Vec<NetworkResponse> = self
            .passive_feed
            .iter()
            .filter(|r| pattern.is_match(r.url.as_str()))
            .cloned()
            .collect();
        Ok(Box::pin(futures::stream::iter(matching)))
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, ViewError> {
        Ok(Vec::new())
    }
}
