//! The remote viewer as seen by the capture driver.
//!
//! [`RemoteView`] is the whole surface the driver needs from an
//! authenticated browsing context: navigate, wait for an element, read an
//! attribute or computed style, click, remove overlay nodes, list and open
//! listing entries, observe network responses and export cookies. Nothing
//! in the driver depends on a particular browser-control library; the
//! Chrome DevTools implementation lives in [`chromium`] behind the
//! `chromium` feature.

#[cfg(feature = "chromium")]
pub mod chromium;

use crate::error::ViewError;
use async_trait::async_trait;
use regex::Regex;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::Stream;
use url::Url;

/// A response body observed on the view's own network traffic.
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    pub url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Stream of observed responses, ending when the view closes.
pub type ResponseStream = Pin<Box<dyn Stream<Item = NetworkResponse> + Send>>;

/// One cookie of the authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    /// Cookie domain; a leading dot marks a domain cookie.
    pub domain: String,
    pub path: String,
    pub secure: bool,
}

impl SessionCookie {
    /// URL the cookie is scoped to, for inserting into a cookie jar.
    pub fn origin_url(&self) -> Option<Url> {
        let host = self.domain.trim_start_matches('.');
        if host.is_empty() {
            return None;
        }
        let scheme = if self.secure { "https" } else { "http" };
        let path = if self.path.starts_with('/') {
            self.path.as_str()
        } else {
            "/"
        };
        Url::parse(&format!("{scheme}://{host}{path}")).ok()
    }

    /// `Set-Cookie` header value reproducing the cookie's scope.
    pub fn to_set_cookie(&self) -> String {
        let mut s = format!("{}={}", self.name, self.value);
        if self.domain.starts_with('.') {
            s.push_str(&format!("; Domain={}", self.domain.trim_start_matches('.')));
        }
        if !self.path.is_empty() {
            s.push_str(&format!("; Path={}", self.path));
        }
        if self.secure {
            s.push_str("; Secure");
        }
        s
    }
}

/// Result of opening a listing entry.
pub enum OpenedView {
    /// The document opened in the same view.
    SameView,
    /// The document opened in a new view context.
    NewView(Arc<dyn RemoteView>),
}

impl std::fmt::Debug for OpenedView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenedView::SameView => f.write_str("SameView"),
            OpenedView::NewView(_) => f.write_str("NewView(<dyn RemoteView>)"),
        }
    }
}

/// An authenticated, stateful remote viewer.
///
/// Selectors are CSS selectors; every query looks at the first match only
/// unless stated otherwise.
#[async_trait]
pub trait RemoteView: Send + Sync {
    /// URL currently displayed.
    async fn current_url(&self) -> Result<Url, ViewError>;

    /// Navigate and wait for the load to finish.
    async fn goto(&self, url: &Url) -> Result<(), ViewError>;

    /// Wait until `selector` matches, up to `timeout`.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), ViewError>;

    /// Whether `selector` currently matches.
    async fn is_present(&self, selector: &str) -> Result<bool, ViewError>;

    /// Attribute `name` of the first match, `None` if absent or no match.
    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>, ViewError>;

    /// Computed style property of the first match.
    async fn computed_style(
        &self,
        selector: &str,
        property: &str,
    ) -> Result<Option<String>, ViewError>;

    /// Click the first match. `Ok(false)` when nothing matched.
    async fn click(&self, selector: &str) -> Result<bool, ViewError>;

    /// Remove every match from the document; returns how many were removed.
    async fn remove_all(&self, selector: &str) -> Result<usize, ViewError>;

    /// Trimmed text of every match, in document order.
    async fn entry_texts(&self, selector: &str) -> Result<Vec<String>, ViewError>;

    /// Activate the `index`-th match of `selector`.
    async fn open_entry(&self, selector: &str, index: usize) -> Result<OpenedView, ViewError>;

    /// Start observing responses whose URL matches `pattern`.
    async fn observe_responses(&self, pattern: &Regex) -> Result<ResponseStream, ViewError>;

    /// Cookies of the session, for authenticated out-of-view fetches.
    async fn cookies(&self) -> Result<Vec<SessionCookie>, ViewError>;
}
