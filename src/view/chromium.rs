//! [`RemoteView`] over a Chrome DevTools session.
//!
//! The browser is started and logged in by someone else; [`ChromiumView`]
//! only attaches to its DevTools WebSocket. DOM queries run as small
//! scripts whose result is passed back through `JSON.stringify`, so every
//! operation has one serialization path regardless of the value's shape.

use super::{NetworkResponse, OpenedView, RemoteView, ResponseStream, SessionCookie};
use crate::error::ViewError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use url::Url;

const POLL: Duration = Duration::from_millis(100);
const BODY_RETRIES: usize = 20;
/// How long a click on a listing entry may take to spawn a new tab.
const NEW_VIEW_GRACE: Duration = Duration::from_secs(2);

/// A view attached to one tab of a running, authenticated browser.
#[derive(Clone)]
pub struct ChromiumView {
    browser: Arc<Browser>,
    page: Page,
    navigation_timeout: Duration,
}

impl ChromiumView {
    /// Attach to the browser behind `ws_url` and use its first open tab.
    pub async fn connect(ws_url: &str, navigation_timeout: Duration) -> Result<Self, ViewError> {
        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| ViewError::Command(format!("connect to {ws_url}: {e}")))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("DevTools handler stopped: {}", e);
                    break;
                }
            }
        });

        let existing = browser.pages().await.map_err(command)?;
        let page = match existing.into_iter().next() {
            Some(page) => page,
            None => browser.new_page("about:blank").await.map_err(command)?,
        };
        page.execute(EnableParams::default()).await.map_err(command)?;
        info!("Attached to browser at {}", ws_url);

        Ok(Self {
            browser: Arc::new(browser),
            page,
            navigation_timeout,
        })
    }

    fn with_page(&self, page: Page) -> Self {
        Self {
            browser: Arc::clone(&self.browser),
            page,
            navigation_timeout: self.navigation_timeout,
        }
    }

    /// Evaluate `body` (a function body that `return`s) and decode its result.
    async fn eval<T: DeserializeOwned>(&self, body: &str) -> Result<T, ViewError> {
        let script = format!("JSON.stringify((() => {{ {body} }})() ?? null)");
        let json: String = self
            .page
            .evaluate(script)
            .await
            .map_err(command)?
            .into_value()
            .map_err(|e| ViewError::Command(format!("unexpected script result: {e}")))?;
        serde_json::from_str(&json)
            .map_err(|e| ViewError::Command(format!("undecodable script result: {e}")))
    }

    async fn tab_ids(&self) -> Result<HashSet<TargetId>, ViewError> {
        Ok(self
            .browser
            .pages()
            .await
            .map_err(command)?
            .iter()
            .map(|p| p.target_id().clone())
            .collect())
    }
}

fn command(e: chromiumoxide::error::CdpError) -> ViewError {
    ViewError::Command(e.to_string())
}

fn js(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

async fn response_body(page: &Page, id: RequestId) -> Option<Vec<u8>> {
    for _ in 0..BODY_RETRIES {
        match page.execute(GetResponseBodyParams::new(id.clone())).await {
            Ok(resp) => {
                let result = resp.result;
                return if result.base64_encoded {
                    STANDARD.decode(result.body.as_bytes()).ok()
                } else {
                    Some(result.body.into_bytes())
                };
            }
            // The body is only available once loading has finished.
            Err(_) => tokio::time::sleep(POLL).await,
        }
    }
    None
}

#[async_trait]
impl RemoteView for ChromiumView {
    async fn current_url(&self) -> Result<Url, ViewError> {
        let raw = self
            .page
            .url()
            .await
            .map_err(command)?
            .ok_or(ViewError::Closed)?;
        Url::parse(&raw).map_err(|e| ViewError::Command(format!("current URL '{raw}': {e}")))
    }

    async fn goto(&self, url: &Url) -> Result<(), ViewError> {
        let nav = tokio::time::timeout(self.navigation_timeout, self.page.goto(url.as_str()));
        match nav.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ViewError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ViewError::Navigation {
                url: url.to_string(),
                reason: format!("timed out after {}s", self.navigation_timeout.as_secs()),
            }),
        }
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), ViewError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_present(selector).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ViewError::Timeout {
                    selector: selector.to_string(),
                    millis: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn is_present(&self, selector: &str) -> Result<bool, ViewError> {
        self.eval(&format!("return document.querySelector({}) !== null;", js(selector)))
            .await
    }

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>, ViewError> {
        self.eval(&format!(
            "const e = document.querySelector({}); return e ? e.getAttribute({}) : null;",
            js(selector),
            js(name)
        ))
        .await
    }

    async fn computed_style(
        &self,
        selector: &str,
        property: &str,
    ) -> Result<Option<String>, ViewError> {
        self.eval(&format!(
            "const e = document.querySelector({}); \
             return e ? getComputedStyle(e).getPropertyValue({}) : null;",
            js(selector),
            js(property)
        ))
        .await
    }

    async fn click(&self, selector: &str) -> Result<bool, ViewError> {
        self.eval(&format!(
            "const e = document.querySelector({}); if (!e) return false; e.click(); return true;",
            js(selector)
        ))
        .await
    }

    async fn remove_all(&self, selector: &str) -> Result<usize, ViewError> {
        self.eval(&format!(
            "const n = document.querySelectorAll({}); n.forEach(e => e.remove()); return n.length;",
            js(selector)
        ))
        .await
    }

    async fn entry_texts(&self, selector: &str) -> Result<Vec<String>, ViewError> {
        self.eval(&format!(
            "return Array.from(document.querySelectorAll({})) \
             .map(e => (e.innerText || e.textContent || '').trim());",
            js(selector)
        ))
        .await
    }

    async fn open_entry(&self, selector: &str, index: usize) -> Result<OpenedView, ViewError> {
        let before = self.tab_ids().await?;
        let clicked: bool = self
            .eval(&format!(
                "const e = document.querySelectorAll({})[{index}]; \
                 if (!e) return false; e.click(); return true;",
                js(selector)
            ))
            .await?;
        if !clicked {
            return Err(ViewError::Command(format!(
                "listing entry {index} of '{selector}' vanished"
            )));
        }

        let deadline = tokio::time::Instant::now() + NEW_VIEW_GRACE;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(POLL).await;
            let pages = self.browser.pages().await.map_err(command)?;
            if let Some(page) = pages.into_iter().find(|p| !before.contains(p.target_id())) {
                info!("Document opened in a new tab");
                if let Err(e) = page.wait_for_navigation().await {
                    warn!("New tab did not finish loading: {}", e);
                }
                page.execute(EnableParams::default()).await.map_err(command)?;
                return Ok(OpenedView::NewView(Arc::new(self.with_page(page))));
            }
        }
        if let Err(e) = self.page.wait_for_navigation().await {
            debug!("No navigation after opening entry: {}", e);
        }
        Ok(OpenedView::SameView)
    }

    async fn observe_responses(&self, pattern: &Regex) -> Result<ResponseStream, ViewError> {
        let mut events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(command)?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let page = self.page.clone();
        let pattern = pattern.clone();

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let raw_url = &event.response.url;
                if !pattern.is_match(raw_url) {
                    continue;
                }
                let Ok(url) = Url::parse(raw_url) else {
                    continue;
                };
                let Some(body) = response_body(&page, event.request_id.clone()).await else {
                    debug!("Body of {} was not retrievable", url);
                    continue;
                };
                let response = NetworkResponse {
                    url,
                    status: u16::try_from(event.response.status).unwrap_or(0),
                    content_type: Some(event.response.mime_type.clone()),
                    body,
                };
                if tx.send(response).await.is_err() {
                    break;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, ViewError> {
        let cookies = self.page.get_cookies().await.map_err(command)?;
        Ok(cookies
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
            })
            .collect())
    }
}
