//! Authenticated HTTP: one reqwest client sharing the session's cookie jar.
//!
//! The viewer session is already logged in; its cookies are copied once
//! into a [`reqwest::cookie::Jar`] and every fetch (page markup, images,
//! fonts, salvage re-fetches) goes through the same client. The jar is
//! never written after construction, so concurrent fetches share it
//! read-only.

use crate::config::CaptureConfig;
use crate::error::{FetchError, VecbookError};
use crate::pipeline::encode::mime_essence;
use crate::view::SessionCookie;
use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, CONTENT_TYPE, REFERER};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// `Accept` for page markup.
pub const ACCEPT_SVG: &str = "image/svg+xml,application/xml;q=0.9,*/*;q=0.8";
/// `Accept` for raster images and sub-graphics.
pub const ACCEPT_IMAGE: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";
/// `Accept` for web fonts.
pub const ACCEPT_FONT: &str = "font/woff2,font/woff;q=0.9,font/*;q=0.8,*/*;q=0.5";

/// A response body with the metadata the pipeline classifies on.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Final URL after redirects.
    pub url: Url,
    pub status: u16,
    /// Raw `Content-Type` header, if any.
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Fetched {
    /// Lowercased media type without parameters; empty when undeclared.
    pub fn mime(&self) -> String {
        self.content_type.as_deref().map(mime_essence).unwrap_or_default()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client bound to the authenticated session's credentials.
#[derive(Debug, Clone)]
pub struct SessionClient {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl SessionClient {
    /// A client with an empty cookie jar (direct mode without a session).
    pub fn new(config: &CaptureConfig) -> Result<Self, VecbookError> {
        Self::with_jar(Arc::new(Jar::default()), config)
    }

    /// A client carrying the given session cookies.
    pub fn from_cookies(
        cookies: &[SessionCookie],
        config: &CaptureConfig,
    ) -> Result<Self, VecbookError> {
        let jar = Jar::default();
        let mut added = 0usize;
        for cookie in cookies {
            if let Some(origin) = cookie.origin_url() {
                jar.add_cookie_str(&cookie.to_set_cookie(), &origin);
                added += 1;
            }
        }
        info!("Session client carries {} cookies", added);
        Self::with_jar(Arc::new(jar), config)
    }

    /// A client over an existing jar.
    pub fn with_jar(jar: Arc<Jar>, config: &CaptureConfig) -> Result<Self, VecbookError> {
        let mut builder = reqwest::Client::builder()
            .cookie_provider(jar)
            .timeout(Duration::from_secs(config.fetch_timeout_secs));
        if let Some(ref ua) = config.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        let client = builder
            .build()
            .map_err(|e| VecbookError::ClientBuild(e.to_string()))?;
        Ok(Self {
            client,
            timeout_secs: config.fetch_timeout_secs,
        })
    }

    /// GET `url` with an `Accept` hint and an optional `Referer`.
    ///
    /// Non-success statuses are returned as `Ok`; callers decide whether a
    /// 404 body is worth salvaging.
    pub async fn fetch(
        &self,
        url: &Url,
        accept: &str,
        referer: Option<&Url>,
    ) -> Result<Fetched, FetchError> {
        let mut request = self.client.get(url.clone()).header(ACCEPT, accept);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer.as_str());
        }

        let response = request.send().await.map_err(|e| self.map_err(url, e))?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_err(url, e))?
            .to_vec();

        debug!(
            "GET {} → {} ({}, {} bytes)",
            url,
            status,
            content_type.as_deref().unwrap_or("no content-type"),
            body.len()
        );

        Ok(Fetched {
            url: final_url,
            status,
            content_type,
            body,
        })
    }

    /// Like [`SessionClient::fetch`], but a non-success status is an error.
    pub async fn fetch_ok(
        &self,
        url: &Url,
        accept: &str,
        referer: Option<&Url>,
    ) -> Result<Fetched, FetchError> {
        let fetched = self.fetch(url, accept, referer).await?;
        if fetched.is_success() {
            Ok(fetched)
        } else {
            Err(FetchError::Status {
                url: url.to_string(),
                status: fetched.status,
            })
        }
    }

    fn map_err(&self, url: &Url, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Parse an absolute HTTP(S) URL.
pub fn parse_url(input: &str) -> Result<Url, VecbookError> {
    if !is_url(input) {
        return Err(VecbookError::InvalidUrl {
            input: input.to_string(),
            reason: "not an HTTP/HTTPS URL".into(),
        });
    }
    Url::parse(input).map_err(|e| VecbookError::InvalidUrl {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

/// The directory a viewer URL denotes, for resolving relative references.
///
/// A last path segment with an extension is a file and is dropped; any
/// other last segment (notably a bare page number) is itself a directory.
/// Query and fragment are removed.
pub fn directory_base(view_url: &Url) -> Url {
    let mut base = view_url.clone();
    base.set_query(None);
    base.set_fragment(None);

    let path = base.path().to_string();
    if path.ends_with('/') {
        return base;
    }
    let last = path.rsplit('/').next().unwrap_or("");
    if last.contains('.') {
        let parent = &path[..path.len() - last.len()];
        base.set_path(parent);
    } else {
        base.set_path(&format!("{path}/"));
    }
    base
}

/// Resolve a reference found in a viewer against the viewer's directory.
pub fn resolve_in_directory(view_url: &Url, reference: &str) -> Result<Url, url::ParseError> {
    directory_base(view_url).join(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/book/1.svg"));
        assert!(is_url("http://example.com/book/1.svg"));
        assert!(!is_url("/tmp/1.svg"));
        assert!(!is_url(""));
    }

    #[test]
    fn numeric_last_segment_is_a_directory() {
        let base = directory_base(&u("https://h/reader/42?page=3"));
        assert_eq!(base.as_str(), "https://h/reader/42/");
        assert_eq!(
            resolve_in_directory(&u("https://h/reader/42?page=3"), "pages/3.svg")
                .unwrap()
                .as_str(),
            "https://h/reader/42/pages/3.svg"
        );
    }

    #[test]
    fn file_segment_resolves_against_parent() {
        let base = directory_base(&u("https://h/reader/index.html#p2"));
        assert_eq!(base.as_str(), "https://h/reader/");
    }

    #[test]
    fn trailing_slash_is_kept() {
        let base = directory_base(&u("https://h/reader/42/"));
        assert_eq!(base.as_str(), "https://h/reader/42/");
    }

    #[test]
    fn parse_url_rejects_relative() {
        assert!(matches!(
            parse_url("pages/1.svg"),
            Err(VecbookError::InvalidUrl { .. })
        ));
        assert!(parse_url("https://h/1.svg").is_ok());
    }

    #[test]
    fn fetched_helpers() {
        let f = Fetched {
            url: u("https://h/a"),
            status: 404,
            content_type: Some("text/HTML; charset=utf-8".into()),
            body: b"<p>missing</p>".to_vec(),
        };
        assert_eq!(f.mime(), "text/html");
        assert!(!f.is_success());
        assert_eq!(f.text(), "<p>missing</p>");
    }
}
