//! Configuration types for capture, resolution, and assembly.
//!
//! All behaviour is controlled through [`CaptureConfig`], built via its
//! [`CaptureConfigBuilder`]. The value is threaded explicitly into the
//! session client, the capture driver and the assembler; nothing reads
//! process-wide globals.

use crate::error::VecbookError;
use crate::pipeline::units::PageSize;
use crate::progress::ProgressCallback;
use crate::selectors;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Configuration for a capture run.
///
/// Built via [`CaptureConfig::builder()`] or using
/// [`CaptureConfig::default()`].
///
/// # Example
/// ```rust
/// use vecbook::CaptureConfig;
///
/// let config = CaptureConfig::builder()
///     .output_root("books")
///     .cooldown_secs(10)
///     .reference_concurrency(8)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct CaptureConfig {
    /// Directory under which one sub-directory per Document is created. Default: `books`.
    pub output_root: PathBuf,

    /// Listing page to open before searching for a title. If `None`, the
    /// listing is expected to be the view's current page.
    pub library_url: Option<Url>,

    /// Selectors for the viewer's listing, container, navigation and overlays.
    pub selectors: ViewerSelectors,

    /// Ordered page-addressing strategies. Default: `?page=N`, then `/N`.
    ///
    /// The first scheme under which page 1's container materializes is used
    /// for the rest of the Document.
    pub addressing: Vec<AddressingScheme>,

    /// Where page markup comes from. Default: [`AcquisitionMode::Both`].
    pub acquisition: AcquisitionMode,

    /// Bounded wait for a selector or container, in seconds. Default: 10.
    pub selector_timeout_secs: u64,

    /// Bounded wait for a navigation, in seconds. Default: 30.
    pub navigation_timeout_secs: u64,

    /// Per-request HTTP timeout, in seconds. Default: 60.
    pub fetch_timeout_secs: u64,

    /// Delay after removing or dismissing an overlay, in milliseconds. Default: 400.
    pub settle_delay_ms: u64,

    /// How long to wait for a passively captured page body before falling
    /// back to an active fetch, in milliseconds. Default: 1500.
    pub passive_wait_ms: u64,

    /// Polling interval for attribute and buffer waits, in milliseconds. Default: 100.
    pub poll_interval_ms: u64,

    /// Pause between two completed Documents, in seconds. Default: 30.
    pub cooldown_secs: u64,

    /// Maximum in-flight reference fetches for one page. Default: 16.
    pub reference_concurrency: usize,

    /// Upper bound on viewer pages per Document. Default: 5000.
    pub max_pages: usize,

    /// Consecutive unreachable pages tolerated before the Document fails. Default: 3.
    pub max_consecutive_misses: usize,

    /// Page size used when a unit declares no parseable width/height. Default: A4 portrait.
    pub default_page_size: PageSize,

    /// Cap on the output file name length, in characters. Default: 120.
    pub max_name_len: usize,

    /// User-Agent for authenticated fetches. If `None`, reqwest's default.
    pub user_agent: Option<String>,

    /// Optional progress callback for per-page and per-document events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("books"),
            library_url: None,
            selectors: ViewerSelectors::default(),
            addressing: AddressingScheme::defaults(),
            acquisition: AcquisitionMode::default(),
            selector_timeout_secs: 10,
            navigation_timeout_secs: 30,
            fetch_timeout_secs: 60,
            settle_delay_ms: 400,
            passive_wait_ms: 1500,
            poll_interval_ms: 100,
            cooldown_secs: 30,
            reference_concurrency: 16,
            max_pages: 5000,
            max_consecutive_misses: 3,
            default_page_size: PageSize::A4,
            max_name_len: 120,
            user_agent: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for CaptureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureConfig")
            .field("output_root", &self.output_root)
            .field("library_url", &self.library_url.as_ref().map(Url::as_str))
            .field("addressing", &self.addressing)
            .field("acquisition", &self.acquisition)
            .field("selector_timeout_secs", &self.selector_timeout_secs)
            .field("navigation_timeout_secs", &self.navigation_timeout_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("cooldown_secs", &self.cooldown_secs)
            .field("reference_concurrency", &self.reference_concurrency)
            .field("default_page_size", &self.default_page_size)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn CaptureProgressCallback>"),
            )
            .finish()
    }
}

impl CaptureConfig {
    /// Create a new builder for `CaptureConfig`.
    pub fn builder() -> CaptureConfigBuilder {
        CaptureConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_secs(self.selector_timeout_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn passive_wait(&self) -> Duration {
        Duration::from_millis(self.passive_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Builder for [`CaptureConfig`].
#[derive(Debug)]
pub struct CaptureConfigBuilder {
    config: CaptureConfig,
}

impl CaptureConfigBuilder {
    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.output_root = root.into();
        self
    }

    pub fn library_url(mut self, url: Url) -> Self {
        self.config.library_url = Some(url);
        self
    }

    pub fn selectors(mut self, selectors: ViewerSelectors) -> Self {
        self.config.selectors = selectors;
        self
    }

    pub fn addressing(mut self, schemes: Vec<AddressingScheme>) -> Self {
        self.config.addressing = schemes;
        self
    }

    pub fn acquisition(mut self, mode: AcquisitionMode) -> Self {
        self.config.acquisition = mode;
        self
    }

    pub fn selector_timeout_secs(mut self, secs: u64) -> Self {
        self.config.selector_timeout_secs = secs.max(1);
        self
    }

    pub fn navigation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.navigation_timeout_secs = secs.max(1);
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs.max(1);
        self
    }

    pub fn settle_delay_ms(mut self, ms: u64) -> Self {
        self.config.settle_delay_ms = ms;
        self
    }

    pub fn passive_wait_ms(mut self, ms: u64) -> Self {
        self.config.passive_wait_ms = ms;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms.clamp(10, 5_000);
        self
    }

    pub fn cooldown_secs(mut self, secs: u64) -> Self {
        self.config.cooldown_secs = secs;
        self
    }

    pub fn reference_concurrency(mut self, n: usize) -> Self {
        self.config.reference_concurrency = n.max(1);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn max_consecutive_misses(mut self, n: usize) -> Self {
        self.config.max_consecutive_misses = n;
        self
    }

    pub fn default_page_size(mut self, size: PageSize) -> Self {
        self.config.default_page_size = size;
        self
    }

    pub fn max_name_len(mut self, n: usize) -> Self {
        self.config.max_name_len = n;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = Some(ua.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CaptureConfig, VecbookError> {
        let c = &self.config;
        if c.addressing.is_empty() {
            return Err(VecbookError::InvalidConfig(
                "At least one addressing scheme is required".into(),
            ));
        }
        for scheme in &c.addressing {
            if let AddressingScheme::Template(t) = scheme {
                if !t.contains("{page}") {
                    return Err(VecbookError::InvalidConfig(format!(
                        "Addressing template '{t}' has no {{page}} placeholder"
                    )));
                }
            }
        }
        if c.max_pages == 0 {
            return Err(VecbookError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if c.max_name_len < 8 {
            return Err(VecbookError::InvalidConfig(format!(
                "max_name_len must be ≥ 8, got {}",
                c.max_name_len
            )));
        }
        if !(c.default_page_size.width_pt > 0.0 && c.default_page_size.height_pt > 0.0) {
            return Err(VecbookError::InvalidConfig(
                "Default page size must be positive".into(),
            ));
        }
        if c.selectors.container_attributes.is_empty() {
            return Err(VecbookError::InvalidConfig(
                "At least one container attribute is required".into(),
            ));
        }
        if let Err(e) = regex::Regex::new(&c.selectors.passive_pattern) {
            return Err(VecbookError::InvalidConfig(format!(
                "Passive pattern does not compile: {e}"
            )));
        }
        Ok(self.config)
    }
}

// ── Viewer selectors ─────────────────────────────────────────────────────

/// CSS selectors and patterns describing one viewer implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerSelectors {
    pub listing_entry: String,
    pub container: String,
    pub container_attributes: Vec<String>,
    pub next_control: String,
    pub overlay_containers: Vec<String>,
    pub dismiss_controls: Vec<String>,
    /// Regex over response URLs; group 1 is the page number.
    pub passive_pattern: String,
}

impl Default for ViewerSelectors {
    fn default() -> Self {
        let owned = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Self {
            listing_entry: selectors::LISTING_ENTRY.to_string(),
            container: selectors::VECTOR_CONTAINER.to_string(),
            container_attributes: owned(selectors::VECTOR_ATTRIBUTES),
            next_control: selectors::NEXT_CONTROL.to_string(),
            overlay_containers: owned(selectors::OVERLAY_CONTAINERS),
            dismiss_controls: owned(selectors::DISMISS_CONTROLS),
            passive_pattern: selectors::PASSIVE_PAGE_PATTERN.to_string(),
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Source of page markup during capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AcquisitionMode {
    /// Only bodies observed on the session's own network traffic.
    Passive,
    /// Only authenticated fetches of the container's reference.
    Active,
    /// Passive first, active fetch when nothing arrived in time. (default)
    #[default]
    Both,
}

impl AcquisitionMode {
    pub fn passive(self) -> bool {
        matches!(self, AcquisitionMode::Passive | AcquisitionMode::Both)
    }

    pub fn active(self) -> bool {
        matches!(self, AcquisitionMode::Active | AcquisitionMode::Both)
    }
}

/// One way of addressing a logical page of the open Document by URL.
///
/// Viewers resume at the last-viewed page, so page 1 is always forced
/// through one of these rather than trusting the default view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressingScheme {
    /// `viewer?…&{name}=N`, other query pairs preserved.
    QueryParam { name: String },
    /// `viewer/N`: the page number as an extra trailing path segment.
    NestedPath,
    /// A relative or absolute URL containing `{page}`, resolved against the viewer URL.
    Template(String),
}

impl AddressingScheme {
    /// The two observed viewer implementations, in trial order.
    pub fn defaults() -> Vec<Self> {
        vec![
            AddressingScheme::QueryParam {
                name: selectors::PAGE_QUERY_PARAM.to_string(),
            },
            AddressingScheme::NestedPath,
        ]
    }

    /// Short label for logs and reports.
    pub fn label(&self) -> String {
        match self {
            AddressingScheme::QueryParam { name } => format!("query:{name}"),
            AddressingScheme::NestedPath => "nested-path".to_string(),
            AddressingScheme::Template(t) => format!("template:{t}"),
        }
    }

    /// URL of `page` (1-indexed) relative to the viewer's base URL.
    pub fn page_url(&self, base: &Url, page: usize) -> Result<Url, VecbookError> {
        let invalid = |reason: &str| VecbookError::InvalidUrl {
            input: base.to_string(),
            reason: reason.to_string(),
        };
        match self {
            AddressingScheme::QueryParam { name } => {
                Ok(with_query_pairs(base, Some((name.as_str(), page)), name))
            }
            AddressingScheme::NestedPath => {
                let mut url = with_query_pairs(base, None, selectors::PAGE_QUERY_PARAM);
                url.set_fragment(None);
                url.path_segments_mut()
                    .map_err(|_| invalid("URL cannot carry path segments"))?
                    .pop_if_empty()
                    .push(&page.to_string());
                Ok(url)
            }
            AddressingScheme::Template(template) => base
                .join(&template.replace("{page}", &page.to_string()))
                .map_err(|e| invalid(&e.to_string())),
        }
    }
}

/// Copy of `base` whose query drops `strip` and optionally appends `(name, page)`.
fn with_query_pairs(base: &Url, append: Option<(&str, usize)>, strip: &str) -> Url {
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| k != strip)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = base.clone();
    url.set_query(None);
    if kept.is_empty() && append.is_none() {
        return url;
    }
    {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        if let Some((name, page)) = append {
            pairs.append_pair(name, &page.to_string());
        }
    }
    url
}
