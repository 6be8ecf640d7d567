//! CLI binary for vecbook.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `CaptureConfig`, runs one subcommand and prints a summary.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vecbook::pipeline::http::parse_url;
use vecbook::{
    AcquisitionMode, CaptureConfig, CaptureProgressCallback, ProgressCallback, RunSummary,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner plus one log line per page. Page counts are unknown until the
/// "next" control reports the end, so the bar only counts upward.
struct CliProgressCallback {
    bar: ProgressBar,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  {pos:>4} pages  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            skipped: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
        let skipped = self.skipped.load(Ordering::SeqCst);
        if skipped > 0 {
            eprintln!("{} {} viewer pages skipped", cyan("⚠"), skipped);
        }
    }
}

fn truncate(msg: &str, max: usize) -> String {
    if msg.chars().count() > max {
        let cut: String = msg.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        msg.to_string()
    }
}

impl CaptureProgressCallback for CliProgressCallback {
    fn on_document_start(&self, title: &str) {
        self.bar.reset();
        self.bar.set_prefix(truncate(title, 32));
        self.bar
            .println(format!("{} {}", cyan("◆"), bold(&format!("Capturing {title}…"))));
    }

    fn on_page_captured(&self, _title: &str, index: usize, bytes: usize) {
        self.bar.set_message(format!("unit {index:04} {}", dim(&format!("{bytes} bytes"))));
        self.bar.inc(1);
    }

    fn on_page_skipped(&self, _title: &str, viewer_page: usize, error: &str) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Page {:>4}  {}",
            red("✗"),
            viewer_page,
            red(&truncate(error, 80))
        ));
    }

    fn on_document_complete(&self, title: &str, pages: usize) {
        self.bar
            .println(format!("  {} {} pages of {}", green("✓"), pages, bold(title)));
    }

    fn on_document_failed(&self, title: &str, error: &str) {
        self.bar.println(format!(
            "  {} {}  {}",
            red("✘"),
            bold(title),
            red(&truncate(error, 80))
        ));
    }

    fn on_assembly_complete(&self, _title: &str, output: &Path, pages: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✔"),
            output.display(),
            dim(&format!("{pages} pages"))
        ));
    }

    fn on_assembly_failed(&self, title: &str, error: &str) {
        self.bar.println(format!(
            "  {} assembly of {}  {}",
            red("✘"),
            bold(title),
            red(&truncate(error, 80))
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Assemble directories captured earlier
  vecbook assemble books/Linear_Algebra books/Topology

  # Download pages from absolute URLs, then assemble
  vecbook fetch --title "Linear Algebra" https://reader.example/42/pages/{1,2,3}.svg

  # Attach to a logged-in Chrome and capture two titles
  #   chrome --remote-debugging-port=9222
  vecbook capture --browser ws://127.0.0.1:9222/devtools/browser/<id> \
      --library-url https://reader.example/library \
      --title "Linear Algebra" --title "Topology"

  # JSON run summary
  vecbook --json assemble books/* > summary.json

OUTPUT LAYOUT:
  <output-root>/<safe title>/0001.svg, 0002.svg, …   normalized page units
  <output-root>/<safe title>/<safe title>.pdf         assembled document

ENVIRONMENT VARIABLES:
  VECBOOK_OUTPUT_ROOT     Default for --output-root
  VECBOOK_BROWSER         DevTools WebSocket URL for `capture`
  RUST_LOG                Overrides the log filter
"#;

/// Capture vector-graphics books from authenticated web viewers.
#[derive(Parser, Debug)]
#[command(
    name = "vecbook",
    version,
    about = "Capture vector-graphics books from authenticated web viewers into offline PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Directory holding one sub-directory per Document.
    #[arg(long, global = true, env = "VECBOOK_OUTPUT_ROOT", default_value = "books")]
    output_root: PathBuf,

    /// Print the run summary as JSON on stdout.
    #[arg(long, global = true, env = "VECBOOK_JSON")]
    json: bool,

    /// Disable progress output.
    #[arg(long, global = true, env = "VECBOOK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "VECBOOK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "VECBOOK_QUIET")]
    quiet: bool,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, global = true, env = "VECBOOK_FETCH_TIMEOUT", default_value_t = 60)]
    fetch_timeout: u64,

    /// Maximum concurrent reference fetches per page.
    #[arg(short, long, global = true, env = "VECBOOK_CONCURRENCY", default_value_t = 16)]
    concurrency: usize,

    /// User-Agent for authenticated fetches.
    #[arg(long, global = true, env = "VECBOOK_USER_AGENT")]
    user_agent: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble existing Document directories into PDFs.
    Assemble {
        /// Directories containing NNNN.svg page units.
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },

    /// Download absolute page URLs into one Document, then assemble it.
    Fetch {
        /// Document title; names the directory and the PDF.
        #[arg(long)]
        title: String,

        /// Page URLs, in page order.
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Drive a logged-in browser through whole Documents.
    Capture(CaptureArgs),
}

#[derive(Args, Debug)]
struct CaptureArgs {
    /// DevTools WebSocket URL of the running browser.
    #[arg(long, env = "VECBOOK_BROWSER")]
    browser: String,

    /// Titles to capture, in order.
    #[arg(long = "title", required = true)]
    titles: Vec<String>,

    /// Listing page to open before each title.
    #[arg(long, env = "VECBOOK_LIBRARY_URL")]
    library_url: Option<String>,

    /// Where page markup comes from.
    #[arg(long, value_enum, default_value = "both")]
    acquisition: AcquisitionArg,

    /// Pause between Documents, in seconds.
    #[arg(long, env = "VECBOOK_COOLDOWN", default_value_t = 30)]
    cooldown: u64,

    /// Bounded wait for selectors and page containers, in seconds.
    #[arg(long, env = "VECBOOK_SELECTOR_TIMEOUT", default_value_t = 10)]
    selector_timeout: u64,

    /// Bounded wait for navigations, in seconds.
    #[arg(long, env = "VECBOOK_NAVIGATION_TIMEOUT", default_value_t = 30)]
    navigation_timeout: u64,

    /// Upper bound on pages per Document.
    #[arg(long, env = "VECBOOK_MAX_PAGES", default_value_t = 5000)]
    max_pages: usize,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum AcquisitionArg {
    Passive,
    Active,
    Both,
}

impl From<AcquisitionArg> for AcquisitionMode {
    fn from(v: AcquisitionArg) -> Self {
        match v {
            AcquisitionArg::Passive => AcquisitionMode::Passive,
            AcquisitionArg::Active => AcquisitionMode::Active,
            AcquisitionArg::Both => AcquisitionMode::Both,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let common = &cli.common;

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active.
    let show_progress = !common.quiet && !common.no_progress && !common.json;
    let filter = if common.verbose {
        "debug"
    } else if common.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress = show_progress.then(CliProgressCallback::new);
    let callback: Option<ProgressCallback> = progress
        .clone()
        .map(|cb| cb as Arc<dyn CaptureProgressCallback>);

    // ── Run ──────────────────────────────────────────────────────────────
    let summary = match &cli.command {
        Command::Assemble { dirs } => {
            let config = base_config(common, callback)
                .build()
                .context("Invalid configuration")?;
            vecbook::assemble_directories(dirs, &config).await
        }
        Command::Fetch { title, urls } => {
            let config = base_config(common, callback)
                .build()
                .context("Invalid configuration")?;
            let urls = urls
                .iter()
                .map(|u| parse_url(u))
                .collect::<Result<Vec<_>, _>>()
                .context("Invalid page URL")?;
            vecbook::fetch_title(title, urls, &config)
                .await
                .context("Download failed")?
        }
        Command::Capture(args) => run_capture(common, args, callback).await?,
    };

    if let Some(cb) = progress {
        cb.finish();
    }
    report(&summary, common)?;

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Map the flags shared by every subcommand onto a builder.
fn base_config(
    common: &CommonArgs,
    progress: Option<ProgressCallback>,
) -> vecbook::CaptureConfigBuilder {
    let mut builder = CaptureConfig::builder()
        .output_root(&common.output_root)
        .fetch_timeout_secs(common.fetch_timeout)
        .reference_concurrency(common.concurrency);
    if let Some(ref ua) = common.user_agent {
        builder = builder.user_agent(ua.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder
}

#[cfg(feature = "chromium")]
async fn run_capture(
    common: &CommonArgs,
    args: &CaptureArgs,
    progress: Option<ProgressCallback>,
) -> Result<RunSummary> {
    use vecbook::view::chromium::ChromiumView;

    let mut builder = base_config(common, progress)
        .acquisition(args.acquisition.into())
        .cooldown_secs(args.cooldown)
        .selector_timeout_secs(args.selector_timeout)
        .navigation_timeout_secs(args.navigation_timeout)
        .max_pages(args.max_pages);
    if let Some(ref raw) = args.library_url {
        builder = builder.library_url(parse_url(raw).context("Invalid --library-url")?);
    }
    let config = builder.build().context("Invalid configuration")?;

    let view = ChromiumView::connect(&args.browser, config.navigation_timeout())
        .await
        .with_context(|| format!("Failed to attach to browser at {}", args.browser))?;
    vecbook::capture_titles(Arc::new(view), &args.titles, &config)
        .await
        .context("Capture failed")
}

#[cfg(not(feature = "chromium"))]
async fn run_capture(
    _common: &CommonArgs,
    _args: &CaptureArgs,
    _progress: Option<ProgressCallback>,
) -> Result<RunSummary> {
    anyhow::bail!("`capture` needs a build with the `chromium` feature")
}

/// Print the run summary: JSON on stdout, or one line per Document on stderr.
fn report(summary: &RunSummary, common: &CommonArgs) -> Result<()> {
    if common.json {
        let json = serde_json::to_string_pretty(summary).context("Failed to serialise summary")?;
        println!("{json}");
        return Ok(());
    }
    if common.quiet {
        return Ok(());
    }
    for doc in &summary.documents {
        let captured = doc.capture.as_ref().map(|c| c.page_count());
        match (&doc.assembly, &doc.capture_error, &doc.assembly_error) {
            (Some(a), _, _) => eprintln!(
                "{}  {}  {} pages  →  {}",
                green("✔"),
                bold(&doc.title),
                a.pages,
                a.output.display()
            ),
            (None, Some(e), _) | (None, None, Some(e)) => eprintln!(
                "{}  {}  {}{}",
                red("✘"),
                bold(&doc.title),
                red(e),
                captured
                    .map(|n| dim(&format!("  ({n} pages captured)")))
                    .unwrap_or_default()
            ),
            (None, None, None) => eprintln!("{}  {}", cyan("⚠"), bold(&doc.title)),
        }
    }
    eprintln!(
        "{} documents, {} failed, {} pages in {}ms",
        summary.documents.len(),
        summary.failed().count(),
        summary.total_pages(),
        summary.duration_ms
    );
    Ok(())
}
