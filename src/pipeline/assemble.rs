//! Document assembly: a directory of page units → one paginated PDF.
//!
//! ## Why spawn_blocking?
//!
//! Parsing vector markup with `usvg` and converting it with `svg2pdf` is
//! CPU-bound and can take hundreds of milliseconds for a dense page.
//! `tokio::task::spawn_blocking` moves composition onto the blocking pool so
//! capture of the next Document keeps its timers and network I/O running.
//!
//! ## Page geometry
//!
//! Each unit becomes a form XObject of unit size, drawn with a
//! `[w 0 0 h 0 0]` transform on a page whose media box is the unit's own
//! declared size in points. The drawing therefore fills the page from the
//! origin corner regardless of the unit's `viewBox`.

use crate::config::CaptureConfig;
use crate::error::VecbookError;
use crate::naming::safe_name;
use crate::output::AssemblyReport;
use crate::pipeline::store::UNIT_EXTENSION;
use crate::pipeline::units::{page_size_or, PageSize};
use pdf_writer::{Content, Finish, Name, Pdf, Rect, Ref, TextStr};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use svg2pdf::usvg;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

// ── Unit discovery ───────────────────────────────────────────────────────────

/// Compare file names treating digit runs as numbers (`2` < `10`).
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let na = take_digits(&mut ai);
                let nb = take_digits(&mut bi);
                let ta = na.trim_start_matches('0');
                let tb = nb.trim_start_matches('0');
                let ord = ta
                    .len()
                    .cmp(&tb.len())
                    .then_with(|| ta.cmp(tb))
                    .then_with(|| na.len().cmp(&nb.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                let ord = x.cmp(&y);
                if ord != Ordering::Equal {
                    return ord;
                }
                ai.next();
                bi.next();
            }
        }
    }
}

fn take_digits(it: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut s = String::new();
    while let Some(c) = it.peek().copied().filter(char::is_ascii_digit) {
        s.push(c);
        it.next();
    }
    s
}

/// Page units in `dir`, in natural file-name order.
///
/// A unit is any visible `*.svg` file; temp files from interrupted writes
/// are hidden and ignored.
pub async fn collect_units(dir: &Path) -> Result<Vec<PathBuf>, VecbookError> {
    let io_err = |e: std::io::Error| VecbookError::OutputWriteFailed {
        path: dir.to_path_buf(),
        source: e,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut units = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_unit = !name.starts_with('.')
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(UNIT_EXTENSION));
        if is_unit && entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            units.push(path);
        }
    }
    units.sort_by(|a, b| natural_cmp(&file_name_of(a), &file_name_of(b)));
    Ok(units)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Output path for a Document directory: `<dir>/<safe dir name>.pdf`.
pub fn output_path_for(dir: &Path, max_name_len: usize) -> PathBuf {
    let raw = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!("{}.pdf", safe_name(&raw, max_name_len)))
}

// ── Assembly ─────────────────────────────────────────────────────────────────

/// Assemble every unit in `dir` into `<dir>/<name>.pdf`.
///
/// Fails with [`VecbookError::NoPageUnits`] before creating any output
/// when the directory holds no units. Returns only after the output file
/// has been flushed, synced and moved into place.
pub async fn assemble_directory(
    dir: &Path,
    config: &CaptureConfig,
) -> Result<AssemblyReport, VecbookError> {
    let start = Instant::now();
    if !tokio::fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(VecbookError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let unit_paths = collect_units(dir).await?;
    if unit_paths.is_empty() {
        return Err(VecbookError::NoPageUnits {
            path: dir.to_path_buf(),
        });
    }
    info!("Assembling {} units from {}", unit_paths.len(), dir.display());

    let mut units = Vec::with_capacity(unit_paths.len());
    for path in &unit_paths {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| VecbookError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;
        units.push(String::from_utf8_lossy(&bytes).into_owned());
    }

    let output = output_path_for(dir, config.max_name_len);
    let title = file_name_of(dir);
    let default_size = config.default_page_size;

    let composed = tokio::task::spawn_blocking(move || compose_pdf(&units, default_size, &title))
        .await
        .map_err(|e| VecbookError::AssemblyFailed {
            path: dir.to_path_buf(),
            detail: format!("composition task panicked: {e}"),
        })?;

    let bytes = write_streamed(&output, &composed.bytes).await?;
    let report = AssemblyReport {
        directory: dir.to_path_buf(),
        output,
        pages: composed.pages,
        blank_pages: composed.blank_pages,
        bytes,
        duration_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        "Wrote {} ({} pages, {} bytes) in {}ms",
        report.output.display(),
        report.pages,
        report.bytes,
        report.duration_ms
    );
    if !report.blank_pages.is_empty() {
        warn!(
            "{}: units {:?} could not be rendered and are blank",
            report.output.display(),
            report.blank_pages
        );
    }
    Ok(report)
}

/// Run [`assemble_directory`] on its own task, so a panic inside
/// composition surfaces as [`VecbookError::AssemblyAborted`] instead of
/// unwinding into the caller.
pub async fn assemble_isolated(
    dir: PathBuf,
    config: CaptureConfig,
) -> Result<AssemblyReport, VecbookError> {
    let path = dir.clone();
    tokio::spawn(async move { assemble_directory(&dir, &config).await })
        .await
        .map_err(|e| VecbookError::AssemblyAborted {
            path,
            detail: e.to_string(),
        })?
}

struct ComposedPdf {
    bytes: Vec<u8>,
    pages: usize,
    /// 1-indexed positions of units that became blank pages.
    blank_pages: Vec<usize>,
}

/// Blocking composition of one PDF page per unit.
fn compose_pdf(units: &[String], default_size: PageSize, title: &str) -> ComposedPdf {
    let mut options = usvg::Options::default();
    options.fontdb_mut().load_system_fonts();

    let mut alloc = Ref::new(1);
    let catalog_id = alloc.bump();
    let page_tree_id = alloc.bump();
    let info_id = alloc.bump();

    let mut pdf = Pdf::new();
    let mut page_ids = Vec::with_capacity(units.len());
    let mut blank_pages = Vec::new();

    for (i, markup) in units.iter().enumerate() {
        let size = page_size_or(markup, default_size);
        let page_id = alloc.bump();
        let content_id = alloc.bump();
        page_ids.push(page_id);

        let drawing = match usvg::Tree::from_str(markup, &options) {
            Ok(tree) => match svg2pdf::to_chunk(&tree, svg2pdf::ConversionOptions::default()) {
                Ok(converted) => Some(converted),
                Err(e) => {
                    warn!("Unit {} could not be converted: {}", i + 1, e);
                    None
                }
            },
            Err(e) => {
                warn!("Unit {} could not be parsed: {}", i + 1, e);
                None
            }
        };

        let (w, h) = (size.width_pt as f32, size.height_pt as f32);
        let mut page = pdf.page(page_id);
        page.media_box(Rect::new(0.0, 0.0, w, h));
        page.parent(page_tree_id);
        page.contents(content_id);

        let mut content = Content::new();
        match drawing {
            Some((chunk, root)) => {
                let mut map = HashMap::new();
                let chunk = chunk.renumber(|old| *map.entry(old).or_insert_with(|| alloc.bump()));
                let xobject = map.get(&root).copied().unwrap_or(root);
                let name = format!("P{}", i + 1);

                page.resources()
                    .x_objects()
                    .pair(Name(name.as_bytes()), xobject);
                page.finish();

                content
                    .save_state()
                    .transform([w, 0.0, 0.0, h, 0.0, 0.0])
                    .x_object(Name(name.as_bytes()))
                    .restore_state();
                pdf.stream(content_id, &content.finish());
                pdf.extend(&chunk);
            }
            None => {
                page.finish();
                blank_pages.push(i + 1);
                pdf.stream(content_id, &content.finish());
            }
        }
        debug!("Unit {} → page {:.1}×{:.1}pt", i + 1, size.width_pt, size.height_pt);
    }

    pdf.catalog(catalog_id).pages(page_tree_id);
    pdf.pages(page_tree_id)
        .kids(page_ids.iter().copied())
        .count(page_ids.len() as i32);
    pdf.document_info(info_id)
        .title(TextStr(title))
        .producer(TextStr(concat!("vecbook ", env!("CARGO_PKG_VERSION"))));

    ComposedPdf {
        bytes: pdf.finish(),
        pages: page_ids.len(),
        blank_pages,
    }
}

/// Write `bytes` to `path` through a buffered stream, then fsync and
/// rename into place. Returns the number of bytes written.
async fn write_streamed(path: &Path, bytes: &[u8]) -> Result<u64, VecbookError> {
    let write_err = |e: std::io::Error| VecbookError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let tmp = path.with_extension("pdf.part");

    let file = tokio::fs::File::create(&tmp).await.map_err(write_err)?;
    let mut writer = BufWriter::new(file);
    let result = async {
        writer.write_all(bytes).await?;
        writer.flush().await?;
        writer.get_mut().sync_all().await?;
        Ok::<_, std::io::Error>(())
    }
    .await;
    drop(writer);

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(e));
    }
    Ok(bytes.len() as u64)
}
