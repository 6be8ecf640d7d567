//! Reference resolution, direct download and assembly against a mock
//! server, without a viewer.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tempfile::TempDir;
use url::Url;
use vecbook::pipeline::encode::PLACEHOLDER_PNG_B64;
use vecbook::pipeline::http::ACCEPT_IMAGE;
use vecbook::pipeline::resolve::{discover_references, resolve_references};
use vecbook::{
    assemble_directory, fetch_title, sanitize_markup, CaptureConfig, SessionClient, VecbookError,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn png() -> Vec<u8> {
    STANDARD.decode(PLACEHOLDER_PNG_B64).unwrap()
}

fn config(root: &std::path::Path) -> CaptureConfig {
    CaptureConfig::builder()
        .output_root(root)
        .fetch_timeout_secs(5)
        .build()
        .unwrap()
}

async fn serve(server: &MockServer, at: &str, content_type: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, content_type))
        .mount(server)
        .await;
}

// ── Reference resolution ─────────────────────────────────────────────────────

#[tokio::test]
async fn every_reference_is_embedded_or_placeholdered() {
    let server = MockServer::start().await;
    serve(&server, "/book/img/a.png", "image/png", png()).await;
    serve(&server, "/book/img/b.bin", "application/octet-stream", png()).await;
    serve(
        &server,
        "/book/img/c.html",
        "text/html",
        br#"<html><body><img src="real/c.png"></body></html>"#.to_vec(),
    )
    .await;
    serve(&server, "/book/img/real/c.png", "image/png", png()).await;

    let markup = r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">
<image href="img/a.png"/>
<image xlink:href="img/b.bin"/>
<image href="img/c.html"/>
<image href="img/gone.png"/>
<rect style="fill:url(#grad)"/>
</svg>"##;
    let origin = Url::parse(&format!("{}/book/0001.svg", server.uri())).unwrap();
    let tmp = TempDir::new().unwrap();
    let client = SessionClient::new(&config(tmp.path())).unwrap();

    let resolved = resolve_references(markup, &origin, &client, 4).await;
    let stats = resolved.stats();

    assert_eq!(stats.total, 4);
    assert_eq!(stats.embedded, 1);
    assert_eq!(stats.sniffed, 1);
    assert_eq!(stats.salvaged, 1);
    assert_eq!(stats.placeholders, 1);
    assert!(discover_references(&resolved.markup).is_empty());
    // Anchors are left alone.
    assert!(resolved.markup.contains("url(#grad)"));
}

#[tokio::test]
async fn reference_fetches_send_image_accept_and_referer() {
    let server = MockServer::start().await;
    serve(&server, "/book/img/a.png", "image/png", png()).await;
    let origin = Url::parse(&format!("{}/book/0001.svg", server.uri())).unwrap();
    let tmp = TempDir::new().unwrap();
    let client = SessionClient::new(&config(tmp.path())).unwrap();

    resolve_references(r#"<svg><image href="img/a.png"/></svg>"#, &origin, &client, 1).await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let headers = &requests[0].headers;
    assert_eq!(headers.get("accept").unwrap().to_str().unwrap(), ACCEPT_IMAGE);
    assert_eq!(
        headers.get("referer").unwrap().to_str().unwrap(),
        origin.as_str()
    );
}

// ── Sanitizer ────────────────────────────────────────────────────────────────

#[test]
fn hostile_markup_is_repaired_once_and_for_all() {
    let raw = "\u{feff}  <!DOCTYPE html><html><body><svg width=\"10\" height=\"10\">\
               <script>alert(1)</script><path stroke-dasharray=\"0,4 0\"/></svg></body></html>";
    let once = sanitize_markup(raw);
    assert!(once.starts_with("<svg xmlns=\"http://www.w3.org/2000/svg\""));
    assert!(!once.contains("script"));
    assert!(!once.contains("<html"));
    assert!(once.contains("stroke-dasharray=\"0.001,4 0.001\""));
    assert_eq!(sanitize_markup(&once), once);
}

// ── Direct download ──────────────────────────────────────────────────────────

#[tokio::test]
async fn direct_download_extracts_and_assembles() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/d/1",
        "text/html",
        br#"<!doctype html><html><body><div><svg xmlns="http://www.w3.org/2000/svg" width="100" height="50"><rect width="5" height="5"/></svg></div></body></html>"#.to_vec(),
    )
    .await;
    serve(
        &server,
        "/d/2.svg",
        "image/svg+xml",
        br#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="50"><image href="img/p.png" width="5" height="5"/></svg>"#.to_vec(),
    )
    .await;
    serve(&server, "/d/img/p.png", "image/png", png()).await;

    let root = TempDir::new().unwrap();
    let urls = vec![
        Url::parse(&format!("{}/d/1", server.uri())).unwrap(),
        Url::parse(&format!("{}/d/missing.svg", server.uri())).unwrap(),
        Url::parse(&format!("{}/d/2.svg", server.uri())).unwrap(),
    ];

    let summary = fetch_title("Direct Book", urls, &config(root.path())).await.unwrap();

    assert!(summary.is_success(), "{summary:?}");
    let doc = &summary.documents[0];
    let capture = doc.capture.as_ref().unwrap();
    let pairs: Vec<(usize, usize)> = capture.pages.iter().map(|p| (p.index, p.viewer_page)).collect();
    assert_eq!(pairs, vec![(1, 1), (2, 3)]);
    assert_eq!(capture.skipped.len(), 1);

    let unit1 = std::fs::read_to_string(capture.directory.join("0001.svg")).unwrap();
    assert!(unit1.starts_with("<svg"));
    assert!(!unit1.contains("<html"));
    let unit2 = std::fs::read_to_string(capture.directory.join("0002.svg")).unwrap();
    assert!(unit2.contains("data:image/png;base64,"));

    let output = &doc.assembly.as_ref().unwrap().output;
    assert_eq!(output.file_name().unwrap(), "Direct_Book.pdf");
    assert_eq!(lopdf::Document::load(output).unwrap().get_pages().len(), 2);
}

// ── Assembly ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_directory_fails_without_output() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("Empty");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("notes.txt"), "not a unit").unwrap();

    let err = assemble_directory(&dir, &config(root.path())).await.unwrap_err();

    assert!(matches!(err, VecbookError::NoPageUnits { .. }));
    assert!(err.to_string().contains("No page units"));
    let pdfs = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "pdf"))
        .count();
    assert_eq!(pdfs, 0);
}

#[tokio::test]
async fn units_are_assembled_in_natural_order() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("Ordered");
    std::fs::create_dir_all(&dir).unwrap();
    // Distinct heights identify each unit's page.
    for (name, h) in [("0010.svg", 30), ("0001.svg", 10), ("0002.svg", 20)] {
        std::fs::write(
            dir.join(name),
            format!(r#"<svg xmlns="http://www.w3.org/2000/svg" width="72pt" height="{h}pt"/>"#),
        )
        .unwrap();
    }

    let report = assemble_directory(&dir, &config(root.path())).await.unwrap();
    assert_eq!(report.pages, 3);

    let doc = lopdf::Document::load(&report.output).unwrap();
    let heights: Vec<f32> = doc
        .get_pages()
        .values()
        .map(|id| {
            let page = doc.get_object(*id).unwrap().as_dict().unwrap();
            let media = page.get(b"MediaBox").unwrap().as_array().unwrap();
            match &media[3] {
                lopdf::Object::Integer(i) => *i as f32,
                lopdf::Object::Real(r) => *r as f32,
                other => panic!("unexpected MediaBox entry {other:?}"),
            }
        })
        .collect();
    assert_eq!(heights, vec![10.0, 20.0, 30.0]);
}
