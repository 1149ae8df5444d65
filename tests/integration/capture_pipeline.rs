//! Capture → store → replay against a local HTTP server

use std::sync::Arc;
use std::time::Duration;

use super::common::asset_server::AssetServer;
use super::common::fixtures::{sample_bundle, sample_page, PNG_BYTES, STYLE_CSS};
use domreel::capture::HttpPageSource;
use domreel::recorder::{Envelope, RecorderMessage, RecorderReply};
use domreel::{
    CaptureMode, CaptureScheduler, CaptureSink, CaptureTiming, HttpFetcher, LivePage,
    Reconstructor, Recorder, RecorderHandle, SessionId, SnapshotStore, SqliteKvStore,
    TimelineBundle, TimelineView,
};
use tempfile::TempDir;
use url::Url;

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached within 5s");
}

fn fetcher() -> Arc<HttpFetcher> {
    let fetcher = HttpFetcher::new(Duration::from_secs(5), "domreel-test")
        .expect("Failed to build client");
    Arc::new(fetcher)
}

fn timing() -> CaptureTiming {
    CaptureTiming {
        debounce: Duration::from_millis(30),
        ..CaptureTiming::default()
    }
}

async fn serve_sample_site() -> AssetServer {
    let server = AssetServer::start().await;
    server
        .put("/index.html", "text/html", sample_page(0))
        .put("/css/style.css", "text/css", STYLE_CSS)
        .put("/css/bg.png", "image/png", PNG_BYTES)
        .put("/pic.png", "image/png", PNG_BYTES);
    server
}

#[tokio::test]
async fn live_page_capture_is_replayable() {
    let server = serve_sample_site().await;
    let dir = TempDir::new().unwrap();
    let kv = Arc::new(SqliteKvStore::open(dir.path().join("timelines.db")).unwrap());
    let (handle, recorder) = Recorder::new(SnapshotStore::new(kv, 10)).spawn();
    let id = SessionId::from("live");

    let reply = handle
        .request(RecorderMessage::StartRecording {
            session_id: id.clone(),
            mode: CaptureMode::Debounced,
        })
        .await
        .unwrap();
    assert_eq!(reply, RecorderReply::Started);

    let page = Arc::new(LivePage::new(
        Url::parse(&server.url("/index.html")).unwrap(),
        sample_page(0),
    ));
    let mut scheduler = CaptureScheduler::new(
        page.clone(),
        fetcher(),
        CaptureSink::new(id.clone(), handle.clone()),
        timing(),
    );
    scheduler.start(CaptureMode::Debounced).unwrap();
    wait_for(|| scheduler.passes() >= 1).await;

    page.set_html(sample_page(1));
    wait_for(|| scheduler.passes() >= 2).await;
    assert!(scheduler.stop().await);

    let reply = handle
        .request(RecorderMessage::StopRecording {
            session_id: id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(reply, RecorderReply::Stopped { snapshots: 2 });
    drop(scheduler);
    drop(handle);
    let store = recorder.await.unwrap();

    let bundle = store.load(&id).unwrap();
    assert_eq!(bundle.snapshots.len(), 2);
    assert_eq!(bundle.assets.len(), 2, "pic.png and bg.png resolve, missing.png does not");

    // Assets are fetched once per session even though both passes saw them.
    assert_eq!(server.hits("/pic.png"), 1);
    assert_eq!(server.hits("/css/bg.png"), 1);
    assert_eq!(server.hits("/missing.png"), 1);
    assert_eq!(server.hits("/css/style.css"), 2);
    assert_eq!(server.hits("/ignored.png"), 0);

    let stored = &bundle.snapshots[1].html;
    assert!(!stored.contains("<script"));
    assert!(stored.contains(&format!("[[ASSET:{}]]", server.url("/css/bg.png"))));

    let rendered = Reconstructor::render(&bundle, 1).unwrap();
    assert!(rendered.html.starts_with("<!DOCTYPE html>"));
    assert!(rendered.html.contains(r#"<p id="n">1</p>"#));
    assert!(rendered.html.contains("url('data:image/png;base64,"));
    assert!(rendered.html.contains(r#"src="data:image/png;base64,"#));
    assert!(rendered.html.contains(&format!(r#"src="{}""#, server.url("/missing.png"))));
    assert!(!rendered.html.contains("[[ASSET:"));
}

fn snapshots_in(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Envelope>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        if let RecorderMessage::SaveSnapshot { data, .. } = envelope.message {
            out.push(data.html);
        }
    }
    out
}

#[tokio::test]
async fn polled_page_changes_trigger_captures() {
    let server = serve_sample_site().await;
    let fetcher = fetcher();
    let page = Arc::new(HttpPageSource::new(
        Url::parse(&server.url("/index.html")).unwrap(),
        fetcher.clone(),
    ));
    let poller = page.spawn_poller(Duration::from_millis(40));

    let (handle, mut rx) = RecorderHandle::channel();
    let mut scheduler = CaptureScheduler::new(
        page.clone(),
        fetcher,
        CaptureSink::new(SessionId::from("polled"), handle),
        timing(),
    );
    scheduler.start(CaptureMode::Debounced).unwrap();
    wait_for(|| scheduler.passes() >= 1).await;

    server.put("/index.html", "text/html", sample_page(7));
    wait_for(|| scheduler.passes() >= 2).await;
    scheduler.stop().await;
    page.shutdown();
    poller.await.unwrap();

    let snapshots = snapshots_in(&mut rx);
    assert!(snapshots.len() >= 2);
    assert!(snapshots[0].contains(r#"<p id="n">0</p>"#));
    assert!(snapshots.last().unwrap().contains(r#"<p id="n">7</p>"#));
}

#[tokio::test]
async fn exported_timeline_imports_as_a_new_session() {
    let dir = TempDir::new().unwrap();
    let kv = Arc::new(SqliteKvStore::open(dir.path().join("a.db")).unwrap());
    let mut store = SnapshotStore::new(kv, 10);
    let original = store.import_bundle(sample_bundle()).unwrap();

    let view = TimelineView::open(&store, original.clone()).unwrap();
    let exported = view.export_bundle(&dir.path().join("exports")).unwrap();

    let bundle = TimelineBundle::read_from_path(&exported).unwrap();
    let copy = store.import_bundle(bundle).unwrap();
    assert_ne!(copy, original);
    assert_eq!(store.sessions().unwrap().len(), 2);

    let a = Reconstructor::render(&store.load(&original).unwrap(), 0).unwrap();
    let b = Reconstructor::render(&store.load(&copy).unwrap(), 0).unwrap();
    assert_eq!(a.html, b.html);
    assert!(a.html.contains(r#"src="data:image/png;base64,AA==""#));
    // bg.png was never resolved, so it falls back to its URL
    assert!(a.html.contains("url(http://x/bg.png)"));
}
