//! Watcher-to-receiver tests over a real loopback HTTP server
//!
//! Run with: cargo test --test end_to_end

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use pretty_assertions::assert_eq;

use mirrorsync::config::WatcherConfig;
use mirrorsync::receiver::ReceiveHandler;
use mirrorsync::server::{ReceiverServer, ReceiverState};
use mirrorsync::sync::{Checksum, SyncEngine};
use mirrorsync::types::{ChangeKind, UploadResponse};

async fn spawn_app(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn watcher_config(source: &Path, addr: SocketAddr) -> WatcherConfig {
    WatcherConfig {
        debounce_delay_ms: 50,
        retry_base_delay_ms: 10,
        request_timeout_ms: 5_000,
        ..WatcherConfig::new(source, format!("http://{}", addr))
    }
}

async fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

struct Mirror {
    _source: tempfile::TempDir,
    destination: tempfile::TempDir,
    staging: tempfile::TempDir,
    engine: SyncEngine,
    addr: SocketAddr,
}

async fn mirror() -> Mirror {
    let source = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    let state = ReceiverState::new(
        ReceiveHandler::new(destination.path()).unwrap(),
        staging.path(),
    )
    .unwrap();
    let addr = spawn_app(ReceiverServer::router(state, 64 * 1024 * 1024)).await;

    let engine = SyncEngine::with_http(watcher_config(source.path(), addr)).unwrap();
    engine.start();

    Mirror {
        _source: source,
        destination,
        staging,
        engine,
        addr,
    }
}

#[tokio::test]
async fn test_new_file_is_mirrored() {
    let m = mirror().await;
    let path = m.engine.source_root().join("notes.txt");
    std::fs::write(&path, b"hello world!").unwrap();

    m.engine.on_event(ChangeKind::Add, path);

    assert!(wait_for(|| m.engine.stats().total_synced() == 1).await);
    assert_eq!(
        std::fs::read(m.destination.path().join("notes.txt")).unwrap(),
        b"hello world!"
    );
    assert_eq!(m.engine.stats().total_errors(), 0);
    assert_eq!(std::fs::read_dir(m.staging.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_nested_binary_file_round_trips() {
    let m = mirror().await;
    let dir = m.engine.source_root().join("assets").join("img");
    std::fs::create_dir_all(&dir).unwrap();
    let data: Vec<u8> = (0..=255u8).cycle().take(300_000).collect();
    std::fs::write(dir.join("blob.bin"), &data).unwrap();

    m.engine.on_event(ChangeKind::Add, dir.join("blob.bin"));

    assert!(wait_for(|| m.engine.stats().total_synced() == 1).await);
    let mirrored = std::fs::read(m.destination.path().join("assets/img/blob.bin")).unwrap();
    assert_eq!(Checksum::of_bytes(&mirrored), Checksum::of_bytes(&data));
}

#[tokio::test]
async fn test_burst_sends_latest_content_once() {
    let m = mirror().await;
    let path = m.engine.source_root().join("draft.md");

    for i in 0..5 {
        std::fs::write(&path, format!("revision {}", i)).unwrap();
        m.engine.on_event(ChangeKind::Change, path.clone());
    }

    assert!(wait_for(|| m.engine.stats().total_synced() >= 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(m.engine.stats().total_synced(), 1);
    assert_eq!(
        std::fs::read_to_string(m.destination.path().join("draft.md")).unwrap(),
        "revision 4"
    );
}

#[tokio::test]
async fn test_mismatched_checksum_is_rejected() {
    let m = mirror().await;
    let form = reqwest::multipart::Form::new()
        .text("relativePath", "bad.txt")
        .text("checksum", Checksum::of_bytes(b"expected").to_string())
        .part(
            "file",
            reqwest::multipart::Part::bytes(b"actual".to_vec()).file_name("bad.txt"),
        );

    let response = reqwest::Client::new()
        .post(format!("http://{}/files", m.addr))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: UploadResponse = response.json().await.unwrap();
    assert!(!body.success);
    assert_eq!(body.error.as_deref(), Some("Checksum verification failed"));
    assert!(!m.destination.path().join("bad.txt").exists());
    assert_eq!(std::fs::read_dir(m.staging.path()).unwrap().count(), 0);
}

/// Receiver that fails the first `failures` uploads with a 500
#[derive(Clone)]
struct Flaky {
    failures: usize,
    calls: Arc<AtomicUsize>,
}

async fn flaky_upload(
    State(flaky): State<Flaky>,
) -> (StatusCode, Json<UploadResponse>) {
    let n = flaky.calls.fetch_add(1, Ordering::SeqCst);
    if n < flaky.failures {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(UploadResponse::failed("disk full")),
        )
    } else {
        (StatusCode::OK, Json(UploadResponse::ok("flaky.txt")))
    }
}

async fn flaky_engine(failures: usize) -> (tempfile::TempDir, SyncEngine, Arc<AtomicUsize>) {
    let flaky = Flaky {
        failures,
        calls: Arc::new(AtomicUsize::new(0)),
    };
    let calls = Arc::clone(&flaky.calls);
    let app = Router::new()
        .route("/files", post(flaky_upload))
        .with_state(flaky);
    let addr = spawn_app(app).await;

    let source = tempfile::tempdir().unwrap();
    let engine = SyncEngine::with_http(watcher_config(source.path(), addr)).unwrap();
    engine.start();
    (source, engine, calls)
}

#[tokio::test]
async fn test_server_errors_then_success() {
    let (_source, engine, calls) = flaky_engine(3).await;
    let path = engine.source_root().join("flaky.txt");
    std::fs::write(&path, b"retry me").unwrap();

    engine.on_event(ChangeKind::Add, path);

    assert!(wait_for(|| engine.stats().total_synced() == 1).await);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(engine.stats().total_errors(), 0);
}

#[tokio::test]
async fn test_persistent_server_errors_count_once() {
    let (_source, engine, calls) = flaky_engine(usize::MAX).await;
    let path = engine.source_root().join("doomed.txt");
    std::fs::write(&path, b"never lands").unwrap();

    engine.on_event(ChangeKind::Add, path);

    assert!(wait_for(|| engine.stats().total_errors() == 1).await);
    assert!(wait_for(|| engine.in_flight_count() == 0).await);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(engine.stats().total_synced(), 0);
}
