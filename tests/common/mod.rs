#![allow(dead_code)]

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use samplehub::api::{self, web::Assets, AppState, RouterConfig};
use samplehub::media::sidecar::SidecarMediaStore;
use samplehub::media::{MediaError, Merger, OnsetDetector, Packer, Toolkit};
use samplehub::state_store::StateStore;
use samplehub::storage::Storage;

pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Onsets the fake detector reports for every file.
pub const FAKE_ONSETS: [f64; 3] = [0.0, 0.25, 0.75];

pub struct FixedOnsets;

impl OnsetDetector for FixedOnsets {
    fn detect(&self, path: &Path, _sensitivity: i64) -> Result<Vec<f64>, MediaError> {
        if !path.is_file() {
            return Err(MediaError::NotFound(path.to_path_buf()));
        }
        Ok(FAKE_ONSETS.to_vec())
    }
}

/// Concatenates input bytes.
pub struct ConcatMerger;

impl Merger for ConcatMerger {
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError> {
        let mut merged = Vec::new();
        for input in inputs {
            let bytes = std::fs::read(input).map_err(|_| MediaError::NotFound(input.clone()))?;
            merged.extend_from_slice(&bytes);
        }
        std::fs::write(output, merged)?;
        Ok(())
    }
}

/// Writes a small fake archive under a fresh name, or fails on demand.
#[derive(Default)]
pub struct FakePacker {
    pub fail: AtomicBool,
}

pub const FAKE_ARCHIVE: &[u8] = b"PK\x05\x06fake-archive";

impl Packer for FakePacker {
    fn pack(&self, dir: &Path, _selection: &[u8], out_dir: &Path) -> Result<PathBuf, MediaError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MediaError::Pack("archiver exploded".into()));
        }
        if !dir.is_dir() {
            return Err(MediaError::NotFound(dir.to_path_buf()));
        }
        std::fs::create_dir_all(out_dir)?;
        let archive = out_dir.join(format!("workspace-{}.zip", uuid::Uuid::new_v4()));
        std::fs::write(&archive, FAKE_ARCHIVE)?;
        Ok(archive)
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub packer: Arc<FakePacker>,
    pub dir: tempfile::TempDir,
}

impl TestServer {
    pub fn storage_root(&self) -> &Path {
        self.state.storage.root()
    }

    pub fn ws_url(&self, id: &str, place: &str) -> String {
        format!("ws://{}/ws?id={}&place={}", self.addr, id, place)
    }

    pub fn http_url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    /// Put a file into `place` the way an upload would have.
    pub fn seed(&self, place: &str, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.state.storage.asset_path(place, name).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }
}

/// Build an AppState over a temp storage root, with the sidecar media store
/// and in-process fakes for the external tools.
pub async fn test_state(dir: &Path) -> (AppState, Arc<FakePacker>) {
    let storage = Storage::new(dir.join("storage"));
    std::fs::create_dir_all(storage.root()).unwrap();
    let states = StateStore::open(&storage.state_db_path()).await.unwrap();
    let packer = Arc::new(FakePacker::default());
    let toolkit = Toolkit {
        media: Arc::new(SidecarMediaStore),
        onsets: Arc::new(FixedOnsets),
        merger: Arc::new(ConcatMerger),
        packer: packer.clone(),
    };
    let assets = Assets::new(dir.join("www"), Some("v1.0.0".into()));
    (AppState::new(storage, states, toolkit, assets), packer)
}

pub async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let (state, packer) = test_state(dir.path()).await;
    let app = api::router(state.clone(), RouterConfig::default());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        addr,
        state,
        packer,
        dir,
    }
}

/// Open a channel for `id` in `place` and wait until the server has it
/// registered.
pub async fn connect(server: &TestServer, id: &str, place: &str) -> (WsSink, WsStream) {
    let (ws, _) = connect_async(server.ws_url(id, place))
        .await
        .expect("failed to connect");
    let (mut tx, mut rx) = ws.split();
    // A round trip guarantees registration happened before the caller proceeds.
    send_json(&mut tx, serde_json::json!({"action": "connected"})).await;
    let reply = recv_json(&mut rx).await;
    assert_eq!(reply["action"], "connected");
    (tx, rx)
}

pub async fn send_json(tx: &mut WsSink, value: serde_json::Value) {
    tx.send(Message::Text(value.to_string().into()))
        .await
        .expect("send failed");
}

/// Receive the next text message as JSON.
pub async fn recv_json(rx: &mut WsStream) -> serde_json::Value {
    let msg = tokio::time::timeout(Duration::from_secs(5), rx.next())
        .await
        .expect("timeout waiting for message")
        .expect("stream ended")
        .expect("ws error");
    match msg {
        Message::Text(text) => serde_json::from_str(&text).expect("invalid JSON"),
        other => panic!("expected text message, got {:?}", other),
    }
}

/// Receive messages until one with `action` arrives, returning the skipped
/// ones alongside it.
pub async fn recv_until(rx: &mut WsStream, action: &str) -> (Vec<serde_json::Value>, serde_json::Value) {
    let mut skipped = Vec::new();
    loop {
        let msg = recv_json(rx).await;
        if msg["action"] == action {
            return (skipped, msg);
        }
        skipped.push(msg);
    }
}

/// Try to receive a JSON message within `timeout`, returning None if nothing
/// arrived.
pub async fn try_recv_json(rx: &mut WsStream, timeout: Duration) -> Option<serde_json::Value> {
    match tokio::time::timeout(timeout, rx.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => Some(serde_json::from_str(&text).unwrap()),
        _ => None,
    }
}

/// Wait for the server to close the channel, returning the close code.
pub async fn expect_close(rx: &mut WsStream) -> Option<u16> {
    let deadline = Duration::from_secs(5);
    loop {
        match tokio::time::timeout(deadline, rx.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => return frame.map(|f| u16::from(f.code)),
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) => return None,
            Err(_) => panic!("timeout waiting for close"),
        }
    }
}
