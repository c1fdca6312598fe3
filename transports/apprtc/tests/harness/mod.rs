//! Mock AppRTC room service
//!
//! Serves the REST endpoints with axum and the relay with tokio-tungstenite,
//! both on random local ports. Every request and relay frame is recorded so
//! tests can assert on exact wire content.
//!
//! Basic usage pattern:
//!
//! 1. `MockAppRtc::start()` and point `StreamerConfig::origin` at `origin()`
//! 2. Drive a `SignalingSession` or `SessionSequencer`
//! 3. Push inbound relay frames with `push_relay_frame`
//! 4. Assert on `requests()`, `relay_frames()`, `relay_origin()`

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Client id handed out by the mock
pub const CLIENT_ID: &str = "84711429";

/// One REST call received by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Shared state behind the mock's handlers
pub struct MockState {
    http_addr: SocketAddr,
    relay_addr: SocketAddr,
    join_result: Mutex<String>,
    message_result: Mutex<String>,
    ice_response: Mutex<Value>,
    release_status: Mutex<StatusCode>,
    relay_url: Mutex<Option<String>>,
    requests: Mutex<Vec<RecordedRequest>>,
    relay_frames: Mutex<Vec<String>>,
    relay_origin: Mutex<Option<String>>,
    relay_closed: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl MockState {
    fn record(&self, method: &str, path: String, body: String) {
        debug!("mock {} {} {}", method, path, body);
        self.requests.lock().push(RecordedRequest {
            method: method.to_string(),
            path,
            body,
        });
    }
}

/// Running mock service
pub struct MockAppRtc {
    state: Arc<MockState>,
    relay_tx: mpsc::UnboundedSender<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockAppRtc {
    /// Bind both listeners and start serving
    pub async fn start() -> Self {
        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();

        let state = Arc::new(MockState {
            http_addr: http_listener.local_addr().unwrap(),
            relay_addr: relay_listener.local_addr().unwrap(),
            join_result: Mutex::new("SUCCESS".to_string()),
            message_result: Mutex::new("SUCCESS".to_string()),
            ice_response: Mutex::new(json!({ "iceServers": [] })),
            release_status: Mutex::new(StatusCode::OK),
            relay_url: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            relay_frames: Mutex::new(Vec::new()),
            relay_origin: Mutex::new(None),
            relay_closed: AtomicBool::new(false),
            outbound: Mutex::new(Some(relay_rx)),
        });

        let router = Router::new()
            .route("/join/:room", post(join))
            .route("/message/:room/:client", post(message))
            .route("/leave/:room/:client", post(leave))
            .route("/ice", post(ice))
            .route("/wsrelay/:room/:client", delete(release))
            .with_state(Arc::clone(&state));

        let http_task = tokio::spawn(async move {
            let _ = axum::serve(http_listener, router).await;
        });

        let relay_state = Arc::clone(&state);
        let relay_task = tokio::spawn(async move {
            while let Ok((stream, _)) = relay_listener.accept().await {
                tokio::spawn(serve_relay(stream, Arc::clone(&relay_state)));
            }
        });

        Self {
            state,
            relay_tx,
            tasks: vec![http_task, relay_task],
        }
    }

    /// Origin to configure the client with
    pub fn origin(&self) -> String {
        format!("http://{}", self.state.http_addr)
    }

    /// Answer joins with `result` instead of SUCCESS
    pub fn set_join_result(&self, result: &str) {
        *self.state.join_result.lock() = result.to_string();
    }

    /// Answer message posts with `result` instead of SUCCESS
    pub fn set_message_result(&self, result: &str) {
        *self.state.message_result.lock() = result.to_string();
    }

    /// Body returned by the ICE configuration endpoint
    pub fn set_ice_response(&self, body: Value) {
        *self.state.ice_response.lock() = body;
    }

    /// Status returned by the relay release endpoint
    pub fn set_release_status(&self, status: StatusCode) {
        *self.state.release_status.lock() = status;
    }

    /// Hand out `url` as the relay address instead of the mock relay
    pub fn set_relay_url(&self, url: impl Into<String>) {
        *self.state.relay_url.lock() = Some(url.into());
    }

    /// Queue a raw frame for the connected relay client
    pub fn push_relay_frame(&self, frame: impl Into<String>) {
        self.relay_tx.send(frame.into()).unwrap();
    }

    /// Queue a `{msg, error}` envelope around `inner`
    pub fn push_relay_message(&self, inner: &Value) {
        let frame = json!({ "msg": inner.to_string(), "error": "" });
        self.push_relay_frame(frame.to_string());
    }

    /// Every REST call so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// REST calls matching `method` and a path prefix
    pub fn requests_to(&self, method: &str, path_prefix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path.starts_with(path_prefix))
            .collect()
    }

    /// Text frames the client sent over the relay
    pub fn relay_frames(&self) -> Vec<String> {
        self.state.relay_frames.lock().clone()
    }

    /// `Origin` header of the relay handshake
    pub fn relay_origin(&self) -> Option<String> {
        self.state.relay_origin.lock().clone()
    }

    /// Whether the client closed the relay socket
    pub fn relay_closed(&self) -> bool {
        self.state.relay_closed.load(Ordering::SeqCst)
    }

    /// Poll `condition` until it holds or `timeout` elapses
    pub async fn wait_until(&self, timeout: Duration, condition: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition(self)
    }
}

impl Drop for MockAppRtc {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn join(
    State(state): State<Arc<MockState>>,
    Path(room): Path<String>,
    body: String,
) -> Json<Value> {
    state.record("POST", format!("/join/{}", room), body);

    let result = state.join_result.lock().clone();
    if result != "SUCCESS" {
        return Json(json!({ "result": result, "params": {} }));
    }

    let http = state.http_addr;
    let wss_url = state
        .relay_url
        .lock()
        .clone()
        .unwrap_or_else(|| format!("ws://{}/ws", state.relay_addr));
    Json(json!({
        "result": "SUCCESS",
        "params": {
            "client_id": CLIENT_ID,
            "ice_server_url": format!("http://{}/ice", http),
            "is_initiator": "true",
            "room_id": room,
            "room_link": format!("http://{}/r/{}", http, room),
            "wss_post_url": format!("http://{}/wsrelay", http),
            "wss_url": wss_url,
        }
    }))
}

async fn message(
    State(state): State<Arc<MockState>>,
    Path((room, client)): Path<(String, String)>,
    body: String,
) -> Json<Value> {
    state.record("POST", format!("/message/{}/{}", room, client), body);
    let result = state.message_result.lock().clone();
    Json(json!({ "result": result }))
}

async fn leave(
    State(state): State<Arc<MockState>>,
    Path((room, client)): Path<(String, String)>,
    body: String,
) {
    state.record("POST", format!("/leave/{}/{}", room, client), body);
}

async fn ice(State(state): State<Arc<MockState>>, body: String) -> Json<Value> {
    state.record("POST", "/ice".to_string(), body);
    Json(state.ice_response.lock().clone())
}

async fn release(
    State(state): State<Arc<MockState>>,
    Path((room, client)): Path<(String, String)>,
) -> StatusCode {
    state.record("DELETE", format!("/wsrelay/{}/{}", room, client), String::new());
    *state.release_status.lock()
}

async fn serve_relay(stream: TcpStream, state: Arc<MockState>) {
    let origin_state = Arc::clone(&state);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let origin = request
            .headers()
            .get("Origin")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        *origin_state.relay_origin.lock() = origin;
        Ok(response)
    };

    let socket = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!("mock relay handshake failed: {}", e);
            return;
        }
    };
    let (mut sink, mut frames) = socket.split();

    let outbound = state.outbound.lock().take();
    if let Some(mut outbound) = outbound {
        tokio::spawn(async move {
            while let Some(text) = outbound.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });
    }

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => state.relay_frames.lock().push(text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    state.relay_closed.store(true, Ordering::SeqCst);
}
