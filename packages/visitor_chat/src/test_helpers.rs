//! In-process chat backend for tests: REST routes, multipart fallback, and a
//! websocket endpoint whose behaviour can be switched per test.

use axum::{
    Json, Router,
    extract::{
        Multipart, Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot};

use crate::config::ChatConfig;

/// How the websocket endpoint treats upgrade requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WsMode {
    /// Upgrade, greet with a `connected` frame, then record and relay frames.
    Accept,
    /// Answer 503 so the client handshake fails.
    Reject,
    /// Upgrade and close straight away.
    CloseImmediately,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct FallbackSend {
    pub session_token: String,
    pub message: Option<String>,
    pub file_name: Option<String>,
    pub file_len: usize,
}

#[derive(Clone, Debug)]
enum Push {
    Frame(String),
    Close,
}

struct Recorded {
    init_requests: Vec<Value>,
    init_response: Value,
    history_requests: Vec<String>,
    history: Value,
    fallback_sends: Vec<FallbackSend>,
    send_response: Value,
    ws_mode: WsMode,
    ws_connects: Vec<(String, Instant)>,
    ws_frames: Vec<Value>,
}

pub(crate) struct MockState {
    recorded: Mutex<Recorded>,
    push: broadcast::Sender<Push>,
}

impl MockState {
    fn new() -> Self {
        let (push, _) = broadcast::channel(64);
        Self {
            recorded: Mutex::new(Recorded {
                init_requests: Vec::new(),
                init_response: json!({"success": true, "data": {"session_token": "T1"}}),
                history_requests: Vec::new(),
                history: json!([]),
                fallback_sends: Vec::new(),
                send_response: json!({"success": true}),
                ws_mode: WsMode::Accept,
                ws_connects: Vec::new(),
                ws_frames: Vec::new(),
            }),
            push,
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Recorded) -> R) -> R {
        f(&mut self.recorded.lock().unwrap())
    }

    pub fn set_init_response(&self, body: Value) {
        self.with(|r| r.init_response = body);
    }

    pub fn set_history(&self, items: Value) {
        self.with(|r| r.history = items);
    }

    pub fn set_send_response(&self, body: Value) {
        self.with(|r| r.send_response = body);
    }

    pub fn set_ws_mode(&self, mode: WsMode) {
        self.with(|r| r.ws_mode = mode);
    }

    pub fn init_requests(&self) -> Vec<Value> {
        self.with(|r| r.init_requests.clone())
    }

    pub fn history_requests(&self) -> Vec<String> {
        self.with(|r| r.history_requests.clone())
    }

    pub fn fallback_sends(&self) -> Vec<FallbackSend> {
        self.with(|r| r.fallback_sends.clone())
    }

    pub fn ws_tokens(&self) -> Vec<String> {
        self.with(|r| r.ws_connects.iter().map(|(t, _)| t.clone()).collect())
    }

    pub fn ws_connect_times(&self) -> Vec<Instant> {
        self.with(|r| r.ws_connects.iter().map(|(_, at)| *at).collect())
    }

    /// Frames received from clients, in arrival order.
    pub fn ws_frames(&self) -> Vec<Value> {
        self.with(|r| r.ws_frames.clone())
    }

    /// Frames of one `type` received from clients.
    pub fn ws_frames_of(&self, kind: &str) -> Vec<Value> {
        self.ws_frames()
            .into_iter()
            .filter(|f| f["type"] == kind)
            .collect()
    }

    /// Send a frame to every open socket.
    pub fn push_frame(&self, frame: Value) {
        let _ = self.push.send(Push::Frame(frame.to_string()));
    }

    /// Send a close frame to every open socket.
    pub fn close_sockets(&self) {
        let _ = self.push.send(Push::Close);
    }
}

pub(crate) struct MockBackend {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    _shutdown: oneshot::Sender<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::new());
        let app = Router::new()
            .route("/api/sessions/init", post(init_session))
            .route("/api/messages/send", post(send_message))
            .route("/api/messages/{token}", get(history))
            .route("/ws/{token}", get(websocket))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            _shutdown: tx,
        }
    }

    pub fn api_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn websocket_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Client config pointed at this backend with fast retries.
    pub fn chat_config(&self) -> ChatConfig {
        let mut config = ChatConfig::new(&self.api_url()).unwrap();
        config.reconnect_delay = Duration::from_millis(50);
        config.max_reconnect_attempts = 3;
        config
    }
}

/// Poll `cond` until it holds, failing the test after five seconds.
pub(crate) async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}

async fn init_session(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Json<Value> {
    Json(state.with(|r| {
        r.init_requests.push(body);
        r.init_response.clone()
    }))
}

async fn history(State(state): State<Arc<MockState>>, Path(token): Path<String>) -> Json<Value> {
    Json(state.with(|r| {
        r.history_requests.push(token);
        json!({"success": true, "data": r.history.clone()})
    }))
}

async fn send_message(
    State(state): State<Arc<MockState>>,
    mut multipart: Multipart,
) -> Json<Value> {
    let mut send = FallbackSend::default();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "session_token" => send.session_token = field.text().await.unwrap_or_default(),
            "message" => send.message = Some(field.text().await.unwrap_or_default()),
            "file" => {
                send.file_name = field.file_name().map(str::to_string);
                send.file_len = field.bytes().await.map(|b| b.len()).unwrap_or(0);
            }
            _ => {}
        }
    }
    Json(state.with(|r| {
        r.fallback_sends.push(send);
        r.send_response.clone()
    }))
}

async fn websocket(
    State(state): State<Arc<MockState>>,
    Path(token): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let mode = state.with(|r| {
        r.ws_connects.push((token, Instant::now()));
        r.ws_mode
    });
    // Subscribe before answering so pushes issued right after the client
    // sees the handshake are not lost.
    let push = state.push.subscribe();

    match mode {
        WsMode::Reject => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        WsMode::CloseImmediately => ws.on_upgrade(|mut socket| async move {
            let _ = socket.send(Message::Close(None)).await;
        }),
        WsMode::Accept => ws.on_upgrade(move |socket| serve_socket(socket, state, push)),
    }
}

async fn serve_socket(
    mut socket: WebSocket,
    state: Arc<MockState>,
    mut push: broadcast::Receiver<Push>,
) {
    let greeting = json!({"type": "connected", "message": "Connected to chat"});
    if socket
        .send(Message::Text(greeting.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(frame) = serde_json::from_str::<Value>(&text) {
                        state.with(|r| r.ws_frames.push(frame));
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            pushed = push.recv() => match pushed {
                Ok(Push::Frame(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(Push::Close) | Err(_) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }
}
