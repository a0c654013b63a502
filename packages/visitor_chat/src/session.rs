//! Session controller: the actor that owns one visitor chat session.
//!
//! All state lives in a single task. User actions arrive through a
//! [`SessionHandle`], transport activity through [`Transport::next_event`], and
//! REST results through an internal completion channel; one `select!` loop
//! serializes them. What the visitor should see goes out as [`SessionEvent`]s:
//! losslessly to the rendering sink returned by [`SessionActor::spawn`], and
//! best-effort to any [`SessionHandle::subscribe`] observers.

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::ChatApi;
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::ledger::MessageLedger;
use crate::model::{Attachment, Message, SenderType, StagedFile};
use crate::protocol::{InboundFrame, OutboundFrame};
use crate::store::SessionStore;
use crate::transport::{Transport, TransportEvent};
use crate::typing::TypingThrottle;

pub const START_FAILED_ALERT: &str = "Failed to start chat. Please try again.";
pub const CONNECT_FAILED_ALERT: &str = "Failed to connect. Please check your connection.";
pub const HISTORY_FAILED_ALERT: &str = "Failed to load messages.";
pub const SEND_FAILED_ALERT: &str = "Failed to send message. Please try again.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    NoSession,
    AwaitingBootstrap,
    Active,
}

/// What a rendering sink should show.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Phase(SessionPhase),
    /// Append a message bubble.
    Render {
        body: String,
        sender: SenderType,
        timestamp: Option<DateTime<Utc>>,
        scroll: bool,
        attachments: Vec<Attachment>,
    },
    ScrollToBottom,
    Connection { connected: bool },
    /// Automatic reconnection gave up; stays until `reconnect()` succeeds.
    ReconnectExhausted,
    /// An operator or system message arrived; the sink decides whether to notify.
    NewMessage,
    OperatorTyping,
    SessionClosed,
    Alert(String),
    Window { open: bool },
}

impl SessionEvent {
    fn render(message: &Message, scroll: bool) -> Self {
        SessionEvent::Render {
            body: message.body.clone(),
            sender: message.sender,
            timestamp: message.timestamp,
            scroll,
            attachments: message.attachments.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub connected: bool,
    pub attempt_count: u32,
    pub reconnect_exhausted: bool,
    pub window_open: bool,
    /// Name of the file staged for the next submit.
    pub staged_file: Option<String>,
    pub message_count: usize,
}

/// Messages that can be sent to the session actor
pub(crate) enum SessionMessage {
    StartChat {
        name: String,
        email: String,
        respond_to: oneshot::Sender<()>,
    },
    Submit {
        text: String,
        respond_to: oneshot::Sender<()>,
    },
    Keystroke {
        respond_to: oneshot::Sender<()>,
    },
    StageFile {
        file: StagedFile,
        respond_to: oneshot::Sender<()>,
    },
    ClearFile {
        respond_to: oneshot::Sender<()>,
    },
    SetWindow {
        open: Option<bool>,
        respond_to: oneshot::Sender<()>,
    },
    Reconnect {
        respond_to: oneshot::Sender<()>,
    },
    Snapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
    Messages {
        respond_to: oneshot::Sender<Vec<Message>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Results of spawned REST calls, posted back to the actor loop.
enum Completion {
    Bootstrap(Result<String, ChatError>),
    History {
        token: String,
        result: Result<Vec<Message>, ChatError>,
    },
    FallbackSent(Result<(), ChatError>),
}

/// Handle to communicate with a session actor
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| ChatError::Shutdown)?;
        rx.await.map_err(|_| ChatError::Shutdown)
    }

    /// Bootstrap a new session. Ignored unless no session exists and both fields are non-blank.
    pub async fn start_chat(
        &self,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<(), ChatError> {
        let (name, email) = (name.into(), email.into());
        self.request(|respond_to| SessionMessage::StartChat {
            name,
            email,
            respond_to,
        })
        .await
    }

    /// Send the composer contents together with any staged file.
    pub async fn submit(&self, text: impl Into<String>) -> Result<(), ChatError> {
        let text = text.into();
        self.request(|respond_to| SessionMessage::Submit { text, respond_to })
            .await
    }

    /// Report a composer keystroke; may emit a throttled typing signal.
    pub async fn keystroke(&self) -> Result<(), ChatError> {
        self.request(|respond_to| SessionMessage::Keystroke { respond_to })
            .await
    }

    pub async fn stage_file(&self, file: StagedFile) -> Result<(), ChatError> {
        self.request(|respond_to| SessionMessage::StageFile { file, respond_to })
            .await
    }

    pub async fn clear_file(&self) -> Result<(), ChatError> {
        self.request(|respond_to| SessionMessage::ClearFile { respond_to })
            .await
    }

    pub async fn open_window(&self) -> Result<(), ChatError> {
        self.set_window(Some(true)).await
    }

    pub async fn close_window(&self) -> Result<(), ChatError> {
        self.set_window(Some(false)).await
    }

    pub async fn toggle_window(&self) -> Result<(), ChatError> {
        self.set_window(None).await
    }

    async fn set_window(&self, open: Option<bool>) -> Result<(), ChatError> {
        self.request(|respond_to| SessionMessage::SetWindow { open, respond_to })
            .await
    }

    /// Dial the realtime connection again, e.g. after retries ran out.
    pub async fn reconnect(&self) -> Result<(), ChatError> {
        self.request(|respond_to| SessionMessage::Reconnect { respond_to })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, ChatError> {
        self.request(|respond_to| SessionMessage::Snapshot { respond_to })
            .await
    }

    /// Ledger contents in first-seen order.
    pub async fn messages(&self) -> Result<Vec<Message>, ChatError> {
        self.request(|respond_to| SessionMessage::Messages { respond_to })
            .await
    }

    /// Close the transport and stop the actor.
    pub async fn shutdown(&self) -> Result<(), ChatError> {
        self.request(|respond_to| SessionMessage::Shutdown { respond_to })
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }
}

/// The actor that owns a single chat session
pub struct SessionActor {
    config: ChatConfig,
    store: SessionStore,
    api: ChatApi,
    transport: Transport,
    ledger: MessageLedger,
    typing: TypingThrottle,
    phase: SessionPhase,
    token: Option<String>,
    staged: Option<StagedFile>,
    window_open: bool,
    shown_connected: bool,
    closed_by_server: bool,
    sink_tx: mpsc::UnboundedSender<SessionEvent>,
    event_tx: broadcast::Sender<SessionEvent>,
    completion_tx: mpsc::UnboundedSender<Completion>,
}

impl SessionActor {
    /// Spawn a session actor. The returned receiver is the rendering sink: it
    /// exists before the actor starts and never drops an event, so a long
    /// history restore arrives complete.
    pub fn spawn(
        config: ChatConfig,
        store: SessionStore,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(1024);
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let actor = Self {
            api: ChatApi::new(&config.api_url),
            transport: Transport::from_config(&config),
            config,
            store,
            ledger: MessageLedger::new(),
            typing: TypingThrottle::default(),
            phase: SessionPhase::NoSession,
            token: None,
            staged: None,
            window_open: false,
            shown_connected: false,
            closed_by_server: false,
            sink_tx,
            event_tx: event_tx.clone(),
            completion_tx,
        };

        tokio::spawn(actor.run(msg_rx, completion_rx));

        (
            SessionHandle {
                sender: msg_tx,
                event_tx,
            },
            sink_rx,
        )
    }

    async fn run(
        mut self,
        mut receiver: mpsc::Receiver<SessionMessage>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        self.start_up();

        loop {
            tokio::select! {
                msg = receiver.recv() => match msg {
                    Some(SessionMessage::Shutdown { respond_to }) => {
                        self.transport.close().await;
                        let _ = respond_to.send(());
                        break;
                    }
                    Some(msg) => self.handle_message(msg).await,
                    None => {
                        self.transport.close().await;
                        break;
                    }
                },
                Some(done) = completions.recv() => self.handle_completion(done),
                event = self.transport.next_event() => self.handle_transport_event(event).await,
            }
        }

        info!("Chat session actor stopped");
    }

    fn start_up(&mut self) {
        match self.store.load() {
            Ok(Some(token)) => {
                info!("Restoring chat session from {}", self.store.path().display());
                self.activate(token);
            }
            Ok(None) => debug!("No stored chat session"),
            Err(e) => warn!(
                "Could not read session store {}: {}",
                self.store.path().display(),
                e
            ),
        }

        if self.config.auto_open {
            self.set_window(true);
        }
    }

    async fn handle_message(&mut self, msg: SessionMessage) {
        match msg {
            SessionMessage::StartChat {
                name,
                email,
                respond_to,
            } => {
                self.start_chat(name.trim(), email.trim());
                let _ = respond_to.send(());
            }
            SessionMessage::Submit { text, respond_to } => {
                self.submit(text.trim()).await;
                let _ = respond_to.send(());
            }
            SessionMessage::Keystroke { respond_to } => {
                self.keystroke().await;
                let _ = respond_to.send(());
            }
            SessionMessage::StageFile { file, respond_to } => {
                debug!("Staged {} ({})", file.file_name, file.mime);
                self.staged = Some(file);
                let _ = respond_to.send(());
            }
            SessionMessage::ClearFile { respond_to } => {
                self.staged = None;
                let _ = respond_to.send(());
            }
            SessionMessage::SetWindow { open, respond_to } => {
                self.set_window(open.unwrap_or(!self.window_open));
                let _ = respond_to.send(());
            }
            SessionMessage::Reconnect { respond_to } => {
                match self.token.clone() {
                    Some(token) => {
                        info!("Reconnecting on request");
                        self.closed_by_server = false;
                        self.transport.connect(&token);
                    }
                    None => debug!("Reconnect ignored: no session"),
                }
                let _ = respond_to.send(());
            }
            SessionMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            SessionMessage::Messages { respond_to } => {
                let _ = respond_to.send(self.ledger.messages().to_vec());
            }
            SessionMessage::Shutdown { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }

    fn start_chat(&mut self, name: &str, email: &str) {
        if name.is_empty() || email.is_empty() {
            debug!("Start chat ignored: name and email are required");
            return;
        }
        if self.phase != SessionPhase::NoSession {
            debug!("Start chat ignored in phase {:?}", self.phase);
            return;
        }

        info!("Starting chat session");
        self.set_phase(SessionPhase::AwaitingBootstrap);

        let api = self.api.clone();
        let done = self.completion_tx.clone();
        let (name, email) = (name.to_string(), email.to_string());
        tokio::spawn(async move {
            let result = api.init_session(&name, &email).await;
            let _ = done.send(Completion::Bootstrap(result));
        });
    }

    async fn submit(&mut self, text: &str) {
        let Some(token) = self.token.clone() else {
            debug!("Submit ignored: no active session");
            return;
        };
        if text.is_empty() && self.staged.is_none() {
            return;
        }

        let preview = match &self.staged {
            Some(file) if text.is_empty() => format!("📎 {}", file.file_name),
            _ => text.to_string(),
        };
        self.emit(SessionEvent::Render {
            body: preview,
            sender: SenderType::Visitor,
            timestamp: None,
            scroll: true,
            attachments: Vec::new(),
        });

        if self.staged.is_none() && self.transport.is_connected() {
            let frame = OutboundFrame::Message {
                session_token: token,
                message: text.to_string(),
            };
            if let Err(e) = self.transport.send(&frame).await {
                error!("Failed to send message over realtime connection: {}", e);
                self.emit(SessionEvent::Alert(SEND_FAILED_ALERT.to_string()));
            }
            return;
        }

        let file = self.staged.take();
        debug!(
            "Sending via HTTP fallback (file: {})",
            file.as_ref().map_or("none", |f| f.file_name.as_str())
        );
        let api = self.api.clone();
        let done = self.completion_tx.clone();
        let message = (!text.is_empty()).then(|| text.to_string());
        tokio::spawn(async move {
            let result = api.send_message(&token, message.as_deref(), file).await;
            let _ = done.send(Completion::FallbackSent(result));
        });
    }

    async fn keystroke(&mut self) {
        let Some(token) = self.token.clone() else {
            return;
        };
        if !self.transport.is_connected() || !self.typing.keystroke(Instant::now()) {
            return;
        }
        let frame = OutboundFrame::Typing {
            session_token: token,
        };
        if let Err(e) = self.transport.send(&frame).await {
            warn!("Failed to send typing signal: {}", e);
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Bootstrap(Ok(token)) => {
                info!("Chat session created");
                if let Err(e) = self.store.save(&token) {
                    warn!(
                        "Could not persist session to {}: {}",
                        self.store.path().display(),
                        e
                    );
                }
                self.activate(token);
            }
            Completion::Bootstrap(Err(e)) => {
                error!("Failed to start chat session: {}", e);
                self.set_phase(SessionPhase::NoSession);
                let alert = match e {
                    ChatError::Rejected(_) => START_FAILED_ALERT,
                    _ => CONNECT_FAILED_ALERT,
                };
                self.emit(SessionEvent::Alert(alert.to_string()));
            }
            Completion::History { token, result } => {
                if self.token.as_deref() != Some(token.as_str()) {
                    debug!("Dropping history for a previous session");
                    return;
                }
                match result {
                    Ok(messages) => self.load_history(messages),
                    Err(e) => {
                        error!("Failed to load message history: {}", e);
                        self.emit(SessionEvent::Alert(HISTORY_FAILED_ALERT.to_string()));
                    }
                }
            }
            Completion::FallbackSent(Ok(())) => debug!("Fallback send accepted"),
            Completion::FallbackSent(Err(e)) => {
                error!("Failed to send message: {}", e);
                let alert = match e {
                    ChatError::Rejected(reason) => format!("Failed to send message: {}", reason),
                    _ => SEND_FAILED_ALERT.to_string(),
                };
                self.emit(SessionEvent::Alert(alert));
            }
        }
    }

    fn activate(&mut self, token: String) {
        self.token = Some(token.clone());
        self.closed_by_server = false;
        self.set_phase(SessionPhase::Active);
        self.transport.connect(&token);

        let api = self.api.clone();
        let done = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_history(&token).await;
            let _ = done.send(Completion::History { token, result });
        });
    }

    fn load_history(&mut self, messages: Vec<Message>) {
        let total = messages.len();
        let mut renders = Vec::new();
        for message in messages {
            let event = SessionEvent::render(&message, false);
            if self.ledger.merge(message).accepted {
                renders.push(event);
            }
        }
        debug!("Loaded {} history messages ({} new)", total, renders.len());
        for event in renders {
            self.emit(event);
        }
        self.emit(SessionEvent::ScrollToBottom);
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.set_connected(true),
            TransportEvent::MessageReceived(text) => self.handle_frame(&text),
            TransportEvent::Errored(e) => {
                warn!("Realtime transport error: {}", e);
                self.set_connected(false);
            }
            TransportEvent::Closed => {
                self.set_connected(false);
                if self.closed_by_server {
                    info!("Session closed by server; not reconnecting");
                    self.transport.close().await;
                } else if self.transport.is_exhausted() {
                    self.emit(SessionEvent::ReconnectExhausted);
                }
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                return;
            }
        };

        match frame {
            InboundFrame::Connected { message } => {
                info!("Realtime session acknowledged: {}", message.unwrap_or_default());
            }
            InboundFrame::Message(frame) => match frame.into_message() {
                Some(message) => self.receive(message),
                None => debug!("Ignoring message frame without message_id"),
            },
            InboundFrame::OperatorTyping => self.emit(SessionEvent::OperatorTyping),
            InboundFrame::SessionClosed => {
                info!("Chat session closed by server");
                self.closed_by_server = true;
                self.emit(SessionEvent::SessionClosed);
            }
            InboundFrame::Error { error } => {
                warn!("Server reported error: {}", error.unwrap_or_default());
            }
            InboundFrame::Unknown => debug!("Ignoring frame of unknown type: {}", text),
        }
    }

    fn receive(&mut self, message: Message) {
        let sender = message.sender;
        let event = SessionEvent::render(&message, true);
        if !self.ledger.merge(message).accepted || !sender.renders_on_arrival() {
            return;
        }

        self.emit(event);
        if self.config.open_on_new_message && !self.window_open {
            self.set_window(true);
        }
        self.emit(SessionEvent::NewMessage);
    }

    fn snapshot(&self) -> SessionSnapshot {
        let transport = self.transport.state();
        SessionSnapshot {
            phase: self.phase,
            connected: transport.connected,
            attempt_count: transport.attempt_count,
            reconnect_exhausted: self.transport.is_exhausted(),
            window_open: self.window_open,
            staged_file: self.staged.as_ref().map(|f| f.file_name.clone()),
            message_count: self.ledger.len(),
        }
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            self.phase = phase;
            self.emit(SessionEvent::Phase(phase));
        }
    }

    fn set_connected(&mut self, connected: bool) {
        if self.shown_connected != connected {
            self.shown_connected = connected;
            self.emit(SessionEvent::Connection { connected });
        }
    }

    fn set_window(&mut self, open: bool) {
        if self.window_open != open {
            self.window_open = open;
            self.emit(SessionEvent::Window { open });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Observers may lag; the sink may not
        if self.event_tx.receiver_count() > 0 {
            let _ = self.event_tx.send(event.clone());
        }
        let _ = self.sink_tx.send(event);
    }
}
