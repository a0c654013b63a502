//! Realtime transport: one websocket at a time with fixed-delay reconnects.
//!
//! The transport is a plain state machine owned by the session controller.
//! The controller polls [`Transport::next_event`] from its select loop; dials,
//! reads and reconnect timers all progress inside that call, so nothing here
//! needs a task or a lock of its own.

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage, handshake::client::Response};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::error::TransportError;
use crate::protocol::OutboundFrame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type DialFuture =
    Pin<Box<dyn Future<Output = Result<(WsStream, Response), tungstenite::Error>> + Send>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Events emitted by the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed; the retry counter has been reset.
    Opened,
    /// A text frame from the server, undecoded.
    MessageReceived(String),
    /// The connection ended without an explicit `close()`.
    Closed,
    /// A connection-level failure. Always followed by `Closed` when it ends the link.
    Errored(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportState {
    pub connected: bool,
    pub attempt_count: u32,
}

enum Link {
    Idle,
    Dialing(DialFuture),
    Open(Box<WsStream>),
    Backoff(Pin<Box<Sleep>>),
}

pub struct Transport {
    base_url: String,
    reconnect_delay: Duration,
    max_attempts: u32,
    token: Option<String>,
    link: Link,
    attempt_count: u32,
    exhausted: bool,
    pending: VecDeque<TransportEvent>,
}

impl Transport {
    pub fn new(base_url: &str, reconnect_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            reconnect_delay,
            max_attempts,
            token: None,
            link: Link::Idle,
            attempt_count: 0,
            exhausted: false,
            pending: VecDeque::new(),
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(
            &config.websocket_url,
            config.reconnect_delay,
            config.max_reconnect_attempts,
        )
    }

    /// Dial `{base}/{token}`, replacing any current connection or pending retry.
    ///
    /// The retry counter is left alone; only a successful open resets it.
    pub fn connect(&mut self, token: &str) {
        self.token = Some(token.to_string());
        self.pending.clear();
        self.exhausted = false;
        self.dial();
    }

    /// Close the connection (if any) and cancel any pending retry.
    pub async fn close(&mut self) {
        if let Link::Open(ws) = &mut self.link {
            debug!("Closing realtime connection");
            let _ =
                tokio::time::timeout(CLOSE_TIMEOUT, WebSocketStream::close(&mut **ws, None)).await;
        }
        self.link = Link::Idle;
        self.pending.clear();
    }

    pub async fn send(&mut self, frame: &OutboundFrame) -> Result<(), TransportError> {
        let Link::Open(ws) = &mut self.link else {
            return Err(TransportError::NotConnected);
        };
        let json = serde_json::to_string(frame)?;
        ws.send(WsMessage::Text(json.into())).await?;
        Ok(())
    }

    pub fn state(&self) -> TransportState {
        TransportState {
            connected: self.is_connected(),
            attempt_count: self.attempt_count,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.link, Link::Open(_))
    }

    /// True once the retry budget ran out; cleared by the next `connect`.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Wait for the next transport event. Cancel-safe: all in-flight work
    /// lives in `self`, so dropping the returned future loses nothing.
    pub async fn next_event(&mut self) -> TransportEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }

            match &mut self.link {
                Link::Idle => std::future::pending::<()>().await,
                Link::Dialing(dial) => {
                    let result = dial.as_mut().await;
                    match result {
                        Ok((ws, _)) => {
                            info!("Realtime connection open");
                            self.link = Link::Open(Box::new(ws));
                            self.attempt_count = 0;
                            return TransportEvent::Opened;
                        }
                        Err(e) => {
                            let err = TransportError::from(e);
                            if err.is_unreachable() {
                                warn!("Realtime endpoint unreachable: {}", err);
                            } else {
                                warn!("Realtime handshake failed: {}", err);
                            }
                            self.link = Link::Idle;
                            self.pending.push_back(TransportEvent::Errored(err.to_string()));
                            self.on_unsolicited_close();
                        }
                    }
                }
                Link::Open(ws) => {
                    let frame = ws.next().await;
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            return TransportEvent::MessageReceived(text.as_str().to_owned());
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!("Realtime connection closed by server: {:?}", frame);
                            self.link = Link::Idle;
                            self.on_unsolicited_close();
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Realtime connection error: {}", e);
                            self.link = Link::Idle;
                            self.pending.push_back(TransportEvent::Errored(e.to_string()));
                            self.on_unsolicited_close();
                        }
                        None => {
                            info!("Realtime connection ended");
                            self.link = Link::Idle;
                            self.on_unsolicited_close();
                        }
                    }
                }
                Link::Backoff(sleep) => {
                    sleep.as_mut().await;
                    self.dial();
                }
            }
        }
    }

    fn dial(&mut self) {
        let Some(token) = &self.token else {
            self.link = Link::Idle;
            return;
        };
        let url = format!("{}/{}", self.base_url, token);
        info!("Connecting to realtime endpoint: {}", url);
        self.link = Link::Dialing(Box::pin(tokio_tungstenite::connect_async(url)));
    }

    fn on_unsolicited_close(&mut self) {
        self.pending.push_back(TransportEvent::Closed);

        if self.attempt_count < self.max_attempts {
            self.attempt_count += 1;
            info!(
                "Reconnecting in {:?} (attempt {}/{})",
                self.reconnect_delay, self.attempt_count, self.max_attempts
            );
            self.link = Link::Backoff(Box::pin(tokio::time::sleep(self.reconnect_delay)));
        } else {
            warn!(
                "Realtime connection lost; giving up after {} reconnect attempts",
                self.max_attempts
            );
            self.exhausted = true;
            self.link = Link::Idle;
        }
    }
}
