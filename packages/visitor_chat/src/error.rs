use tokio_tungstenite::tungstenite;

/// Errors surfaced by the chat session core.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The request never produced a usable response (connect, IO, or decode failure).
    #[error("network request failed: {0}")]
    Network(#[source] reqwest::Error),

    /// The server answered but refused the request (`success: false`).
    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("session store I/O failed: {0}")]
    Store(#[from] std::io::Error),

    #[error("session store is corrupt: {0}")]
    StoreFormat(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("session controller has shut down")]
    Shutdown,
}

impl ChatError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        Self::Network(err)
    }

    /// True for failures where the server was never reached or answered garbage.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        Self::from_reqwest(err)
    }
}

/// Errors from the realtime transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("realtime connection is not open")]
    NotConnected,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether the error means the peer could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::WebSocket(tungstenite::Error::Io(io_err)) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}
