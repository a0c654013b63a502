//! Wire types for the chat backend.
//!
//! Realtime frames are JSON objects discriminated by `type`; REST responses
//! share a `{success, data?, message?}` envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::model::{Attachment, Message, MessageId, SenderType, parse_timestamp};

/// Frames received FROM the server over the realtime connection
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Handshake acknowledgement; informational only.
    Connected {
        #[serde(default)]
        message: Option<String>,
    },
    /// A chat message from any participant, including echoes of our own.
    Message(MessageFrame),
    OperatorTyping,
    SessionClosed,
    Error {
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageFrame {
    #[serde(default)]
    pub message_id: Option<MessageId>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub sender_type: SenderType,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_attachments")]
    pub attachments: Vec<Attachment>,
}

impl MessageFrame {
    /// Frames without an id cannot be deduplicated and are dropped.
    pub fn into_message(self) -> Option<Message> {
        Some(Message {
            id: self.message_id?,
            body: self.message.unwrap_or_default(),
            sender: self.sender_type,
            timestamp: self.timestamp,
            attachments: self.attachments,
        })
    }
}

/// Frames sent FROM the client TO the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Message {
        session_token: String,
        message: String,
    },
    Typing {
        session_token: String,
    },
}

/// Common REST response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    /// Error text on failure; some endpoints echo other payloads here.
    #[serde(default)]
    pub message: Option<serde_json::Value>,
}

impl<T> ApiResponse<T> {
    /// Human-readable failure reason, if the server supplied one.
    pub fn failure_reason(&self) -> String {
        match &self.message {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            _ => "Unknown error".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InitSessionRequest<'a> {
    pub name: &'a str,
    pub email: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInit {
    #[serde(default)]
    pub session_token: Option<String>,
}

/// One entry of `GET /api/messages/{token}`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryItem {
    pub id: MessageId,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub sender_type: SenderType,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_attachments")]
    pub attachments: Vec<Attachment>,
}

impl From<HistoryItem> for Message {
    fn from(item: HistoryItem) -> Self {
        Message {
            id: item.id,
            body: item.message.unwrap_or_default(),
            sender: item.sender_type,
            timestamp: item.created_at,
            attachments: item.attachments,
        }
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(raw) => parse_timestamp(&raw),
        _ => None,
    })
}

/// Attachments that fail to decode are skipped rather than failing the message.
fn lenient_attachments<'de, D>(deserializer: D) -> Result<Vec<Attachment>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(attachment) => Some(attachment),
            Err(e) => {
                warn!("Skipping malformed attachment: {}", e);
                None
            }
        })
        .collect())
}
