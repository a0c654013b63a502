//! Core chat data types shared by the ledger, controller and sinks.

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Server-assigned message identifier.
///
/// History returns numeric ids while realtime frames may carry strings; both
/// normalize to the same textual form so the ledger sees one key.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(from = "RawMessageId")]
pub struct MessageId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMessageId {
    Text(String),
    Integer(i64),
}

impl From<RawMessageId> for MessageId {
    fn from(raw: RawMessageId) -> Self {
        match raw {
            RawMessageId::Text(s) => MessageId(s),
            RawMessageId::Integer(n) => MessageId(n.to_string()),
        }
    }
}

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Visitor,
    Operator,
    System,
    /// Missing or unrecognized on the wire. Still merged for dedup.
    #[default]
    Unknown,
}

impl<'de> Deserialize<'de> for SenderType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw.as_deref() {
            Some("visitor") => SenderType::Visitor,
            Some("operator") => SenderType::Operator,
            Some("system") => SenderType::System,
            _ => SenderType::Unknown,
        })
    }
}

impl SenderType {
    /// Messages from these senders are rendered when they arrive over the socket.
    /// Visitor messages were already rendered optimistically.
    pub fn renders_on_arrival(self) -> bool {
        matches!(self, SenderType::Operator | SenderType::System)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    #[default]
    File,
}

impl<'de> Deserialize<'de> for AttachmentKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(if raw.as_deref() == Some("image") {
            AttachmentKind::Image
        } else {
            AttachmentKind::File
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Server-relative resource path, e.g. `/uploads/abc.png`.
    pub url: String,
    pub file_name: String,
    #[serde(rename = "file_type", default)]
    pub kind: AttachmentKind,
}

impl Attachment {
    /// Absolute URL of the attachment against the chat API base.
    pub fn resolve(&self, api_url: &str) -> String {
        format!("{}{}", api_url.trim_end_matches('/'), self.url)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: MessageId,
    /// Text content; empty for attachment-only messages.
    pub body: String,
    pub sender: SenderType,
    pub timestamp: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
}

/// A file the visitor picked (or pasted) to go out with the next message.
#[derive(Clone, Debug, PartialEq)]
pub struct StagedFile {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl StagedFile {
    pub fn new(file_name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    /// Read a file from disk, guessing its MIME type from the extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self::new(file_name, mime, bytes))
    }

    /// An image pasted from the clipboard; named after the paste time.
    pub fn pasted_image(bytes: Vec<u8>) -> Self {
        let name = format!("pasted-image-{}.png", Utc::now().timestamp_millis());
        Self::new(name, "image/png", bytes)
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

/// Parse a server timestamp: RFC 3339, or naive ISO-8601 taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// `HH:MM` in local time, as shown next to a message bubble.
pub fn format_time(timestamp: &DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn message_id_accepts_numbers_and_strings() {
        let a: MessageId = serde_json::from_str("42").unwrap();
        let b: MessageId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "42");
    }

    #[test]
    fn sender_type_wire_names() {
        let s: SenderType = serde_json::from_str("\"operator\"").unwrap();
        assert_eq!(s, SenderType::Operator);
        assert!(s.renders_on_arrival());
        assert!(SenderType::System.renders_on_arrival());
        assert!(!SenderType::Visitor.renders_on_arrival());
    }

    #[test]
    fn attachment_kind_falls_back_to_file() {
        let a: Attachment = serde_json::from_value(serde_json::json!({
            "url": "/uploads/report.pdf",
            "file_name": "report.pdf",
            "file_type": "document"
        }))
        .unwrap();
        assert_eq!(a.kind, AttachmentKind::File);
        assert_eq!(
            a.resolve("https://chat.example.com/"),
            "https://chat.example.com/uploads/report.pdf"
        );

        let img: AttachmentKind = serde_json::from_str("\"image\"").unwrap();
        assert_eq!(img, AttachmentKind::Image);
    }

    #[test]
    fn attachment_without_file_type_is_a_file() {
        let a: Attachment = serde_json::from_value(serde_json::json!({
            "url": "/f/x.pdf",
            "file_name": "x.pdf"
        }))
        .unwrap();
        assert_eq!(a.kind, AttachmentKind::File);

        let null_kind: Attachment = serde_json::from_value(serde_json::json!({
            "url": "/f/y.png",
            "file_name": "y.png",
            "file_type": null
        }))
        .unwrap();
        assert_eq!(null_kind.kind, AttachmentKind::File);
    }

    #[test]
    fn unrecognized_sender_is_unknown_and_not_rendered() {
        let bot: SenderType = serde_json::from_str("\"bot\"").unwrap();
        let null: SenderType = serde_json::from_str("null").unwrap();
        assert_eq!(bot, SenderType::Unknown);
        assert_eq!(null, SenderType::Unknown);
        assert!(!SenderType::Unknown.renders_on_arrival());
    }

    #[test]
    fn timestamps_rfc3339_and_naive() {
        let tz = parse_timestamp("2024-05-01T10:15:00+02:00").unwrap();
        assert_eq!(tz.hour(), 8);

        let naive = parse_timestamp("2024-05-01T10:15:30.123456").unwrap();
        assert_eq!((naive.day(), naive.hour(), naive.minute()), (1, 10, 15));

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn staged_file_from_path_guesses_mime() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("photo.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();

        let file = StagedFile::from_path(&path).unwrap();
        assert_eq!(file.file_name, "photo.png");
        assert_eq!(file.mime, "image/png");
        assert!(file.is_image());
        assert_eq!(file.bytes.len(), 4);
    }

    #[test]
    fn pasted_image_naming() {
        let file = StagedFile::pasted_image(vec![1, 2, 3]);
        assert!(file.file_name.starts_with("pasted-image-"));
        assert!(file.file_name.ends_with(".png"));
        assert!(file.is_image());
    }
}
