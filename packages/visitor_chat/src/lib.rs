//! Visitor Chat - client-side session manager for a website chat widget
//!
//! This crate keeps a visitor's chat session alive across a flaky network:
//! - One persisted session token, restored on startup
//! - Realtime delivery over a websocket with bounded, fixed-delay reconnects
//! - HTTP fallback for attachments and for sends while disconnected
//! - Deduplication of messages seen through history, the socket and echoes
//!
//! A [`SessionActor`] owns all of it; front-ends drive it through a
//! [`SessionHandle`] and render the [`SessionEvent`]s it emits.

pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod model;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transport;
pub mod typing;

#[cfg(test)]
mod test_helpers;

pub use config::{ChatConfig, FileConfig};
pub use error::{ChatError, TransportError};
pub use model::{Attachment, AttachmentKind, Message, MessageId, SenderType, StagedFile};
pub use session::{SessionActor, SessionEvent, SessionHandle, SessionPhase, SessionSnapshot};
pub use store::SessionStore;
