//! Deduplicated, insertion-ordered message log.
//!
//! The same message can reach the client through history, the realtime
//! socket, and as the echo of a fallback send. The ledger keeps the first copy
//! of each id and reports whether a merge was new, which is what the
//! controller uses to decide whether to render.

use std::collections::HashSet;

use crate::model::{Message, MessageId};

/// Outcome of [`MessageLedger::merge`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Merge {
    pub accepted: bool,
}

#[derive(Debug, Default)]
pub struct MessageLedger {
    seen: HashSet<MessageId>,
    messages: Vec<Message>,
}

impl MessageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `message` unless its id is already present.
    pub fn merge(&mut self, message: Message) -> Merge {
        if !self.seen.insert(message.id.clone()) {
            return Merge { accepted: false };
        }
        self.messages.push(message);
        Merge { accepted: true }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Messages in first-seen order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
