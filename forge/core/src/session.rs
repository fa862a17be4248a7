//! Conversation Ledger
//!
//! The ordered, invariant-preserving message history for one chat
//! session. A conversation always starts with its system preamble at
//! index 0, appends user/assistant turns behind it, and is bounded by
//! trimming the oldest complete exchange pairs - never the preamble.
//!
//! # Invariants
//!
//! - `messages[0]` carries the system role and survives every trim.
//! - After any trim, `messages.len() <= 2 * max_exchanges + 1`.
//! - Sequence numbers increase monotonically and are never reassigned,
//!   so trimming leaves gaps rather than renumbering history.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The fixed instruction preamble.
    System,
    /// The human side of the exchange.
    User,
    /// The model side of the exchange.
    Assistant,
}

impl Role {
    /// Display label used when flattening history into a prompt.
    pub fn label(self) -> &'static str {
        match self {
            Self::System => "System",
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// One message in a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author role.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Position in the append order. Survives trimming unchanged.
    pub seq: u64,
}

/// Unique conversation identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A bounded multi-turn conversation bound to one model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    id: ConversationId,
    model: String,
    messages: Vec<Message>,
    next_seq: u64,
    created_at: u64,
    last_active_at: u64,
}

impl Conversation {
    /// Create a conversation holding exactly the system preamble.
    pub fn new(model: impl Into<String>, preamble: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: ConversationId::new(),
            model: model.into(),
            messages: vec![Message {
                role: Role::System,
                content: preamble.into(),
                seq: 0,
            }],
            next_seq: 1,
            created_at: now,
            last_active_at: now,
        }
    }

    /// The conversation id.
    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// The model this conversation is bound to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The system preamble (always present, always first).
    pub fn preamble(&self) -> &Message {
        &self.messages[0]
    }

    /// Number of messages, preamble included.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// A conversation is never empty; this mirrors `len` for symmetry.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Milliseconds since epoch when this conversation was created.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Milliseconds since epoch of the last append or reset.
    pub fn last_active_at(&self) -> u64 {
        self.last_active_at
    }

    /// Age since last activity.
    pub fn idle_for(&self) -> std::time::Duration {
        std::time::Duration::from_millis(now_ms().saturating_sub(self.last_active_at))
    }

    /// Append one message at the end.
    ///
    /// The system preamble is fixed at construction; appending another
    /// system message is rejected.
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> Result<u64, LedgerError> {
        if role == Role::System {
            return Err(LedgerError::PreambleFixed);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.messages.push(Message {
            role,
            content: content.into(),
            seq,
        });
        self.last_active_at = now_ms();
        Ok(seq)
    }

    /// Read-only copy of the ordered history.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Enforce the history bound, removing the oldest user/assistant
    /// pairs until `len <= 2 * max_exchanges + 1`.
    ///
    /// A trailing user message still waiting for its reply counts toward
    /// the length but is never removed itself; only complete pairs at
    /// the head of the history (right after the preamble) are dropped.
    /// Returns how many messages were removed.
    pub fn trim(&mut self, max_exchanges: usize) -> usize {
        let cap = 2 * max_exchanges + 1;
        let mut removed = 0;

        while self.messages.len() > cap {
            let oldest_is_pair = self.messages.len() >= 3
                && self.messages[1].role == Role::User
                && self.messages[2].role == Role::Assistant;

            if oldest_is_pair {
                self.messages.drain(1..3);
                removed += 2;
            } else if self.messages.len() >= 2 {
                // Unpaired head (shouldn't arise from normal appends);
                // drop it alone so the pair window realigns.
                self.messages.remove(1);
                removed += 1;
            } else {
                break;
            }
        }

        if removed > 0 {
            tracing::debug!(
                conversation = %self.id,
                removed,
                remaining = self.messages.len(),
                "Trimmed conversation history"
            );
        }
        removed
    }

    /// Discard all history and start over with a fresh preamble.
    ///
    /// This is a full replacement - used on explicit reset and when the
    /// bound model changes. Sequence numbering restarts.
    pub fn reset(&mut self, model: impl Into<String>, preamble: impl Into<String>) {
        self.model = model.into();
        self.messages.clear();
        self.messages.push(Message {
            role: Role::System,
            content: preamble.into(),
            seq: 0,
        });
        self.next_seq = 1;
        self.last_active_at = now_ms();
    }
}

/// Current timestamp in milliseconds.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
