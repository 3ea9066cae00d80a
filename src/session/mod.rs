//! Chat sessions
//!
//! A session owns the bounded transcript for one conversation and tracks
//! whether a turn is in flight. Storage is pluggable so transcripts can follow
//! a user across devices.

pub mod store;

pub use store::{InMemorySessionStore, PgSessionStore, SessionStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::models::ChatMessage;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingResponse,
}

/// Identifies one conversation of one identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub identity: String,
    pub session_id: Uuid,
}

impl SessionKey {
    /// Use the client's session id when it parses, otherwise derive a stable
    /// one from the identity so a user without an id keeps one conversation.
    pub fn resolve(identity: &str, session_id: Option<&str>) -> Self {
        let session_id = match session_id.map(str::trim) {
            Some(v) if !v.is_empty() => {
                Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(&format!("{}:{}", identity, v)))
            }
            _ => stable_uuid_from_string(identity),
        };

        Self {
            identity: identity.to_string(),
            session_id,
        }
    }
}

pub fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: Uuid,
    pub identity: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    state: SessionState,
    max_history: usize,
    messages: VecDeque<ChatMessage>,
}

impl ChatSession {
    pub fn new(key: &SessionKey, max_history: usize) -> Self {
        Self {
            session_id: key.session_id,
            identity: key.identity.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            state: SessionState::Idle,
            max_history: max_history.max(1),
            messages: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn messages(&self) -> impl DoubleEndedIterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Seed a fresh session from a client-held transcript.
    pub fn seed(&mut self, history: impl IntoIterator<Item = ChatMessage>) {
        for message in history {
            self.push(message);
        }
    }

    /// Everything except the most recent entry, oldest first.
    pub fn history_before_last(&self) -> Vec<ChatMessage> {
        let keep = self.messages.len().saturating_sub(1);
        self.messages.iter().take(keep).cloned().collect()
    }

    /// Record the user's message and mark the turn as in flight.
    pub fn begin_turn(&mut self, message: ChatMessage) {
        self.push(message);
        self.state = SessionState::AwaitingResponse;
    }

    /// Close the turn; the reply is absent when the gateway failed.
    pub fn finish_turn(&mut self, reply: Option<ChatMessage>) {
        if let Some(reply) = reply {
            self.push(reply);
        }
        self.state = SessionState::Idle;
    }

    /// Restore a message loaded from persistent storage.
    pub fn add_existing_message(&mut self, message: ChatMessage) {
        self.push(message);
    }

    fn push(&mut self, message: ChatMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.max_history {
            self.messages.pop_front();
        }
        self.updated_at = Utc::now();
    }
}
