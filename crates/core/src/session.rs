//! Session domain types and the session store abstraction.
//!
//! A session is the persistent (process-lifetime) history of one
//! conversation, keyed by an opaque client-supplied identifier. It never
//! contains the system message; that is prepended fresh on every turn.
//!
//! Each session sits behind its own async mutex. The agent loop holds the
//! lock for the whole turn, which serializes turns on the same session
//! while turns on different sessions proceed independently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::SessionError;
use crate::message::Message;

/// Longest accepted session identifier, in bytes.
pub const MAX_SESSION_ID_LEN: usize = 256;

/// Opaque identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a client-supplied identifier.
    pub fn parse(s: &str) -> Result<Self, SessionError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SessionError::InvalidId("session id must not be empty".into()));
        }
        if trimmed.len() > MAX_SESSION_ID_LEN {
            return Err(SessionError::InvalidId(format!(
                "session id longer than {MAX_SESSION_ID_LEN} bytes"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered, append-only message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier
    pub id: SessionId,

    /// Committed messages (user/assistant pairs), oldest first
    messages: Vec<Message>,

    /// When this session was created
    pub created_at: DateTime<Utc>,

    /// When the last message was committed
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The committed history.
    pub fn history(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append one message.
    pub fn append(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Commit a finished turn: the user's input and the final answer.
    pub fn commit_turn(&mut self, user: Message, assistant: Message) {
        self.append(user);
        self.append(assistant);
    }
}

/// Shared, lockable handle to one session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// The session store abstraction.
///
/// Implementations decide capacity and eviction; the agent loop only needs
/// get-or-create and exclusive access through the returned handle.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Look up a session, creating an empty one on first reference.
    async fn get_or_create(&self, id: &SessionId) -> SessionHandle;

    /// Look up a session without creating it.
    async fn get(&self, id: &SessionId) -> Option<SessionHandle>;

    /// Drop a session. Returns whether it existed.
    async fn remove(&self, id: &SessionId) -> bool;

    /// Number of live sessions.
    async fn len(&self) -> usize;
}
