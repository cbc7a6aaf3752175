//! 会话存储模块：按会话 ID 持久化对话轮次。
//!
//! # Session Store Adapter
//!
//! Durable read/write of conversation turns, keyed by session id. The core only
//! ever reads the recent-turn window it needs to build context and appends one
//! turn per successful exchange; durability and schema belong to the adapter.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`SessionStore`] | Trait implemented by storage backends |
//! | [`InMemorySessionStore`] | Process-local store for tests and the demo binary |
//! | [`Session`] | A conversation and its ordered turns |
//! | [`Turn`] | One prompt/completion pair |

mod memory;

pub use memory::InMemorySessionStore;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Opaque conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One prompt/completion exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub prompt: String,
    pub completion: String,
    /// Correlation id of the request that produced this turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub timestamp_ms: u64,
}

impl Turn {
    pub fn new(prompt: impl Into<String>, completion: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            completion: completion.into(),
            trace_id: None,
            timestamp_ms: timestamp_ms(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// A conversation with its full, ordered history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at_ms: u64,
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at_ms: timestamp_ms(),
            turns: Vec::new(),
        }
    }

    /// The last `limit` turns, oldest first.
    pub fn recent(&self, limit: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(limit);
        &self.turns[start..]
    }
}

/// Storage backend for conversation sessions.
///
/// Implementations provide their own per-session consistency; the core never
/// coordinates across sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create an empty session with a fresh id.
    async fn create_session(&self) -> Result<Session>;

    /// Session stored under `id`, created empty if it does not exist yet.
    async fn open_session(&self, id: &SessionId) -> Result<Session>;

    /// Last `limit` turns of a session, oldest first.
    ///
    /// Fails with [`crate::Error::SessionNotFound`] for unknown ids.
    async fn load_recent_turns(&self, id: &SessionId, limit: usize) -> Result<Vec<Turn>>;

    /// Append one turn to an existing session.
    async fn append_turn(&self, id: &SessionId, turn: Turn) -> Result<()>;

    /// Full session with every turn.
    async fn load_session(&self, id: &SessionId) -> Result<Session>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_window() {
        let mut session = Session::new(SessionId::new("s1"));
        for i in 0..5 {
            session.turns.push(Turn::new(format!("q{i}"), format!("a{i}")));
        }
        let recent = session.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].prompt, "q3");
        assert_eq!(recent[1].prompt, "q4");
        assert!(session.recent(0).is_empty());
        assert_eq!(session.recent(10).len(), 5);
    }

    #[test]
    fn test_session_id_is_transparent_in_json() {
        let id = SessionId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
