use super::{Session, SessionId, SessionStore, Turn};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Process-local session store.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Store pre-populated with empty sessions under the given ids.
    pub fn with_sessions<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SessionId>,
    {
        let sessions = ids
            .into_iter()
            .map(|id| {
                let id = id.into();
                (id.clone(), Session::new(id))
            })
            .collect();
        Self {
            sessions: RwLock::new(sessions),
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self) -> Result<Session> {
        let session = Session::new(SessionId::generate());
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        info!(session_id = %session.id, "Created session");
        Ok(session)
    }

    async fn open_session(&self, id: &SessionId) -> Result<Session> {
        if id.as_str().trim().is_empty() {
            return Err(Error::invalid_request("session id must not be blank"));
        }
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(id.clone()).or_insert_with(|| {
            info!(session_id = %id, "Created session");
            Session::new(id.clone())
        });
        Ok(session.clone())
    }

    async fn load_recent_turns(&self, id: &SessionId, limit: usize) -> Result<Vec<Turn>> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(id)
            .ok_or_else(|| Error::session_not_found(id.as_str()))?;
        Ok(session.recent(limit).to_vec())
    }

    async fn append_turn(&self, id: &SessionId, turn: Turn) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::session_not_found(id.as_str()))?;
        session.turns.push(turn);
        debug!(session_id = %id, turns = session.turns.len(), "Appended turn");
        Ok(())
    }

    async fn load_session(&self, id: &SessionId) -> Result<Session> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::session_not_found(id.as_str()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn test_create_and_append() {
        let store = InMemorySessionStore::new();
        let session = store.create_session().await.unwrap();
        assert!(session.turns.is_empty());

        store
            .append_turn(&session.id, Turn::new("Hello!", "Hi").with_trace_id("trace-123"))
            .await
            .unwrap();
        store
            .append_turn(&session.id, Turn::new("Message 2", "Response 2"))
            .await
            .unwrap();

        let loaded = store.load_session(&session.id).await.unwrap();
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.turns[0].trace_id.as_deref(), Some("trace-123"));
        assert_eq!(loaded.turns[1].prompt, "Message 2");

        let recent = store.load_recent_turns(&session.id, 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].completion, "Response 2");
    }

    #[tokio::test]
    async fn test_open_session_creates_once() {
        let store = InMemorySessionStore::new();
        let id = SessionId::new("my-chat");

        let opened = store.open_session(&id).await.unwrap();
        assert_eq!(opened.id, id);
        store
            .append_turn(&id, Turn::new("2+2?", "4"))
            .await
            .unwrap();

        let reopened = store.open_session(&id).await.unwrap();
        assert_eq!(reopened.turns.len(), 1);
        assert_eq!(store.len().await, 1);

        let err = store.open_session(&SessionId::new(" ")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let store = InMemorySessionStore::with_sessions(["s1"]);
        let missing = SessionId::new("nope");
        let err = store.load_recent_turns(&missing, 4).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
        let err = store
            .append_turn(&missing, Turn::new("a", "b"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
        assert!(store
            .load_recent_turns(&SessionId::new("s1"), 4)
            .await
            .unwrap()
            .is_empty());
    }
}
