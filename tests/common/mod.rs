//! Shared fixtures for integration tests.
#![allow(dead_code)]

use assistant_core::provider::{CompletionProvider, PromptRequest};
use assistant_core::session::{InMemorySessionStore, Session, SessionId, SessionStore, Turn};
use assistant_core::types::Completion;
use assistant_core::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Answers every request with the same text, after an optional delay.
/// Queued errors are returned first, one per call.
pub struct ScriptedProvider {
    answer: String,
    delay: Duration,
    failures: Mutex<VecDeque<Error>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<PromptRequest>>,
}

impl ScriptedProvider {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            delay: Duration::ZERO,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_with(self, err: Error) -> Self {
        self.failures.lock().unwrap().push_back(err);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<PromptRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &PromptRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failure = self.failures.lock().unwrap().pop_front();
        match failure {
            Some(err) => Err(err),
            None => Ok(Completion::new(self.answer.clone()).with_model("scripted-model")),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Reads work; every append fails.
pub struct BrokenAppendStore {
    inner: InMemorySessionStore,
}

impl BrokenAppendStore {
    pub fn with_sessions(ids: &[&str]) -> Self {
        Self {
            inner: InMemorySessionStore::with_sessions(ids.iter().copied()),
        }
    }
}

#[async_trait]
impl SessionStore for BrokenAppendStore {
    async fn create_session(&self) -> Result<Session> {
        self.inner.create_session().await
    }

    async fn open_session(&self, id: &SessionId) -> Result<Session> {
        self.inner.open_session(id).await
    }

    async fn load_recent_turns(&self, id: &SessionId, limit: usize) -> Result<Vec<Turn>> {
        self.inner.load_recent_turns(id, limit).await
    }

    async fn append_turn(&self, _id: &SessionId, _turn: Turn) -> Result<()> {
        Err(Error::storage("disk full"))
    }

    async fn load_session(&self, id: &SessionId) -> Result<Session> {
        self.inner.load_session(id).await
    }

    fn name(&self) -> &'static str {
        "broken-append"
    }
}
