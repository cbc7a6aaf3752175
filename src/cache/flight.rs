//! In-flight request bookkeeping for single-flight joins.

use crate::error::TimeoutStage;
use crate::types::Completion;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// `None` until the producer finishes, then the shared outcome.
pub(crate) type Slot = Option<Result<Arc<Completion>>>;

/// One upstream call that any number of callers may be waiting on.
pub(crate) struct InFlightRequest {
    tx: watch::Sender<Slot>,
    waiters: usize,
    started_at: Instant,
}

impl InFlightRequest {
    /// New request with the creating caller registered as its first waiter.
    pub fn start(now: Instant) -> (Self, watch::Receiver<Slot>) {
        let (tx, rx) = watch::channel(None);
        (
            Self {
                tx,
                waiters: 1,
                started_at: now,
            },
            rx,
        )
    }

    pub fn join(&mut self) -> watch::Receiver<Slot> {
        self.waiters += 1;
        self.tx.subscribe()
    }

    pub fn waiters(&self) -> usize {
        self.waiters
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Deliver the outcome to every registered waiter. Waiters that already
    /// detached are simply gone from the channel.
    pub fn publish(self, outcome: Result<Arc<Completion>>) {
        self.tx.send_replace(Some(outcome));
    }
}

/// Wait for the in-flight outcome, giving up at `deadline`.
///
/// Giving up only detaches this caller; the upstream call and every other
/// waiter are unaffected.
pub(crate) async fn wait(
    mut rx: watch::Receiver<Slot>,
    deadline: Instant,
) -> Result<Arc<Completion>> {
    let waiting_since = Instant::now();
    let outcome = tokio::time::timeout_at(deadline, async move {
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // Sender dropped. It may still have published just before.
                let last = rx.borrow().clone();
                return last.unwrap_or_else(|| {
                    Err(Error::permanent("producer task terminated", None))
                });
            }
        }
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(TimeoutStage::DedupWait, waiting_since.elapsed())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_waiters_see_one_outcome() {
        let (mut flight, rx1) = InFlightRequest::start(Instant::now());
        let rx2 = flight.join();
        assert_eq!(flight.waiters(), 2);

        let deadline = Instant::now() + Duration::from_secs(5);
        let w1 = tokio::spawn(wait(rx1, deadline));
        let w2 = tokio::spawn(wait(rx2, deadline));
        flight.publish(Ok(Arc::new(Completion::new("4"))));

        assert_eq!(w1.await.unwrap().unwrap().text, "4");
        assert_eq!(w2.await.unwrap().unwrap().text, "4");
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_published_outcome() {
        let (flight, rx) = InFlightRequest::start(Instant::now());
        flight.publish(Err(Error::permanent("boom", Some(400))));
        let err = wait(rx, Instant::now() + Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderFailure);
    }

    #[tokio::test]
    async fn test_dropped_sender_fails_waiters() {
        let (flight, rx) = InFlightRequest::start(Instant::now());
        drop(flight);
        let err = wait(rx, Instant::now() + Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("producer task terminated"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_deadline() {
        let (_flight, rx) = InFlightRequest::start(Instant::now());
        let err = wait(rx, Instant::now() + Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
