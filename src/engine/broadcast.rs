//! Event fan-out for one job.
//!
//! Wraps a bounded `tokio::sync::broadcast` channel. Publishing never waits
//! on subscribers; a subscriber that falls behind loses the oldest events
//! and sees `RecvError::Lagged`. The sender is dropped after the terminal
//! event so every receiver observes the close right after it.

use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::JobEvent;

#[derive(Debug)]
pub struct EventBroadcaster {
    sender: Mutex<Option<broadcast::Sender<JobEvent>>>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(tx)),
        }
    }

    /// Send to every current subscriber. Dropped silently once closed or
    /// when nobody is listening.
    pub fn publish(&self, event: JobEvent) {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Attach a new subscriber. `None` once the job has finished.
    pub fn attach(&self) -> Option<broadcast::Receiver<JobEvent>> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|tx| tx.subscribe())
    }

    /// Deliver `terminal` and close every subscriber.
    ///
    /// Only the first call has any effect; returns whether it was this one.
    pub fn detach_all(&self, terminal: JobEvent) -> bool {
        let taken = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(tx) => {
                let receivers = tx.receiver_count();
                let _ = tx.send(terminal);
                debug!(receivers, "Job stream closed");
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |tx| tx.receiver_count())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, JobId};
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn log(id: &JobId, n: usize) -> JobEvent {
        JobEvent::Log { job_id: id.clone(), message: format!("line {n}") }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_events_and_terminal() {
        let id = JobId::generate();
        let b = EventBroadcaster::new(16);
        let mut first = b.attach().unwrap();
        b.publish(log(&id, 0));
        let mut late = b.attach().unwrap();
        b.publish(log(&id, 1));
        assert_eq!(b.subscriber_count(), 2);

        assert!(b.detach_all(JobEvent::Completed { job_id: id.clone(), reason: FinishReason::Deadline }));

        assert_eq!(first.recv().await.unwrap(), log(&id, 0));
        assert_eq!(first.recv().await.unwrap(), log(&id, 1));
        assert!(first.recv().await.unwrap().is_terminal());
        assert!(matches!(first.recv().await, Err(RecvError::Closed)));

        // late attach only sees what came after it
        assert_eq!(late.recv().await.unwrap(), log(&id, 1));
        assert!(late.recv().await.unwrap().is_terminal());
    }

    #[test]
    fn test_detach_all_is_once() {
        let id = JobId::generate();
        let b = EventBroadcaster::new(4);
        let mut rx = b.attach().unwrap();
        let done = JobEvent::Completed { job_id: id.clone(), reason: FinishReason::Shutdown };
        assert!(b.detach_all(done.clone()));
        assert!(!b.detach_all(done.clone()));
        assert_eq!(b.subscriber_count(), 0);
        assert!(b.attach().is_none());

        assert_eq!(rx.try_recv().unwrap(), done);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Closed)));

        // publishing after close is a no-op
        b.publish(log(&id, 9));
    }

    #[test]
    fn test_slow_subscriber_lags_without_blocking() {
        let id = JobId::generate();
        let b = EventBroadcaster::new(2);
        let mut rx = b.attach().unwrap();
        for n in 0..5 {
            b.publish(log(&id, n));
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(3))));
        assert_eq!(rx.try_recv().unwrap(), log(&id, 3));
        assert_eq!(rx.try_recv().unwrap(), log(&id, 4));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let b = EventBroadcaster::new(2);
        b.publish(log(&JobId::generate(), 0));
        assert_eq!(b.subscriber_count(), 0);
    }
}
