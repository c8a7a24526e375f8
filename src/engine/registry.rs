//! Job lifecycle registry.
//!
//! One slot per token address. The slot holds the identity of the job that
//! currently owns the token together with its broadcaster; execution loops
//! poll `is_current` to find out whether they are still the active job.
//! Every transition happens under a single lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::broadcast::EventBroadcaster;
use crate::types::{EngineError, JobEvent, JobId, JobStatus};

struct JobHandle {
    job_id: JobId,
    status: JobStatus,
    events: Arc<EventBroadcaster>,
}

#[derive(Default)]
pub struct JobRegistry {
    slots: Mutex<HashMap<String, JobHandle>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, JobHandle>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the token's slot for a fresh job.
    ///
    /// A stopped job whose loop is still draining is replaced; its loop will
    /// see the new id on its next check.
    pub fn begin(
        &self,
        token: &str,
        buffer: usize,
    ) -> Result<(JobId, Arc<EventBroadcaster>), EngineError> {
        let mut slots = self.slots();
        if let Some(handle) = slots.get(token) {
            if handle.status == JobStatus::Running {
                return Err(EngineError::AlreadyRunning(token.to_string()));
            }
        }

        let job_id = JobId::generate();
        let events = Arc::new(EventBroadcaster::new(buffer));
        slots.insert(
            token.to_string(),
            JobHandle {
                job_id: job_id.clone(),
                status: JobStatus::Running,
                events: events.clone(),
            },
        );
        debug!(token, job_id = %job_id, "Job slot claimed");
        Ok((job_id, events))
    }

    /// Whether `job_id` still owns the token and has not been stopped.
    pub fn is_current(&self, token: &str, job_id: &JobId) -> bool {
        self.slots()
            .get(token)
            .is_some_and(|h| h.status == JobStatus::Running && &h.job_id == job_id)
    }

    /// Mark the running job as stopped. Returns the stopped job's id, or
    /// `None` if nothing was running.
    pub fn stop(&self, token: &str) -> Option<JobId> {
        let mut slots = self.slots();
        match slots.get_mut(token) {
            Some(handle) if handle.status == JobStatus::Running => {
                handle.status = JobStatus::Stopped;
                info!(token, job_id = %handle.job_id, "Job interrupted");
                Some(handle.job_id.clone())
            }
            _ => {
                info!(token, "Stop requested but no job is running");
                None
            }
        }
    }

    /// Attach a subscriber to the running job.
    pub fn subscribe(
        &self,
        token: &str,
    ) -> Result<(JobId, broadcast::Receiver<JobEvent>), EngineError> {
        let slots = self.slots();
        let handle = slots
            .get(token)
            .filter(|h| h.status == JobStatus::Running)
            .ok_or_else(|| EngineError::NotRunning(token.to_string()))?;
        let rx = handle
            .events
            .attach()
            .ok_or_else(|| EngineError::NotRunning(token.to_string()))?;
        debug!(token, job_id = %handle.job_id, subscribers = handle.events.subscriber_count(), "Subscriber attached");
        Ok((handle.job_id.clone(), rx))
    }

    /// Clear the slot if `job_id` still holds it.
    pub fn release(&self, token: &str, job_id: &JobId) -> bool {
        let mut slots = self.slots();
        if slots.get(token).is_some_and(|h| &h.job_id == job_id) {
            slots.remove(token);
            debug!(token, job_id = %job_id, "Job slot released");
            true
        } else {
            false
        }
    }

    pub fn status(&self, token: &str) -> JobStatus {
        self.slots().get(token).map_or(JobStatus::Idle, |h| h.status)
    }

    /// Occupied slots, including stopped jobs whose loop is still draining.
    pub fn slot_count(&self) -> usize {
        self.slots().len()
    }

    /// Tokens with a running job, for shutdown reporting.
    pub fn running(&self) -> Vec<(String, JobId)> {
        self.slots()
            .iter()
            .filter(|(_, h)| h.status == JobStatus::Running)
            .map(|(token, h)| (token.clone(), h.job_id.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
