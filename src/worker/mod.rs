//! Background indexing: collaborator interfaces, scheduling, and the index job.
//!
//! The job drains the corpus's pending-index queue into the [`IndexStore`].
//! It never runs twice at once: the [`JobScheduler`] keeps at most one
//! instance of [`JOB_NAME`] scheduled or running.
//!
//! [`IndexStore`]: crate::index::IndexStore

pub mod job;
pub mod scheduler;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::info;

use crate::error::Result;
use crate::model::message::{Message, MessageId};

pub use job::{IndexWorker, RunReport, WorkerOptions};
pub use scheduler::{JobOutcome, JobScheduler, JobState, LocalScheduler, RetryPolicy};

/// Unique name of the index job.
pub const JOB_NAME: &str = "fts-index";

/// Ids marked indexed per corpus transaction.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Settle delay before a non-immediate run starts.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(30);

/// The message store the index is derived from.
pub trait MessageCorpus {
    /// Ids whose current text is not reflected in the index, oldest first.
    fn pending_index_ids(&self) -> Result<Vec<MessageId>>;

    /// Resolve a message; `None` if it no longer exists.
    fn get_message(&self, id: MessageId) -> Result<Option<Message>>;

    /// Location of the persisted message content, if any.
    fn message_body_path(&self, id: MessageId) -> Result<Option<PathBuf>>;

    /// Clear the pending flag of every id, in one transaction.
    fn mark_indexed(&mut self, ids: &[MessageId]) -> Result<()>;

    /// Set the pending flag of every message (full rebuild).
    fn reset_pending(&mut self) -> Result<()>;
}

/// Feature switch and entitlement, polled during a run.
pub trait FeatureGate {
    fn is_enabled(&self) -> bool;
    fn is_entitled(&self) -> bool;
}

/// A [`FeatureGate`] backed by atomics, shareable across threads.
#[derive(Debug)]
pub struct AtomicGate {
    enabled: AtomicBool,
    entitled: AtomicBool,
}

impl AtomicGate {
    pub fn new(enabled: bool, entitled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            entitled: AtomicBool::new(entitled),
        }
    }

    /// Switch indexing on or off. A running job stops after its current message.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_entitled(&self, entitled: bool) {
        self.entitled.store(entitled, Ordering::SeqCst);
    }
}

impl FeatureGate for AtomicGate {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn is_entitled(&self) -> bool {
        self.entitled.load(Ordering::SeqCst)
    }
}

/// Request an index run.
///
/// When indexing is enabled and entitled, the job is (re)scheduled, replacing
/// any instance that has not started yet; `immediately` skips the settle
/// delay. Otherwise an `immediately` request cancels whatever is scheduled.
pub fn init(
    scheduler: &dyn JobScheduler,
    gate: &dyn FeatureGate,
    immediately: bool,
    settle_delay: Duration,
) {
    if gate.is_enabled() && gate.is_entitled() {
        let delay = if immediately {
            Duration::ZERO
        } else {
            settle_delay
        };
        info!(job = JOB_NAME, ?delay, "Queuing");
        scheduler.schedule_unique(JOB_NAME, true, delay);
    } else if immediately {
        cancel(scheduler);
    }
}

/// Cancel a scheduled run. A running instance notices through the gate.
pub fn cancel(scheduler: &dyn JobScheduler) {
    info!(job = JOB_NAME, "Cancelling");
    scheduler.cancel(JOB_NAME);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingScheduler {
        calls: Mutex<Vec<String>>,
    }

    impl JobScheduler for RecordingScheduler {
        fn schedule_unique(&self, job_name: &str, replace_if_pending: bool, delay: Duration) {
            self.calls.lock().unwrap().push(format!(
                "schedule {job_name} {replace_if_pending} {}",
                delay.as_secs()
            ));
        }

        fn cancel(&self, job_name: &str) {
            self.calls.lock().unwrap().push(format!("cancel {job_name}"));
        }
    }

    #[test]
    fn test_init_schedules_with_settle_delay() {
        let scheduler = RecordingScheduler::default();
        let gate = AtomicGate::new(true, true);
        init(&scheduler, &gate, false, DEFAULT_SETTLE_DELAY);
        init(&scheduler, &gate, true, DEFAULT_SETTLE_DELAY);
        assert_eq!(
            *scheduler.calls.lock().unwrap(),
            vec!["schedule fts-index true 30", "schedule fts-index true 0"]
        );
    }

    #[test]
    fn test_init_disabled_cancels_only_when_immediate() {
        let scheduler = RecordingScheduler::default();
        let gate = AtomicGate::new(true, false);
        init(&scheduler, &gate, false, DEFAULT_SETTLE_DELAY);
        assert!(scheduler.calls.lock().unwrap().is_empty());

        gate.set_entitled(true);
        gate.set_enabled(false);
        init(&scheduler, &gate, true, DEFAULT_SETTLE_DELAY);
        assert_eq!(*scheduler.calls.lock().unwrap(), vec!["cancel fts-index"]);
    }
}
