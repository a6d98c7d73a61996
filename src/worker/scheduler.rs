//! Unique-job scheduling.
//!
//! [`JobScheduler`] is the seam the index job is requested through. The
//! in-process [`LocalScheduler`] runs each registered job on its own named
//! thread after a delay, keeps at most one instance scheduled or running per
//! name, and retries failed runs with exponential backoff.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::error::{FtsError, Result};

use super::RunReport;

/// Schedules named jobs so that at most one instance exists per name.
pub trait JobScheduler {
    /// Schedule `job_name` to start after `delay`.
    ///
    /// If an instance is already waiting, it is replaced (restarting its
    /// delay) when `replace_if_pending` is set and kept otherwise. A request
    /// that arrives while the job runs is honored once the run finishes.
    fn schedule_unique(&self, job_name: &str, replace_if_pending: bool, delay: Duration);

    /// Drop a waiting instance of `job_name`, if any.
    fn cancel(&self, job_name: &str);
}

/// Lifecycle of a registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Scheduled,
    Running,
    Completed,
    Failed,
}

/// Result of the most recent finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(RunReport),
    Failed(String),
}

/// How failed runs are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

type Job = Box<dyn FnMut(&dyn JobScheduler) -> Result<RunReport> + Send>;

struct Slot {
    /// Taken out while the job runs.
    job: Option<Job>,
    state: JobState,
    /// Bumped on every schedule and cancel; stale timers compare and bail.
    generation: u64,
    /// Delay of a request that arrived while running.
    rerun: Option<Duration>,
    attempts: u32,
    last: Option<JobOutcome>,
}

struct Inner {
    slots: Mutex<HashMap<String, Slot>>,
    changed: Condvar,
}

/// Thread-backed [`JobScheduler`].
#[derive(Clone)]
pub struct LocalScheduler {
    inner: Arc<Inner>,
    retry: RetryPolicy,
}

impl LocalScheduler {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                changed: Condvar::new(),
            }),
            retry,
        }
    }

    /// Register `job` under `name`, replacing an idle registration.
    ///
    /// The job receives the scheduler so it can cancel itself.
    pub fn register<F>(&self, name: &str, job: F)
    where
        F: FnMut(&dyn JobScheduler) -> Result<RunReport> + Send + 'static,
    {
        let mut slots = self.lock();
        slots.insert(
            name.to_string(),
            Slot {
                job: Some(Box::new(job)),
                state: JobState::Idle,
                generation: 0,
                rerun: None,
                attempts: 0,
                last: None,
            },
        );
    }

    pub fn state(&self, name: &str) -> Option<JobState> {
        self.lock().get(name).map(|slot| slot.state)
    }

    pub fn last_outcome(&self, name: &str) -> Option<JobOutcome> {
        self.lock().get(name).and_then(|slot| slot.last.clone())
    }

    /// Block until `name` is neither scheduled nor running.
    ///
    /// Returns the settled state, or `None` on timeout or for an unknown job.
    pub fn wait_idle(&self, name: &str, timeout: Duration) -> Option<JobState> {
        let deadline = Instant::now() + timeout;
        let mut slots = self.lock();
        loop {
            let state = slots.get(name)?.state;
            if !matches!(state, JobState::Scheduled | JobState::Running) {
                return Some(state);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slots = self
                .inner
                .changed
                .wait_timeout(slots, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `slot` scheduled under a fresh generation and start its timer.
    fn arm(&self, name: &str, slot: &mut Slot, delay: Duration) {
        slot.generation += 1;
        slot.state = JobState::Scheduled;
        let generation = slot.generation;

        let scheduler = self.clone();
        let job_name = name.to_string();
        let spawned = thread::Builder::new()
            .name(format!("{name}-job"))
            .spawn(move || scheduler.wait_and_run(&job_name, generation, delay));
        if let Err(e) = spawned {
            error!(job = name, error = %e, "Could not spawn job thread");
            slot.state = JobState::Failed;
            slot.last = Some(JobOutcome::Failed(e.to_string()));
        }
        self.inner.changed.notify_all();
    }

    fn wait_and_run(&self, name: &str, generation: u64, delay: Duration) {
        let deadline = Instant::now() + delay;
        let mut slots = self.lock();
        loop {
            let Some(slot) = slots.get(name) else { return };
            if slot.generation != generation || slot.state != JobState::Scheduled {
                debug!(job = name, generation, "Superseded");
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            slots = self
                .inner
                .changed
                .wait_timeout(slots, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        let Some(mut job) = slots.get_mut(name).and_then(|slot| {
            slot.state = JobState::Running;
            slot.job.take()
        }) else {
            return;
        };
        self.inner.changed.notify_all();
        drop(slots);

        info!(job = name, "Running");
        let result = panic::catch_unwind(AssertUnwindSafe(|| job(self as &dyn JobScheduler)))
            .unwrap_or_else(|_| {
                Err(FtsError::JobFailure {
                    job: name.to_string(),
                    reason: "job panicked".into(),
                })
            });

        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(name) else { return };
        slot.job = Some(job);

        let mut retry = None;
        match result {
            Ok(report) => {
                slot.state = JobState::Completed;
                slot.attempts = 0;
                slot.last = Some(JobOutcome::Completed(report));
            }
            Err(e) if slot.attempts < self.retry.max_retries => {
                slot.attempts += 1;
                let backoff = self.retry.delay(slot.attempts);
                warn!(job = name, attempt = slot.attempts, ?backoff, error = %e, "Run failed, retrying");
                slot.last = Some(JobOutcome::Failed(e.to_string()));
                retry = Some(backoff);
            }
            Err(e) => {
                error!(job = name, error = %e, "Run failed, giving up");
                slot.state = JobState::Failed;
                slot.attempts = 0;
                slot.last = Some(JobOutcome::Failed(e.to_string()));
            }
        }

        match slot.rerun.take().or(retry) {
            Some(delay) => self.arm(name, slot, delay),
            None => self.inner.changed.notify_all(),
        }
    }
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl JobScheduler for LocalScheduler {
    fn schedule_unique(&self, job_name: &str, replace_if_pending: bool, delay: Duration) {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(job_name) else {
            warn!(job = job_name, "Scheduling unknown job");
            return;
        };
        match slot.state {
            JobState::Scheduled if !replace_if_pending => {
                debug!(job = job_name, "Already scheduled, keeping it");
            }
            JobState::Running => {
                debug!(job = job_name, "Running, will rerun when done");
                slot.rerun = Some(delay);
            }
            _ => {
                slot.attempts = 0;
                self.arm(job_name, slot, delay);
            }
        }
    }

    fn cancel(&self, job_name: &str) {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(job_name) else { return };
        slot.rerun = None;
        if slot.state == JobState::Scheduled {
            slot.generation += 1;
            slot.state = JobState::Idle;
            slot.attempts = 0;
            self.inner.changed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(10);

    fn counting(scheduler: &LocalScheduler, pause: Duration) -> Arc<AtomicUsize> {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        scheduler.register("job", move |_| {
            thread::sleep(pause);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(RunReport::default())
        });
        runs
    }

    fn wait_for(scheduler: &LocalScheduler, state: JobState) {
        let deadline = Instant::now() + WAIT;
        while scheduler.state("job") != Some(state) {
            assert!(Instant::now() < deadline, "never reached {state:?}");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_runs_once_when_due() {
        let scheduler = LocalScheduler::default();
        let runs = counting(&scheduler, Duration::ZERO);
        assert_eq!(scheduler.state("job"), Some(JobState::Idle));

        scheduler.schedule_unique("job", true, Duration::ZERO);
        assert_eq!(scheduler.wait_idle("job", WAIT), Some(JobState::Completed));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(
            scheduler.last_outcome("job"),
            Some(JobOutcome::Completed(RunReport::default()))
        );
    }

    #[test]
    fn test_replacing_requests_debounce() {
        let scheduler = LocalScheduler::default();
        let runs = counting(&scheduler, Duration::ZERO);
        for _ in 0..5 {
            scheduler.schedule_unique("job", true, Duration::from_millis(100));
        }
        assert_eq!(scheduler.wait_idle("job", WAIT), Some(JobState::Completed));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_keep_existing_when_not_replacing() {
        let scheduler = LocalScheduler::default();
        let runs = counting(&scheduler, Duration::ZERO);
        scheduler.schedule_unique("job", true, Duration::from_secs(3600));
        scheduler.schedule_unique("job", false, Duration::ZERO);

        assert_eq!(scheduler.wait_idle("job", Duration::from_millis(100)), None);
        assert_eq!(scheduler.state("job"), Some(JobState::Scheduled));
        scheduler.cancel("job");
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_drops_scheduled_run() {
        let scheduler = LocalScheduler::default();
        let runs = counting(&scheduler, Duration::ZERO);
        scheduler.schedule_unique("job", true, Duration::from_millis(50));
        scheduler.cancel("job");

        assert_eq!(scheduler.wait_idle("job", WAIT), Some(JobState::Idle));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_request_while_running_reruns() {
        let scheduler = LocalScheduler::default();
        let runs = counting(&scheduler, Duration::from_millis(100));
        scheduler.schedule_unique("job", true, Duration::ZERO);
        wait_for(&scheduler, JobState::Running);

        scheduler.schedule_unique("job", true, Duration::ZERO);
        scheduler.schedule_unique("job", true, Duration::ZERO);
        assert_eq!(scheduler.wait_idle("job", WAIT), Some(JobState::Completed));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_run_is_retried() {
        let scheduler = LocalScheduler::new(RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(5),
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        scheduler.register("job", move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(FtsError::JobFailure {
                    job: "job".into(),
                    reason: "busy".into(),
                })
            } else {
                Ok(RunReport::default())
            }
        });

        scheduler.schedule_unique("job", true, Duration::ZERO);
        assert_eq!(scheduler.wait_idle("job", WAIT), Some(JobState::Completed));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let scheduler = LocalScheduler::new(RetryPolicy {
            max_retries: 1,
            backoff: Duration::from_millis(5),
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        scheduler.register("job", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(FtsError::InvalidPath("gone".into()))
        });

        scheduler.schedule_unique("job", true, Duration::ZERO);
        assert_eq!(scheduler.wait_idle("job", WAIT), Some(JobState::Failed));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            scheduler.last_outcome("job"),
            Some(JobOutcome::Failed(reason)) if reason.contains("gone")
        ));
    }

    #[test]
    fn test_job_can_cancel_itself() {
        let scheduler = LocalScheduler::default();
        scheduler.register("job", |scheduler| {
            scheduler.cancel("job");
            Ok(RunReport {
                skipped: true,
                ..RunReport::default()
            })
        });
        scheduler.schedule_unique("job", true, Duration::ZERO);
        assert_eq!(scheduler.wait_idle("job", WAIT), Some(JobState::Completed));
    }

    #[test]
    fn test_retry_delay_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_secs(30),
        };
        assert_eq!(policy.delay(1), Duration::from_secs(30));
        assert_eq!(policy.delay(2), Duration::from_secs(60));
        assert_eq!(policy.delay(3), Duration::from_secs(120));
    }

    #[test]
    fn test_unknown_job_is_ignored() {
        let scheduler = LocalScheduler::default();
        scheduler.schedule_unique("missing", true, Duration::ZERO);
        assert_eq!(scheduler.state("missing"), None);
        assert_eq!(scheduler.wait_idle("missing", WAIT), None);
    }
}
