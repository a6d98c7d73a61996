//! The index job: drains pending messages into the full-text index.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{FtsError, Result};
use crate::index::IndexStore;
use crate::model::message::{IndexEntry, MessageId};
use crate::parser::mime;

use super::{FeatureGate, JobScheduler, MessageCorpus, DEFAULT_BATCH_SIZE, JOB_NAME};

/// Tuning for [`IndexWorker`].
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Ids marked indexed per corpus transaction.
    pub batch_size: usize,
    /// Checkpoint the index WAL after a run.
    pub checkpoint: bool,
    /// Lower the thread's scheduling priority before working.
    pub background_priority: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            checkpoint: true,
            background_priority: true,
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Preconditions failed; nothing was touched.
    pub skipped: bool,
    /// Ids taken from the pending queue.
    pub processed: usize,
    /// Ids written to the index.
    pub indexed: usize,
    /// Ids whose message no longer exists.
    pub gone: usize,
    /// Ids that failed and stay pending.
    pub failed: usize,
    /// Mark-indexed transactions issued.
    pub flushes: usize,
    /// Indexing was disabled mid-run.
    pub stopped_early: bool,
}

enum Outcome {
    Indexed,
    Gone,
}

/// Incrementally converges the index toward the corpus.
#[derive(Debug, Clone, Default)]
pub struct IndexWorker {
    options: WorkerOptions,
}

impl IndexWorker {
    pub fn new(options: WorkerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Run once over everything currently pending.
    ///
    /// Per-message failures are logged and leave the id pending for the next
    /// run. Only failures outside that isolation (corrupt index, unreadable
    /// pending queue, failed flush) abort the run as [`FtsError::JobFailure`].
    ///
    /// `progress` receives `(done, total)` before each id and once at the end.
    pub fn run(
        &self,
        store: &mut IndexStore,
        corpus: &mut dyn MessageCorpus,
        gate: &dyn FeatureGate,
        scheduler: Option<&dyn JobScheduler>,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<RunReport> {
        if !(gate.is_enabled() && gate.is_entitled()) {
            info!(job = JOB_NAME, "Indexing disabled, nothing to do");
            if let Some(scheduler) = scheduler {
                super::cancel(scheduler);
            }
            return Ok(RunReport {
                skipped: true,
                ..RunReport::default()
            });
        }

        self.run_pending(store, corpus, gate, progress)
            .map_err(|e| match e {
                FtsError::JobFailure { .. } => e,
                other => {
                    error!(job = JOB_NAME, error = %other, "Index run failed");
                    FtsError::JobFailure {
                        job: JOB_NAME.to_string(),
                        reason: other.to_string(),
                    }
                }
            })
    }

    fn run_pending(
        &self,
        store: &mut IndexStore,
        corpus: &mut dyn MessageCorpus,
        gate: &dyn FeatureGate,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<RunReport> {
        if self.options.background_priority {
            lower_priority();
        }

        let ids = corpus.pending_index_ids()?;
        let total = ids.len();
        info!(pending = total, "Index run started");

        let batch_size = self.options.batch_size.max(1);
        let mut report = RunReport::default();
        let mut batch: Vec<MessageId> = Vec::with_capacity(batch_size);

        for (done, id) in ids.into_iter().enumerate() {
            if let Some(progress) = progress {
                progress(done, total);
            }

            if !gate.is_enabled() {
                info!(done, total, "Indexing disabled, stopping");
                report.stopped_early = true;
                break;
            }
            report.processed += 1;

            match index_one(store, &*corpus, id) {
                Ok(Outcome::Indexed) => {
                    report.indexed += 1;
                    batch.push(id);
                }
                Ok(Outcome::Gone) => {
                    debug!(id, "Message gone");
                    report.gone += 1;
                    batch.push(id);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(id, error = %e, "Could not index message, leaving it pending");
                    report.failed += 1;
                }
            }

            if batch.len() >= batch_size {
                flush(corpus, &mut batch)?;
                report.flushes += 1;
            }
        }

        if !batch.is_empty() {
            flush(corpus, &mut batch)?;
            report.flushes += 1;
        }

        if self.options.checkpoint {
            if let Err(e) = store.checkpoint() {
                warn!(error = %e, "Index checkpoint failed");
            }
        }

        if let Some(progress) = progress {
            progress(report.processed, total);
        }

        info!(
            indexed = report.indexed,
            gone = report.gone,
            failed = report.failed,
            "Index run finished"
        );
        Ok(report)
    }
}

/// Write one message to the index in its own transaction.
fn index_one(store: &mut IndexStore, corpus: &dyn MessageCorpus, id: MessageId) -> Result<Outcome> {
    let Some(message) = corpus.get_message(id)? else {
        return Ok(Outcome::Gone);
    };

    let text = match corpus.message_body_path(id)? {
        Some(path) => mime::read_full_text(&path)?,
        None => String::new(),
    };
    let entry = IndexEntry::from_message(&message, text);

    let writer = store.begin()?;
    writer.insert(&entry)?;
    writer.commit()?;
    Ok(Outcome::Indexed)
}

/// Mark the batch indexed in one corpus transaction and clear it.
fn flush(corpus: &mut dyn MessageCorpus, batch: &mut Vec<MessageId>) -> Result<()> {
    debug!(count = batch.len(), "Marking indexed");
    corpus.mark_indexed(batch)?;
    batch.clear();
    Ok(())
}

#[cfg(unix)]
fn lower_priority() {
    // SAFETY: setpriority only reads its scalar arguments; who = 0 targets the calling thread.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, 10) };
    if rc != 0 {
        debug!(error = %std::io::Error::last_os_error(), "Could not lower priority");
    }
}

#[cfg(not(unix))]
fn lower_priority() {}
