/*!
 * Progress notifications emitted by the pipeline engine.
 *
 * Observers are registered on an `EventHub` that the caller builds and hands
 * to the engine. Delivery is at-least-once, so observers must tolerate seeing
 * the same notification twice.
 */

use log::{debug, info, warn};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Running totals carried by chunk notifications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounts {
    /// Items completed so far in this job
    pub completed: u64,
    /// Items pending when the job started
    pub total: u64,
    /// Provider tokens consumed so far
    pub tokens: u64,
}

/// Final summary of a job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobReport {
    pub rounds_run: u32,
    /// Items translated by this job
    pub completed: u64,
    /// Items that failed at least once before succeeding or running out of rounds
    pub errored_and_retried: u64,
    /// Items still untranslated at the end
    pub still_pending: u64,
    /// Items excluded by hooks during this job
    pub excluded: u64,
    pub requests: u64,
    pub failed_requests: u64,
    pub tokens: u64,
    pub duration: Duration,
    /// The job stopped early on request
    pub cancelled: bool,
}

impl JobReport {
    pub fn is_complete(&self) -> bool {
        self.still_pending == 0 && !self.cancelled
    }
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed, {} errored and retried, {} still pending, {} excluded ({} rounds, {} requests, {} failed, {} tokens, {:.1}s)",
            self.completed,
            self.errored_and_retried,
            self.still_pending,
            self.excluded,
            self.rounds_run,
            self.requests,
            self.failed_requests,
            self.tokens,
            self.duration.as_secs_f64()
        )
    }
}

/// Outcome of one chunk attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Succeeded,
    /// Transport or protocol failure; items stay pending
    Retryable,
    /// Store rejected the results
    Fatal,
    /// Not dispatched because the job was stopping
    Skipped,
}

/// Notifications for observers
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    JobStarted {
        project: String,
        pending: u64,
        workers: usize,
    },
    RoundStarted {
        round: u32,
        chunks: usize,
        pending: u64,
    },
    ChunkCompleted {
        round: u32,
        chunk_id: usize,
        file_path: String,
        outcome: ChunkOutcome,
        /// Items of the chunk written as translated
        applied: usize,
        progress: ProgressCounts,
    },
    JobCompleted {
        report: JobReport,
    },
}

/// Receives pipeline notifications
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

/// Fan-out point for observers, owned by whoever starts the job
#[derive(Clone, Default)]
pub struct EventHub {
    observers: Arc<RwLock<Vec<Arc<dyn PipelineObserver>>>>,
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn PipelineObserver>) {
        self.observers.write().push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    pub fn emit(&self, event: PipelineEvent) {
        // snapshot the list so observers can subscribe from a callback
        let observers = self.observers.read().clone();
        for observer in observers {
            observer.on_event(&event);
        }
    }
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogObserver;

impl PipelineObserver for LogObserver {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::JobStarted {
                project,
                pending,
                workers,
            } => info!("Starting '{}': {} pending items, {} workers", project, pending, workers),
            PipelineEvent::RoundStarted { round, chunks, pending } => {
                info!("Round {}: {} chunks for {} items", round, chunks, pending)
            }
            PipelineEvent::ChunkCompleted {
                round,
                chunk_id,
                file_path,
                outcome,
                applied,
                progress,
            } => match outcome {
                ChunkOutcome::Succeeded => debug!(
                    "Round {} chunk {} ({}): {} applied, {}/{} done",
                    round, chunk_id, file_path, applied, progress.completed, progress.total
                ),
                ChunkOutcome::Skipped => debug!("Round {} chunk {} skipped", round, chunk_id),
                _ => warn!("Round {} chunk {} ({}) failed: {:?}", round, chunk_id, file_path, outcome),
            },
            PipelineEvent::JobCompleted { report } => info!("Job finished: {}", report),
        }
    }
}
