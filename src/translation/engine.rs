/*!
 * Pipeline engine.
 *
 * The engine runs a job in rounds. Each round chunks every untranslated item
 * of the store and lets a fixed pool of workers drain the chunk queue. A
 * worker takes one chunk through these steps:
 *
 * 1. pre-phase hooks, committing exclusions
 * 2. encoding
 * 3. a rate governor permit
 * 4. the request, bounded by the request timeout
 * 5. decoding; any protocol error discards the whole chunk
 * 6. applying results to the store
 * 7. post-phase hooks, which may send items back for another round
 *
 * Failures never abort the job. Items of a failed chunk keep their status
 * and are picked up again by the next round, until the round limit is
 * reached. The stop flag is checked before each dispatch; requests already
 * in flight complete and their results are applied.
 */

use futures::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::app_config::Config;
use crate::project::ItemStatus;
use crate::providers::{GenerationConfig, RequestClient, RequestReply};
use crate::store::ProgressStore;

use super::batch::{Chunk, ChunkLimits, build_chunks, estimate_request_tokens};
use super::codec;
use super::events::{ChunkOutcome, EventHub, JobReport, PipelineEvent, ProgressCounts};
use super::hooks::{HookContext, HookPhase, HookRegistry, WorkUnit};
use super::prompts::{DefaultPromptStrategy, PromptRequest, PromptStrategy};
use super::rate_limit::{DEFAULT_WINDOW, RateGovernor};

/// Collaborators of a job, built once by the caller
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub client: Arc<dyn RequestClient>,
    pub governor: Arc<RateGovernor>,
    pub hooks: HookRegistry,
    pub events: EventHub,
    pub prompts: Arc<dyn PromptStrategy>,
}

impl PipelineContext {
    /// Context with the built-in hooks, default prompts and configured limits
    pub fn from_config(config: Config, client: Arc<dyn RequestClient>) -> Self {
        let governor = RateGovernor::new(config.rate_limits(), DEFAULT_WINDOW);
        Self {
            hooks: HookRegistry::with_builtins(&config.hooks),
            prompts: Arc::new(DefaultPromptStrategy::from_config(&config)),
            governor: Arc::new(governor),
            events: EventHub::new(),
            client,
            config: Arc::new(config),
        }
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_events(mut self, events: EventHub) -> Self {
        self.events = events;
        self
    }

    pub fn with_governor(mut self, governor: RateGovernor) -> Self {
        self.governor = Arc::new(governor);
        self
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptStrategy>) -> Self {
        self.prompts = prompts;
        self
    }
}

/// Knobs of the engine loop
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub worker_count: usize,
    pub round_limit: u32,
    pub limits: ChunkLimits,
    pub shrink_on_retry: bool,
    pub request_timeout: Duration,
    pub generation: GenerationConfig,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        let provider = config.translation.active_provider();
        let common = &config.translation.common;
        Self {
            worker_count: config.worker_count().max(1),
            round_limit: config.pipeline.round_limit.max(1),
            limits: config.pipeline.chunk_limits(),
            shrink_on_retry: config.pipeline.shrink_on_retry,
            request_timeout: Duration::from_secs(config.request_timeout_secs()),
            generation: GenerationConfig {
                model: provider.model,
                temperature: Some(common.temperature),
                top_p: common.top_p,
                max_output_tokens: common.max_output_tokens,
            },
        }
    }
}

/// Cooperative stop flag shared with the caller
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the engine to stop after the requests in flight
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn flag(&self) -> &AtomicBool {
        &self.0
    }
}

/// State of one chunk attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    Dispatched,
    Succeeded { applied: usize },
    RetryableFailure(String),
    FatalFailure(String),
}

impl ChunkState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChunkState::Pending | ChunkState::Dispatched)
    }

    /// Pending only moves to Dispatched, Dispatched only to a terminal state.
    /// A pending chunk may also end without a request (stopped, or nothing
    /// left after filtering).
    pub fn can_advance_to(&self, next: &ChunkState) -> bool {
        match self {
            ChunkState::Pending => !matches!(next, ChunkState::Pending),
            ChunkState::Dispatched => next.is_terminal(),
            _ => false,
        }
    }

    fn outcome(&self) -> ChunkOutcome {
        match self {
            ChunkState::Succeeded { .. } => ChunkOutcome::Succeeded,
            ChunkState::RetryableFailure(_) => ChunkOutcome::Retryable,
            ChunkState::FatalFailure(_) => ChunkOutcome::Fatal,
            ChunkState::Pending | ChunkState::Dispatched => ChunkOutcome::Skipped,
        }
    }
}

/// Counters of one job run
#[derive(Debug, Default)]
struct JobTally {
    total: u64,
    completed: AtomicU64,
    excluded: AtomicU64,
    requests: AtomicU64,
    failed_requests: AtomicU64,
    tokens: AtomicU64,
    failed_items: Mutex<HashSet<(String, u64)>>,
}

impl JobTally {
    fn progress(&self) -> ProgressCounts {
        ProgressCounts {
            completed: self.completed.load(Ordering::SeqCst),
            total: self.total,
            tokens: self.tokens.load(Ordering::SeqCst),
        }
    }

    fn mark_failed<'a>(&self, file_path: &str, indices: impl IntoIterator<Item = &'a u64>) {
        let mut failed = self.failed_items.lock();
        for index in indices {
            failed.insert((file_path.to_string(), *index));
        }
    }
}

/// Drives a job over a progress store
#[derive(Debug, Clone)]
pub struct PipelineEngine {
    store: Arc<ProgressStore>,
    context: Arc<PipelineContext>,
    settings: Arc<EngineSettings>,
    stop: StopHandle,
}

impl PipelineEngine {
    pub fn new(store: Arc<ProgressStore>, context: PipelineContext, settings: EngineSettings) -> Self {
        Self {
            store,
            context: Arc::new(context),
            settings: Arc::new(settings),
            stop: StopHandle::new(),
        }
    }

    /// Engine with settings taken from the context's config
    pub fn from_context(store: Arc<ProgressStore>, context: PipelineContext) -> Self {
        let settings = EngineSettings::from_config(&context.config);
        Self::new(store, context, settings)
    }

    /// Share a stop flag created by the caller
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run rounds until nothing is pending, the round limit is hit, or the
    /// job is stopped.
    pub async fn run(&self) -> JobReport {
        let started = Instant::now();
        let pending = self.store.count_items(ItemStatus::Untranslated) as u64;
        let tally = Arc::new(JobTally {
            total: pending,
            ..JobTally::default()
        });

        self.store.update_statistics(|stats| {
            stats.start_time_ms.get_or_insert_with(|| chrono::Utc::now().timestamp_millis());
        });
        self.reconcile_line_counts();
        self.context.events.emit(PipelineEvent::JobStarted {
            project: self.store.name(),
            pending,
            workers: self.settings.worker_count,
        });

        let mut rounds_run = 0;
        for round in 1..=self.settings.round_limit {
            if self.stop.is_stopped() {
                break;
            }
            let limits = self.settings.limits.for_round(round, self.settings.shrink_on_retry);
            let chunks = build_chunks(&self.store, &limits);
            if chunks.is_empty() {
                break;
            }

            rounds_run = round;
            let round_pending: u64 = chunks.iter().map(|c| c.len() as u64).sum();
            self.context.events.emit(PipelineEvent::RoundStarted {
                round,
                chunks: chunks.len(),
                pending: round_pending,
            });
            self.run_round(round, chunks, &tally).await;
        }

        let duration = started.elapsed();
        self.reconcile_line_counts();
        let stats = self.store.update_statistics(|stats| {
            stats.elapsed_secs += duration.as_secs_f64();
        });

        let report = JobReport {
            rounds_run,
            completed: tally.completed.load(Ordering::SeqCst),
            errored_and_retried: tally.failed_items.lock().len() as u64,
            still_pending: self.store.count_items(ItemStatus::Untranslated) as u64,
            excluded: tally.excluded.load(Ordering::SeqCst),
            requests: tally.requests.load(Ordering::SeqCst),
            failed_requests: tally.failed_requests.load(Ordering::SeqCst),
            tokens: tally.tokens.load(Ordering::SeqCst),
            duration,
            cancelled: self.stop.is_stopped(),
        };
        if report.still_pending > 0 && !report.cancelled {
            warn!(
                "{} items still untranslated after {} rounds",
                report.still_pending, report.rounds_run
            );
        }
        debug!("Project totals: {} requests, {} tokens", stats.total_requests, stats.total_tokens());

        self.context.events.emit(PipelineEvent::JobCompleted { report: report.clone() });
        report
    }

    /// Recount line totals from the store, so they stay consistent across
    /// resumed runs and exclusions.
    fn reconcile_line_counts(&self) {
        let counts = self.store.status_counts();
        let total = (counts.total() - counts.excluded) as u64;
        let done = (counts.translated + counts.polished) as u64;
        self.store.update_statistics(|stats| {
            stats.total_line = total;
            stats.line = done;
        });
    }

    async fn run_round(&self, round: u32, chunks: Vec<Chunk>, tally: &Arc<JobTally>) {
        let worker_count = self.settings.worker_count.min(chunks.len()).max(1);
        let queue = Arc::new(Mutex::new(VecDeque::from(chunks)));

        let workers = (0..worker_count).map(|worker_id| {
            let engine = self.clone();
            let queue = Arc::clone(&queue);
            let tally = Arc::clone(tally);
            tokio::spawn(async move { engine.work(worker_id, round, queue, tally).await })
        });

        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
            }
        }

        let left = queue.lock().len();
        if left > 0 {
            info!("Stopped with {} chunks not dispatched in round {}", left, round);
        }
    }

    async fn work(&self, worker_id: usize, round: u32, queue: Arc<Mutex<VecDeque<Chunk>>>, tally: Arc<JobTally>) {
        loop {
            if self.stop.is_stopped() {
                break;
            }
            let next = queue.lock().pop_front();
            let Some(chunk) = next else {
                break;
            };

            debug!("Worker {} takes chunk {} ({} items)", worker_id, chunk.id, chunk.len());
            let state = self.process_chunk(&chunk, &tally).await;

            let applied = match state {
                ChunkState::Succeeded { applied } => applied,
                _ => 0,
            };
            self.context.events.emit(PipelineEvent::ChunkCompleted {
                round,
                chunk_id: chunk.id,
                file_path: chunk.file_path.clone(),
                outcome: state.outcome(),
                applied,
                progress: tally.progress(),
            });
        }
    }

    fn run_hooks(&self, phase: HookPhase, file_path: &str, file_type: &str, units: &mut [WorkUnit]) {
        let mut ctx = HookContext {
            file_path,
            project_type: file_type,
            config: &self.context.config,
            units,
        };
        self.context.hooks.run(phase, &mut ctx);
    }

    /// Take one chunk through a single attempt
    async fn process_chunk(&self, chunk: &Chunk, tally: &JobTally) -> ChunkState {
        let path = chunk.file_path.as_str();
        let file_type = self
            .store
            .file_type(path)
            .unwrap_or_else(|_| self.store.project_type());

        let mut units: Vec<WorkUnit> = chunk
            .items
            .iter()
            .map(|item| WorkUnit::new(item.index, item.source_text()))
            .collect();
        self.run_hooks(HookPhase::PreFilter, path, &file_type, &mut units);
        self.run_hooks(HookPhase::PreProcess, path, &file_type, &mut units);
        self.commit_exclusions(path, &units, tally);
        units.retain(WorkUnit::is_active);

        if units.is_empty() {
            return ChunkState::Succeeded { applied: 0 };
        }

        let texts: Vec<&str> = units.iter().map(|u| u.request_text.as_str()).collect();
        let batch = codec::encode(&texts);
        let messages = self.context.prompts.build(&PromptRequest {
            file_path: path,
            context: &chunk.context,
            payload: batch.payload(),
        });
        let estimated = estimate_request_tokens(messages.iter().map(|m| m.content.as_str()));

        let Some(permit) = self.context.governor.acquire(estimated, self.stop.flag()).await else {
            debug!("Chunk {} not dispatched, job is stopping", chunk.id);
            return ChunkState::Pending;
        };
        if !permit.waited.is_zero() {
            debug!("Chunk {} waited {:?} for a permit", chunk.id, permit.waited);
        }

        let state = ChunkState::Dispatched;
        tally.requests.fetch_add(1, Ordering::SeqCst);
        self.store.update_statistics(|stats| {
            stats.total_requests += 1;
            stats.estimated_tokens += estimated;
        });

        let reply = match tokio::time::timeout(
            self.settings.request_timeout,
            self.context.client.send(&messages, &self.settings.generation),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => {
                warn!("Chunk {} timed out after {:?}", chunk.id, self.settings.request_timeout);
                RequestReply::skipped()
            }
        };

        let indices: Vec<u64> = units.iter().map(|u| u.index).collect();
        if reply.skip {
            return self.fail(state, chunk, &indices, "request skipped", tally);
        }

        let tokens = reply.prompt_tokens + reply.completion_tokens;
        tally.tokens.fetch_add(tokens, Ordering::SeqCst);
        self.store.update_statistics(|stats| {
            stats.prompt_tokens += reply.prompt_tokens;
            stats.completion_tokens += reply.completion_tokens;
        });

        let content = reply.content.unwrap_or_default();
        let decoded = match batch.decode(&content) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("Chunk {} response could not be decoded: {}\n{}", chunk.id, e, content);
                return self.fail(state, chunk, &indices, &e.to_string(), tally);
            }
        };

        for (unit, text) in units.iter_mut().zip(decoded.into_texts()) {
            unit.translation = Some(text);
        }
        let model = self.settings.generation.model.as_str();
        let results: Vec<(u64, String)> = units
            .iter()
            .map(|u| (u.index, u.translation.clone().unwrap_or_default()))
            .collect();
        let applied = match self.store.apply_translations(path, &results, Some(model)) {
            Ok(applied) => applied,
            Err(e) => {
                error!("Chunk {} results rejected by the store: {}", chunk.id, e);
                return self.advance(state, ChunkState::FatalFailure(e.to_string()));
            }
        };

        let rejected = self.post_process(path, &file_type, &mut units, tally);
        let completed = applied.saturating_sub(rejected);
        tally.completed.fetch_add(completed as u64, Ordering::SeqCst);
        self.store.update_statistics(|stats| stats.line += completed as u64);

        self.advance(state, ChunkState::Succeeded { applied: completed })
    }

    fn advance(&self, from: ChunkState, to: ChunkState) -> ChunkState {
        debug_assert!(from.can_advance_to(&to), "{:?} -> {:?}", from, to);
        to
    }

    fn fail(&self, from: ChunkState, chunk: &Chunk, indices: &[u64], reason: &str, tally: &JobTally) -> ChunkState {
        warn!("Chunk {} of {} failed: {}", chunk.id, chunk.file_path, reason);
        tally.failed_requests.fetch_add(1, Ordering::SeqCst);
        tally.mark_failed(&chunk.file_path, indices);
        self.store.update_statistics(|stats| stats.error_requests += 1);
        self.advance(from, ChunkState::RetryableFailure(reason.to_string()))
    }

    fn commit_exclusions(&self, path: &str, units: &[WorkUnit], tally: &JobTally) {
        for unit in units.iter().filter(|u| u.excluded) {
            match self.store.set_status(path, unit.index, ItemStatus::Excluded) {
                Ok(()) => {
                    tally.excluded.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => warn!("Could not exclude {}#{}: {}", path, unit.index, e),
            }
        }
    }

    /// Run post-phase hooks and commit what they changed. Returns the number
    /// of items sent back for another round.
    fn post_process(&self, path: &str, file_type: &str, units: &mut [WorkUnit], tally: &JobTally) -> usize {
        let applied: Vec<Option<String>> = units.iter().map(|u| u.translation.clone()).collect();
        self.run_hooks(HookPhase::PostProcess, path, file_type, units);

        let model = Some(self.settings.generation.model.as_str());
        let mut rejected = 0;
        for (unit, before) in units.iter().zip(applied) {
            if let Some(reason) = &unit.rejection {
                debug!("{}#{} rejected: {}", path, unit.index, reason);
                match self.store.requeue(path, unit.index) {
                    Ok(()) => {
                        rejected += 1;
                        tally.mark_failed(path, [&unit.index]);
                    }
                    Err(e) => warn!("Could not requeue {}#{}: {}", path, unit.index, e),
                }
                continue;
            }

            if unit.translation != before {
                if let Some(text) = &unit.translation {
                    if let Err(e) = self.store.set_translated(path, unit.index, text.clone(), model) {
                        warn!("Could not update {}#{}: {}", path, unit.index, e);
                    }
                }
            }
            for (key, value) in &unit.metadata {
                if let Err(e) = self.store.set_metadata(path, unit.index, key.clone(), value.clone()) {
                    warn!("Could not store metadata on {}#{}: {}", path, unit.index, e);
                }
            }
        }
        rejected
    }
}
