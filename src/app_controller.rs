use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::app_config::Config;
use crate::providers::{self, RequestClient};
use crate::store::{AutosaveHandle, ProgressStore, StatusCounts};
use crate::translation::events::{LogObserver, PipelineEvent, PipelineObserver};
use crate::translation::{JobReport, PipelineContext, PipelineEngine, StopHandle};

/// Drives one job: loads the snapshot, runs the engine with autosave, and
/// flushes the final state.
pub struct Controller {
    config: Config,
}

impl Controller {
    /// Create a controller for test purposes with the default configuration
    pub fn new_for_test() -> Result<Self> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run a job against the configured provider; Ctrl-C stops it cleanly.
    pub async fn run(&self, snapshot_path: &Path) -> Result<JobReport> {
        self.config.validate().context("Configuration validation failed")?;

        let provider = self.config.translation.active_provider();
        let client = providers::build_client(&provider, self.config.request_timeout_secs());
        info!(
            "🚀 {} - {} ({} → {})",
            provider.provider_type.display_name(),
            provider.model,
            self.config.source_language,
            self.config.target_language
        );

        let stop = StopHandle::new();
        let listener = {
            let stop = stop.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Stopping after the requests in flight, press Ctrl-C again to abort");
                    stop.stop();
                    if tokio::signal::ctrl_c().await.is_ok() {
                        std::process::exit(130);
                    }
                }
            })
        };

        let result = self.run_with_client(snapshot_path, client, stop, true).await;
        listener.abort();
        result
    }

    /// Run a job with an explicit client and stop flag.
    pub async fn run_with_client(
        &self,
        snapshot_path: &Path,
        client: Arc<dyn RequestClient>,
        stop: StopHandle,
        show_progress: bool,
    ) -> Result<JobReport> {
        self.config.validate().context("Configuration validation failed")?;

        let store = Arc::new(
            ProgressStore::load(snapshot_path)
                .with_context(|| format!("Failed to load progress snapshot: {}", snapshot_path.display()))?,
        );

        let context = PipelineContext::from_config(self.config.clone(), client);
        context.events.subscribe(Arc::new(LogObserver));
        if show_progress {
            context.events.subscribe(Arc::new(ProgressBarObserver::new()));
        }
        let engine = PipelineEngine::from_context(Arc::clone(&store), context).with_stop_handle(stop);

        let interval = Duration::from_secs(self.config.pipeline.autosave_interval_secs);
        let autosave = AutosaveHandle::spawn(Arc::clone(&store), snapshot_path.to_path_buf(), interval);

        let report = engine.run().await;

        if autosave.failure_count() > 0 {
            warn!("{} autosaves failed during the job", autosave.failure_count());
        }
        autosave
            .shutdown()
            .await
            .with_context(|| format!("Failed to save progress to {}", snapshot_path.display()))?;
        info!("Progress saved to {}", snapshot_path.display());

        let stats = store.statistics();
        if stats.total_tokens() > 0 {
            info!(
                "🔢 {} prompt + {} completion tokens ({:.0} tokens/min)",
                stats.prompt_tokens,
                stats.completion_tokens,
                stats.tokens_per_minute()
            );
        }
        info!("Finished in {}", Self::format_duration(report.duration));

        Ok(report)
    }

    /// Item counts per status of a snapshot
    pub fn status(snapshot_path: &Path) -> Result<StatusCounts> {
        let store = ProgressStore::load(snapshot_path)
            .with_context(|| format!("Failed to load progress snapshot: {}", snapshot_path.display()))?;
        Ok(store.status_counts())
    }

    // Format duration in a human-readable format
    fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}.{:03}s", seconds, duration.subsec_millis())
        }
    }
}

/// Terminal progress bar fed by pipeline events
pub struct ProgressBarObserver {
    bar: ProgressBar,
}

impl ProgressBarObserver {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} items ({percent}%) {msg} {eta}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style.progress_chars("█▓▒░"));
        Self { bar }
    }
}

impl Default for ProgressBarObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineObserver for ProgressBarObserver {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::JobStarted { pending, .. } => self.bar.set_length(*pending),
            PipelineEvent::RoundStarted { round, .. } => self.bar.set_message(format!("round {}", round)),
            // counts are cumulative, so a repeated notification is harmless
            PipelineEvent::ChunkCompleted { round, progress, .. } => {
                self.bar.set_position(progress.completed);
                self.bar.set_message(format!("round {}, {} tokens", round, progress.tokens));
            }
            PipelineEvent::JobCompleted { .. } => self.bar.finish_and_clear(),
        }
    }
}
