/*!
 * Background autosave for the progress store.
 *
 * While a job runs, a timer task flushes the store every interval (8 seconds
 * by default). Ticks with no change since the last save are skipped. A failed
 * save is logged and retried on the next tick; it never stops the job.
 */

use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::ProgressStore;
use crate::errors::StoreError;

/// Default interval between autosaves
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(8);

/// Handle to a running autosave task.
pub struct AutosaveHandle {
    store: Arc<ProgressStore>,
    path: PathBuf,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    saves: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
}

impl AutosaveHandle {
    /// Start saving `store` to `path` every `interval`.
    pub fn spawn(store: Arc<ProgressStore>, path: PathBuf, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let saves = Arc::new(AtomicU64::new(0));
        let failures = Arc::new(AtomicU64::new(0));

        let task = {
            let store = Arc::clone(&store);
            let path = path.clone();
            let saves = Arc::clone(&saves);
            let failures = Arc::clone(&failures);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // first tick completes immediately
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        _ = ticker.tick() => {
                            if !store.is_dirty() {
                                continue;
                            }
                            match save_blocking(Arc::clone(&store), path.clone()).await {
                                Ok(()) => {
                                    saves.fetch_add(1, Ordering::SeqCst);
                                    debug!("Autosaved progress to {}", path.display());
                                }
                                Err(e) => {
                                    failures.fetch_add(1, Ordering::SeqCst);
                                    warn!("Autosave to {} failed, retrying next tick: {}", path.display(), e);
                                }
                            }
                        }
                    }
                }
            })
        };

        Self {
            store,
            path,
            stop: Some(stop_tx),
            task,
            saves,
            failures,
        }
    }

    /// Number of successful timer-driven saves so far
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    /// Number of failed timer-driven saves so far
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Save immediately, outside the timer.
    pub async fn save_now(&self) -> Result<(), StoreError> {
        save_blocking(Arc::clone(&self.store), self.path.clone()).await
    }

    /// Stop the timer and perform the final flush.
    pub async fn shutdown(mut self) -> Result<(), StoreError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("Autosave task ended abnormally: {}", e);
        }
        save_blocking(Arc::clone(&self.store), self.path.clone()).await
    }
}

async fn save_blocking(store: Arc<ProgressStore>, path: PathBuf) -> Result<(), StoreError> {
    tokio::task::spawn_blocking(move || store.save(&path))
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e.to_string())))?
}
