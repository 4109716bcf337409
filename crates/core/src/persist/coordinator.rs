use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::aggregate::{DirtyFlag, SnapshotCapability};
use super::storage::{SaveBundle, Storage, StorageError};

const DEFAULT_SAVE_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SaveLoopConfig {
    pub period: Duration,
}

impl Default for SaveLoopConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_SAVE_PERIOD,
        }
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("save loop already running")]
    AlreadyRunning,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

struct WatchedAggregate {
    key: String,
    dirty: DirtyFlag,
    capability: SnapshotCapability,
}

struct CycleEntry {
    key: String,
    dirty: DirtyFlag,
    capability: SnapshotCapability,
}

enum CycleOutcome {
    Idle,
    Wrote,
    Failed,
}

/// Decouples frequent in-memory mutations from storage writes. Producers
/// only flip dirty flags; a single background loop swap-collects the flags
/// once per period, snapshots the dirty aggregates, and writes one bundle.
/// Write frequency is bounded to at most one bundle per period regardless
/// of mutation burst rate, and a flag set during an in-flight write is
/// re-observed on the next cycle rather than lost.
pub struct SaveCoordinator {
    storage: Arc<dyn Storage>,
    period: Duration,
    aggregates: Mutex<Vec<WatchedAggregate>>,
    writer: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    last_cycle: Mutex<Option<Duration>>,
}

impl SaveCoordinator {
    pub fn new(storage: Arc<dyn Storage>, config: SaveLoopConfig) -> Self {
        let period = normalize_period(config.period);
        let (shutdown, _) = watch::channel(false);
        Self {
            storage,
            period,
            aggregates: Mutex::new(Vec::new()),
            writer: tokio::sync::Mutex::new(()),
            shutdown,
            task: Mutex::new(None),
            last_cycle: Mutex::new(None),
        }
    }

    /// Registers a watched aggregate under its storage key and returns the
    /// flag its change observers flip. Registering the same key again
    /// returns the existing flag.
    pub fn register(&self, key: impl Into<String>, capability: SnapshotCapability) -> DirtyFlag {
        let key = key.into();
        if matches!(capability, SnapshotCapability::Transient) {
            warn!(aggregate = %key, "aggregate_not_serializable");
        }

        let mut aggregates = self
            .aggregates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = aggregates.iter().find(|entry| entry.key == key) {
            warn!(aggregate = %key, "aggregate_already_registered");
            return existing.dirty.clone();
        }

        let dirty = DirtyFlag::new();
        aggregates.push(WatchedAggregate {
            key,
            dirty: dirty.clone(),
            capability,
        });
        dirty
    }

    /// By-name equivalent of flipping an aggregate's dirty flag.
    pub fn mark_dirty(&self, key: &str) {
        let aggregates = self
            .aggregates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match aggregates.iter().find(|entry| entry.key == key) {
            Some(entry) => entry.dirty.mark(),
            None => warn!(aggregate = %key, "unknown_aggregate_marked"),
        }
    }

    /// Initialize storage and load the named entries; the startup path.
    /// Failures surface to the caller so startup can be gated or degraded.
    pub async fn load_bundle(&self, keys: &[&str]) -> Result<SaveBundle, StorageError> {
        self.storage.initialize().await?;
        self.storage.load(keys).await
    }

    /// Spawns the background save loop. Safe to call only once per
    /// activation.
    pub fn start(self: &Arc<Self>) -> Result<(), SaveError> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|running| !running.is_finished()) {
            return Err(SaveError::AlreadyRunning);
        }

        let _ = self.shutdown.send(false);
        let coordinator = Arc::clone(self);
        let shutdown_rx = self.shutdown.subscribe();
        *task = Some(tokio::spawn(coordinator.run_loop(shutdown_rx)));
        info!(period_ms = self.period.as_millis() as u64, "save_loop_started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Cancels the loop and waits for it to finish. Cancellation is
    /// observed at the loop's sleep, so a write already in flight always
    /// runs to completion first.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(error = %error, "save_loop_join_failed");
            }
        }
        info!("save_loop_stopped");
    }

    /// One awaited write of everything still dirty; the caller's final
    /// flush after `stop`. Returns the number of entries written.
    pub async fn flush(&self) -> Result<usize, SaveError> {
        let batch = self.collect_dirty();
        if batch.is_empty() {
            debug!("final_flush_empty");
            return Ok(0);
        }

        let _writer = self.writer.lock().await;
        let bundle = self.build_bundle(&batch);
        if bundle.is_empty() {
            return Ok(0);
        }
        let written = self.write_bundle(bundle).await?;
        info!(aggregates = written, "final_flush_complete");
        Ok(written)
    }

    pub fn last_cycle_duration(&self) -> Option<Duration> {
        *self
            .last_cycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            let outcome = self.run_cycle().await;
            let elapsed = started.elapsed();
            let delay = match outcome {
                CycleOutcome::Idle => self.period,
                CycleOutcome::Wrote | CycleOutcome::Failed => {
                    *self
                        .last_cycle
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(elapsed);
                    self.period.saturating_sub(elapsed)
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = sleep(delay) => {}
            }
        }
        debug!("save_loop_exited");
    }

    async fn run_cycle(&self) -> CycleOutcome {
        let batch = self.collect_dirty();
        if batch.is_empty() {
            return CycleOutcome::Idle;
        }

        let _writer = self.writer.lock().await;
        let bundle = self.build_bundle(&batch);
        if bundle.is_empty() {
            return CycleOutcome::Idle;
        }

        match self.write_bundle(bundle).await {
            Ok(written) => {
                debug!(aggregates = written, "save_cycle_complete");
                CycleOutcome::Wrote
            }
            Err(_) => CycleOutcome::Failed,
        }
    }

    /// Swap-collects every dirty flag set at this instant. A mark arriving
    /// afterwards belongs to the next cycle.
    fn collect_dirty(&self) -> Vec<CycleEntry> {
        let aggregates = self
            .aggregates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        aggregates
            .iter()
            .filter(|entry| entry.dirty.take())
            .map(|entry| CycleEntry {
                key: entry.key.clone(),
                dirty: entry.dirty.clone(),
                capability: entry.capability.clone(),
            })
            .collect()
    }

    /// Snapshots the batch. A snapshot failure skips that aggregate for
    /// this cycle and re-marks it so the next cycle retries; the rest of
    /// the bundle is unaffected.
    fn build_bundle(&self, batch: &[CycleEntry]) -> SaveBundle {
        let mut bundle = SaveBundle::new();
        for entry in batch {
            match &entry.capability {
                SnapshotCapability::Serializable(source) => match source.snapshot() {
                    Ok(text) => {
                        bundle.insert(entry.key.clone(), text);
                    }
                    Err(error) => {
                        warn!(aggregate = %entry.key, error = %error, "aggregate_snapshot_failed");
                        entry.dirty.mark();
                    }
                },
                SnapshotCapability::Transient => {}
            }
        }
        bundle
    }

    /// Writes one bundle. On failure every bundled key is re-marked dirty,
    /// so the next cycle retries with the latest snapshot, not this one.
    async fn write_bundle(&self, bundle: SaveBundle) -> Result<usize, StorageError> {
        let keys: Vec<String> = bundle.keys().cloned().collect();
        match self.storage.save(bundle).await {
            Ok(()) => Ok(keys.len()),
            Err(error) => {
                warn!(error = %error, "save_cycle_failed");
                let aggregates = self
                    .aggregates
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                for entry in aggregates.iter() {
                    if keys.iter().any(|key| *key == entry.key) {
                        entry.dirty.mark();
                    }
                }
                Err(error)
            }
        }
    }
}

fn normalize_period(period: Duration) -> Duration {
    if period.is_zero() {
        DEFAULT_SAVE_PERIOD
    } else {
        period
    }
}
