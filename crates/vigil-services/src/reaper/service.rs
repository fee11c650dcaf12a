//! Upload reaper: watchdog and retention sweep over the upload axis.
//!
//! Three bounded scans per cycle: reset stuck transfers, permanently fail
//! rows past the retry ceiling, archive old settled rows. The scans act on
//! disjoint predicates, so their order within a cycle does not change the
//! end state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use vigil_core::VigilConfig;
use vigil_db::store_traits::RecordingStore;

/// Outcome of one reaper cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ReaperStats {
    pub timestamp: DateTime<Utc>,
    pub stuck_reset: u64,
    pub max_retries_reached: u64,
    pub archived: u64,
    pub errors: u32,
    pub duration_ms: u64,
}

impl ReaperStats {
    fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            stuck_reset: 0,
            max_retries_reached: 0,
            archived: 0,
            errors: 0,
            duration_ms: 0,
        }
    }

    fn changed_anything(&self) -> bool {
        self.stuck_reset + self.max_retries_reached + self.archived > 0
    }
}

#[derive(Default)]
struct ReaperState {
    running: bool,
    last_run: Option<ReaperStats>,
}

pub struct UploadReaper {
    config: VigilConfig,
    recordings: Arc<dyn RecordingStore>,
    state: Mutex<ReaperState>,
    shutdown_tx: AsyncMutex<Option<mpsc::Sender<()>>>,
    handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl UploadReaper {
    pub fn new(config: VigilConfig, recordings: Arc<dyn RecordingStore>) -> Self {
        Self {
            config,
            recordings,
            state: Mutex::new(ReaperState::default()),
            shutdown_tx: AsyncMutex::new(None),
            handle: AsyncMutex::new(None),
        }
    }

    /// Spawn the cycle loop: one cycle immediately, then one per interval.
    pub async fn start(self: &Arc<Self>) {
        let mut shutdown_guard = self.shutdown_tx.lock().await;
        if shutdown_guard.is_some() {
            tracing::warn!("Upload reaper already running");
            return;
        }

        let (tx, mut rx) = mpsc::channel::<()>(1);
        *shutdown_guard = Some(tx);

        let reaper = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut tick =
                interval(Duration::from_secs(reaper.config.reaper_interval_minutes * 60));
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                interval_minutes = reaper.config.reaper_interval_minutes,
                stuck_threshold_minutes = reaper.config.stuck_threshold_minutes,
                upload_max_retries = reaper.config.upload_max_retries,
                archive_after_days = reaper.config.archive_after_days,
                "Upload reaper started"
            );

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = tick.tick() => {
                        reaper.run_cycle().await;
                    }
                }
            }

            tracing::info!("Upload reaper stopped");
        });

        *self.handle.lock().await = Some(handle);
        if let Ok(mut state) = self.state.lock() {
            state.running = true;
        }
    }

    /// Signal shutdown and wait for the in-flight cycle to finish.
    pub async fn stop(&self) {
        let tx = self.shutdown_tx.lock().await.take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        if let Ok(mut state) = self.state.lock() {
            state.running = false;
        }
    }

    /// Run one cycle immediately and return its statistics. Operational
    /// tooling hook.
    pub async fn force_cleanup(&self) -> ReaperStats {
        tracing::info!("Forced reaper cleanup requested");
        self.run_cycle().await
    }

    /// Config snapshot, last run, next scheduled run.
    pub fn status(&self) -> serde_json::Value {
        let (running, last_run) = match self.state.lock() {
            Ok(state) => (state.running, state.last_run.clone()),
            Err(_) => (false, None),
        };
        let next_run = last_run
            .as_ref()
            .map(|stats| stats.timestamp + ChronoDuration::minutes(self.config.reaper_interval_minutes as i64));
        serde_json::json!({
            "running": running,
            "interval_minutes": self.config.reaper_interval_minutes,
            "stuck_threshold_minutes": self.config.stuck_threshold_minutes,
            "upload_max_retries": self.config.upload_max_retries,
            "archive_after_days": self.config.archive_after_days,
            "batch_size": self.config.reaper_batch_size,
            "archive_batch_size": self.config.archive_batch_size,
            "last_run": last_run,
            "next_run": next_run,
        })
    }

    /// One cycle: the three scans in sequence, each error-isolated.
    pub async fn run_cycle(&self) -> ReaperStats {
        let started = Instant::now();
        let now = Utc::now();
        let mut stats = ReaperStats::new();

        let stuck_cutoff = now - ChronoDuration::minutes(self.config.stuck_threshold_minutes);
        match self
            .recordings
            .reset_stuck_uploads(stuck_cutoff, self.config.reaper_batch_size)
            .await
        {
            Ok(count) => {
                stats.stuck_reset = count;
                if count > 0 {
                    tracing::warn!(count, "Reset stuck uploads back to queued");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Stuck-upload scan failed");
                stats.errors += 1;
            }
        }

        match self
            .recordings
            .fail_exhausted_uploads(self.config.upload_max_retries, self.config.reaper_batch_size)
            .await
        {
            Ok(count) => {
                stats.max_retries_reached = count;
                if count > 0 {
                    tracing::warn!(
                        count,
                        ceiling = self.config.upload_max_retries,
                        "Failed uploads past the retry ceiling"
                    );
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Max-retry scan failed");
                stats.errors += 1;
            }
        }

        let archive_cutoff = now - ChronoDuration::days(self.config.archive_after_days);
        match self
            .recordings
            .archive_old_uploads(archive_cutoff, self.config.archive_batch_size)
            .await
        {
            Ok(count) => stats.archived = count,
            Err(e) => {
                tracing::error!(error = %e, "Archive scan failed");
                stats.errors += 1;
            }
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;

        if stats.changed_anything() || stats.errors > 0 {
            tracing::info!(
                stuck_reset = stats.stuck_reset,
                max_retries_reached = stats.max_retries_reached,
                archived = stats.archived,
                errors = stats.errors,
                duration_ms = stats.duration_ms,
                "Reaper cycle completed"
            );
        } else {
            tracing::debug!(duration_ms = stats.duration_ms, "Reaper cycle idle");
        }

        if let Ok(mut state) = self.state.lock() {
            state.last_run = Some(stats.clone());
        }
        stats
    }
}
