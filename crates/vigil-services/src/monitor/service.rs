//! Reconciliation engine.
//!
//! One automation cycle per interval, four steps strictly in sequence:
//! start missing recordings, recover orphans, correct stale rows, finalize
//! temporary files. Each step is error-isolated; one unreachable engine or
//! one bad row never aborts the rest of the cycle. Cycles never overlap
//! because the loop awaits `run_cycle` before re-arming the timer.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use vigil_core::models::{NewRecording, Recording};
use vigil_core::{recording_path, VigilConfig};
use vigil_db::store_traits::{CameraStore, RecordingStore};

use crate::monitor::file_match;
use crate::services::media_engine::MediaEngine;

/// Rows examined per scan per cycle. Anything beyond this waits for the next
/// cycle rather than blowing up one tick.
const SCAN_LIMIT: i64 = 100;

/// Re-stat delay when deciding whether a temporary file is still growing.
const GROWTH_PROBE_DELAY: Duration = Duration::from_millis(500);

/// Outcome of one automation cycle.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorCycleReport {
    pub timestamp: DateTime<Utc>,
    pub started_new: u32,
    pub orphans_recovered: u32,
    pub orphans_errored: u32,
    pub stale_recovered: u32,
    pub stale_errored: u32,
    pub files_finalized: u32,
    pub files_linked: u32,
    /// Finalized files with no candidate row; surfaced for audit, never
    /// auto-inserted.
    pub orphan_files: Vec<String>,
    pub errors: u32,
    pub duration_ms: u64,
}

impl MonitorCycleReport {
    fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            started_new: 0,
            orphans_recovered: 0,
            orphans_errored: 0,
            stale_recovered: 0,
            stale_errored: 0,
            files_finalized: 0,
            files_linked: 0,
            orphan_files: Vec::new(),
            errors: 0,
            duration_ms: 0,
        }
    }

    fn changed_anything(&self) -> bool {
        self.started_new
            + self.orphans_recovered
            + self.orphans_errored
            + self.stale_recovered
            + self.stale_errored
            + self.files_finalized
            > 0
    }
}

#[derive(Default)]
struct MonitorState {
    running: bool,
    last_report: Option<MonitorCycleReport>,
}

pub struct RecordingMonitor {
    config: VigilConfig,
    recordings: Arc<dyn RecordingStore>,
    cameras: Arc<dyn CameraStore>,
    engine: Arc<dyn MediaEngine>,
    state: Mutex<MonitorState>,
    shutdown_tx: AsyncMutex<Option<mpsc::Sender<()>>>,
    handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl RecordingMonitor {
    pub fn new(
        config: VigilConfig,
        recordings: Arc<dyn RecordingStore>,
        cameras: Arc<dyn CameraStore>,
        engine: Arc<dyn MediaEngine>,
    ) -> Self {
        Self {
            config,
            recordings,
            cameras,
            engine,
            state: Mutex::new(MonitorState::default()),
            shutdown_tx: AsyncMutex::new(None),
            handle: AsyncMutex::new(None),
        }
    }

    /// Spawn the cycle loop. The first cycle runs immediately, then one per
    /// configured interval. Calling start twice is a logged no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut shutdown_guard = self.shutdown_tx.lock().await;
        if shutdown_guard.is_some() {
            tracing::warn!("Recording monitor already running");
            return;
        }

        let (tx, mut rx) = mpsc::channel::<()>(1);
        *shutdown_guard = Some(tx);

        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(monitor.config.monitor_interval_secs));
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                interval_secs = monitor.config.monitor_interval_secs,
                "Recording monitor started"
            );

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = tick.tick() => {
                        monitor.run_cycle().await;
                    }
                }
            }

            tracing::info!("Recording monitor stopped");
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

    /// Running flag, interval, and the last cycle's report.
    pub fn status(&self) -> serde_json::Value {
        let (running, last_report) = match self.state.lock() {
            Ok(state) => (state.running, state.last_report.clone()),
            Err(_) => (false, None),
        };
        serde_json::json!({
            "running": running,
            "interval_secs": self.config.monitor_interval_secs,
            "last_run": last_report,
        })
    }

    /// One automation cycle: all four steps in order, each error-isolated.
    pub async fn run_cycle(&self) -> MonitorCycleReport {
        let started = Instant::now();
        let mut report = MonitorCycleReport::new();
        // Files bound this cycle; keeps every binding one-to-one across steps.
        let mut claimed: HashSet<PathBuf> = HashSet::new();

        match self.check_streams_without_recording().await {
            Ok(count) => report.started_new = count,
            Err(e) => {
                tracing::error!(error = %e, "Stream check step failed");
                report.errors += 1;
            }
        }

        match self.process_orphan_recordings(&mut claimed).await {
            Ok((recovered, errored)) => {
                report.orphans_recovered = recovered;
                report.orphans_errored = errored;
            }
            Err(e) => {
                tracing::error!(error = %e, "Orphan recovery step failed");
                report.errors += 1;
            }
        }

        match self.check_stale_recordings(&mut claimed).await {
            Ok((recovered, errored)) => {
                report.stale_recovered = recovered;
                report.stale_errored = errored;
            }
            Err(e) => {
                tracing::error!(error = %e, "Stale check step failed");
                report.errors += 1;
            }
        }

        match self.finalize_temporary_files(&mut claimed).await {
            Ok((finalized, linked, orphan_files)) => {
                report.files_finalized = finalized;
                report.files_linked = linked;
                report.orphan_files = orphan_files;
            }
            Err(e) => {
                tracing::error!(error = %e, "Temp file finalization step failed");
                report.errors += 1;
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;

        if report.changed_anything() || report.errors > 0 {
            tracing::info!(
                started_new = report.started_new,
                orphans_recovered = report.orphans_recovered,
                orphans_errored = report.orphans_errored,
                stale_recovered = report.stale_recovered,
                stale_errored = report.stale_errored,
                files_finalized = report.files_finalized,
                files_linked = report.files_linked,
                orphan_files = report.orphan_files.len(),
                errors = report.errors,
                duration_ms = report.duration_ms,
                "Reconciliation cycle completed"
            );
        } else {
            tracing::debug!(duration_ms = report.duration_ms, "Reconciliation cycle idle");
        }

        if let Ok(mut state) = self.state.lock() {
            state.last_report = Some(report.clone());
        }
        report
    }

    /// Step 1: streams the engine reports live that have no in-progress row.
    #[tracing::instrument(skip(self))]
    async fn check_streams_without_recording(&self) -> Result<u32, anyhow::Error> {
        let streams = self.engine.active_streams().await?;
        let now = Utc::now();
        let guard_window = now - ChronoDuration::seconds(self.config.duplicate_guard_secs);
        let mut started = 0u32;

        for stream in streams {
            let camera_id = stream.stream.as_str();

            if stream.recording_active {
                tracing::debug!(camera_id, "Engine already recording, skipping");
                continue;
            }

            match self.cameras.recording_enabled(camera_id).await {
                Ok(Some(true)) => {}
                Ok(Some(false)) => {
                    tracing::debug!(camera_id, "Recording disabled for camera, skipping");
                    continue;
                }
                Ok(None) => {
                    tracing::debug!(camera_id, "Stream has no registered camera, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::error!(camera_id, error = %e, "Camera lookup failed, skipping");
                    continue;
                }
            }

            // Double guard: no in-progress row, and nothing created within
            // the recent window. The second check closes the race between
            // consecutive cycles.
            match self.recordings.active_for_camera(camera_id).await {
                Ok(active) if !active.is_empty() => continue,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(camera_id, error = %e, "Active-row lookup failed, skipping");
                    continue;
                }
            }
            match self.recordings.created_since(camera_id, guard_window).await {
                Ok(0) => {}
                Ok(recent) => {
                    tracing::debug!(camera_id, recent, "Row created within guard window, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::error!(camera_id, error = %e, "Recent-row lookup failed, skipping");
                    continue;
                }
            }

            match self
                .engine
                .start_recording(camera_id, self.config.max_segment_seconds)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(camera_id, "Engine refused to start recording");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(camera_id, error = %e, "Start recording call failed");
                    continue;
                }
            }

            let new = NewRecording::forced_by_automation(camera_id, self.config.max_segment_seconds);
            match self.recordings.insert(&new).await {
                Ok(recording) => {
                    tracing::info!(
                        camera_id,
                        recording_id = %recording.id,
                        "Started recording for stream without one"
                    );
                    started += 1;
                }
                Err(e) => {
                    tracing::error!(camera_id, error = %e, "Failed to insert recording row");
                }
            }
        }

        Ok(started)
    }

    /// Step 2: in-progress rows past the grace period with no file bound.
    #[tracing::instrument(skip(self, claimed))]
    async fn process_orphan_recordings(
        &self,
        claimed: &mut HashSet<PathBuf>,
    ) -> Result<(u32, u32), anyhow::Error> {
        let now = Utc::now();
        let grace_cutoff = now - ChronoDuration::minutes(self.config.orphan_grace_minutes);
        let error_cutoff = now - ChronoDuration::minutes(self.config.orphan_error_minutes);

        let orphans = self
            .recordings
            .orphans_older_than(grace_cutoff, SCAN_LIMIT)
            .await?;

        let mut recovered = 0u32;
        let mut errored = 0u32;

        for orphan in orphans {
            let matched = file_match::find_recording_file(
                &self.config.storage_root,
                &orphan.camera_id,
                orphan.start_time,
                self.config.orphan_tolerance_minutes,
                claimed,
            )
            .await;

            match matched {
                Some(file) => {
                    if self.bind_matched_file(&orphan, &file).await {
                        claimed.insert(file.path);
                        recovered += 1;
                    }
                }
                None if orphan.created_at < error_cutoff => {
                    let note = format!(
                        "No recording file found within {} minutes of start after {} minutes",
                        self.config.orphan_tolerance_minutes, self.config.orphan_error_minutes
                    );
                    if self.mark_row_error(&orphan, &note).await {
                        errored += 1;
                    }
                }
                None => {
                    tracing::debug!(
                        recording_id = %orphan.id,
                        camera_id = %orphan.camera_id,
                        "Orphan has no file yet, leaving for next cycle"
                    );
                }
            }
        }

        Ok((recovered, errored))
    }

    /// Step 3: in-progress rows older than any segment should run. Wider
    /// tolerance than the orphan scan; a stale row that already has a file
    /// bound just gets completed.
    #[tracing::instrument(skip(self, claimed))]
    async fn check_stale_recordings(
        &self,
        claimed: &mut HashSet<PathBuf>,
    ) -> Result<(u32, u32), anyhow::Error> {
        let now = Utc::now();
        let cutoff = now - ChronoDuration::minutes(self.config.stale_threshold_minutes);
        let stale = self.recordings.stale_older_than(cutoff, SCAN_LIMIT).await?;

        let mut recovered = 0u32;
        let mut errored = 0u32;

        for row in stale {
            if let Some(ref path) = row.file_path {
                let filename = row
                    .filename
                    .clone()
                    .unwrap_or_else(|| basename(path).to_string());
                let updated = self
                    .recordings
                    .bind_file(row.id, path, &filename, None, now)
                    .await
                    .unwrap_or(false);
                if updated {
                    tracing::info!(
                        recording_id = %row.id,
                        camera_id = %row.camera_id,
                        "Completed stale recording with existing file"
                    );
                    recovered += 1;
                }
                continue;
            }

            let matched = file_match::find_recording_file(
                &self.config.storage_root,
                &row.camera_id,
                row.start_time,
                self.config.stale_tolerance_minutes,
                claimed,
            )
            .await;

            match matched {
                Some(file) => {
                    if self.bind_matched_file(&row, &file).await {
                        claimed.insert(file.path);
                        recovered += 1;
                    }
                }
                None => {
                    let note = format!(
                        "Recording stale after {} minutes with no file on disk",
                        self.config.stale_threshold_minutes
                    );
                    if self.mark_row_error(&row, &note).await {
                        errored += 1;
                    }
                }
            }
        }

        Ok((recovered, errored))
    }

    /// Step 4: rename settled `.`-prefixed files and link each to the nearest
    /// orphan row. Unlinked files are reported, never turned into rows.
    #[tracing::instrument(skip(self, claimed))]
    async fn finalize_temporary_files(
        &self,
        claimed: &mut HashSet<PathBuf>,
    ) -> Result<(u32, u32, Vec<String>), anyhow::Error> {
        let mut finalized = 0u32;
        let mut linked = 0u32;
        let mut orphan_files: Vec<String> = Vec::new();

        for (camera_id, temp_path) in self.collect_temp_files().await {
            let name = match temp_path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };

            if self.still_growing(&temp_path).await {
                tracing::debug!(file = %temp_path.display(), "Temp file still growing, skipping");
                continue;
            }

            let final_name = recording_path::final_name(&name).to_string();
            let final_path = temp_path.with_file_name(&final_name);
            if tokio::fs::rename(&temp_path, &final_path).await.is_err() {
                tracing::warn!(file = %temp_path.display(), "Failed to finalize temp file");
                continue;
            }
            finalized += 1;
            tracing::info!(file = %final_path.display(), "Finalized temporary recording file");

            let ts = match recording_path::parse_timestamp(&final_name) {
                Some(ts) => ts,
                None => {
                    orphan_files.push(final_path.to_string_lossy().into_owned());
                    continue;
                }
            };

            let window = ChronoDuration::minutes(self.config.link_window_minutes);
            let candidates = self
                .recordings
                .orphans_in_window(&camera_id, ts - window, ts + window)
                .await
                .unwrap_or_default();

            // Most time-proximate row wins; a file never links to two rows.
            let nearest = candidates
                .into_iter()
                .min_by_key(|r| (r.start_time - ts).abs());

            match nearest {
                Some(row) => {
                    let size = tokio::fs::metadata(&final_path)
                        .await
                        .ok()
                        .map(|m| m.len() as i64);
                    let bound = self
                        .recordings
                        .bind_file(
                            row.id,
                            &final_path.to_string_lossy(),
                            &final_name,
                            size,
                            Utc::now(),
                        )
                        .await
                        .unwrap_or(false);
                    if bound {
                        tracing::info!(
                            recording_id = %row.id,
                            camera_id = %camera_id,
                            file = %final_path.display(),
                            "Linked finalized file to orphan recording"
                        );
                        claimed.insert(final_path);
                        linked += 1;
                    } else {
                        orphan_files.push(final_path.to_string_lossy().into_owned());
                    }
                }
                None => {
                    tracing::warn!(
                        camera_id = %camera_id,
                        file = %final_path.display(),
                        "Finalized file has no candidate recording row"
                    );
                    orphan_files.push(final_path.to_string_lossy().into_owned());
                }
            }
        }

        Ok((finalized, linked, orphan_files))
    }

    async fn bind_matched_file(&self, row: &Recording, file: &file_match::MatchedFile) -> bool {
        let end_time = file.modified.unwrap_or_else(Utc::now);
        let bound = self
            .recordings
            .bind_file(
                row.id,
                &file.path.to_string_lossy(),
                &file.filename,
                file.size,
                end_time,
            )
            .await;
        match bound {
            Ok(true) => {
                tracing::info!(
                    recording_id = %row.id,
                    camera_id = %row.camera_id,
                    file = %file.path.display(),
                    "Recovered recording by file match"
                );
                true
            }
            Ok(false) => {
                tracing::debug!(recording_id = %row.id, "Row changed under us, leaving it");
                false
            }
            Err(e) => {
                tracing::error!(recording_id = %row.id, error = %e, "Failed to bind file");
                false
            }
        }
    }

    async fn mark_row_error(&self, row: &Recording, note: &str) -> bool {
        match self.recordings.mark_error(row.id, note).await {
            Ok(true) => {
                tracing::warn!(
                    recording_id = %row.id,
                    camera_id = %row.camera_id,
                    note,
                    "Recording marked as error"
                );
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::error!(recording_id = %row.id, error = %e, "Failed to mark error");
                false
            }
        }
    }

    /// `(camera_id, path)` for every `.`-prefixed segment under
    /// `<root>/<camera>/` and `<root>/<camera>/<date>/`. Unreadable
    /// directories are skipped.
    async fn collect_temp_files(&self) -> Vec<(String, PathBuf)> {
        let mut found: Vec<(String, PathBuf)> = Vec::new();

        let mut cameras = match tokio::fs::read_dir(&self.config.storage_root).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(error = %e, "Storage root not readable");
                return found;
            }
        };

        while let Ok(Some(camera_entry)) = cameras.next_entry().await {
            let camera_path = camera_entry.path();
            if !camera_path.is_dir() {
                continue;
            }
            let camera_id = camera_entry.file_name().to_string_lossy().into_owned();

            let mut entries = match tokio::fs::read_dir(&camera_path).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.is_dir() {
                    let mut files = match tokio::fs::read_dir(&path).await {
                        Ok(files) => files,
                        Err(_) => continue,
                    };
                    while let Ok(Some(file)) = files.next_entry().await {
                        let name = file.file_name().to_string_lossy().into_owned();
                        if recording_path::is_temp_file(&name) {
                            found.push((camera_id.clone(), file.path()));
                        }
                    }
                } else {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if recording_path::is_temp_file(&name) {
                        found.push((camera_id.clone(), path));
                    }
                }
            }
        }

        found
    }

    /// Size-stability probe: stat, wait, stat again. Any stat failure reads
    /// as still growing so the file is left alone.
    async fn still_growing(&self, path: &std::path::Path) -> bool {
        let first = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => return true,
        };
        tokio::time::sleep(GROWTH_PROBE_DELAY).await;
        match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len() != first,
            Err(_) => true,
        }
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::mock_store::{
        blank_recording, MockCameraStore, MockMediaEngine, MockRecordingStore,
    };
    use std::fs;
    use std::path::Path;
    use vigil_core::models::RecordingStatus;

    fn test_config(root: &Path) -> VigilConfig {
        VigilConfig {
            environment: "test".into(),
            database_url: "postgresql://localhost/vigil".into(),
            db_max_connections: 5,
            db_timeout_seconds: 5,
            engine_api_url: "http://localhost:8000/index/api".into(),
            engine_secret: "secret".into(),
            engine_app: "live".into(),
            engine_schemas: vec!["rtsp".into()],
            storage_root: root.to_path_buf(),
            monitor_interval_secs: 30,
            orphan_grace_minutes: 5,
            orphan_error_minutes: 15,
            stale_threshold_minutes: 45,
            orphan_tolerance_minutes: 5,
            stale_tolerance_minutes: 10,
            link_window_minutes: 5,
            duplicate_guard_secs: 30,
            max_segment_seconds: 1800,
            reaper_interval_minutes: 5,
            stuck_threshold_minutes: 30,
            upload_max_retries: 5,
            archive_after_days: 30,
            reaper_batch_size: 100,
            archive_batch_size: 500,
        }
    }

    struct Fixture {
        monitor: Arc<RecordingMonitor>,
        recordings: Arc<MockRecordingStore>,
        cameras: Arc<MockCameraStore>,
        engine: Arc<MockMediaEngine>,
        root: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let recordings = Arc::new(MockRecordingStore::new());
        let cameras = Arc::new(MockCameraStore::new());
        let engine = Arc::new(MockMediaEngine::new());
        let monitor = Arc::new(RecordingMonitor::new(
            test_config(root.path()),
            recordings.clone(),
            cameras.clone(),
            engine.clone(),
        ));
        Fixture {
            monitor,
            recordings,
            cameras,
            engine,
            root,
        }
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, b"segment-bytes").unwrap();
        path
    }

    fn segment_name(ts: DateTime<Utc>) -> String {
        recording_path::format_filename(ts, 0, "mp4")
    }

    fn row_snapshot(recordings: &MockRecordingStore) -> Vec<(uuid::Uuid, String, String, Option<String>, i32)> {
        let mut rows: Vec<_> = recordings
            .all()
            .into_iter()
            .map(|r| {
                (
                    r.id,
                    r.status.to_string(),
                    r.upload_status.to_string(),
                    r.file_path,
                    r.upload_attempts,
                )
            })
            .collect();
        rows.sort_by_key(|r| r.0);
        rows
    }

    #[tokio::test]
    async fn starts_recording_for_idle_stream() {
        let f = fixture();
        f.cameras.register("cam-1", true);
        f.engine.add_stream("cam-1", false);

        let report = f.monitor.run_cycle().await;

        assert_eq!(report.started_new, 1);
        assert_eq!(f.engine.started(), vec!["cam-1".to_string()]);
        let rows = f.recordings.all();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, RecordingStatus::Recording);
        assert_eq!(rows[0].metadata["started_by"], serde_json::json!("recording_monitor"));
        assert_eq!(rows[0].metadata["forced"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn skips_stream_already_recording_at_engine() {
        let f = fixture();
        f.cameras.register("cam-1", true);
        f.engine.add_stream("cam-1", true);

        let report = f.monitor.run_cycle().await;

        assert_eq!(report.started_new, 0);
        assert!(f.engine.started().is_empty());
        assert!(f.recordings.is_empty());
    }

    #[tokio::test]
    async fn skips_unregistered_and_disabled_cameras() {
        let f = fixture();
        f.cameras.register("cam-off", false);
        f.engine.add_stream("cam-off", false);
        f.engine.add_stream("cam-unknown", false);

        let report = f.monitor.run_cycle().await;

        assert_eq!(report.started_new, 0);
        assert!(f.recordings.is_empty());
    }

    #[tokio::test]
    async fn active_row_blocks_second_start() {
        let f = fixture();
        f.cameras.register("cam-1", true);
        f.engine.add_stream("cam-1", false);
        f.recordings
            .seed(blank_recording("cam-1", Utc::now() - ChronoDuration::minutes(2)));

        let report = f.monitor.run_cycle().await;

        assert_eq!(report.started_new, 0);
        assert!(f.engine.started().is_empty());
        let active: Vec<_> = f
            .recordings
            .all()
            .into_iter()
            .filter(|r| r.status == RecordingStatus::Recording)
            .collect();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn recent_row_within_guard_window_blocks_start() {
        let f = fixture();
        f.cameras.register("cam-1", true);
        f.engine.add_stream("cam-1", false);
        // Completed row created 10s ago, inside the 30s guard.
        let mut row = blank_recording("cam-1", Utc::now() - ChronoDuration::seconds(10));
        row.status = RecordingStatus::Completed;
        f.recordings.seed(row);

        let report = f.monitor.run_cycle().await;
        assert_eq!(report.started_new, 0);
    }

    #[tokio::test]
    async fn row_older_than_guard_window_allows_start() {
        let f = fixture();
        f.cameras.register("cam-1", true);
        f.engine.add_stream("cam-1", false);
        let mut row = blank_recording("cam-1", Utc::now() - ChronoDuration::seconds(45));
        row.status = RecordingStatus::Completed;
        f.recordings.seed(row);

        let report = f.monitor.run_cycle().await;
        assert_eq!(report.started_new, 1);
    }

    #[tokio::test]
    async fn engine_refusal_leaves_no_row() {
        let f = fixture();
        f.cameras.register("cam-1", true);
        f.engine.add_stream("cam-1", false);
        f.engine.refuse_start("cam-1");

        let report = f.monitor.run_cycle().await;

        assert_eq!(report.started_new, 0);
        assert!(f.recordings.is_empty());
    }

    #[tokio::test]
    async fn orphan_recovered_by_file_match() {
        // Scenario: row six minutes old, file named two minutes after start.
        let f = fixture();
        let start = Utc::now() - ChronoDuration::minutes(6);
        let id = f.recordings.seed(blank_recording("cam-1", start));

        let file_ts = start + ChronoDuration::minutes(2);
        let dir = f
            .root
            .path()
            .join("cam-1")
            .join(recording_path::date_dir(file_ts));
        touch(&dir, &segment_name(file_ts));

        let report = f.monitor.run_cycle().await;

        assert_eq!(report.orphans_recovered, 1);
        let row = f.recordings.get(id).unwrap();
        assert_eq!(row.status, RecordingStatus::Completed);
        assert!(row.file_path.is_some());
        assert!(row.end_time.is_some());
        assert_eq!(row.file_size, Some(13));
    }

    #[tokio::test]
    async fn orphan_younger_than_grace_left_alone() {
        let f = fixture();
        let start = Utc::now() - ChronoDuration::minutes(4);
        let id = f.recordings.seed(blank_recording("cam-1", start));

        let dir = f
            .root
            .path()
            .join("cam-1")
            .join(recording_path::date_dir(start));
        touch(&dir, &segment_name(start));

        let report = f.monitor.run_cycle().await;

        assert_eq!(report.orphans_recovered, 0);
        let row = f.recordings.get(id).unwrap();
        assert_eq!(row.status, RecordingStatus::Recording);
        assert!(row.file_path.is_none());
    }

    #[tokio::test]
    async fn orphan_past_ceiling_without_file_marked_error() {
        let f = fixture();
        let start = Utc::now() - ChronoDuration::minutes(16);
        let id = f.recordings.seed(blank_recording("cam-1", start));

        let report = f.monitor.run_cycle().await;

        assert_eq!(report.orphans_errored, 1);
        let row = f.recordings.get(id).unwrap();
        assert_eq!(row.status, RecordingStatus::Error);
        assert!(row.error_message.is_some());
        assert!(row.metadata["error_note"].is_string());
    }

    #[tokio::test]
    async fn orphan_between_grace_and_ceiling_waits() {
        let f = fixture();
        let start = Utc::now() - ChronoDuration::minutes(10);
        let id = f.recordings.seed(blank_recording("cam-1", start));

        let report = f.monitor.run_cycle().await;

        assert_eq!(report.orphans_errored, 0);
        assert_eq!(
            f.recordings.get(id).unwrap().status,
            RecordingStatus::Recording
        );
    }

    #[tokio::test]
    async fn stale_recording_without_file_marked_error() {
        // Fifty minutes in progress, nothing on disk anywhere in the window.
        let f = fixture();
        let start = Utc::now() - ChronoDuration::minutes(50);
        let id = f.recordings.seed(blank_recording("cam-1", start));

        f.monitor.run_cycle().await;

        assert_eq!(f.recordings.get(id).unwrap().status, RecordingStatus::Error);
    }

    #[tokio::test]
    async fn stale_recording_with_bound_file_completed() {
        let f = fixture();
        let start = Utc::now() - ChronoDuration::minutes(50);
        let mut row = blank_recording("cam-1", start);
        row.file_path = Some("/srv/record/live/cam-1/old-segment.mp4".into());
        let id = f.recordings.seed(row);

        let report = f.monitor.run_cycle().await;

        assert_eq!(report.stale_recovered, 1);
        let row = f.recordings.get(id).unwrap();
        assert_eq!(row.status, RecordingStatus::Completed);
        assert!(row.end_time.is_some());
    }

    #[tokio::test]
    async fn stale_scan_uses_wider_tolerance() {
        let f = fixture();
        let start = Utc::now() - ChronoDuration::minutes(50);
        let id = f.recordings.seed(blank_recording("cam-1", start));

        // Eight minutes off start: outside the +-5 orphan window, inside the
        // +-10 stale window.
        let file_ts = start + ChronoDuration::minutes(8);
        let dir = f
            .root
            .path()
            .join("cam-1")
            .join(recording_path::date_dir(file_ts));
        touch(&dir, &segment_name(file_ts));

        let mut claimed = HashSet::new();
        let (recovered, errored) = f.monitor.check_stale_recordings(&mut claimed).await.unwrap();

        assert_eq!((recovered, errored), (1, 0));
        assert_eq!(
            f.recordings.get(id).unwrap().status,
            RecordingStatus::Completed
        );
    }

    #[tokio::test]
    async fn temp_file_finalized_and_linked_to_nearest_orphan() {
        let f = fixture();
        let ts = Utc::now() - ChronoDuration::minutes(2);
        let near = f.recordings.seed(blank_recording(
            "cam-1",
            ts + ChronoDuration::seconds(30),
        ));
        let far = f.recordings.seed(blank_recording(
            "cam-1",
            ts - ChronoDuration::minutes(4),
        ));

        let dir = f.root.path().join("cam-1").join(recording_path::date_dir(ts));
        let temp = touch(&dir, &format!(".{}", segment_name(ts)));

        let report = f.monitor.run_cycle().await;

        assert_eq!(report.files_finalized, 1);
        assert_eq!(report.files_linked, 1);
        assert!(!temp.exists());
        assert!(dir.join(segment_name(ts)).exists());

        let near_row = f.recordings.get(near).unwrap();
        assert_eq!(near_row.status, RecordingStatus::Completed);
        assert!(near_row.end_time.is_some());
        // The farther row stays untouched; one file binds one row.
        assert_eq!(f.recordings.get(far).unwrap().status, RecordingStatus::Recording);
    }

    #[tokio::test]
    async fn temp_file_without_candidate_reported_not_inserted() {
        let f = fixture();
        let ts = Utc::now() - ChronoDuration::minutes(2);
        let dir = f.root.path().join("cam-1").join(recording_path::date_dir(ts));
        touch(&dir, &format!(".{}", segment_name(ts)));

        let report = f.monitor.run_cycle().await;

        assert_eq!(report.files_finalized, 1);
        assert_eq!(report.files_linked, 0);
        assert_eq!(report.orphan_files.len(), 1);
        assert!(f.recordings.is_empty());
    }

    #[tokio::test]
    async fn second_cycle_is_idempotent() {
        let f = fixture();
        f.cameras.register("cam-1", true);
        f.engine.add_stream("cam-1", false);

        let orphan_start = Utc::now() - ChronoDuration::minutes(6);
        f.recordings.seed(blank_recording("cam-2", orphan_start));
        let dir = f
            .root
            .path()
            .join("cam-2")
            .join(recording_path::date_dir(orphan_start));
        touch(&dir, &segment_name(orphan_start));

        f.monitor.run_cycle().await;
        let after_first = row_snapshot(&f.recordings);

        let report = f.monitor.run_cycle().await;
        let after_second = row_snapshot(&f.recordings);

        assert_eq!(after_first, after_second);
        assert_eq!(report.started_new, 0);
        assert_eq!(report.orphans_recovered, 0);
        assert_eq!(report.files_finalized, 0);
    }

    #[tokio::test]
    async fn one_active_recording_per_camera_after_cycle() {
        let f = fixture();
        f.cameras.register("cam-1", true);
        f.engine.add_stream("cam-1", false);

        f.monitor.run_cycle().await;
        f.monitor.run_cycle().await;

        let active: Vec<_> = f
            .recordings
            .all()
            .into_iter()
            .filter(|r| r.camera_id == "cam-1" && r.status == RecordingStatus::Recording)
            .collect();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn engine_failure_does_not_block_other_steps() {
        let f = fixture();
        f.engine.fail_listing();
        let start = Utc::now() - ChronoDuration::minutes(16);
        let id = f.recordings.seed(blank_recording("cam-1", start));

        let report = f.monitor.run_cycle().await;

        assert_eq!(report.errors, 1);
        assert_eq!(f.recordings.get(id).unwrap().status, RecordingStatus::Error);
    }

    #[tokio::test]
    async fn status_reports_last_run() {
        let f = fixture();
        assert!(f.monitor.status()["last_run"].is_null());

        f.monitor.run_cycle().await;

        let status = f.monitor.status();
        assert_eq!(status["interval_secs"], serde_json::json!(30));
        assert!(status["last_run"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn start_and_stop_round_trip() {
        let f = fixture();
        f.monitor.start().await;
        assert_eq!(f.monitor.status()["running"], serde_json::json!(true));
        f.monitor.stop().await;
        assert_eq!(f.monitor.status()["running"], serde_json::json!(false));
    }
}
