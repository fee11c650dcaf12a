//! Mock stores mirroring the conditional-update semantics of the SQL layer.
//!
//! Every mutation applies the same status predicate the real repository puts
//! in its WHERE clause, so tests exercise the same lost-update protection the
//! engines rely on in production.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use vigil_core::constants::MAX_RETRIES_EXCEEDED;
use vigil_core::models::{
    NewRecording, Recording, RecordingStatus, StreamInfo, UploadStatus,
};
use vigil_db::store_traits::{CameraStore, RecordingStore};

use crate::services::media_engine::{EngineError, MediaEngine};

/// Blank row in the state a fresh insert would produce, for tests to mutate.
pub fn blank_recording(camera_id: &str, start_time: DateTime<Utc>) -> Recording {
    Recording {
        id: Uuid::new_v4(),
        camera_id: camera_id.to_string(),
        status: RecordingStatus::Recording,
        start_time,
        end_time: None,
        filename: None,
        file_path: None,
        local_path: None,
        file_size: None,
        duration: None,
        upload_status: UploadStatus::Pending,
        upload_attempts: 0,
        upload_progress: 0,
        upload_started_at: None,
        upload_error_code: None,
        error_message: None,
        s3_key: None,
        s3_url: None,
        archived_at: None,
        metadata: serde_json::json!({}),
        created_at: start_time,
        updated_at: start_time,
    }
}

#[derive(Default)]
pub struct MockRecordingStore {
    rows: Mutex<HashMap<Uuid, Recording>>,
}

impl MockRecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, recording: Recording) -> Uuid {
        let id = recording.id;
        self.rows.lock().unwrap().insert(id, recording);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Recording> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Recording> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordingStore for MockRecordingStore {
    async fn insert(&self, new: &NewRecording) -> Result<Recording> {
        let now = Utc::now();
        let mut recording = blank_recording(&new.camera_id, new.start_time);
        recording.metadata = new.metadata.clone();
        recording.created_at = now;
        recording.updated_at = now;
        self.rows
            .lock()
            .unwrap()
            .insert(recording.id, recording.clone());
        Ok(recording)
    }

    async fn active_for_camera(&self, camera_id: &str) -> Result<Vec<Recording>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.camera_id == camera_id && r.status == RecordingStatus::Recording)
            .cloned()
            .collect())
    }

    async fn created_since(&self, camera_id: &str, since: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.camera_id == camera_id && r.created_at >= since)
            .count() as i64)
    }

    async fn orphans_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Recording>> {
        let mut rows: Vec<Recording> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                r.status == RecordingStatus::Recording
                    && r.file_path.is_none()
                    && r.created_at < cutoff
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn stale_older_than(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Recording>> {
        let mut rows: Vec<Recording> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == RecordingStatus::Recording && r.created_at < cutoff)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn orphans_in_window(
        &self,
        camera_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Recording>> {
        let mut rows: Vec<Recording> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                r.camera_id == camera_id
                    && r.status == RecordingStatus::Recording
                    && r.file_path.is_none()
                    && r.start_time >= from
                    && r.start_time <= to
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.start_time);
        Ok(rows)
    }

    async fn bind_file(
        &self,
        id: Uuid,
        file_path: &str,
        filename: &str,
        file_size: Option<i64>,
        end_time: DateTime<Utc>,
    ) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(r) if r.status == RecordingStatus::Recording => {
                r.status = RecordingStatus::Completed;
                r.file_path = Some(file_path.to_string());
                r.local_path = Some(file_path.to_string());
                r.filename = Some(filename.to_string());
                if file_size.is_some() {
                    r.file_size = file_size;
                }
                r.end_time = Some(end_time);
                r.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_error(&self, id: Uuid, note: &str) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(r) if r.status == RecordingStatus::Recording => {
                r.status = RecordingStatus::Error;
                r.error_message = Some(note.to_string());
                if let Some(obj) = r.metadata.as_object_mut() {
                    obj.insert("error_note".into(), serde_json::json!(note));
                }
                if r.end_time.is_none() {
                    r.end_time = Some(Utc::now());
                }
                r.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_stuck_uploads(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let mut ids: Vec<Uuid> = rows
            .values()
            .filter(|r| r.upload_status == UploadStatus::Uploading && r.updated_at < cutoff)
            .map(|r| r.id)
            .collect();
        ids.sort_by_key(|id| rows[id].updated_at);
        ids.truncate(limit as usize);
        for id in &ids {
            if let Some(r) = rows.get_mut(id) {
                r.upload_status = UploadStatus::Queued;
                r.upload_attempts += 1;
                r.upload_progress = 0;
                r.upload_started_at = None;
                r.updated_at = Utc::now();
            }
        }
        Ok(ids.len() as u64)
    }

    async fn fail_exhausted_uploads(&self, ceiling: i32, limit: i64) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let mut ids: Vec<Uuid> = rows
            .values()
            .filter(|r| {
                matches!(
                    r.upload_status,
                    UploadStatus::Queued | UploadStatus::Failed
                ) && r.upload_attempts >= ceiling
                    && r.upload_error_code.as_deref() != Some(MAX_RETRIES_EXCEEDED)
            })
            .map(|r| r.id)
            .collect();
        ids.sort_by_key(|id| rows[id].updated_at);
        ids.truncate(limit as usize);
        for id in &ids {
            if let Some(r) = rows.get_mut(id) {
                r.upload_status = UploadStatus::Failed;
                r.upload_error_code = Some(MAX_RETRIES_EXCEEDED.to_string());
                r.error_message =
                    Some(format!("Upload abandoned after {} attempts", r.upload_attempts));
                r.updated_at = Utc::now();
            }
        }
        Ok(ids.len() as u64)
    }

    async fn archive_old_uploads(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let mut ids: Vec<Uuid> = rows
            .values()
            .filter(|r| r.upload_status.is_archivable() && r.created_at < cutoff)
            .map(|r| r.id)
            .collect();
        ids.sort_by_key(|id| rows[id].created_at);
        ids.truncate(limit as usize);
        for id in &ids {
            if let Some(r) = rows.get_mut(id) {
                r.upload_status = UploadStatus::Archived;
                r.archived_at = Some(Utc::now());
                r.updated_at = Utc::now();
            }
        }
        Ok(ids.len() as u64)
    }

    async fn enqueue_upload(&self, id: Uuid) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(r)
                if r.status == RecordingStatus::Completed
                    && matches!(
                        r.upload_status,
                        UploadStatus::Pending | UploadStatus::Failed | UploadStatus::Cancelled
                    ) =>
            {
                r.upload_status = UploadStatus::Queued;
                r.upload_progress = 0;
                r.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_next_upload(&self) -> Result<Option<Recording>> {
        let mut rows = self.rows.lock().unwrap();
        let next = rows
            .values()
            .filter(|r| r.upload_status == UploadStatus::Queued)
            .min_by_key(|r| r.created_at)
            .map(|r| r.id);
        match next {
            Some(id) => {
                let r = rows.get_mut(&id).map(|r| {
                    r.upload_status = UploadStatus::Uploading;
                    r.upload_started_at = Some(Utc::now());
                    r.upload_progress = 0;
                    r.updated_at = Utc::now();
                    r.clone()
                });
                Ok(r)
            }
            None => Ok(None),
        }
    }

    async fn set_upload_progress(&self, id: Uuid, pct: i32) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(r) if r.upload_status == UploadStatus::Uploading => {
                r.upload_progress = pct.clamp(0, 100);
                r.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_uploaded(&self, id: Uuid, s3_key: &str, s3_url: &str) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(r) if r.upload_status == UploadStatus::Uploading => {
                r.upload_status = UploadStatus::Uploaded;
                r.upload_progress = 100;
                r.s3_key = Some(s3_key.to_string());
                r.s3_url = Some(s3_url.to_string());
                r.upload_error_code = None;
                r.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_upload_failed(&self, id: Uuid, code: &str, message: &str) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(r) if r.upload_status == UploadStatus::Uploading => {
                r.upload_status = UploadStatus::Failed;
                r.upload_attempts += 1;
                r.upload_error_code = Some(code.to_string());
                r.error_message = Some(message.to_string());
                r.upload_started_at = None;
                r.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upload_status_counts(&self) -> Result<HashMap<String, i64>> {
        let rows = self.rows.lock().unwrap();
        let mut counts: HashMap<String, i64> = HashMap::new();
        for r in rows.values() {
            *counts.entry(r.upload_status.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[derive(Default)]
pub struct MockCameraStore {
    cameras: Mutex<HashMap<String, bool>>,
}

impl MockCameraStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, camera_id: &str, recording_enabled: bool) {
        self.cameras
            .lock()
            .unwrap()
            .insert(camera_id.to_string(), recording_enabled);
    }
}

#[async_trait]
impl CameraStore for MockCameraStore {
    async fn recording_enabled(&self, camera_id: &str) -> Result<Option<bool>> {
        Ok(self.cameras.lock().unwrap().get(camera_id).copied())
    }
}

#[derive(Default)]
pub struct MockMediaEngine {
    streams: Mutex<Vec<StreamInfo>>,
    refuse_start: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
    pub started: Mutex<Vec<String>>,
}

impl MockMediaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stream(&self, stream: &str, recording_active: bool) {
        self.streams.lock().unwrap().push(StreamInfo {
            stream: stream.to_string(),
            app: "live".to_string(),
            schema: "rtsp".to_string(),
            vhost: None,
            recording_active,
        });
    }

    pub fn refuse_start(&self, stream: &str) {
        self.refuse_start.lock().unwrap().insert(stream.to_string());
    }

    pub fn fail_listing(&self) {
        self.fail_listing.store(true, Ordering::SeqCst);
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn active_streams(&self) -> Result<Vec<StreamInfo>, EngineError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(EngineError::Api {
                code: -1,
                msg: "listing unavailable".to_string(),
            });
        }
        Ok(self.streams.lock().unwrap().clone())
    }

    async fn start_recording(&self, stream: &str, _max_seconds: u32) -> Result<bool, EngineError> {
        self.started.lock().unwrap().push(stream.to_string());
        Ok(!self.refuse_start.lock().unwrap().contains(stream))
    }
}
