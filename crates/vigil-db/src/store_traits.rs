//! Store traits decoupling the background engines from Postgres.
//!
//! The engines hold `Arc<dyn RecordingStore>` / `Arc<dyn CameraStore>` so
//! they can run against in-memory fakes in tests. The concrete repositories
//! implement these by delegation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use vigil_core::models::{NewRecording, Recording};

use crate::db::camera::CameraRepository;
use crate::db::recording::RecordingRepository;

#[async_trait]
pub trait RecordingStore: Send + Sync {
    async fn insert(&self, new: &NewRecording) -> Result<Recording>;
    async fn active_for_camera(&self, camera_id: &str) -> Result<Vec<Recording>>;
    async fn created_since(&self, camera_id: &str, since: DateTime<Utc>) -> Result<i64>;
    async fn orphans_older_than(&self, cutoff: DateTime<Utc>, limit: i64)
        -> Result<Vec<Recording>>;
    async fn stale_older_than(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Recording>>;
    async fn orphans_in_window(
        &self,
        camera_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Recording>>;
    async fn bind_file(
        &self,
        id: Uuid,
        file_path: &str,
        filename: &str,
        file_size: Option<i64>,
        end_time: DateTime<Utc>,
    ) -> Result<bool>;
    async fn mark_error(&self, id: Uuid, note: &str) -> Result<bool>;
    async fn reset_stuck_uploads(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64>;
    async fn fail_exhausted_uploads(&self, ceiling: i32, limit: i64) -> Result<u64>;
    async fn archive_old_uploads(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64>;
    async fn enqueue_upload(&self, id: Uuid) -> Result<bool>;
    async fn claim_next_upload(&self) -> Result<Option<Recording>>;
    async fn set_upload_progress(&self, id: Uuid, pct: i32) -> Result<bool>;
    async fn mark_uploaded(&self, id: Uuid, s3_key: &str, s3_url: &str) -> Result<bool>;
    async fn mark_upload_failed(&self, id: Uuid, code: &str, message: &str) -> Result<bool>;
    async fn upload_status_counts(&self) -> Result<HashMap<String, i64>>;
}

#[async_trait]
pub trait CameraStore: Send + Sync {
    async fn recording_enabled(&self, camera_id: &str) -> Result<Option<bool>>;
}

#[async_trait]
impl RecordingStore for RecordingRepository {
    async fn insert(&self, new: &NewRecording) -> Result<Recording> {
        RecordingRepository::insert(self, new).await
    }

    async fn active_for_camera(&self, camera_id: &str) -> Result<Vec<Recording>> {
        RecordingRepository::active_for_camera(self, camera_id).await
    }

    async fn created_since(&self, camera_id: &str, since: DateTime<Utc>) -> Result<i64> {
        RecordingRepository::created_since(self, camera_id, since).await
    }

    async fn orphans_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Recording>> {
        RecordingRepository::orphans_older_than(self, cutoff, limit).await
    }

    async fn stale_older_than(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Recording>> {
        RecordingRepository::stale_older_than(self, cutoff, limit).await
    }

    async fn orphans_in_window(
        &self,
        camera_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Recording>> {
        RecordingRepository::orphans_in_window(self, camera_id, from, to).await
    }

    async fn bind_file(
        &self,
        id: Uuid,
        file_path: &str,
        filename: &str,
        file_size: Option<i64>,
        end_time: DateTime<Utc>,
    ) -> Result<bool> {
        RecordingRepository::bind_file(self, id, file_path, filename, file_size, end_time).await
    }

    async fn mark_error(&self, id: Uuid, note: &str) -> Result<bool> {
        RecordingRepository::mark_error(self, id, note).await
    }

    async fn reset_stuck_uploads(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64> {
        RecordingRepository::reset_stuck_uploads(self, cutoff, limit).await
    }

    async fn fail_exhausted_uploads(&self, ceiling: i32, limit: i64) -> Result<u64> {
        RecordingRepository::fail_exhausted_uploads(self, ceiling, limit).await
    }

    async fn archive_old_uploads(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64> {
        RecordingRepository::archive_old_uploads(self, cutoff, limit).await
    }

    async fn enqueue_upload(&self, id: Uuid) -> Result<bool> {
        RecordingRepository::enqueue_upload(self, id).await
    }

    async fn claim_next_upload(&self) -> Result<Option<Recording>> {
        RecordingRepository::claim_next_upload(self).await
    }

    async fn set_upload_progress(&self, id: Uuid, pct: i32) -> Result<bool> {
        RecordingRepository::set_upload_progress(self, id, pct).await
    }

    async fn mark_uploaded(&self, id: Uuid, s3_key: &str, s3_url: &str) -> Result<bool> {
        RecordingRepository::mark_uploaded(self, id, s3_key, s3_url).await
    }

    async fn mark_upload_failed(&self, id: Uuid, code: &str, message: &str) -> Result<bool> {
        RecordingRepository::mark_upload_failed(self, id, code, message).await
    }

    async fn upload_status_counts(&self) -> Result<HashMap<String, i64>> {
        RecordingRepository::upload_status_counts(self).await
    }
}

#[async_trait]
impl CameraStore for CameraRepository {
    async fn recording_enabled(&self, camera_id: &str) -> Result<Option<bool>> {
        CameraRepository::recording_enabled(self, camera_id).await
    }
}
