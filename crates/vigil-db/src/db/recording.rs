//! Recording repository: lifecycle and upload-queue state for the recordings table.
//!
//! Every mutation carries its own status predicate, so a row that moved on
//! between read and write is simply not updated. Callers learn about the miss
//! from the affected-row count instead of clobbering newer state.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use std::collections::HashMap;
use uuid::Uuid;

use vigil_core::constants::MAX_RETRIES_EXCEEDED;
use vigil_core::models::{NewRecording, Recording};

const RECORDING_COLUMNS: &str = "id, camera_id, status, start_time, end_time, filename, \
     file_path, local_path, file_size, duration, upload_status, upload_attempts, \
     upload_progress, upload_started_at, upload_error_code, error_message, \
     s3_key, s3_url, archived_at, metadata, created_at, updated_at";

/// Repository for the recordings table.
#[derive(Clone)]
pub struct RecordingRepository {
    pool: PgPool,
}

impl RecordingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a reconciliation-created row: `recording` / `pending`.
    #[tracing::instrument(skip(self, new), fields(db.table = "recordings", camera_id = %new.camera_id))]
    pub async fn insert(&self, new: &NewRecording) -> Result<Recording> {
        let row: Recording = sqlx::query_as::<Postgres, Recording>(&format!(
            r#"
            INSERT INTO recordings (id, camera_id, status, start_time, upload_status, metadata)
            VALUES ($1, $2, 'recording', $3, 'pending', $4)
            RETURNING {RECORDING_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(&new.camera_id)
        .bind(new.start_time)
        .bind(&new.metadata)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert recording")?;
        Ok(row)
    }

    /// All in-progress rows for a camera. More than one is itself an anomaly
    /// but the query does not assume otherwise.
    #[tracing::instrument(skip(self), fields(db.table = "recordings"))]
    pub async fn active_for_camera(&self, camera_id: &str) -> Result<Vec<Recording>> {
        sqlx::query_as::<Postgres, Recording>(&format!(
            "SELECT {RECORDING_COLUMNS} FROM recordings \
             WHERE camera_id = $1 AND status = 'recording' \
             ORDER BY created_at DESC",
        ))
        .bind(camera_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch active recordings")
    }

    /// Count of rows created for a camera since `since`, any status.
    /// Backs the duplicate-start guard.
    #[tracing::instrument(skip(self), fields(db.table = "recordings"))]
    pub async fn created_since(&self, camera_id: &str, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM recordings WHERE camera_id = $1 AND created_at >= $2",
        )
        .bind(camera_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count recent recordings")?;
        Ok(count)
    }

    /// In-progress rows past the grace period with no file bound.
    #[tracing::instrument(skip(self), fields(db.table = "recordings"))]
    pub async fn orphans_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Recording>> {
        sqlx::query_as::<Postgres, Recording>(&format!(
            "SELECT {RECORDING_COLUMNS} FROM recordings \
             WHERE status = 'recording' AND file_path IS NULL AND created_at < $1 \
             ORDER BY created_at ASC \
             LIMIT $2",
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch orphaned recordings")
    }

    /// In-progress rows older than any segment should run, file bound or not.
    #[tracing::instrument(skip(self), fields(db.table = "recordings"))]
    pub async fn stale_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Recording>> {
        sqlx::query_as::<Postgres, Recording>(&format!(
            "SELECT {RECORDING_COLUMNS} FROM recordings \
             WHERE status = 'recording' AND created_at < $1 \
             ORDER BY created_at ASC \
             LIMIT $2",
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch stale recordings")
    }

    /// Orphan rows for a camera whose start_time falls inside `[from, to]`.
    /// Used when linking a finalized temp file back to its row.
    #[tracing::instrument(skip(self), fields(db.table = "recordings"))]
    pub async fn orphans_in_window(
        &self,
        camera_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Recording>> {
        sqlx::query_as::<Postgres, Recording>(&format!(
            "SELECT {RECORDING_COLUMNS} FROM recordings \
             WHERE camera_id = $1 AND status = 'recording' AND file_path IS NULL \
               AND start_time BETWEEN $2 AND $3 \
             ORDER BY start_time ASC",
        ))
        .bind(camera_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch orphans in window")
    }

    /// Bind a physical file and complete the recording. Only an in-progress
    /// row is touched; returns whether anything changed.
    #[tracing::instrument(skip(self), fields(db.table = "recordings", db.record_id = %id))]
    pub async fn bind_file(
        &self,
        id: Uuid,
        file_path: &str,
        filename: &str,
        file_size: Option<i64>,
        end_time: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET status = 'completed',
                file_path = $2,
                local_path = $2,
                filename = $3,
                file_size = COALESCE($4, file_size),
                end_time = $5,
                updated_at = NOW()
            WHERE id = $1 AND status = 'recording'
            "#,
        )
        .bind(id)
        .bind(file_path)
        .bind(filename)
        .bind(file_size)
        .bind(end_time)
        .execute(&self.pool)
        .await
        .context("Failed to bind file to recording")?;
        Ok(result.rows_affected() > 0)
    }

    /// Terminal `error` for an in-progress row, with a note kept both in the
    /// error column and in metadata for later inspection.
    #[tracing::instrument(skip(self), fields(db.table = "recordings", db.record_id = %id))]
    pub async fn mark_error(&self, id: Uuid, note: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET status = 'error',
                error_message = $2,
                metadata = COALESCE(metadata, '{}'::jsonb) || jsonb_build_object('error_note', $2::text),
                end_time = COALESCE(end_time, NOW()),
                updated_at = NOW()
            WHERE id = $1 AND status = 'recording'
            "#,
        )
        .bind(id)
        .bind(note)
        .execute(&self.pool)
        .await
        .context("Failed to mark recording as error")?;
        Ok(result.rows_affected() > 0)
    }

    /// Stuck-upload recovery: `uploading` rows untouched since `cutoff` go
    /// back to `queued` with the attempt counted. Progress writes bump
    /// `updated_at`, so a live transfer never trips this.
    #[tracing::instrument(skip(self), fields(db.table = "recordings"))]
    pub async fn reset_stuck_uploads(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET upload_status = 'queued',
                upload_attempts = upload_attempts + 1,
                upload_progress = 0,
                upload_started_at = NULL,
                updated_at = NOW()
            WHERE id IN (
                SELECT id FROM recordings
                WHERE upload_status = 'uploading' AND updated_at < $1
                ORDER BY updated_at ASC
                LIMIT $2
            )
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .execute(&self.pool)
        .await
        .context("Failed to reset stuck uploads")?;
        Ok(result.rows_affected())
    }

    /// Retry-ceiling finalization: retryable rows at or past the ceiling are
    /// failed permanently with the sentinel error code.
    #[tracing::instrument(skip(self), fields(db.table = "recordings"))]
    pub async fn fail_exhausted_uploads(&self, ceiling: i32, limit: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET upload_status = 'failed',
                upload_error_code = $1,
                error_message = 'Upload abandoned after ' || upload_attempts || ' attempts',
                updated_at = NOW()
            WHERE id IN (
                SELECT id FROM recordings
                WHERE upload_status IN ('queued', 'failed')
                  AND upload_attempts >= $2
                  AND (upload_error_code IS NULL OR upload_error_code <> $1)
                ORDER BY updated_at ASC
                LIMIT $3
            )
            "#,
        )
        .bind(MAX_RETRIES_EXCEEDED)
        .bind(ceiling)
        .bind(limit)
        .execute(&self.pool)
        .await
        .context("Failed to finalize exhausted uploads")?;
        Ok(result.rows_affected())
    }

    /// Archival: settled rows (`uploaded` or `failed`) older than `cutoff`.
    #[tracing::instrument(skip(self), fields(db.table = "recordings"))]
    pub async fn archive_old_uploads(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET upload_status = 'archived',
                archived_at = NOW(),
                updated_at = NOW()
            WHERE id IN (
                SELECT id FROM recordings
                WHERE upload_status IN ('uploaded', 'failed') AND created_at < $1
                ORDER BY created_at ASC
                LIMIT $2
            )
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .execute(&self.pool)
        .await
        .context("Failed to archive old uploads")?;
        Ok(result.rows_affected())
    }

    /// Queue a recording for transfer. Legal from `pending`, `failed` (manual
    /// retry) and `cancelled`; never steals a row mid-transfer.
    #[tracing::instrument(skip(self), fields(db.table = "recordings", db.record_id = %id))]
    pub async fn enqueue_upload(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET upload_status = 'queued',
                upload_progress = 0,
                updated_at = NOW()
            WHERE id = $1
              AND status = 'completed'
              AND upload_status IN ('pending', 'failed', 'cancelled')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to enqueue upload")?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically claim the oldest queued upload. `FOR UPDATE SKIP LOCKED`
    /// keeps concurrent workers from claiming the same row.
    #[tracing::instrument(skip(self), fields(db.table = "recordings"))]
    pub async fn claim_next_upload(&self) -> Result<Option<Recording>> {
        sqlx::query_as::<Postgres, Recording>(&format!(
            r#"
            UPDATE recordings
            SET upload_status = 'uploading',
                upload_started_at = NOW(),
                upload_progress = 0,
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM recordings
                WHERE upload_status = 'queued'
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {RECORDING_COLUMNS}
            "#,
        ))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to claim next upload")
    }

    /// Progress update, valid only mid-transfer.
    #[tracing::instrument(skip(self), fields(db.table = "recordings", db.record_id = %id))]
    pub async fn set_upload_progress(&self, id: Uuid, pct: i32) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE recordings SET upload_progress = $2, updated_at = NOW() \
             WHERE id = $1 AND upload_status = 'uploading'",
        )
        .bind(id)
        .bind(pct.clamp(0, 100))
        .execute(&self.pool)
        .await
        .context("Failed to set upload progress")?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "recordings", db.record_id = %id))]
    pub async fn mark_uploaded(&self, id: Uuid, s3_key: &str, s3_url: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET upload_status = 'uploaded',
                upload_progress = 100,
                s3_key = $2,
                s3_url = $3,
                upload_error_code = NULL,
                updated_at = NOW()
            WHERE id = $1 AND upload_status = 'uploading'
            "#,
        )
        .bind(id)
        .bind(s3_key)
        .bind(s3_url)
        .execute(&self.pool)
        .await
        .context("Failed to mark upload complete")?;
        Ok(result.rows_affected() > 0)
    }

    /// Failed attempt: counter goes up exactly once per observed failure.
    #[tracing::instrument(skip(self), fields(db.table = "recordings", db.record_id = %id))]
    pub async fn mark_upload_failed(&self, id: Uuid, code: &str, message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET upload_status = 'failed',
                upload_attempts = upload_attempts + 1,
                upload_error_code = $2,
                error_message = $3,
                upload_started_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND upload_status = 'uploading'
            "#,
        )
        .bind(id)
        .bind(code)
        .bind(message)
        .execute(&self.pool)
        .await
        .context("Failed to mark upload failed")?;
        Ok(result.rows_affected() > 0)
    }

    /// Per-status row counts for the operational status endpoint.
    #[tracing::instrument(skip(self), fields(db.table = "recordings"))]
    pub async fn upload_status_counts(&self) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT upload_status, COUNT(*) FROM recordings GROUP BY upload_status",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to count upload statuses")?;
        Ok(rows.into_iter().collect())
    }
}
