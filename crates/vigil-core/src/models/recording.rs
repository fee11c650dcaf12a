use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Whether the bytes of a recording exist locally and are final.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Recording,
    Completed,
    Error,
}

impl Display for RecordingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            RecordingStatus::Recording => write!(f, "recording"),
            RecordingStatus::Completed => write!(f, "completed"),
            RecordingStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for RecordingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recording" => Ok(RecordingStatus::Recording),
            "completed" => Ok(RecordingStatus::Completed),
            "error" => Ok(RecordingStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid recording status: {}", s)),
        }
    }
}

impl RecordingStatus {
    /// Legal edges of the recording axis. `completed` and `error` are terminal.
    pub fn can_transition_to(&self, next: RecordingStatus) -> bool {
        matches!(
            (self, next),
            (RecordingStatus::Recording, RecordingStatus::Completed)
                | (RecordingStatus::Recording, RecordingStatus::Error)
        )
    }
}

/// Remote-durability progress of a recording, independent of `RecordingStatus`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Queued,
    Uploading,
    Uploaded,
    Failed,
    Archived,
    Cancelled,
    Retrying,
}

impl Display for UploadStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadStatus::Pending => write!(f, "pending"),
            UploadStatus::Queued => write!(f, "queued"),
            UploadStatus::Uploading => write!(f, "uploading"),
            UploadStatus::Uploaded => write!(f, "uploaded"),
            UploadStatus::Failed => write!(f, "failed"),
            UploadStatus::Archived => write!(f, "archived"),
            UploadStatus::Cancelled => write!(f, "cancelled"),
            UploadStatus::Retrying => write!(f, "retrying"),
        }
    }
}

impl FromStr for UploadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "queued" => Ok(UploadStatus::Queued),
            "uploading" => Ok(UploadStatus::Uploading),
            "uploaded" => Ok(UploadStatus::Uploaded),
            "failed" => Ok(UploadStatus::Failed),
            "archived" => Ok(UploadStatus::Archived),
            "cancelled" => Ok(UploadStatus::Cancelled),
            "retrying" => Ok(UploadStatus::Retrying),
            _ => Err(anyhow::anyhow!("Invalid upload status: {}", s)),
        }
    }
}

impl UploadStatus {
    /// Legal edges of the upload axis. Writers must reject anything else
    /// rather than overwrite newer state with older state.
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (UploadStatus::Pending, UploadStatus::Queued)
                | (UploadStatus::Cancelled, UploadStatus::Queued)
                | (UploadStatus::Failed, UploadStatus::Queued)
                | (UploadStatus::Queued, UploadStatus::Uploading)
                | (UploadStatus::Uploading, UploadStatus::Uploaded)
                | (UploadStatus::Uploading, UploadStatus::Failed)
                | (UploadStatus::Uploading, UploadStatus::Queued)
                | (UploadStatus::Queued, UploadStatus::Failed)
                | (UploadStatus::Failed, UploadStatus::Failed)
                | (UploadStatus::Uploaded, UploadStatus::Archived)
                | (UploadStatus::Failed, UploadStatus::Archived)
        )
    }

    /// Rows the archival scan may act on.
    pub fn is_archivable(&self) -> bool {
        matches!(self, UploadStatus::Uploaded | UploadStatus::Failed)
    }
}

/// One tracked unit of captured video with its local/remote storage lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: Uuid,
    /// Stream identifier of the source camera.
    pub camera_id: String,
    pub status: RecordingStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub filename: Option<String>,
    pub file_path: Option<String>,
    pub local_path: Option<String>,
    pub file_size: Option<i64>,
    /// Segment duration in seconds, when known.
    pub duration: Option<f64>,
    pub upload_status: UploadStatus,
    pub upload_attempts: i32,
    pub upload_progress: i32,
    pub upload_started_at: Option<DateTime<Utc>>,
    pub upload_error_code: Option<String>,
    pub error_message: Option<String>,
    pub s3_key: Option<String>,
    pub s3_url: Option<String>,
    pub archived_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Recording {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Recording {
            id: row.get("id"),
            camera_id: row.get("camera_id"),
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse status: {}", e).into())
            })?,
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            filename: row.get("filename"),
            file_path: row.get("file_path"),
            local_path: row.get("local_path"),
            file_size: row.get("file_size"),
            duration: row.get("duration"),
            upload_status: row.get::<String, _>("upload_status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse upload_status: {}", e).into())
            })?,
            upload_attempts: row.get("upload_attempts"),
            upload_progress: row.get("upload_progress"),
            upload_started_at: row.get("upload_started_at"),
            upload_error_code: row.get("upload_error_code"),
            error_message: row.get("error_message"),
            s3_key: row.get("s3_key"),
            s3_url: row.get("s3_url"),
            archived_at: row.get("archived_at"),
            metadata: row
                .get::<Option<serde_json::Value>, _>("metadata")
                .unwrap_or_else(|| serde_json::json!({})),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl Recording {
    /// Marked in-progress but no physical file was ever bound.
    pub fn is_orphaned(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.status == RecordingStatus::Recording
            && self.file_path.is_none()
            && now - self.created_at > grace
    }

    /// In-progress far longer than any segment should run.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.status == RecordingStatus::Recording && now - self.created_at > threshold
    }

    pub fn upload_exhausted(&self, ceiling: i32) -> bool {
        self.upload_attempts >= ceiling
    }
}

/// Insert payload for a reconciliation-created recording row.
#[derive(Debug, Clone)]
pub struct NewRecording {
    pub camera_id: String,
    pub start_time: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl NewRecording {
    /// Row for a recording the reconciliation engine forced the engine to start.
    pub fn forced_by_automation(camera_id: &str, max_duration_secs: u32) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            start_time: Utc::now(),
            metadata: serde_json::json!({
                "started_by": "recording_monitor",
                "forced": true,
                "automation": true,
                "max_duration": max_duration_secs,
                "recording_type": "mp4",
            }),
        }
    }
}
