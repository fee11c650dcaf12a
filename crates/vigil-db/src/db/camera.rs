//! Camera repository. Only the slice of the cameras table the
//! reconciliation engine consults; full camera CRUD lives elsewhere.

use anyhow::{Context, Result};
use sqlx::PgPool;

/// Repository for the cameras table.
#[derive(Clone)]
pub struct CameraRepository {
    pool: PgPool,
}

impl CameraRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `None` means the camera is not registered at all, which callers must
    /// treat differently from a registered camera with recording disabled.
    #[tracing::instrument(skip(self), fields(db.table = "cameras"))]
    pub async fn recording_enabled(&self, camera_id: &str) -> Result<Option<bool>> {
        sqlx::query_scalar("SELECT recording_enabled FROM cameras WHERE id = $1")
            .bind(camera_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch camera recording flag")
    }
}
