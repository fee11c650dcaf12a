//! Configuration module
//!
//! Environment-driven configuration for the daemon and both background
//! engines. Every threshold in the reconciliation and reaper cycles is
//! tunable here; the defaults match the values the system was operated with.

use std::env;
use std::path::PathBuf;

// Database
const DB_MAX_CONNECTIONS: u32 = 20;
const DB_TIMEOUT_SECONDS: u64 = 30;

// Media engine control API
const ENGINE_APP: &str = "live";
const ENGINE_SCHEMAS: &str = "hls,rtmp,rtsp,ts";

// Reconciliation engine
const MONITOR_INTERVAL_SECS: u64 = 30;
const ORPHAN_GRACE_MINUTES: i64 = 5;
const ORPHAN_ERROR_MINUTES: i64 = 15;
const STALE_THRESHOLD_MINUTES: i64 = 45;
const ORPHAN_TOLERANCE_MINUTES: i64 = 5;
const STALE_TOLERANCE_MINUTES: i64 = 10;
const LINK_WINDOW_MINUTES: i64 = 5;
const DUPLICATE_GUARD_SECS: i64 = 30;
const MAX_SEGMENT_SECONDS: u32 = 1800;

// Upload reaper
const REAPER_INTERVAL_MINUTES: u64 = 5;
const STUCK_THRESHOLD_MINUTES: i64 = 30;
const UPLOAD_MAX_RETRIES: i32 = 5;
const ARCHIVE_AFTER_DAYS: i64 = 30;
const REAPER_BATCH_SIZE: i64 = 100;
const ARCHIVE_BATCH_SIZE: i64 = 500;

/// Application configuration.
#[derive(Clone, Debug)]
pub struct VigilConfig {
    pub environment: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,

    /// Base URL of the media engine's control API, e.g. `http://localhost:8000/index/api`.
    pub engine_api_url: String,
    pub engine_secret: String,
    pub engine_app: String,
    pub engine_schemas: Vec<String>,

    /// Root of the `<camera_id>/<date>/<file>` recording tree.
    pub storage_root: PathBuf,

    pub monitor_interval_secs: u64,
    pub orphan_grace_minutes: i64,
    pub orphan_error_minutes: i64,
    pub stale_threshold_minutes: i64,
    pub orphan_tolerance_minutes: i64,
    pub stale_tolerance_minutes: i64,
    pub link_window_minutes: i64,
    pub duplicate_guard_secs: i64,
    pub max_segment_seconds: u32,

    pub reaper_interval_minutes: u64,
    pub stuck_threshold_minutes: i64,
    pub upload_max_retries: i32,
    pub archive_after_days: i64,
    pub reaper_batch_size: i64,
    pub archive_batch_size: i64,
}

impl VigilConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let engine_schemas = env::var("ENGINE_SCHEMAS")
            .unwrap_or_else(|_| ENGINE_SCHEMAS.to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let config = VigilConfig {
            environment,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| DB_MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(DB_MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| DB_TIMEOUT_SECONDS.to_string())
                .parse()
                .unwrap_or(DB_TIMEOUT_SECONDS),
            engine_api_url: env::var("ENGINE_API_URL")
                .map_err(|_| anyhow::anyhow!("ENGINE_API_URL must be set"))?,
            engine_secret: env::var("ENGINE_SECRET")
                .map_err(|_| anyhow::anyhow!("ENGINE_SECRET must be set"))?,
            engine_app: env::var("ENGINE_APP").unwrap_or_else(|_| ENGINE_APP.to_string()),
            engine_schemas,
            storage_root: env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .map_err(|_| anyhow::anyhow!("STORAGE_ROOT must be set"))?,
            monitor_interval_secs: env::var("MONITOR_INTERVAL_SECS")
                .unwrap_or_else(|_| MONITOR_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(MONITOR_INTERVAL_SECS),
            orphan_grace_minutes: env::var("ORPHAN_GRACE_MINUTES")
                .unwrap_or_else(|_| ORPHAN_GRACE_MINUTES.to_string())
                .parse()
                .unwrap_or(ORPHAN_GRACE_MINUTES),
            orphan_error_minutes: env::var("ORPHAN_ERROR_MINUTES")
                .unwrap_or_else(|_| ORPHAN_ERROR_MINUTES.to_string())
                .parse()
                .unwrap_or(ORPHAN_ERROR_MINUTES),
            stale_threshold_minutes: env::var("STALE_THRESHOLD_MINUTES")
                .unwrap_or_else(|_| STALE_THRESHOLD_MINUTES.to_string())
                .parse()
                .unwrap_or(STALE_THRESHOLD_MINUTES),
            orphan_tolerance_minutes: env::var("ORPHAN_TOLERANCE_MINUTES")
                .unwrap_or_else(|_| ORPHAN_TOLERANCE_MINUTES.to_string())
                .parse()
                .unwrap_or(ORPHAN_TOLERANCE_MINUTES),
            stale_tolerance_minutes: env::var("STALE_TOLERANCE_MINUTES")
                .unwrap_or_else(|_| STALE_TOLERANCE_MINUTES.to_string())
                .parse()
                .unwrap_or(STALE_TOLERANCE_MINUTES),
            link_window_minutes: env::var("LINK_WINDOW_MINUTES")
                .unwrap_or_else(|_| LINK_WINDOW_MINUTES.to_string())
                .parse()
                .unwrap_or(LINK_WINDOW_MINUTES),
            duplicate_guard_secs: env::var("DUPLICATE_GUARD_SECS")
                .unwrap_or_else(|_| DUPLICATE_GUARD_SECS.to_string())
                .parse()
                .unwrap_or(DUPLICATE_GUARD_SECS),
            max_segment_seconds: env::var("MAX_SEGMENT_SECONDS")
                .unwrap_or_else(|_| MAX_SEGMENT_SECONDS.to_string())
                .parse()
                .unwrap_or(MAX_SEGMENT_SECONDS),
            reaper_interval_minutes: env::var("REAPER_INTERVAL_MINUTES")
                .unwrap_or_else(|_| REAPER_INTERVAL_MINUTES.to_string())
                .parse()
                .unwrap_or(REAPER_INTERVAL_MINUTES),
            stuck_threshold_minutes: env::var("STUCK_THRESHOLD_MINUTES")
                .unwrap_or_else(|_| STUCK_THRESHOLD_MINUTES.to_string())
                .parse()
                .unwrap_or(STUCK_THRESHOLD_MINUTES),
            upload_max_retries: env::var("UPLOAD_MAX_RETRIES")
                .unwrap_or_else(|_| UPLOAD_MAX_RETRIES.to_string())
                .parse()
                .unwrap_or(UPLOAD_MAX_RETRIES),
            archive_after_days: env::var("ARCHIVE_AFTER_DAYS")
                .unwrap_or_else(|_| ARCHIVE_AFTER_DAYS.to_string())
                .parse()
                .unwrap_or(ARCHIVE_AFTER_DAYS),
            reaper_batch_size: env::var("REAPER_BATCH_SIZE")
                .unwrap_or_else(|_| REAPER_BATCH_SIZE.to_string())
                .parse()
                .unwrap_or(REAPER_BATCH_SIZE),
            archive_batch_size: env::var("ARCHIVE_BATCH_SIZE")
                .unwrap_or_else(|_| ARCHIVE_BATCH_SIZE.to_string())
                .parse()
                .unwrap_or(ARCHIVE_BATCH_SIZE),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgresql://")
            && !self.database_url.starts_with("postgres://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.engine_secret.trim().is_empty() {
            return Err(anyhow::anyhow!("ENGINE_SECRET must not be empty"));
        }

        if self.monitor_interval_secs == 0 || self.reaper_interval_minutes == 0 {
            return Err(anyhow::anyhow!(
                "MONITOR_INTERVAL_SECS and REAPER_INTERVAL_MINUTES must be non-zero"
            ));
        }

        if self.upload_max_retries < 1 {
            return Err(anyhow::anyhow!("UPLOAD_MAX_RETRIES must be at least 1"));
        }

        if self.reaper_batch_size < 1 || self.archive_batch_size < 1 {
            return Err(anyhow::anyhow!("reaper batch sizes must be at least 1"));
        }

        // The error ceiling has to sit beyond the grace period or orphans
        // would be failed before file matching ever ran.
        if self.orphan_error_minutes <= self.orphan_grace_minutes {
            return Err(anyhow::anyhow!(
                "ORPHAN_ERROR_MINUTES must be greater than ORPHAN_GRACE_MINUTES"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> VigilConfig {
        VigilConfig {
            environment: "test".into(),
            database_url: "postgresql://localhost/vigil".into(),
            db_max_connections: DB_MAX_CONNECTIONS,
            db_timeout_seconds: DB_TIMEOUT_SECONDS,
            engine_api_url: "http://localhost:8000/index/api".into(),
            engine_secret: "secret".into(),
            engine_app: ENGINE_APP.into(),
            engine_schemas: vec!["hls".into(), "rtmp".into(), "rtsp".into(), "ts".into()],
            storage_root: PathBuf::from("/srv/record/live"),
            monitor_interval_secs: MONITOR_INTERVAL_SECS,
            orphan_grace_minutes: ORPHAN_GRACE_MINUTES,
            orphan_error_minutes: ORPHAN_ERROR_MINUTES,
            stale_threshold_minutes: STALE_THRESHOLD_MINUTES,
            orphan_tolerance_minutes: ORPHAN_TOLERANCE_MINUTES,
            stale_tolerance_minutes: STALE_TOLERANCE_MINUTES,
            link_window_minutes: LINK_WINDOW_MINUTES,
            duplicate_guard_secs: DUPLICATE_GUARD_SECS,
            max_segment_seconds: MAX_SEGMENT_SECONDS,
            reaper_interval_minutes: REAPER_INTERVAL_MINUTES,
            stuck_threshold_minutes: STUCK_THRESHOLD_MINUTES,
            upload_max_retries: UPLOAD_MAX_RETRIES,
            archive_after_days: ARCHIVE_AFTER_DAYS,
            reaper_batch_size: REAPER_BATCH_SIZE,
            archive_batch_size: ARCHIVE_BATCH_SIZE,
        }
    }

    #[test]
    fn test_defaults_validate() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_postgres_url() {
        let mut config = base_config();
        config.database_url = "mysql://localhost/vigil".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_intervals() {
        let mut config = base_config();
        config.monitor_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_error_ceiling_inside_grace() {
        let mut config = base_config();
        config.orphan_error_minutes = config.orphan_grace_minutes;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_is_production() {
        let mut config = base_config();
        assert!(!config.is_production());
        config.environment = "Production".into();
        assert!(config.is_production());
    }
}
