//! Timestamp-based matching of recording rows to files on disk.
//!
//! Directory listing plus nearest-timestamp search over the per-camera date
//! directories. Tolerance semantics are |file timestamp - start_time| within
//! the window; ties and one-to-one binding are resolved by the caller through
//! the claimed set. Every filesystem failure reads as "no match".

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use vigil_core::recording_path;

/// A physical segment file selected for binding.
#[derive(Debug, Clone)]
pub struct MatchedFile {
    pub path: PathBuf,
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    pub size: Option<i64>,
    pub modified: Option<DateTime<Utc>>,
}

/// Find the finalized segment file closest in time to `start` for `camera_id`,
/// within `tolerance_minutes`. Files in `claimed` were already bound this
/// cycle and are skipped.
pub async fn find_recording_file(
    root: &Path,
    camera_id: &str,
    start: DateTime<Utc>,
    tolerance_minutes: i64,
    claimed: &HashSet<PathBuf>,
) -> Option<MatchedFile> {
    let tolerance = Duration::minutes(tolerance_minutes);

    // The window may straddle midnight; collect each date dir it touches.
    let mut dirs: Vec<PathBuf> = Vec::new();
    for ts in recording_path::candidate_timestamps(start, tolerance_minutes) {
        let dir = recording_path::recording_dir(root, camera_id, ts);
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    // Flat layouts put segments directly under the camera dir.
    dirs.push(root.join(camera_id));

    let mut best: Option<MatchedFile> = None;
    for dir in dirs {
        scan_dir(&dir, start, tolerance, claimed, &mut best).await;
    }

    if let Some(ref matched) = best {
        tracing::debug!(
            camera_id = %camera_id,
            file = %matched.path.display(),
            offset_secs = (matched.timestamp - start).num_seconds(),
            "Matched recording file"
        );
    }
    best
}

async fn scan_dir(
    dir: &Path,
    start: DateTime<Utc>,
    tolerance: Duration,
    claimed: &HashSet<PathBuf>,
    best: &mut Option<MatchedFile>,
) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return,
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if recording_path::is_temp_file(&name) {
            continue;
        }
        let ts = match recording_path::parse_timestamp(&name) {
            Some(ts) => ts,
            None => continue,
        };
        let distance = (ts - start).abs();
        if distance > tolerance {
            continue;
        }
        let path = entry.path();
        if claimed.contains(&path) {
            continue;
        }

        let better = match best {
            Some(current) => {
                let current_distance = (current.timestamp - start).abs();
                // Equidistant candidates resolve to the earlier segment.
                distance < current_distance
                    || (distance == current_distance && ts < current.timestamp)
            }
            None => true,
        };
        if !better {
            continue;
        }

        let (size, modified) = match entry.metadata().await {
            Ok(meta) => (
                Some(meta.len() as i64),
                meta.modified().ok().map(DateTime::<Utc>::from),
            ),
            Err(_) => (None, None),
        };

        *best = Some(MatchedFile {
            path,
            filename: name,
            timestamp: ts,
            size,
            modified,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use std::fs;

    fn ts(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, b"mp4").unwrap();
        path
    }

    #[tokio::test]
    async fn finds_exact_match_in_date_dir() {
        let root = tempfile::tempdir().unwrap();
        let start = ts("2025-08-21 04:06:25");
        let dir = root.path().join("cam-1").join("2025-08-21");
        touch(&dir, "2025-08-21-04-06-25-0.mp4");

        let matched = find_recording_file(root.path(), "cam-1", start, 5, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(matched.filename, "2025-08-21-04-06-25-0.mp4");
        assert_eq!(matched.timestamp, start);
        assert_eq!(matched.size, Some(3));
    }

    #[tokio::test]
    async fn picks_nearest_when_several_qualify() {
        let root = tempfile::tempdir().unwrap();
        let start = ts("2025-08-21 04:06:00");
        let dir = root.path().join("cam-1").join("2025-08-21");
        touch(&dir, "2025-08-21-04-02-00-0.mp4");
        touch(&dir, "2025-08-21-04-05-00-0.mp4");
        touch(&dir, "2025-08-21-04-10-00-0.mp4");

        let matched = find_recording_file(root.path(), "cam-1", start, 5, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(matched.filename, "2025-08-21-04-05-00-0.mp4");
    }

    #[tokio::test]
    async fn equidistant_candidates_resolve_to_earlier() {
        let root = tempfile::tempdir().unwrap();
        let start = ts("2025-08-21 04:06:00");
        let dir = root.path().join("cam-1").join("2025-08-21");
        touch(&dir, "2025-08-21-04-04-00-0.mp4");
        touch(&dir, "2025-08-21-04-08-00-0.mp4");

        let matched = find_recording_file(root.path(), "cam-1", start, 5, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(matched.filename, "2025-08-21-04-04-00-0.mp4");
    }

    #[tokio::test]
    async fn outside_tolerance_is_no_match() {
        let root = tempfile::tempdir().unwrap();
        let start = ts("2025-08-21 04:06:00");
        let dir = root.path().join("cam-1").join("2025-08-21");
        touch(&dir, "2025-08-21-04-12-01-0.mp4");

        let matched = find_recording_file(root.path(), "cam-1", start, 5, &HashSet::new()).await;
        assert!(matched.is_none());
    }

    #[tokio::test]
    async fn claimed_files_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        let start = ts("2025-08-21 04:06:00");
        let dir = root.path().join("cam-1").join("2025-08-21");
        let exact = touch(&dir, "2025-08-21-04-06-00-0.mp4");
        touch(&dir, "2025-08-21-04-07-00-0.mp4");

        let mut claimed = HashSet::new();
        claimed.insert(exact);
        let matched = find_recording_file(root.path(), "cam-1", start, 5, &claimed)
            .await
            .unwrap();
        assert_eq!(matched.filename, "2025-08-21-04-07-00-0.mp4");
    }

    #[tokio::test]
    async fn temp_files_and_noise_are_ignored() {
        let root = tempfile::tempdir().unwrap();
        let start = ts("2025-08-21 04:06:00");
        let dir = root.path().join("cam-1").join("2025-08-21");
        touch(&dir, ".2025-08-21-04-06-00-0.mp4");
        touch(&dir, "thumbnail.jpg");

        let matched = find_recording_file(root.path(), "cam-1", start, 5, &HashSet::new()).await;
        assert!(matched.is_none());
    }

    #[tokio::test]
    async fn window_straddling_midnight_checks_both_date_dirs() {
        let root = tempfile::tempdir().unwrap();
        let start = ts("2025-08-22 00:02:00");
        let dir = root.path().join("cam-1").join("2025-08-21");
        touch(&dir, "2025-08-21-23-58-30-0.mp4");

        let matched = find_recording_file(root.path(), "cam-1", start, 5, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(matched.filename, "2025-08-21-23-58-30-0.mp4");
    }

    #[tokio::test]
    async fn missing_directory_is_no_match() {
        let root = tempfile::tempdir().unwrap();
        let start = ts("2025-08-21 04:06:00");
        let matched = find_recording_file(root.path(), "cam-9", start, 5, &HashSet::new()).await;
        assert!(matched.is_none());
    }

    #[tokio::test]
    async fn flat_camera_dir_fallback() {
        let root = tempfile::tempdir().unwrap();
        let start = ts("2025-08-21 04:06:00");
        let dir = root.path().join("cam-1");
        touch(&dir, "2025-08-21-04-06-00-0.mp4");

        let matched = find_recording_file(root.path(), "cam-1", start, 5, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(matched.filename, "2025-08-21-04-06-00-0.mp4");
    }
}
