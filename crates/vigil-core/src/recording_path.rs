//! Recording filename and directory conventions.
//!
//! The media engine writes segments as `YYYY-MM-DD-HH-MM-SS-<seq>.<ext>`
//! grouped into per-date directories under the camera's folder:
//! `<base>/<camera_id>/<date>/<timestamped-filename>`. Files still being
//! written carry a leading `.` which is stripped on finalization. The
//! reconciliation engine depends on reproducing this convention exactly.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::constants::{RECORDING_EXT, TEMP_FILE_PREFIX};

const STAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

fn stamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2})").unwrap()
    })
}

/// `2025-08-21-04-06-25-0.mp4` for seq 0.
pub fn format_filename(ts: DateTime<Utc>, seq: u32, ext: &str) -> String {
    format!("{}-{}.{}", ts.format(STAMP_FORMAT), seq, ext)
}

/// Extract the embedded timestamp from a segment filename.
/// Accepts both the sequenced form and the bare `YYYY-MM-DD-HH-MM-SS.ext`.
pub fn parse_timestamp(filename: &str) -> Option<DateTime<Utc>> {
    let name = filename.strip_prefix(TEMP_FILE_PREFIX).unwrap_or(filename);
    let caps = stamp_regex().captures(name)?;
    NaiveDateTime::parse_from_str(&caps[1], STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Per-date directory component, `YYYY-MM-DD`.
pub fn date_dir(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

/// `<base>/<camera_id>/<date>/`.
pub fn recording_dir(base: &Path, camera_id: &str, ts: DateTime<Utc>) -> PathBuf {
    base.join(camera_id).join(date_dir(ts))
}

/// Still being written by the engine.
pub fn is_temp_file(name: &str) -> bool {
    name.starts_with(TEMP_FILE_PREFIX) && name.ends_with(&format!(".{}", RECORDING_EXT))
}

/// Final name of a temporary file (leading marker stripped).
pub fn final_name(temp_name: &str) -> &str {
    temp_name.strip_prefix(TEMP_FILE_PREFIX).unwrap_or(temp_name)
}

/// Minute-stepped timestamps covering `start ± tolerance`. File matching
/// derives the set of date directories the window touches from these;
/// callers wanting nearest-match semantics compare distances themselves.
pub fn candidate_timestamps(start: DateTime<Utc>, tolerance_minutes: i64) -> Vec<DateTime<Utc>> {
    (-tolerance_minutes..=tolerance_minutes)
        .map(|offset| start + Duration::minutes(offset))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn test_format_filename() {
        assert_eq!(
            format_filename(ts("2025-08-21 04:06:25"), 0, "mp4"),
            "2025-08-21-04-06-25-0.mp4"
        );
    }

    #[test]
    fn test_parse_timestamp_sequenced() {
        let parsed = parse_timestamp("2025-08-21-04-06-25-0.mp4").unwrap();
        assert_eq!(parsed, ts("2025-08-21 04:06:25"));
    }

    #[test]
    fn test_parse_timestamp_bare() {
        let parsed = parse_timestamp("2025-08-21-04-06-25.mp4").unwrap();
        assert_eq!(parsed, ts("2025-08-21 04:06:25"));
    }

    #[test]
    fn test_parse_timestamp_temp_file() {
        let parsed = parse_timestamp(".2025-08-21-04-06-25-0.mp4").unwrap();
        assert_eq!(parsed, ts("2025-08-21 04:06:25"));
    }

    #[test]
    fn test_parse_timestamp_rejects_noise() {
        assert!(parse_timestamp("thumbnail.jpg").is_none());
        assert!(parse_timestamp("2025-08.mp4").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_round_trip() {
        let t = ts("2024-01-02 23:59:59");
        let name = format_filename(t, 1, "mp4");
        assert_eq!(parse_timestamp(&name).unwrap(), t);
    }

    #[test]
    fn test_date_dir_and_recording_dir() {
        let t = ts("2025-08-21 04:06:25");
        assert_eq!(date_dir(t), "2025-08-21");
        assert_eq!(
            recording_dir(Path::new("/srv/record/live"), "cam-1", t),
            PathBuf::from("/srv/record/live/cam-1/2025-08-21")
        );
    }

    #[test]
    fn test_temp_file_marker() {
        assert!(is_temp_file(".2025-08-21-04-06-25-0.mp4"));
        assert!(!is_temp_file("2025-08-21-04-06-25-0.mp4"));
        assert!(!is_temp_file(".nfs000001"));
        assert_eq!(final_name(".2025-08-21-04-06-25-0.mp4"), "2025-08-21-04-06-25-0.mp4");
        assert_eq!(final_name("already-final.mp4"), "already-final.mp4");
    }

    #[test]
    fn test_candidate_timestamps_window() {
        let t = ts("2025-08-21 04:06:25");
        let candidates = candidate_timestamps(t, 5);
        assert_eq!(candidates.len(), 11);
        assert_eq!(candidates[0], t - Duration::minutes(5));
        assert_eq!(candidates[10], t + Duration::minutes(5));
        assert!(candidates.contains(&t));
    }

    #[test]
    fn test_candidate_timestamps_straddle_midnight() {
        let t = ts("2025-08-22 00:02:00");
        let candidates = candidate_timestamps(t, 5);
        assert!(candidates.iter().any(|c| date_dir(*c) == "2025-08-21"));
        assert!(candidates.iter().any(|c| date_dir(*c) == "2025-08-22"));
    }
}
