pub mod file_match;
pub mod service;

pub use service::{MonitorCycleReport, RecordingMonitor};
