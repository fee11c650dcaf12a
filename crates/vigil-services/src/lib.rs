pub mod monitor;
pub mod reaper;
pub mod services;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use monitor::RecordingMonitor;
pub use reaper::UploadReaper;
pub use services::media_engine::{EngineError, MediaEngine, MediaEngineClient};
