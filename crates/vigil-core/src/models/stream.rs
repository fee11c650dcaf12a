use serde::{Deserialize, Serialize};

/// One active stream as reported by the media engine's `getMediaList`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Stream identifier; doubles as the camera id.
    pub stream: String,
    pub app: String,
    pub schema: String,
    #[serde(default)]
    pub vhost: Option<String>,
    /// Filled in by a per-stream `isRecording` probe, not by `getMediaList`.
    #[serde(skip)]
    pub recording_active: bool,
}
