//! Media-engine control API client.
//!
//! ZLMediaKit-style HTTP API: every endpoint takes the shared secret as a
//! query parameter and answers `{"code": 0, ...}` on success. All calls are
//! advisory for the reconciliation engine; an unreachable engine means one
//! skipped step, never an aborted cycle.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use vigil_core::constants::{DEFAULT_VHOST, RECORD_TYPE_MP4};
use vigil_core::models::StreamInfo;

const MEDIA_LIST_TIMEOUT: Duration = Duration::from_secs(5);
const IS_RECORDING_TIMEOUT: Duration = Duration::from_secs(3);
const START_RECORD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Engine API error {code}: {msg}")]
    Api { code: i32, msg: String },
}

/// What the two background engines need from the media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Active streams for the configured app/schema set, with the
    /// `recording_active` flag resolved per stream.
    async fn active_streams(&self) -> Result<Vec<StreamInfo>, EngineError>;

    /// Ask the engine to start an MP4 recording for `stream`, capped at
    /// `max_seconds` per segment. `Ok(false)` means the engine refused.
    async fn start_recording(&self, stream: &str, max_seconds: u32) -> Result<bool, EngineError>;
}

/// Standard response envelope: `code == 0` is success, anything else carries
/// a message.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i32,
    msg: Option<String>,
    data: Option<T>,
}

/// `isRecording` answers with the flag as a sibling of `code`, not inside a
/// `data` object. Current engines name it `online`; older builds used
/// `status`. Either counts.
#[derive(Debug, Deserialize)]
struct IsRecordingResponse {
    code: i32,
    #[serde(default)]
    online: bool,
    #[serde(default)]
    status: bool,
}

impl IsRecordingResponse {
    fn recording(&self) -> bool {
        self.code == 0 && (self.online || self.status)
    }
}

#[derive(Clone)]
pub struct MediaEngineClient {
    http: reqwest::Client,
    base_url: String,
    secret: String,
    app: String,
    schemas: Vec<String>,
}

impl MediaEngineClient {
    pub fn new(base_url: &str, secret: &str, app: &str, schemas: Vec<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
            app: app.to_string(),
            schemas,
        }
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    /// `isRecording` probe for one stream. Any failure reads as "not
    /// recording", which at worst makes step 1 re-issue a start the engine
    /// will refuse.
    async fn is_recording(&self, stream: &str) -> bool {
        let result = self
            .http
            .get(self.endpoint("isRecording"))
            .timeout(IS_RECORDING_TIMEOUT)
            .query(&[
                ("secret", self.secret.as_str()),
                ("type", "1"),
                ("vhost", DEFAULT_VHOST),
                ("app", self.app.as_str()),
                ("stream", stream),
            ])
            .send()
            .await;

        match result {
            Ok(response) => match response.json::<IsRecordingResponse>().await {
                Ok(body) if body.code == 0 => body.recording(),
                Ok(body) => {
                    tracing::debug!(
                        stream = %stream,
                        code = body.code,
                        "isRecording returned non-zero code"
                    );
                    false
                }
                Err(e) => {
                    tracing::warn!(stream = %stream, error = %e, "Failed to parse isRecording response");
                    false
                }
            },
            Err(e) => {
                tracing::warn!(stream = %stream, error = %e, "isRecording probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl MediaEngine for MediaEngineClient {
    async fn active_streams(&self) -> Result<Vec<StreamInfo>, EngineError> {
        let response = self
            .http
            .get(self.endpoint("getMediaList"))
            .timeout(MEDIA_LIST_TIMEOUT)
            .query(&[("secret", self.secret.as_str())])
            .send()
            .await?;

        let envelope: ApiEnvelope<Vec<StreamInfo>> = response.json().await?;
        if envelope.code != 0 {
            tracing::warn!(
                code = envelope.code,
                msg = envelope.msg.as_deref().unwrap_or(""),
                "getMediaList returned non-zero code"
            );
            return Ok(Vec::new());
        }

        // One entry per schema per stream; collapse to one per stream id.
        let mut streams: Vec<StreamInfo> = Vec::new();
        for info in envelope.data.unwrap_or_default() {
            if info.app != self.app {
                continue;
            }
            if !self.schemas.iter().any(|s| s == &info.schema.to_lowercase()) {
                continue;
            }
            if streams.iter().any(|existing| existing.stream == info.stream) {
                continue;
            }
            streams.push(info);
        }

        for info in streams.iter_mut() {
            info.recording_active = self.is_recording(&info.stream).await;
        }

        tracing::debug!(count = streams.len(), "Fetched active streams");
        Ok(streams)
    }

    async fn start_recording(&self, stream: &str, max_seconds: u32) -> Result<bool, EngineError> {
        let response = self
            .http
            .get(self.endpoint("startRecord"))
            .timeout(START_RECORD_TIMEOUT)
            .query(&[
                ("secret", self.secret.as_str()),
                ("type", &RECORD_TYPE_MP4.to_string()),
                ("vhost", DEFAULT_VHOST),
                ("app", self.app.as_str()),
                ("stream", stream),
                ("max_second", &max_seconds.to_string()),
            ])
            .send()
            .await?;

        let envelope: ApiEnvelope<serde_json::Value> = response.json().await?;
        if envelope.code != 0 {
            tracing::warn!(
                stream = %stream,
                code = envelope.code,
                msg = envelope.msg.as_deref().unwrap_or(""),
                "startRecord refused"
            );
            return Ok(false);
        }

        tracing::info!(stream = %stream, max_seconds, "Recording started at engine");
        Ok(true)
    }
}
