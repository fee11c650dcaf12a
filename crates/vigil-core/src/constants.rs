//! Shared constants.

/// Error code written when an upload has exhausted its retry budget.
/// Rows carrying this code are never picked up by the transfer worker again.
pub const MAX_RETRIES_EXCEEDED: &str = "MAX_RETRIES_EXCEEDED";

/// Leading marker the media engine uses for files that are still being written.
pub const TEMP_FILE_PREFIX: char = '.';

/// Recording container extension produced by the media engine.
pub const RECORDING_EXT: &str = "mp4";

/// Virtual host the media engine scopes its streams under.
pub const DEFAULT_VHOST: &str = "__defaultVhost__";

/// Record type parameter for MP4 recording in the engine control API.
pub const RECORD_TYPE_MP4: u8 = 1;
