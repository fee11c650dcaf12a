pub mod recording;
pub mod stream;

pub use recording::{NewRecording, Recording, RecordingStatus, UploadStatus};
pub use stream::StreamInfo;
