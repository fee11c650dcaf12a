//! In-memory fakes for the store and engine seams.

pub mod mock_store;

pub use mock_store::{MockCameraStore, MockMediaEngine, MockRecordingStore};
