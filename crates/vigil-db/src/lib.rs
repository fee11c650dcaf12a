pub mod db;
pub mod store_traits;

pub use db::camera::CameraRepository;
pub use db::recording::RecordingRepository;
pub use store_traits::{CameraStore, RecordingStore};
