pub mod camera;
pub mod recording;
