pub mod service;

pub use service::{ReaperStats, UploadReaper};
