//! Vigil core library
//!
//! Domain models, configuration, and the recording filename conventions
//! shared across all vigil components.

pub mod config;
pub mod constants;
pub mod models;
pub mod recording_path;

pub use config::VigilConfig;
