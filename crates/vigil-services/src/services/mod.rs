pub mod media_engine;
