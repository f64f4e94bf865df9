pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod gcode;
pub mod jobs;
pub mod matcher;
pub mod spoolman;
pub mod watcher;

pub use config::Config;
pub use engine::Engine;
pub use error::SpoolSyncError;
