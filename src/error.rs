use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpoolSyncError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Spoolman request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("File watcher error: {0}")]
    Watcher(#[from] notify::Error),
}
