//! Typed daemon configuration, loaded from a TOML file and validated
//! once at startup.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::error::SpoolSyncError;

/// Daemon configuration, loaded once at startup from a TOML file.
///
/// All fields are validated before the daemon starts so a bad URL or a
/// missing watch folder fails fast instead of surfacing mid-print.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// SDCP websocket endpoint of the printer (ws:// or wss://).
    pub feed_url: String,
    /// Folder the slicer post-processing hook copies sliced files into.
    pub watch_folder: PathBuf,
    /// Spoolman base URL (http:// or https://), without the /api/v1 suffix.
    pub spoolman_url: String,
    /// Delete the source file once its print has been recorded.
    #[serde(default = "default_true")]
    pub delete_after_print: bool,
    /// Keep running after a print completes; false exits after one cycle.
    #[serde(default = "default_true")]
    pub always_running: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, SpoolSyncError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&raw)
            .map_err(|e| SpoolSyncError::Config(format!("failed to parse {:?}: {}", path, e)))?;

        // Endpoints are joined with path suffixes later; a trailing slash
        // would produce double-slash URLs.
        config.spoolman_url = config.spoolman_url.trim_end_matches('/').to_string();

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), SpoolSyncError> {
        let feed = Url::parse(&self.feed_url)
            .map_err(|e| SpoolSyncError::Config(format!("invalid feed_url: {}", e)))?;
        if feed.scheme() != "ws" && feed.scheme() != "wss" {
            return Err(SpoolSyncError::Config(format!(
                "feed_url must be a ws:// or wss:// URL, got '{}'",
                self.feed_url
            )));
        }

        let spoolman = Url::parse(&self.spoolman_url)
            .map_err(|e| SpoolSyncError::Config(format!("invalid spoolman_url: {}", e)))?;
        if spoolman.scheme() != "http" && spoolman.scheme() != "https" {
            return Err(SpoolSyncError::Config(format!(
                "spoolman_url must be an http:// or https:// URL, got '{}'",
                self.spoolman_url
            )));
        }

        if !self.watch_folder.is_dir() {
            return Err(SpoolSyncError::Config(format!(
                "watch_folder does not exist or is not a directory: {:?}",
                self.watch_folder
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        toml::from_str(toml).expect("config should parse")
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse(
            r#"
            feed_url = "ws://printer:3030/websocket"
            watch_folder = "/tmp"
            spoolman_url = "http://spoolman:7912"
            "#,
        );
        assert!(config.delete_after_print, "delete_after_print should default to true");
        assert!(config.always_running, "always_running should default to true");
    }

    #[test]
    fn test_valid_config_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = parse(
            r#"
            feed_url = "ws://printer:3030/websocket"
            watch_folder = "/placeholder"
            spoolman_url = "http://spoolman:7912"
            delete_after_print = false
            always_running = false
            "#,
        );
        config.watch_folder = dir.path().to_path_buf();
        assert!(config.validate().is_ok());
        assert!(!config.delete_after_print);
        assert!(!config.always_running);
    }

    #[test]
    fn test_rejects_non_websocket_feed_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = parse(
            r#"
            feed_url = "http://printer:3030/websocket"
            watch_folder = "/placeholder"
            spoolman_url = "http://spoolman:7912"
            "#,
        );
        config.watch_folder = dir.path().to_path_buf();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("feed_url"), "unexpected error: {}", err);
    }

    #[test]
    fn test_rejects_missing_watch_folder() {
        let config = parse(
            r#"
            feed_url = "ws://printer:3030/websocket"
            watch_folder = "/definitely/not/a/real/folder"
            spoolman_url = "http://spoolman:7912"
            "#,
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("watch_folder"), "unexpected error: {}", err);
    }

    #[test]
    fn test_trailing_slash_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            r#"
            feed_url = "ws://printer:3030/websocket"
            watch_folder = {:?}
            spoolman_url = "http://spoolman:7912/"
            "#,
            dir.path()
        );
        let file = dir.path().join("config.toml");
        std::fs::write(&file, toml).unwrap();
        let config = Config::load(&file).expect("config should load");
        assert_eq!(config.spoolman_url, "http://spoolman:7912");
    }
}
