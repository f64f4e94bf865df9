//! Shared daemon state: configuration, the pending-job store, the spool
//! snapshot, the Spoolman client and the shutdown signal. One `Engine` is
//! constructed at startup and shared as `Arc<Engine>` by every task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;
use crate::error::SpoolSyncError;
use crate::jobs::{JobStore, PendingJob};
use crate::spoolman::{Spool, SpoolmanClient};

/// How long the feed path polls for late metadata after a print starts.
pub const JOB_RETRY_ATTEMPTS: u32 = 60;
pub const JOB_RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub struct Engine {
    pub config: Config,
    pub jobs: JobStore,
    pub spoolman: SpoolmanClient,
    /// Wholesale-replaced snapshot of the Spoolman inventory. Readers
    /// clone the `Arc` and never see a partially updated list.
    spools: Mutex<Arc<Vec<Spool>>>,
    shutdown: Shutdown,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self, SpoolSyncError> {
        let spoolman = SpoolmanClient::new(config.spoolman_url.clone())?;
        Ok(Self {
            config,
            jobs: JobStore::new(),
            spoolman,
            spools: Mutex::new(Arc::new(Vec::new())),
            shutdown: Shutdown::new(),
        })
    }

    /// Current spool snapshot.
    pub fn spools(&self) -> Arc<Vec<Spool>> {
        self.spools.lock().unwrap().clone()
    }

    /// Replace the spool snapshot with a fresh fetch. On failure (after
    /// the client's single retry) the previous snapshot stays in place.
    pub async fn refresh_spools(&self) {
        match self.spoolman.list_spools().await {
            Ok(spools) => {
                info!("loaded {} spools from Spoolman", spools.len());
                *self.spools.lock().unwrap() = Arc::new(spools);
            }
            Err(e) => {
                error!("failed to load spools, keeping previous snapshot: {}", e);
            }
        }
    }

    /// Look up the pending job for a filename, polling once per second for
    /// up to [`JOB_RETRY_ATTEMPTS`] seconds to ride out the race where the
    /// printer reports a start before the watcher has parsed the file.
    pub async fn wait_for_job(&self, filename: &str) -> Option<PendingJob> {
        if let Some(job) = self.jobs.get(filename) {
            return Some(job);
        }

        info!("no pending job for '{}' yet, waiting for metadata", filename);
        for attempt in 1..=JOB_RETRY_ATTEMPTS {
            tokio::time::sleep(JOB_RETRY_INTERVAL).await;

            if let Some(job) = self.jobs.get(filename) {
                info!("pending job for '{}' appeared after {}s", filename, attempt);
                return Some(job);
            }

            if attempt % 10 == 0 {
                info!(
                    "still waiting for metadata for '{}' ({}/{})",
                    filename, attempt, JOB_RETRY_ATTEMPTS
                );
            }
        }

        None
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }
}

/// Single-fire shutdown signal shared by every task.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Fire the signal. Only the first call does anything; returns whether
    /// this call was the one that fired.
    pub fn signal(&self) -> bool {
        self.tx.send_if_modified(|signaled| {
            if *signaled {
                false
            } else {
                *signaled = true;
                true
            }
        })
    }

    pub fn is_signaled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has fired.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_engine() -> Engine {
        let config: Config = toml::from_str(
            r#"
            feed_url = "ws://printer:3030/websocket"
            watch_folder = "/tmp"
            spoolman_url = "http://spoolman:7912"
            "#,
        )
        .unwrap();
        Engine::new(config).unwrap()
    }

    fn job(filename: &str) -> PendingJob {
        PendingJob {
            filename: filename.to_string(),
            presets: vec!["eSUN - PLA - Black".to_string()],
            usage_grams: vec![9.0],
            path: PathBuf::from("/watch").join(filename),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_job_returns_immediately_when_present() {
        let engine = test_engine();
        engine.jobs.insert(job("benchy.gcode"));

        let start = tokio::time::Instant::now();
        let found = engine.wait_for_job("benchy.gcode").await;
        assert!(found.is_some());
        assert_eq!(start.elapsed(), Duration::ZERO, "no polling should occur");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_job_picks_up_late_insert() {
        let engine = Arc::new(test_engine());

        // The job lands between the 6th and 7th poll; the 7th poll must
        // pick it up and no further retries may run.
        let producer = engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(6500)).await;
            producer.jobs.insert(job("benchy.gcode"));
        });

        let start = tokio::time::Instant::now();
        let found = engine.wait_for_job("benchy.gcode").await;
        assert!(found.is_some(), "job inserted during second 7 should be found");
        assert_eq!(
            start.elapsed(),
            Duration::from_secs(7),
            "polling should stop at the attempt that finds the job"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_job_gives_up_after_retry_window() {
        let engine = test_engine();

        let start = tokio::time::Instant::now();
        let found = engine.wait_for_job("never.gcode").await;
        assert!(found.is_none());
        assert_eq!(
            start.elapsed(),
            JOB_RETRY_INTERVAL * JOB_RETRY_ATTEMPTS,
            "the full retry window should elapse before giving up"
        );
    }

    #[test]
    fn test_shutdown_fires_exactly_once() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_signaled());
        assert!(shutdown.signal(), "first signal should fire");
        assert!(!shutdown.signal(), "second signal must be a no-op");
        assert!(shutdown.is_signaled());
    }

    #[tokio::test]
    async fn test_shutdown_wait_resolves_after_signal() {
        let shutdown = Arc::new(Shutdown::new());

        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        shutdown.signal();
        handle.await.expect("waiter should resolve");
    }

    #[tokio::test]
    async fn test_spool_snapshot_swapped_wholesale() {
        let engine = test_engine();
        assert!(engine.spools().is_empty());

        let before = engine.spools();
        *engine.spools.lock().unwrap() = Arc::new(vec![serde_json::from_str(
            r#"{ "id": 1 }"#,
        )
        .unwrap()]);

        assert!(before.is_empty(), "old snapshot stays intact for holders");
        assert_eq!(engine.spools().len(), 1);
    }
}
