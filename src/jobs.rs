//! Pending-job correlation table shared between the folder watcher and the
//! printer feed listener.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How often the size of a freshly observed file is sampled.
pub const STABILIZE_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long to wait for a file to stop growing before parsing it anyway.
pub const STABILIZE_TIMEOUT: Duration = Duration::from_secs(5);

/// Filament metadata for one sliced file, awaiting its print-start event.
///
/// Never mutated after insertion; the feed listener only reads it and
/// removes it by key once the print has been processed.
#[derive(Debug, Clone)]
pub struct PendingJob {
    /// Short filename, the correlation key with the printer's status feed.
    pub filename: String,
    /// Filament preset names, position-correlated with `usage_grams`.
    pub presets: Vec<String>,
    /// Grams consumed per preset, already normalized.
    pub usage_grams: Vec<f64>,
    /// Full path of the source file, for post-print cleanup.
    pub path: PathBuf,
}

/// Map from short filename to [`PendingJob`].
///
/// Written by the watcher ingest task, read and drained by the feed
/// listener. The mutex is never held across an await. Entries for prints
/// that never start are left in place; there is no eviction.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    inner: Arc<Mutex<HashMap<String, PendingJob>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the job for its filename.
    pub fn insert(&self, job: PendingJob) {
        let mut jobs = self.inner.lock().unwrap();
        jobs.insert(job.filename.clone(), job);
    }

    /// Cloned snapshot of the job for a filename, if present.
    pub fn get(&self, filename: &str) -> Option<PendingJob> {
        self.inner.lock().unwrap().get(filename).cloned()
    }

    pub fn remove(&self, filename: &str) -> Option<PendingJob> {
        self.inner.lock().unwrap().remove(filename)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.inner.lock().unwrap().contains_key(filename)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Wait until a file's size is unchanged across one polling interval and
/// greater than zero bytes.
///
/// Slicer hooks copy files into the watch folder, so a creation event can
/// fire while the write is still in progress. Returns `false` if the file
/// never stabilizes within `timeout`; callers then parse best-effort.
pub async fn wait_for_file_stable(path: &Path, timeout: Duration) -> bool {
    let attempts = (timeout.as_millis() / STABILIZE_POLL_INTERVAL.as_millis()).max(1);
    let mut last_size: Option<u64> = None;

    for _ in 0..attempts {
        let size = tokio::fs::metadata(path).await.ok().map(|m| m.len());

        if size.is_some() && size == last_size && size > Some(0) {
            return true;
        }

        last_size = size;
        tokio::time::sleep(STABILIZE_POLL_INTERVAL).await;
    }

    false
}
