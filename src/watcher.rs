//! Watch-folder ingestion: the startup scan plus live creation events,
//! both funneling through one ingest path into the pending-job store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::error::SpoolSyncError;
use crate::gcode;
use crate::jobs::{self, PendingJob, STABILIZE_TIMEOUT};

/// File extension the slicer hook produces, compared case-insensitively.
const GCODE_EXTENSION: &str = "gcode";

/// Live folder watcher. Creation events are forwarded from the notify
/// callback thread over a channel to an async ingest task, which owns the
/// stability wait and the parse.
pub struct FolderWatcher {
    // Dropping the watcher stops the notify thread.
    _watcher: RecommendedWatcher,
    ingest: JoinHandle<()>,
}

impl FolderWatcher {
    pub fn start(engine: Arc<Engine>) -> Result<FolderWatcher, SpoolSyncError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Create(_)) {
                        for path in event.paths {
                            if has_gcode_extension(&path) {
                                // Receiver gone means shutdown; nothing to do.
                                let _ = tx.send(path);
                            }
                        }
                    }
                }
                Err(e) => warn!("file watcher error: {}", e),
            })?;

        watcher.watch(&engine.config.watch_folder, RecursiveMode::NonRecursive)?;
        info!(
            "watching {} for new .{} files",
            engine.config.watch_folder.display(),
            GCODE_EXTENSION
        );

        let ingest = tokio::spawn(async move {
            while let Some(path) = rx.recv().await {
                info!("new sliced file detected: {}", path.display());
                ingest_file(&engine, path).await;
            }
        });

        Ok(FolderWatcher {
            _watcher: watcher,
            ingest,
        })
    }

    /// Stop the notify thread and the ingest task.
    pub fn stop(self) {
        drop(self._watcher);
        self.ingest.abort();
    }
}

/// One-time scan of the watch folder at startup, so files copied before
/// the daemon started (or left behind by a restart) still get metadata
/// parsed before their print-start event arrives.
pub async fn initial_scan(engine: &Engine) -> Result<(), SpoolSyncError> {
    info!("performing initial folder scan");

    let mut entries = tokio::fs::read_dir(&engine.config.watch_folder).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && has_gcode_extension(&path) {
            info!("found existing sliced file: {}", path.display());
            ingest_file(engine, path).await;
        }
    }

    Ok(())
}

/// Shared ingest path for both producers: wait for the write to settle,
/// parse the metadata off the async runtime, normalize, and store the
/// pending job under its short filename.
async fn ingest_file(engine: &Engine, path: PathBuf) {
    let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
        warn!("skipping file with non-UTF-8 name: {}", path.display());
        return;
    };

    if !jobs::wait_for_file_stable(&path, STABILIZE_TIMEOUT).await {
        warn!(
            "{} did not stabilize within {:?}, parsing best-effort",
            filename, STABILIZE_TIMEOUT
        );
    }

    let parse_path = path.clone();
    let parsed = tokio::task::spawn_blocking(move || gcode::parse_metadata(&parse_path)).await;

    match parsed {
        Ok(Ok((presets, grams))) => {
            let (presets, usage_grams) = gcode::normalize_usage(presets, grams);
            info!(
                "queued metadata for '{}': presets={:?}, usage={:?}",
                filename, presets, usage_grams
            );
            engine.jobs.insert(PendingJob {
                filename,
                presets,
                usage_grams,
                path,
            });
        }
        Ok(Err(e)) => error!("failed to parse {}: {}", path.display(), e),
        Err(e) => error!("metadata parse task failed for {}: {}", path.display(), e),
    }
}

fn has_gcode_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(GCODE_EXTENSION))
        .unwrap_or(false)
}
