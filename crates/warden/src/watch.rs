//! Debounced file change notification
//!
//! Watches the parent directory of every target file rather than the file
//! itself, so editors and tools that replace a file (write to a temporary,
//! then rename over the target) are seen the same as in-place writes.
//! Bursts of raw events are collapsed into a single notification once the
//! quiet period has elapsed.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Default quiet period before a collapsed notification fires
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Errors raised while registering file watches
#[derive(Debug, Error)]
pub enum WatchError {
    /// No paths were supplied
    #[error("No paths to watch")]
    NoPaths,

    /// The watched file's directory could not be resolved
    #[error("Cannot watch {}: {source}", .path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The platform notifier rejected the registration
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Receives collapsed change notifications
#[async_trait]
pub trait ChangeListener: Send + Sync + 'static {
    /// One or more watched files changed; `paths` lists those seen in the burst
    async fn on_change(&self, paths: Vec<PathBuf>);
}

/// Handle owning an active watch
///
/// Dropping the handle (or calling [`ChangeWatcher::stop`]) unregisters the
/// notifier and ends the debounce task.
pub struct ChangeWatcher {
    watcher: Option<RecommendedWatcher>,
    task: JoinHandle<()>,
    targets: Vec<PathBuf>,
}

impl ChangeWatcher {
    /// Start watching `paths`, notifying `listener` after each settled burst
    ///
    /// Must be called from within a Tokio runtime.
    pub fn watch(
        paths: &[PathBuf],
        debounce: Duration,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<Self, WatchError> {
        if paths.is_empty() {
            return Err(WatchError::NoPaths);
        }

        let targets = paths
            .iter()
            .map(|path| normalize(path))
            .collect::<Result<Vec<_>, _>>()?;

        let directories: BTreeSet<PathBuf> = targets
            .iter()
            .filter_map(|target| target.parent().map(Path::to_path_buf))
            .collect();

        let (tx, rx) = mpsc::unbounded_channel();
        let wanted: HashSet<PathBuf> = targets.iter().cloned().collect();

        let mut watcher = notify::recommended_watcher(move |event: Result<Event, notify::Error>| {
            match event {
                Ok(event) => {
                    if !is_content_change(&event.kind) {
                        return;
                    }
                    for path in event.paths {
                        if wanted.contains(&path) {
                            trace!(path = %path.display(), kind = ?event.kind, "Raw file event");
                            let _ = tx.send(path);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "File watcher reported an error"),
            }
        })?;

        for directory in &directories {
            watcher.watch(directory, RecursiveMode::NonRecursive)?;
        }

        let task = tokio::spawn(debounce_loop(rx, debounce, listener));

        info!(
            files = ?targets,
            debounce_ms = debounce.as_millis() as u64,
            "Watching certificate files for changes"
        );

        Ok(Self {
            watcher: Some(watcher),
            task,
            targets,
        })
    }

    /// Files being watched, as resolved at registration
    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    /// Stop watching
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.watcher.take().is_some() {
            self.task.abort();
            debug!(files = ?self.targets, "Stopped watching certificate files");
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("targets", &self.targets)
            .field("active", &self.watcher.is_some())
            .finish()
    }
}

async fn debounce_loop(
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    quiet: Duration,
    listener: Arc<dyn ChangeListener>,
) {
    while let Some(first) = rx.recv().await {
        let mut changed = BTreeSet::from([first]);
        let mut closed = false;

        loop {
            match tokio::time::timeout(quiet, rx.recv()).await {
                Ok(Some(path)) => {
                    changed.insert(path);
                }
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        debug!(files = ?changed, "Certificate files changed");
        listener.on_change(changed.into_iter().collect()).await;

        if closed {
            break;
        }
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Canonical directory joined with the file name
///
/// The file itself may not exist yet (or may be mid-replacement), but its
/// directory must.
fn normalize(path: &Path) -> Result<PathBuf, WatchError> {
    let absolute = std::path::absolute(path).map_err(|source| WatchError::Resolve {
        path: path.to_path_buf(),
        source,
    })?;

    let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) else {
        return Err(WatchError::Resolve {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file path"),
        });
    };

    let parent = parent.canonicalize().map_err(|source| WatchError::Resolve {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(parent.join(name))
}
