//! Hot-reload file watcher for development.

use crate::error::Result;
use crate::factory::ScriptControllerFactory;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Invalidates script classes whose source files change.
///
/// A changed `HomeController.rhai` drops the `HomeController` binding, so
/// the next request for it reloads the source.
pub struct ScriptWatcher {
    factory: Arc<ScriptControllerFactory>,
    watch_dirs: Vec<PathBuf>,
    debounce_ms: u64,
}

impl ScriptWatcher {
    /// Create a watcher over the factory's controllers directory.
    pub fn new(factory: Arc<ScriptControllerFactory>) -> Self {
        let engine = factory.engine();
        let handlers = format!("~/{}", engine.config().handlers_dir);
        let watch_dirs = vec![engine.path_provider().map_path(&handlers)];

        Self {
            factory,
            watch_dirs,
            debounce_ms: 100,
        }
    }

    /// Add a directory to watch.
    pub fn watch(mut self, dir: impl Into<PathBuf>) -> Self {
        self.watch_dirs.push(dir.into());
        self
    }

    /// Set debounce duration in milliseconds.
    pub fn debounce(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Start watching. Must be called from within a tokio runtime.
    pub async fn start(self) -> Result<WatchHandle> {
        let (tx, rx) = mpsc::channel(100);
        let (event_tx, mut event_rx) = mpsc::channel::<PathBuf>(100);
        let extension = self.factory.engine().config().extension.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    for path in event.paths {
                        if path.extension().is_some_and(|e| e == extension.as_str()) {
                            let _ = event_tx.blocking_send(path);
                        }
                    }
                }
            },
            Config::default(),
        )?;

        for dir in &self.watch_dirs {
            if let Err(e) = watcher.watch(dir, RecursiveMode::Recursive) {
                warn!("Failed to watch {}: {}", dir.display(), e);
            } else {
                info!("Watching for changes: {}", dir.display());
            }
        }

        let factory = self.factory;
        let debounce = Duration::from_millis(self.debounce_ms);
        tokio::spawn(async move {
            let mut pending = BTreeSet::new();

            loop {
                tokio::select! {
                    path = event_rx.recv() => {
                        match path {
                            Some(path) => {
                                if let Some(stem) = path.file_stem() {
                                    pending.insert(stem.to_string_lossy().into_owned());
                                }
                            }
                            None => break,
                        }
                    }
                    _ = tokio::time::sleep(debounce), if !pending.is_empty() => {
                        for class_name in std::mem::take(&mut pending) {
                            let removed = factory.cache().invalidate(&class_name);
                            debug!(class = %class_name, removed, "Script changed");

                            if tx.send(class_name).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(WatchHandle {
            _watcher: watcher,
            changes: rx,
        })
    }
}

/// A running watcher. Watching stops when the handle is dropped.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    changes: mpsc::Receiver<String>,
}

impl WatchHandle {
    /// Wait for the next invalidated class name.
    pub async fn next_change(&mut self) -> Option<String> {
        self.changes.recv().await
    }
}
