//! Reload the store when the database file changes
//!
//! [`DatabaseWatcher`] watches the directory containing the database (editors
//! and deploy tools usually replace files by rename), debounces events for
//! the file, and calls [`StoreHolder::reload`]. It runs as a lifecycle
//! [`Component`].

use crate::holder::StoreHolder;
use crate::lifecycle::{Component, ComponentError};
use crate::loader::{CancelToken, LoadOptions};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const DEBOUNCE_MS: u64 = 200;
const POLL_MS: u64 = 50;

/// Watcher thread handle and shutdown channel
struct Running {
    _watcher: notify::RecommendedWatcher,
    /// Cancels an in-flight reload on stop
    cancel: CancelToken,
    shutdown_tx: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// File watcher that reloads a [`StoreHolder`]
pub struct DatabaseWatcher {
    path: PathBuf,
    holder: Arc<StoreHolder>,
    options: LoadOptions,
    running: Mutex<Option<Running>>,
    done_tx: crossbeam_channel::Sender<()>,
    done_rx: crossbeam_channel::Receiver<()>,
}

impl DatabaseWatcher {
    pub fn new(path: impl Into<PathBuf>, holder: Arc<StoreHolder>, options: LoadOptions) -> Self {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        Self {
            path: path.into(),
            holder,
            options,
            running: Mutex::new(None),
            done_tx,
            done_rx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// True if a notify event touches `file`
fn touches(event: &notify::Event, file: &Path) -> bool {
    event.paths.iter().any(|p| p == file || p.file_name() == file.file_name())
}

impl Component for DatabaseWatcher {
    fn name(&self) -> &str {
        "database-watcher"
    }

    fn start(&self) -> Result<(), ComponentError> {
        use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};

        let file = self
            .path
            .canonicalize()
            .map_err(|e| format!("Failed to canonicalize {}: {}", self.path.display(), e))?;
        let dir = file
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| format!("{} has no parent directory", file.display()))?;

        let (event_tx, event_rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(event_tx, Config::default())
            .map_err(|e| format!("Failed to create file watcher: {}", e))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| format!("Failed to watch {}: {}", dir.display(), e))?;

        // A completion left over from an earlier run must not release wait()
        while self.done_rx.try_recv().is_ok() {}

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let run_cancel = CancelToken::new();
        let holder = Arc::clone(&self.holder);
        let options = self.options.clone();
        let cancel = run_cancel.clone();
        let done_tx = self.done_tx.clone();

        let handle = thread::spawn(move || {
            let mut last_event: Option<Instant> = None;
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                match event_rx.recv_timeout(Duration::from_millis(POLL_MS)) {
                    Ok(Ok(event)) => {
                        if touches(&event, &file) {
                            last_event = Some(Instant::now());
                        }
                    }
                    Ok(Err(e)) => tracing::debug!(error = %e, "watch error"),
                    Err(RecvTimeoutError::Timeout) => {
                        let settled = last_event
                            .is_some_and(|t| t.elapsed() >= Duration::from_millis(DEBOUNCE_MS));
                        if settled {
                            last_event = None;
                            // Errors are reported through the holder's callback and log
                            let _ = holder.reload(&file, &options, &cancel);
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            let _ = done_tx.try_send(());
        });

        tracing::info!(path = %self.path.display(), "watching database");
        let mut running = self
            .running
            .lock()
            .map_err(|_| "watcher state poisoned".to_string())?;
        *running = Some(Running {
            _watcher: watcher,
            cancel: run_cancel,
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    fn wait(&self) -> Result<(), ComponentError> {
        // A disconnected channel means the watcher is gone either way
        let _ = self.done_rx.recv();
        Ok(())
    }

    fn stop(&self) -> Result<(), ComponentError> {
        let running = self
            .running
            .lock()
            .map_err(|_| "watcher state poisoned".to_string())?
            .take();

        match running {
            Some(running) => {
                running.cancel.cancel();
                let _ = running.shutdown_tx.send(());
                running
                    .handle
                    .join()
                    .map_err(|_| "watcher thread panicked".to_string())?;
                tracing::debug!(path = %self.path.display(), "watcher stopped");
            }
            // Never started: release anyone blocked in wait()
            None => {
                let _ = self.done_tx.try_send(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader;
    use crate::mmdb::CountryDbWriter;

    fn write_db(path: &Path, code: &str) {
        let mut writer = CountryDbWriter::new();
        writer.insert("10.0.0.0/8".parse().unwrap(), code).unwrap();
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, writer.build().unwrap()).unwrap();
        std::fs::rename(&tmp, path).unwrap();
    }

    #[test]
    fn test_start_missing_file_fails() {
        let holder = Arc::new(StoreHolder::new(Default::default()));
        let watcher = DatabaseWatcher::new("/nonexistent/geo.mmdb", holder, LoadOptions::default());
        assert!(watcher.start().is_err());
        // stop without a successful start is harmless
        watcher.stop().unwrap();
        watcher.wait().unwrap();
    }

    #[test]
    fn test_reloads_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo.mmdb");
        write_db(&path, "RU");

        let options = LoadOptions::default();
        let holder = Arc::new(
            StoreHolder::open(&path, &options, &loader::CancelToken::new()).unwrap(),
        );
        let watcher = DatabaseWatcher::new(&path, Arc::clone(&holder), options);
        watcher.start().unwrap();

        write_db(&path, "KZ");

        let deadline = Instant::now() + Duration::from_secs(10);
        while holder.generation() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        watcher.stop().unwrap();

        assert!(holder.generation() >= 2);
        assert_eq!(holder.snapshot().lookup_exact("10.0.0.0/8").unwrap(), "KZ");
    }

    #[test]
    fn test_restart_after_stop_still_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo.mmdb");
        write_db(&path, "RU");

        let options = LoadOptions::default();
        let holder = Arc::new(
            StoreHolder::open(&path, &options, &loader::CancelToken::new()).unwrap(),
        );
        let watcher = DatabaseWatcher::new(&path, Arc::clone(&holder), options);
        watcher.start().unwrap();
        watcher.stop().unwrap();

        watcher.start().unwrap();
        write_db(&path, "DE");

        let deadline = Instant::now() + Duration::from_secs(10);
        while holder.generation() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        watcher.stop().unwrap();

        assert!(holder.generation() >= 2);
        assert_eq!(holder.snapshot().lookup_exact("10.0.0.0/8").unwrap(), "DE");
    }
}
