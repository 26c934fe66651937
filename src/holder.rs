//! Current store with lock-free whole-object replacement
//!
//! Readers call [`StoreHolder::snapshot`] and keep the returned `Arc<Store>`
//! for as long as one request needs a consistent view. A reload builds a new
//! store off to the side and swaps it in only once it is fully finalized, so
//! a failed or cancelled reload leaves the previous store serving.

use crate::error::{GeoError, Result};
use crate::loader::{self, CancelToken, LoadOptions};
use crate::mmdb::Reader;
use crate::store::Store;
use arc_swap::{ArcSwap, ArcSwapOption};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of one reload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadEvent {
    /// Database file that was loaded
    pub path: PathBuf,
    /// Whether the new store was installed
    pub success: bool,
    /// Error message if the reload failed
    pub error: Option<String>,
    /// Generation after the attempt
    pub generation: u64,
}

/// Callback type for reload notifications
pub type ReloadCallback = Arc<dyn Fn(ReloadEvent) + Send + Sync>;

/// Holder of the active store and the reader it was loaded from
pub struct StoreHolder {
    store: ArcSwap<Store>,
    reader: ArcSwapOption<Reader>,
    /// Incremented on every successful replacement, starting at 1
    generation: AtomicU64,
    on_reload: Option<ReloadCallback>,
}

impl StoreHolder {
    /// Wrap an already-loaded store
    pub fn new(store: Store) -> Self {
        Self {
            store: ArcSwap::from_pointee(store),
            reader: ArcSwapOption::empty(),
            generation: AtomicU64::new(1),
            on_reload: None,
        }
    }

    /// Load the initial store from an MMDB file, keeping the reader for IP lookups
    pub fn open(path: impl AsRef<Path>, options: &LoadOptions, cancel: &CancelToken) -> Result<Self> {
        let reader = Reader::open(path.as_ref())?;
        let store = loader::load(&reader, options, cancel)?;
        let holder = Self::new(store);
        holder.reader.store(Some(Arc::new(reader)));
        Ok(holder)
    }

    /// Set callback for reload notifications
    ///
    /// Called after every [`reload`](Self::reload), successful or not.
    pub fn on_reload<F>(mut self, callback: F) -> Self
    where
        F: Fn(ReloadEvent) + Send + Sync + 'static,
    {
        self.on_reload = Some(Arc::new(callback));
        self
    }

    /// Current store
    pub fn snapshot(&self) -> Arc<Store> {
        self.store.load_full()
    }

    /// Reader backing the current store, if it came from a file
    pub fn reader(&self) -> Option<Arc<Reader>> {
        self.reader.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Install a new store and return the new generation
    pub fn replace(&self, store: Store) -> u64 {
        self.store.store(Arc::new(store));
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Load `path` and install the result
    ///
    /// On error the current store stays active and the error is returned.
    pub fn reload(
        &self,
        path: impl AsRef<Path>,
        options: &LoadOptions,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let path = path.as_ref();
        let result: Result<(Store, Reader)> =
            Reader::open(path)
                .map_err(GeoError::from)
                .and_then(|reader| {
                    let store = loader::load(&reader, options, cancel)?;
                    Ok((store, reader))
                });

        let event = match &result {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "reload failed, keeping current store");
                Some(e.to_string())
            }
        };

        let outcome = result.map(|(store, reader)| {
            // Reader first so a snapshot never sees a store newer than its reader
            self.reader.store(Some(Arc::new(reader)));
            let generation = self.replace(store);
            tracing::info!(path = %path.display(), generation, "store reloaded");
            generation
        });

        if let Some(callback) = &self.on_reload {
            callback(ReloadEvent {
                path: path.to_path_buf(),
                success: event.is_none(),
                error: event,
                generation: self.generation(),
            });
        }

        outcome
    }
}

impl std::fmt::Debug for StoreHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHolder")
            .field("generation", &self.generation())
            .field("stats", &self.snapshot().stats())
            .field("has_reader", &self.reader.load().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::RawEntry;
    use crate::mmdb::CountryDbWriter;
    use std::sync::Mutex;

    fn store_with(code: &str) -> Store {
        let entries = vec![RawEntry::new("10.0.0.0".parse().unwrap(), 8, Some(code))];
        loader::load(&entries, &LoadOptions::default(), &CancelToken::new()).unwrap()
    }

    #[test]
    fn test_replace_bumps_generation() {
        let holder = StoreHolder::new(store_with("RU"));
        assert_eq!(holder.generation(), 1);
        let before = holder.snapshot();

        assert_eq!(holder.replace(store_with("US")), 2);
        assert_eq!(holder.snapshot().lookup_exact("10.0.0.0/8").unwrap(), "US");
        // Old snapshots stay valid
        assert_eq!(before.lookup_exact("10.0.0.0/8").unwrap(), "RU");
    }

    #[test]
    fn test_failed_reload_keeps_store() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let holder = StoreHolder::new(store_with("RU")).on_reload(move |e| {
            sink.lock().unwrap().push(e);
        });

        let err = holder
            .reload("/nonexistent/geo.mmdb", &LoadOptions::default(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, GeoError::LoadFailure(_)));
        assert_eq!(holder.generation(), 1);
        assert_eq!(holder.snapshot().lookup_exact("10.0.0.0/8").unwrap(), "RU");

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
        assert!(events[0].error.is_some());
    }

    #[test]
    fn test_reload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo.mmdb");
        let mut writer = CountryDbWriter::new();
        writer.insert("10.0.0.0/8".parse().unwrap(), "DE").unwrap();
        std::fs::write(&path, writer.build().unwrap()).unwrap();

        let holder = StoreHolder::new(store_with("RU"));
        assert!(holder.reader().is_none());
        let generation = holder
            .reload(&path, &LoadOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(generation, 2);
        assert_eq!(holder.snapshot().lookup_exact("10.0.0.0/8").unwrap(), "DE");
        assert!(holder.reader().is_some());
    }

    #[test]
    fn test_cancelled_reload_keeps_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo.mmdb");
        let mut writer = CountryDbWriter::new();
        writer.insert("10.0.0.0/8".parse().unwrap(), "DE").unwrap();
        std::fs::write(&path, writer.build().unwrap()).unwrap();

        let holder = StoreHolder::new(store_with("RU"));
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(
            holder.reload(&path, &LoadOptions::default(), &cancel).unwrap_err(),
            GeoError::Cancelled
        );
        assert_eq!(holder.snapshot().lookup_exact("10.0.0.0/8").unwrap(), "RU");
    }
}
