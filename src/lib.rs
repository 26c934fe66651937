//! Geocoder - IP-to-country index and query engine
//!
//! Geocoder loads a MaxMind-format country database into an immutable
//! in-memory [`Store`] and answers two questions:
//! - which country owns an exact network prefix
//! - which prefixes a country owns, whole, paginated or streamed in chunks
//!
//! # Quick Start
//!
//! ```rust
//! use geocoder::{load, CancelToken, CountryDbWriter, LoadOptions, Reader};
//!
//! // Build a small country database
//! let mut writer = CountryDbWriter::new();
//! writer.insert("10.0.0.0/8".parse()?, "RU")?;
//! writer.insert("172.16.0.0/12".parse()?, "RU")?;
//! writer.insert("2001:db8::/32".parse()?, "US")?;
//! let reader = Reader::from_bytes(writer.build()?)?;
//!
//! // Load it into a store
//! let store = load(&reader, &LoadOptions::default(), &CancelToken::new())?;
//!
//! assert_eq!(store.lookup_exact("2001:db8::/32")?, "US");
//! // Exact match only: a sub-range of a stored prefix misses
//! assert!(store.lookup_exact("10.0.0.0/9").is_err());
//!
//! let page = store.paginate("ru", 0, 100)?;
//! assert_eq!(page.total_elements, 2);
//!
//! for chunk in store.stream_ranges(&["RU", "US"], Some(1))? {
//!     println!("{} page {} of {}", chunk.code(), chunk.page() + 1, chunk.total_pages());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! mmdb::Reader ──entries──▶ loader ──finalize──▶ Store ──▶ query (page / stream)
//!                                                  │
//!                          StoreHolder (ArcSwap) ◀─┘ ◀── DatabaseWatcher
//!                                  │
//!                              GeoService
//! ```
//!
//! A store is built once and never mutated. Reloads build a new store and
//! swap it into the [`StoreHolder`]; readers keep whatever snapshot they hold.

#![warn(clippy::all)]

/// Country code canonicalization and interning
pub mod country;
/// Error types for load and query operations
pub mod error;
/// Reloadable store holder
pub mod holder;
/// Component graph and runner
pub mod lifecycle;
/// Loader and decoder contract
pub mod loader;
/// MMDB reader and writer
pub mod mmdb;
/// Canonical network prefixes
pub mod prefix;
pub mod query;
/// Query façade for transport layers
pub mod service;
pub mod store;
/// File watching reloader
pub mod watch;

pub use crate::country::{normalize_iso, CountryId};
pub use crate::error::{ErrorKind, GeoError, Result};
pub use crate::holder::{ReloadCallback, ReloadEvent, StoreHolder};
pub use crate::lifecycle::{Component, ComponentError, ConfigError, Graph, RunError, Runner};
pub use crate::loader::{
    effective_fallback_code, load, load_file, CancelToken, EntryIter, LoadOptions, NetworkSource,
    RawEntry, DEFAULT_FALLBACK_CODE,
};
pub use crate::mmdb::{CountryDbWriter, CountryRecord, MmdbError, Reader, RecordSize};
pub use crate::prefix::{Family, Prefix};
pub use crate::query::{
    effective_chunk_size, Chunk, Page, RangeStream, SharedPage, DEFAULT_CHUNK_SIZE,
    MAX_CHUNK_SIZE,
};
pub use crate::service::GeoService;
pub use crate::store::{ConflictPolicy, Store, StoreStats};
pub use crate::watch::DatabaseWatcher;

/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
