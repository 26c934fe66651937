//! Loader: decoder entries in, finalized [`Store`] out
//!
//! The load is a single sequential pass so that country ids follow first-seen
//! order and the same input always produces the same store. A cancellation
//! token is polled between entries; on any error or cancellation the
//! building state is dropped and nothing is returned.

use crate::country::normalize_iso;
use crate::error::{GeoError, Result};
use crate::mmdb::Reader;
use crate::prefix::Prefix;
use crate::store::{ConflictPolicy, Store, StoreBuilder};
use std::convert::Infallible;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Code assigned when neither country field resolves
pub const DEFAULT_FALLBACK_CODE: &str = "ZZ";

const PROGRESS_INTERVAL: usize = 100_000;

/// Canonical fallback code; a blank one means [`DEFAULT_FALLBACK_CODE`]
pub fn effective_fallback_code(code: &str) -> String {
    let canonical = normalize_iso(code);
    if canonical.is_empty() {
        DEFAULT_FALLBACK_CODE.to_string()
    } else {
        canonical
    }
}

/// Options recognized by [`load`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Ask the decoder to omit IPv4 alias networks
    pub skip_aliased_networks: bool,
    /// Code used when an entry carries no country
    pub fallback_code: String,
    /// Exact-match index behaviour for duplicate prefixes
    pub conflict_policy: ConflictPolicy,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            skip_aliased_networks: true,
            fallback_code: DEFAULT_FALLBACK_CODE.to_string(),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skip_aliased(mut self, skip: bool) -> Self {
        self.skip_aliased_networks = skip;
        self
    }

    pub fn with_fallback_code(mut self, code: impl Into<String>) -> Self {
        self.fallback_code = code.into();
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }
}

/// Shared cancellation flag
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One network as produced by a decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub addr: IpAddr,
    pub prefix_len: u8,
    pub country: Option<String>,
    pub registered_country: Option<String>,
}

impl RawEntry {
    pub fn new(addr: IpAddr, prefix_len: u8, country: Option<&str>) -> Self {
        Self {
            addr,
            prefix_len,
            country: country.map(str::to_string),
            registered_country: None,
        }
    }

    pub fn with_registered(mut self, code: Option<&str>) -> Self {
        self.registered_country = code.map(str::to_string);
        self
    }

    /// Country, then registered country, then `fallback`; canonicalized
    pub fn resolve_code(&self, fallback: &str) -> String {
        let pick = |field: &Option<String>| {
            field
                .as_deref()
                .map(normalize_iso)
                .filter(|code| !code.is_empty())
        };
        pick(&self.country)
            .or_else(|| pick(&self.registered_country))
            .unwrap_or_else(|| normalize_iso(fallback))
    }
}

/// Boxed entry iterator handed out by a [`NetworkSource`]
pub type EntryIter<'a, E> = Box<dyn Iterator<Item = std::result::Result<RawEntry, E>> + 'a>;

/// Anything that can enumerate (network, country) entries
pub trait NetworkSource {
    type Error: fmt::Display;

    /// Iterate all entries; `skip_aliased` asks the source to omit alias networks
    fn entries(&self, skip_aliased: bool) -> EntryIter<'_, Self::Error>;
}

impl NetworkSource for [RawEntry] {
    type Error = Infallible;

    fn entries(&self, _skip_aliased: bool) -> EntryIter<'_, Infallible> {
        Box::new(self.iter().cloned().map(Ok))
    }
}

impl NetworkSource for Vec<RawEntry> {
    type Error = Infallible;

    fn entries(&self, skip_aliased: bool) -> EntryIter<'_, Infallible> {
        self.as_slice().entries(skip_aliased)
    }
}

/// Build a store from every entry of `source`
pub fn load<S>(source: &S, options: &LoadOptions, cancel: &CancelToken) -> Result<Store>
where
    S: NetworkSource + ?Sized,
{
    let started = Instant::now();
    let mut builder = StoreBuilder::new(options.conflict_policy);
    let mut seen = 0usize;
    let fallback = effective_fallback_code(&options.fallback_code);

    for entry in source.entries(options.skip_aliased_networks) {
        if cancel.is_cancelled() {
            tracing::debug!(entries = seen, "load cancelled");
            return Err(GeoError::Cancelled);
        }

        let entry = entry.map_err(|e| GeoError::LoadFailure(format!("decode error: {}", e)))?;
        let code = entry.resolve_code(&fallback);

        let prefix = Prefix::new(entry.addr, entry.prefix_len).map_err(|e| {
            GeoError::LoadFailure(format!(
                "cannot canonicalize {}/{}: {}",
                entry.addr, entry.prefix_len, e
            ))
        })?;
        builder.insert(prefix, &code)?;

        seen += 1;
        if seen % PROGRESS_INTERVAL == 0 {
            tracing::debug!(entries = seen, "loading networks");
        }
    }

    // A cancel that lands after the last entry still wins
    if cancel.is_cancelled() {
        return Err(GeoError::Cancelled);
    }

    let store = builder.finalize();
    let stats = store.stats();
    tracing::info!(
        total_networks = stats.total_networks,
        unique_countries = stats.unique_countries,
        ipv4_networks = stats.ipv4_networks,
        ipv6_networks = stats.ipv6_networks,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "store loaded"
    );
    Ok(store)
}

/// Open an MMDB file and load it
pub fn load_file(path: impl AsRef<Path>, options: &LoadOptions, cancel: &CancelToken) -> Result<Store> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), "loading database");
    let reader = Reader::open(path)?;
    load(&reader, options, cancel)
}
