//! Immutable country/prefix store
//!
//! A [`Store`] is produced once by the loader and never mutated afterwards.
//! It holds:
//! - the country code table (dense ids in first-seen order)
//! - one sorted prefix list per country
//! - exact-match indices for IPv4 (packed `u64` key) and IPv6 (prefix key)
//! - aggregate statistics
//!
//! The mutable building state lives in [`StoreBuilder`], which is private to
//! the crate so a partially built store can never escape a load.

use crate::country::{normalize_iso, CountryId, CountryTable};
use crate::error::{GeoError, Result};
use crate::prefix::Prefix;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;

/// What to do when the same canonical prefix arrives for two different countries
///
/// Only the exact-match index is affected; every entry is still appended to
/// its country's range list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Later entries overwrite earlier ones
    #[default]
    LastWins,
    /// The first entry seen is kept
    FirstWins,
    /// The load fails
    Reject,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last-wins" | "last" => Ok(ConflictPolicy::LastWins),
            "first-wins" | "first" => Ok(ConflictPolicy::FirstWins),
            "reject" => Ok(ConflictPolicy::Reject),
            other => Err(GeoError::InvalidArgument(format!(
                "unknown conflict policy: {}",
                other
            ))),
        }
    }
}

/// Aggregate statistics, frozen at finalize
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_networks: usize,
    pub unique_countries: usize,
    pub ipv4_networks: usize,
    pub ipv6_networks: usize,
}

/// Building state, owned exclusively by the loader
pub(crate) struct StoreBuilder {
    countries: CountryTable,
    ranges: Vec<Vec<Prefix>>,
    by_v4: FxHashMap<u64, CountryId>,
    by_v6: FxHashMap<Prefix, CountryId>,
    stats: StoreStats,
    policy: ConflictPolicy,
}

impl StoreBuilder {
    pub(crate) fn new(policy: ConflictPolicy) -> Self {
        Self {
            countries: CountryTable::new(),
            ranges: Vec::new(),
            by_v4: FxHashMap::default(),
            by_v6: FxHashMap::default(),
            stats: StoreStats::default(),
            policy,
        }
    }

    /// Add one canonical prefix owned by an already-canonical code
    pub(crate) fn insert(&mut self, prefix: Prefix, code: &str) -> Result<()> {
        let id = self.countries.intern(code)?;
        if id.index() == self.ranges.len() {
            self.ranges.push(Vec::new());
        }
        self.ranges[id.index()].push(prefix);

        let previous = match prefix.v4_key() {
            Some(key) => {
                self.stats.ipv4_networks += 1;
                index_insert(&mut self.by_v4, key, id, self.policy)
            }
            None => {
                self.stats.ipv6_networks += 1;
                index_insert(&mut self.by_v6, prefix, id, self.policy)
            }
        };
        self.stats.total_networks += 1;

        if let Some(existing) = previous {
            let kept = self.countries.code(match self.policy {
                ConflictPolicy::FirstWins => existing,
                _ => id,
            });
            match self.policy {
                ConflictPolicy::Reject => {
                    return Err(GeoError::LoadFailure(format!(
                        "conflicting countries for {}: {} and {}",
                        prefix,
                        self.countries.code(existing),
                        code
                    )));
                }
                _ => tracing::debug!(
                    prefix = %prefix,
                    previous = self.countries.code(existing),
                    incoming = code,
                    kept,
                    "conflicting country for prefix"
                ),
            }
        }

        Ok(())
    }

    /// Sort every range list and freeze the result
    pub(crate) fn finalize(self) -> Store {
        let mut stats = self.stats;
        stats.unique_countries = self.countries.len();

        let ranges: Vec<Arc<[Prefix]>> = self
            .ranges
            .into_iter()
            .map(|mut list| {
                list.sort_unstable();
                Arc::from(list)
            })
            .collect();

        Store {
            countries: self.countries,
            ranges,
            by_v4: self.by_v4,
            by_v6: self.by_v6,
            stats,
        }
    }
}

/// Insert into an exact-match index according to the conflict policy
///
/// Returns the id that was already present when it differs from `id`.
fn index_insert<K: std::hash::Hash + Eq>(
    index: &mut FxHashMap<K, CountryId>,
    key: K,
    id: CountryId,
    policy: ConflictPolicy,
) -> Option<CountryId> {
    use std::collections::hash_map::Entry;

    match index.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(id);
            None
        }
        Entry::Occupied(mut slot) => {
            let existing = *slot.get();
            if existing == id {
                return None;
            }
            if policy == ConflictPolicy::LastWins {
                slot.insert(id);
            }
            Some(existing)
        }
    }
}

/// Finalized, immutable store
///
/// All methods are plain reads, so a `Store` can be shared across threads
/// behind an `Arc` without locking.
#[derive(Debug, Default)]
pub struct Store {
    countries: CountryTable,
    ranges: Vec<Arc<[Prefix]>>,
    by_v4: FxHashMap<u64, CountryId>,
    by_v6: FxHashMap<Prefix, CountryId>,
    stats: StoreStats,
}

impl Store {
    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    /// All known codes, sorted, as a fresh copy
    pub fn country_codes(&self) -> Vec<String> {
        let mut codes = self.countries.codes().to_vec();
        codes.sort_unstable();
        codes
    }

    /// Number of ranges owned by `code`; unknown codes yield 0
    pub fn range_count(&self, code: &str) -> usize {
        self.countries
            .get(code)
            .map_or(0, |id| self.ranges[id.index()].len())
    }

    /// Sorted ranges for `code`, copied
    pub fn ranges(&self, code: &str) -> Result<Vec<Prefix>> {
        self.ranges_view(code).map(<[Prefix]>::to_vec)
    }

    /// Sorted ranges for `code`, borrowed without copying
    pub fn ranges_view(&self, code: &str) -> Result<&[Prefix]> {
        let id = self.resolve(code)?;
        Ok(&self.ranges[id.index()])
    }

    /// Sorted ranges for `code` as a shared handle that outlives the borrow
    pub fn ranges_shared(&self, code: &str) -> Result<Arc<[Prefix]>> {
        let id = self.resolve(code)?;
        Ok(Arc::clone(&self.ranges[id.index()]))
    }

    /// Country owning exactly `input` (parsed as `address/length`)
    ///
    /// Never performs longest-prefix matching: a sub- or super-range of a
    /// stored prefix misses.
    pub fn lookup_exact(&self, input: &str) -> Result<&str> {
        let prefix: Prefix = input.parse()?;
        self.lookup_prefix(&prefix)
            .ok_or_else(|| GeoError::NotFound(format!("no country for prefix {}", prefix)))
    }

    /// Exact-match lookup on an already canonical prefix
    pub fn lookup_prefix(&self, prefix: &Prefix) -> Option<&str> {
        let id = match prefix.v4_key() {
            Some(key) => self.by_v4.get(&key),
            None => self.by_v6.get(prefix),
        }?;
        Some(self.countries.code(*id))
    }

    pub(crate) fn resolve(&self, code: &str) -> Result<CountryId> {
        self.countries
            .get(code)
            .ok_or_else(|| GeoError::NotFound(format!("unknown iso code: {}", normalize_iso(code))))
    }

    pub(crate) fn ranges_by_id(&self, id: CountryId) -> &Arc<[Prefix]> {
        &self.ranges[id.index()]
    }
}
