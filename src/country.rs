//! ISO country codes and dense country identifiers

use crate::error::{GeoError, Result};
use rustc_hash::FxHashMap;

/// Dense handle for an interned country code
///
/// Assigned in first-seen order during a load. Not stable across loads and
/// never exposed outside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CountryId(u16);

impl CountryId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Canonical form of an ISO code: trimmed and upper-cased
pub fn normalize_iso(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Append-only bidirectional code <-> id table
#[derive(Debug, Default, Clone)]
pub struct CountryTable {
    codes: Vec<String>,
    ids: FxHashMap<String, CountryId>,
}

impl CountryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern an already-canonical code, creating an id on first sight
    pub fn intern(&mut self, code: &str) -> Result<CountryId> {
        if let Some(&id) = self.ids.get(code) {
            return Ok(id);
        }

        let raw = u16::try_from(self.codes.len()).map_err(|_| {
            GeoError::LoadFailure(format!(
                "too many distinct country codes (limit {})",
                u16::MAX
            ))
        })?;
        let id = CountryId(raw);
        self.codes.push(code.to_string());
        self.ids.insert(code.to_string(), id);
        Ok(id)
    }

    /// Look up a code, canonicalizing it first
    pub fn get(&self, code: &str) -> Option<CountryId> {
        let canonical = normalize_iso(code);
        self.ids.get(canonical.as_str()).copied()
    }

    pub fn code(&self, id: CountryId) -> &str {
        &self.codes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Codes in id order
    pub fn codes(&self) -> &[String] {
        &self.codes
    }
}
