//! MMDB file reader
//!
//! Owns the file bytes (memory-mapped or in memory) and exposes:
//! - per-address longest-prefix lookups returning the country record
//! - the full network enumeration consumed by the loader

use super::data::{DataDecoder, DataValue};
use super::format::{Metadata, MmdbHeader};
use super::tree::{SearchTree, TreeNetwork};
use super::types::MmdbError;
use crate::loader::{EntryIter, NetworkSource, RawEntry};
use memmap2::Mmap;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::net::IpAddr;
use std::path::Path;

/// Storage for file data - either owned or memory-mapped
enum Storage {
    Owned(Vec<u8>),
    Mmap(Mmap),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v.as_slice(),
            Storage::Mmap(m) => &m[..],
        }
    }
}

/// Country fields of one data record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountryRecord {
    /// `country.iso_code`
    pub country: Option<String>,
    /// `registered_country.iso_code`
    pub registered_country: Option<String>,
}

impl CountryRecord {
    pub fn from_value(value: &DataValue) -> Self {
        let iso = |field: &str| {
            value
                .path(&[field, "iso_code"])
                .and_then(DataValue::as_str)
                .map(str::to_string)
        };

        CountryRecord {
            country: iso("country"),
            registered_country: iso("registered_country"),
        }
    }
}

/// Read-only MMDB database
pub struct Reader {
    storage: Storage,
    header: MmdbHeader,
    metadata: Metadata,
}

impl Reader {
    /// Open a database file using memory mapping
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MmdbError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            MmdbError::IoError(format!("Failed to open {}: {}", path.display(), e))
        })?;

        // The file is treated as read-only for the lifetime of the mapping.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
            MmdbError::IoError(format!("Failed to mmap {}: {}", path.display(), e))
        })?;

        Self::from_storage(Storage::Mmap(mmap))
    }

    /// Create a reader from raw bytes
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, MmdbError> {
        Self::from_storage(Storage::Owned(data))
    }

    fn from_storage(storage: Storage) -> Result<Self, MmdbError> {
        let (header, metadata) = MmdbHeader::from_file(storage.as_slice())?;
        tracing::debug!(
            node_count = header.node_count,
            record_size = header.record_size.bits(),
            ip_version = header.ip_version.as_u16(),
            database_type = metadata.database_type.as_deref().unwrap_or(""),
            "opened mmdb"
        );
        Ok(Reader {
            storage,
            header,
            metadata,
        })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn tree(&self) -> SearchTree<'_> {
        SearchTree::new(self.storage.as_slice(), self.header)
    }

    fn data_section(&self) -> &[u8] {
        &self.storage.as_slice()[self.header.data_section_start..self.header.metadata_start]
    }

    /// Decode the data record at `offset` within the data section
    pub fn decode(&self, offset: usize) -> Result<DataValue, MmdbError> {
        DataDecoder::new(self.data_section()).decode(offset)
    }

    /// Longest-prefix lookup returning the raw record and matched prefix length
    pub fn lookup_value(&self, ip: IpAddr) -> Result<Option<(DataValue, u8)>, MmdbError> {
        match self.tree().lookup(ip)? {
            Some(hit) => Ok(Some((self.decode(hit.data_offset)?, hit.prefix_len))),
            None => Ok(None),
        }
    }

    /// Longest-prefix lookup returning the country fields
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<(CountryRecord, u8)>, MmdbError> {
        Ok(self
            .lookup_value(ip)?
            .map(|(value, prefix_len)| (CountryRecord::from_value(&value), prefix_len)))
    }

    /// Every network in the database with its country fields
    pub fn networks(&self, skip_aliased: bool) -> CountryNetworks<'_> {
        CountryNetworks {
            reader: self,
            inner: self.tree().networks(skip_aliased),
            cache: FxHashMap::default(),
            done: false,
        }
    }
}

/// Iterator returned by [`Reader::networks`]
///
/// Records are shared by many networks, so decoded country fields are cached
/// per data offset.
pub struct CountryNetworks<'a> {
    reader: &'a Reader,
    inner: super::tree::Networks<'a>,
    cache: FxHashMap<usize, CountryRecord>,
    done: bool,
}

impl CountryNetworks<'_> {
    fn entry(&mut self, network: TreeNetwork) -> Result<RawEntry, MmdbError> {
        let record = match self.cache.get(&network.data_offset) {
            Some(record) => record.clone(),
            None => {
                let value = self.reader.decode(network.data_offset)?;
                let record = CountryRecord::from_value(&value);
                self.cache.insert(network.data_offset, record.clone());
                record
            }
        };

        Ok(RawEntry {
            addr: network.addr,
            prefix_len: network.prefix_len,
            country: record.country,
            registered_country: record.registered_country,
        })
    }
}

impl Iterator for CountryNetworks<'_> {
    type Item = Result<RawEntry, MmdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = match self.inner.next()? {
            Ok(network) => self.entry(network),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

impl NetworkSource for Reader {
    type Error = MmdbError;

    fn entries(&self, skip_aliased: bool) -> EntryIter<'_, MmdbError> {
        Box::new(self.networks(skip_aliased))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmdb::writer::CountryDbWriter;

    fn sample() -> Reader {
        let mut writer = CountryDbWriter::new();
        writer.insert("10.0.0.0/8".parse().unwrap(), "RU").unwrap();
        writer
            .insert_with_registered("2001:db8::/32".parse().unwrap(), None, Some("US"))
            .unwrap();
        Reader::from_bytes(writer.build().unwrap()).unwrap()
    }

    #[test]
    fn test_lookup_country() {
        let reader = sample();
        let (record, prefix_len) = reader.lookup("10.20.30.40".parse().unwrap()).unwrap().unwrap();
        assert_eq!(record.country.as_deref(), Some("RU"));
        assert_eq!(prefix_len, 8);

        let (record, prefix_len) = reader.lookup("2001:db8::1".parse().unwrap()).unwrap().unwrap();
        assert_eq!(record.country, None);
        assert_eq!(record.registered_country.as_deref(), Some("US"));
        assert_eq!(prefix_len, 32);

        assert!(reader.lookup("11.0.0.1".parse().unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_networks_enumeration() {
        let reader = sample();
        let entries: Vec<RawEntry> = reader.networks(true).map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].addr, "10.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(entries[0].prefix_len, 8);
        assert_eq!(entries[1].addr, "2001:db8::".parse::<IpAddr>().unwrap());
        assert_eq!(entries[1].registered_country.as_deref(), Some("US"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            Reader::from_bytes(b"definitely not an mmdb".to_vec()),
            Err(MmdbError::MetadataNotFound)
        ));
    }

    #[test]
    fn test_open_missing_file() {
        let err = Reader::open("/nonexistent/geo.mmdb").err().unwrap();
        assert!(matches!(err, MmdbError::IoError(_)));
    }
}
