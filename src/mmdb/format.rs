//! MMDB binary layout and metadata
//!
//! File layout:
//! - search tree: `node_count` nodes of `record_size * 2 / 8` bytes
//! - 16 zero bytes
//! - data section
//! - metadata marker followed by the metadata map
//!
//! Only the fields needed for traversal are pulled into [`MmdbHeader`]; the
//! rest of the metadata is decoded into [`Metadata`] for display.

use super::data::{DataDecoder, DataValue};
use super::types::{IpVersion, MmdbError, RecordSize, DATA_SECTION_SEPARATOR, METADATA_MARKER};
use std::collections::BTreeMap;

/// Header information needed to walk the tree and reach the data section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmdbHeader {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits (24, 28, or 32)
    pub record_size: RecordSize,
    /// IP version (4 or 6)
    pub ip_version: IpVersion,
    /// Size of the search tree in bytes
    pub tree_size: usize,
    /// Offset of the data section from the start of the file
    pub data_section_start: usize,
    /// Offset of the metadata marker; the data section ends here
    pub metadata_start: usize,
}

/// Descriptive metadata stored alongside the tree
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Metadata {
    pub database_type: Option<String>,
    pub build_epoch: Option<u64>,
    pub binary_format_major_version: Option<u64>,
    pub binary_format_minor_version: Option<u64>,
    pub ip_version: u16,
    pub node_count: u32,
    pub record_size: u16,
    pub languages: Vec<String>,
    pub description: BTreeMap<String, String>,
}

impl MmdbHeader {
    /// Parse the metadata and derive the section offsets
    pub fn from_file(data: &[u8]) -> Result<(Self, Metadata), MmdbError> {
        let marker_offset = find_metadata_marker(data)?;
        let metadata_bytes = &data[marker_offset + METADATA_MARKER.len()..];

        let value = DataDecoder::new(metadata_bytes)
            .decode(0)
            .map_err(|e| MmdbError::InvalidMetadata(format!("Failed to decode metadata: {}", e)))?;
        if !matches!(value, DataValue::Map(_)) {
            return Err(MmdbError::InvalidMetadata(
                "Metadata is not a map".to_string(),
            ));
        }

        let node_count = extract_uint(&value, "node_count")?;
        let node_count = u32::try_from(node_count).map_err(|_| {
            MmdbError::InvalidMetadata(format!("node_count {} out of range", node_count))
        })?;
        let record_bits = extract_uint(&value, "record_size")?;
        let record_size = RecordSize::from_bits(u16::try_from(record_bits).unwrap_or(0))?;

        let ip_version = match extract_uint(&value, "ip_version")? {
            4 => IpVersion::V4,
            6 => IpVersion::V6,
            other => {
                return Err(MmdbError::InvalidMetadata(format!(
                    "Invalid IP version: {}",
                    other
                )))
            }
        };

        let tree_size = node_count as usize * record_size.node_bytes();
        let data_section_start = tree_size + DATA_SECTION_SEPARATOR;
        if data_section_start > marker_offset {
            return Err(MmdbError::InvalidFormat(format!(
                "Search tree of {} bytes overlaps metadata at offset {}",
                tree_size, marker_offset
            )));
        }

        let header = MmdbHeader {
            node_count,
            record_size,
            ip_version,
            tree_size,
            data_section_start,
            metadata_start: marker_offset,
        };

        let metadata = Metadata {
            database_type: value
                .get("database_type")
                .and_then(DataValue::as_str)
                .map(str::to_string),
            build_epoch: value.get("build_epoch").and_then(DataValue::as_u64),
            binary_format_major_version: value
                .get("binary_format_major_version")
                .and_then(DataValue::as_u64),
            binary_format_minor_version: value
                .get("binary_format_minor_version")
                .and_then(DataValue::as_u64),
            ip_version: ip_version.as_u16(),
            node_count,
            record_size: record_size.bits(),
            languages: match value.get("languages") {
                Some(DataValue::Array(items)) => items
                    .iter()
                    .filter_map(DataValue::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            },
            description: match value.get("description") {
                Some(DataValue::Map(map)) => map
                    .iter()
                    .filter_map(|(lang, text)| Some((lang.clone(), text.as_str()?.to_string())))
                    .collect(),
                _ => BTreeMap::new(),
            },
        };

        Ok((header, metadata))
    }
}

/// Find the metadata marker in an MMDB file
///
/// The marker "\xAB\xCD\xEFMaxMind.com" appears somewhere in the last 128KB
/// of the file. If it appears more than once, the last occurrence wins.
pub fn find_metadata_marker(data: &[u8]) -> Result<usize, MmdbError> {
    const SEARCH_SIZE: usize = 128 * 1024;

    let search_start = data.len().saturating_sub(SEARCH_SIZE);
    memchr::memmem::rfind(&data[search_start..], METADATA_MARKER)
        .map(|pos| search_start + pos)
        .ok_or(MmdbError::MetadataNotFound)
}

fn extract_uint(map: &DataValue, key: &str) -> Result<u64, MmdbError> {
    match map.get(key) {
        Some(value) => value.as_u64().ok_or_else(|| {
            MmdbError::InvalidMetadata(format!("Field '{}' is not an unsigned integer", key))
        }),
        None => Err(MmdbError::InvalidMetadata(format!(
            "Required field '{}' not found",
            key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmdb::data::DataEncoder;
    use std::collections::HashMap;

    fn metadata_blob(fields: &[(&str, DataValue)], tree_bytes: usize) -> Vec<u8> {
        let map: HashMap<String, DataValue> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let mut file = vec![0u8; tree_bytes + DATA_SECTION_SEPARATOR];
        file.extend_from_slice(METADATA_MARKER);
        file.extend_from_slice(&DataEncoder::encode_standalone(&DataValue::Map(map)));
        file
    }

    #[test]
    fn test_find_metadata_marker_last_occurrence() {
        let mut data = Vec::new();
        data.extend_from_slice(METADATA_MARKER);
        data.extend_from_slice(b"padding");
        data.extend_from_slice(METADATA_MARKER);
        assert_eq!(
            find_metadata_marker(&data).unwrap(),
            METADATA_MARKER.len() + 7
        );
    }

    #[test]
    fn test_metadata_not_found() {
        let result = find_metadata_marker(b"not a valid mmdb file");
        assert!(matches!(result, Err(MmdbError::MetadataNotFound)));
        assert!(find_metadata_marker(b"").is_err());
    }

    #[test]
    fn test_parse_header_and_metadata() {
        let file = metadata_blob(
            &[
                ("node_count", DataValue::Uint32(2)),
                ("record_size", DataValue::Uint16(28)),
                ("ip_version", DataValue::Uint16(6)),
                ("database_type", DataValue::String("Test-Country".into())),
                ("build_epoch", DataValue::Uint64(1_700_000_000)),
                (
                    "languages",
                    DataValue::Array(vec![DataValue::String("en".into())]),
                ),
            ],
            14,
        );

        let (header, metadata) = MmdbHeader::from_file(&file).unwrap();
        assert_eq!(header.node_count, 2);
        assert_eq!(header.record_size, RecordSize::Bits28);
        assert_eq!(header.ip_version, IpVersion::V6);
        assert_eq!(header.tree_size, 14);
        assert_eq!(header.data_section_start, 30);
        assert_eq!(metadata.database_type.as_deref(), Some("Test-Country"));
        assert_eq!(metadata.build_epoch, Some(1_700_000_000));
        assert_eq!(metadata.languages, vec!["en"]);
    }

    #[test]
    fn test_missing_required_field() {
        let file = metadata_blob(
            &[
                ("node_count", DataValue::Uint32(1)),
                ("ip_version", DataValue::Uint16(6)),
            ],
            8,
        );
        assert!(matches!(
            MmdbHeader::from_file(&file),
            Err(MmdbError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_tree_overlapping_metadata() {
        let file = metadata_blob(
            &[
                ("node_count", DataValue::Uint32(1000)),
                ("record_size", DataValue::Uint16(24)),
                ("ip_version", DataValue::Uint16(4)),
            ],
            6,
        );
        assert!(matches!(
            MmdbHeader::from_file(&file),
            Err(MmdbError::InvalidFormat(_))
        ));
    }
}
