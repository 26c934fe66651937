//! Country database writer
//!
//! Builds an IPv6 MMDB file whose records are `{country: {iso_code},
//! registered_country: {iso_code}}` maps. IPv4 networks are stored under
//! ::/96; optionally the usual IPv4 alias edges (::ffff:0:0/96, 2001::/32,
//! 2002::/16) are pointed at that subtree.
//!
//! The tree is built in an arena. Overlapping inserts keep longest-prefix
//! semantics: a more specific network splits a less specific leaf, and a less
//! specific network backfills the gaps around more specific ones.

use super::data::{DataEncoder, DataValue};
use super::types::{MmdbError, RecordSize, DATA_SECTION_SEPARATOR, METADATA_MARKER};
use crate::prefix::Prefix;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Depth of the IPv4 subtree inside the IPv6 tree
const IPV4_SUBTREE_DEPTH: u8 = 96;

/// Alias networks (address bits, prefix length) pointing at ::/96
const IPV4_ALIASES: [(u128, u8); 3] = [
    (0xffff_u128 << 32, 96),
    (0x2001_u128 << 112, 32),
    (0x2002_u128 << 112, 16),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodePointer {
    Node(u32),
    /// Data offset and the prefix length that put it there
    Data(u32, u8),
    Empty,
}

#[derive(Debug, Clone)]
struct Node {
    left: NodePointer,
    right: NodePointer,
}

impl Node {
    fn new_empty() -> Self {
        Node {
            left: NodePointer::Empty,
            right: NodePointer::Empty,
        }
    }

    fn child(&self, bit: u8) -> NodePointer {
        if bit == 0 {
            self.left
        } else {
            self.right
        }
    }

    fn set_child(&mut self, bit: u8, pointer: NodePointer) {
        if bit == 0 {
            self.left = pointer;
        } else {
            self.right = pointer;
        }
    }
}

/// Builder for country MMDB files
pub struct CountryDbWriter {
    record_size: RecordSize,
    nodes: Vec<Node>,
    data: DataEncoder,
    database_type: String,
    description: BTreeMap<String, String>,
    ipv4_aliases: bool,
    networks: usize,
}

impl CountryDbWriter {
    pub fn new() -> Self {
        Self {
            record_size: RecordSize::Bits28,
            nodes: vec![Node::new_empty()],
            data: DataEncoder::new(),
            database_type: "GeoIP2-Country".to_string(),
            description: BTreeMap::new(),
            ipv4_aliases: false,
            networks: 0,
        }
    }

    pub fn with_record_size(mut self, record_size: RecordSize) -> Self {
        self.record_size = record_size;
        self
    }

    /// Point ::ffff:0:0/96, 2001::/32 and 2002::/16 at the IPv4 subtree
    pub fn with_ipv4_aliases(mut self, enabled: bool) -> Self {
        self.ipv4_aliases = enabled;
        self
    }

    pub fn with_database_type(mut self, db_type: impl Into<String>) -> Self {
        self.database_type = db_type.into();
        self
    }

    pub fn with_description(mut self, language: impl Into<String>, text: impl Into<String>) -> Self {
        self.description.insert(language.into(), text.into());
        self
    }

    /// Number of networks inserted so far
    pub fn len(&self) -> usize {
        self.networks
    }

    pub fn is_empty(&self) -> bool {
        self.networks == 0
    }

    /// Insert a network whose `country.iso_code` is `iso`
    pub fn insert(&mut self, prefix: Prefix, iso: &str) -> Result<(), MmdbError> {
        self.insert_with_registered(prefix, Some(iso), None)
    }

    /// Insert a network with explicit country and registered country codes
    pub fn insert_with_registered(
        &mut self,
        prefix: Prefix,
        country: Option<&str>,
        registered_country: Option<&str>,
    ) -> Result<(), MmdbError> {
        let mut record = HashMap::new();
        for (field, code) in [("country", country), ("registered_country", registered_country)] {
            if let Some(code) = code {
                let mut inner = HashMap::new();
                inner.insert("iso_code".to_string(), DataValue::String(code.to_string()));
                record.insert(field.to_string(), DataValue::Map(inner));
            }
        }
        let offset = self.data.encode(&DataValue::Map(record))?;

        let (bits, depth) = match prefix.addr() {
            IpAddr::V4(v4) => (
                u32::from(v4) as u128,
                IPV4_SUBTREE_DEPTH + prefix.prefix_len(),
            ),
            IpAddr::V6(v6) => (u128::from(v6), prefix.prefix_len()),
        };
        if depth == 0 {
            return Err(MmdbError::BuildError(
                "cannot store a network covering the whole address space".to_string(),
            ));
        }

        self.insert_bits(bits, depth, offset);
        self.networks += 1;
        Ok(())
    }

    fn insert_bits(&mut self, bits: u128, prefix_len: u8, data_offset: u32) {
        let mut node_id = 0u32;

        for depth in 0..prefix_len {
            let bit = ((bits >> (127 - depth)) & 1) as u8;
            let child = self.nodes[node_id as usize].child(bit);

            if depth + 1 == prefix_len {
                match child {
                    NodePointer::Empty => {
                        self.nodes[node_id as usize]
                            .set_child(bit, NodePointer::Data(data_offset, prefix_len));
                    }
                    NodePointer::Data(_, existing_len) => {
                        if prefix_len >= existing_len {
                            self.nodes[node_id as usize]
                                .set_child(bit, NodePointer::Data(data_offset, prefix_len));
                        }
                    }
                    NodePointer::Node(child_id) => {
                        self.backfill_less_specific(child_id, data_offset, prefix_len);
                    }
                }
                return;
            }

            node_id = match child {
                NodePointer::Node(child_id) => child_id,
                NodePointer::Empty => {
                    let new_id = self.allocate_node();
                    self.nodes[node_id as usize].set_child(bit, NodePointer::Node(new_id));
                    new_id
                }
                NodePointer::Data(existing_offset, existing_len) => {
                    // Split the less specific leaf so both halves keep its data
                    let new_id = self.allocate_node();
                    let existing = NodePointer::Data(existing_offset, existing_len);
                    self.nodes[new_id as usize].left = existing;
                    self.nodes[new_id as usize].right = existing;
                    self.nodes[node_id as usize].set_child(bit, NodePointer::Node(new_id));
                    new_id
                }
            };
        }
    }

    fn allocate_node(&mut self) -> u32 {
        let id = self.nodes.len() as u32;
        self.nodes.push(Node::new_empty());
        id
    }

    /// Fill the empty and less specific edges of a subtree with `data_offset`
    fn backfill_less_specific(&mut self, node_id: u32, data_offset: u32, prefix_len: u8) {
        let mut pending = vec![node_id];
        while let Some(id) = pending.pop() {
            for bit in [0u8, 1] {
                match self.nodes[id as usize].child(bit) {
                    NodePointer::Empty => {
                        self.nodes[id as usize]
                            .set_child(bit, NodePointer::Data(data_offset, prefix_len));
                    }
                    NodePointer::Data(_, existing_len) if prefix_len > existing_len => {
                        self.nodes[id as usize]
                            .set_child(bit, NodePointer::Data(data_offset, prefix_len));
                    }
                    NodePointer::Data(..) => {}
                    NodePointer::Node(child_id) => pending.push(child_id),
                }
            }
        }
    }

    /// Point the alias networks at the node reached by 96 zero bits
    fn link_ipv4_aliases(&mut self) -> Result<(), MmdbError> {
        let mut pointer = NodePointer::Node(0);
        for _ in 0..IPV4_SUBTREE_DEPTH {
            pointer = match pointer {
                NodePointer::Node(id) => self.nodes[id as usize].left,
                other => other,
            };
        }

        let ipv4_root = match pointer {
            NodePointer::Node(id) => id,
            NodePointer::Empty => return Ok(()),
            NodePointer::Data(..) => {
                tracing::warn!("data stored above ::/96, IPv4 aliases not linked");
                return Ok(());
            }
        };

        for (bits, len) in IPV4_ALIASES {
            let mut node_id = 0u32;
            for depth in 0..len {
                let bit = ((bits >> (127 - depth)) & 1) as u8;
                let child = self.nodes[node_id as usize].child(bit);

                if depth + 1 == len {
                    if child != NodePointer::Empty {
                        return Err(MmdbError::BuildError(format!(
                            "IPv4 alias at depth {} overlaps stored networks",
                            len
                        )));
                    }
                    self.nodes[node_id as usize].set_child(bit, NodePointer::Node(ipv4_root));
                    break;
                }

                node_id = match child {
                    NodePointer::Node(child_id) => child_id,
                    NodePointer::Empty => {
                        let new_id = self.allocate_node();
                        self.nodes[node_id as usize].set_child(bit, NodePointer::Node(new_id));
                        new_id
                    }
                    NodePointer::Data(..) => {
                        return Err(MmdbError::BuildError(format!(
                            "IPv4 alias /{} lies inside a stored network",
                            len
                        )))
                    }
                };
            }
        }
        Ok(())
    }

    /// Serialize the database
    pub fn build(mut self) -> Result<Vec<u8>, MmdbError> {
        if self.ipv4_aliases {
            self.link_ipv4_aliases()?;
        }

        let node_count = u32::try_from(self.nodes.len())
            .map_err(|_| MmdbError::BuildError("too many tree nodes".to_string()))?;
        let data_bytes = std::mem::take(&mut self.data).into_bytes();

        let largest = node_count as u64 + DATA_SECTION_SEPARATOR as u64 + data_bytes.len() as u64;
        if largest > self.record_size.max_value() as u64 {
            return Err(MmdbError::BuildError(format!(
                "{} nodes and {} data bytes do not fit in {}-bit records",
                node_count,
                data_bytes.len(),
                self.record_size.bits()
            )));
        }

        let mut file = self.write_tree(node_count);
        file.extend_from_slice(&[0u8; DATA_SECTION_SEPARATOR]);
        file.extend_from_slice(&data_bytes);
        file.extend_from_slice(METADATA_MARKER);
        file.extend_from_slice(&DataEncoder::encode_standalone(&self.metadata(node_count)));

        tracing::debug!(
            networks = self.networks,
            node_count,
            data_bytes = data_bytes.len(),
            "built country database"
        );
        Ok(file)
    }

    fn write_tree(&self, node_count: u32) -> Vec<u8> {
        let node_bytes = self.record_size.node_bytes();
        let mut tree = Vec::with_capacity(self.nodes.len() * node_bytes);

        let value = |pointer: NodePointer| match pointer {
            NodePointer::Empty => node_count,
            NodePointer::Node(id) => id,
            // Range checked in build()
            NodePointer::Data(offset, _) => node_count + DATA_SECTION_SEPARATOR as u32 + offset,
        };

        for node in &self.nodes {
            let left = value(node.left);
            let right = value(node.right);
            match self.record_size {
                RecordSize::Bits24 => {
                    tree.extend_from_slice(&left.to_be_bytes()[1..]);
                    tree.extend_from_slice(&right.to_be_bytes()[1..]);
                }
                RecordSize::Bits28 => {
                    // Middle byte: high nibble of left, then high nibble of right
                    tree.extend_from_slice(&left.to_be_bytes()[1..]);
                    tree.push((((left >> 24) & 0x0F) as u8) << 4 | ((right >> 24) & 0x0F) as u8);
                    tree.extend_from_slice(&right.to_be_bytes()[1..]);
                }
                RecordSize::Bits32 => {
                    tree.extend_from_slice(&left.to_be_bytes());
                    tree.extend_from_slice(&right.to_be_bytes());
                }
            }
        }
        tree
    }

    fn metadata(&self, node_count: u32) -> DataValue {
        let build_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let description = self
            .description
            .iter()
            .map(|(lang, text)| (lang.clone(), DataValue::String(text.clone())))
            .collect();

        let mut metadata = HashMap::new();
        metadata.insert(
            "binary_format_major_version".to_string(),
            DataValue::Uint16(2),
        );
        metadata.insert(
            "binary_format_minor_version".to_string(),
            DataValue::Uint16(0),
        );
        metadata.insert("build_epoch".to_string(), DataValue::Uint64(build_epoch));
        metadata.insert(
            "database_type".to_string(),
            DataValue::String(self.database_type.clone()),
        );
        metadata.insert("description".to_string(), DataValue::Map(description));
        metadata.insert("ip_version".to_string(), DataValue::Uint16(6));
        metadata.insert(
            "languages".to_string(),
            DataValue::Array(vec![DataValue::String("en".to_string())]),
        );
        metadata.insert("node_count".to_string(), DataValue::Uint32(node_count));
        metadata.insert(
            "record_size".to_string(),
            DataValue::Uint16(self.record_size.bits()),
        );
        DataValue::Map(metadata)
    }
}

impl Default for CountryDbWriter {
    fn default() -> Self {
        Self::new()
    }
}
