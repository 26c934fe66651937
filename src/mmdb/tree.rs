//! MMDB search tree traversal
//!
//! Each node holds two records (left for bit 0, right for bit 1). A record is:
//! - `< node_count`: index of the next node
//! - `== node_count`: empty, nothing stored below
//! - `> node_count`: pointer into the data section
//!
//! [`SearchTree::lookup`] does a longest-prefix walk for one address;
//! [`Networks`] enumerates every data-bearing network in address order.

use super::format::MmdbHeader;
use super::types::{IpVersion, MmdbError, RecordSize, DATA_SECTION_SEPARATOR};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Depth at which IPv4 space starts inside an IPv6 tree (::/96)
const IPV4_SUBTREE_DEPTH: u8 = 96;

/// Result of an address lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupResult {
    /// Offset into the data section (relative to data section start)
    pub data_offset: usize,
    /// Prefix length of the matched network, in the family of the queried address
    pub prefix_len: u8,
}

/// Decoded record value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    Node(u32),
    Empty,
    Data(usize),
}

/// Read-only view of the search tree
#[derive(Clone, Copy)]
pub struct SearchTree<'a> {
    data: &'a [u8],
    header: MmdbHeader,
}

impl<'a> SearchTree<'a> {
    pub fn new(data: &'a [u8], header: MmdbHeader) -> Self {
        Self { data, header }
    }

    /// Longest-prefix lookup of one address
    ///
    /// IPv6 addresses never match in an IPv4 tree.
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<LookupResult>, MmdbError> {
        match (ip, self.header.ip_version) {
            (IpAddr::V4(v4), IpVersion::V4) => self.walk(0, u32::from(v4) as u128, 32),
            (IpAddr::V4(v4), IpVersion::V6) => {
                // IPv4 lives under ::/96 in an IPv6 tree
                let mut node = 0u32;
                for depth in 0..IPV4_SUBTREE_DEPTH {
                    match self.classify(self.read_record(node, 0)?)? {
                        Record::Node(next) => node = next,
                        Record::Empty => return Ok(None),
                        Record::Data(data_offset) => {
                            tracing::trace!(depth, "data above the IPv4 subtree");
                            return Ok(Some(LookupResult {
                                data_offset,
                                prefix_len: 0,
                            }));
                        }
                    }
                }
                self.walk(node, u32::from(v4) as u128, 32)
            }
            (IpAddr::V6(v6), IpVersion::V6) => self.walk(0, u128::from(v6), 128),
            (IpAddr::V6(_), IpVersion::V4) => Ok(None),
        }
    }

    /// Follow `bits` (MSB first, `width` bits wide) from `node`
    fn walk(
        &self,
        mut node: u32,
        bits: u128,
        width: u8,
    ) -> Result<Option<LookupResult>, MmdbError> {
        for depth in 0..width {
            let bit = ((bits >> (width - 1 - depth)) & 1) as u8;
            match self.classify(self.read_record(node, bit)?)? {
                Record::Node(next) => node = next,
                Record::Empty => return Ok(None),
                Record::Data(data_offset) => {
                    return Ok(Some(LookupResult {
                        data_offset,
                        prefix_len: depth + 1,
                    }))
                }
            }
        }

        Err(MmdbError::InvalidFormat(format!(
            "search tree deeper than {} bits",
            width
        )))
    }

    fn classify(&self, record: u32) -> Result<Record, MmdbError> {
        let node_count = self.header.node_count;
        if record < node_count {
            Ok(Record::Node(record))
        } else if record == node_count {
            Ok(Record::Empty)
        } else {
            let offset = (record - node_count) as usize;
            offset
                .checked_sub(DATA_SECTION_SEPARATOR)
                .map(Record::Data)
                .ok_or_else(|| {
                    MmdbError::InvalidFormat(format!(
                        "Record {} points into the data section separator",
                        record
                    ))
                })
        }
    }

    /// Read a record from a node
    ///
    /// `side` 0 is the left record (bit 0), 1 the right record (bit 1).
    fn read_record(&self, node: u32, side: u8) -> Result<u32, MmdbError> {
        if node >= self.header.node_count {
            return Err(MmdbError::InvalidFormat(format!(
                "Node index {} exceeds node count {}",
                node, self.header.node_count
            )));
        }

        let node_bytes = self.header.record_size.node_bytes();
        let offset = node as usize * node_bytes;
        let bytes = self
            .data
            .get(offset..offset + node_bytes)
            .filter(|_| offset + node_bytes <= self.header.tree_size)
            .ok_or_else(|| {
                MmdbError::InvalidFormat(format!("Node {} lies outside the search tree", node))
            })?;

        let be24 = |b: &[u8]| ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32;

        Ok(match (self.header.record_size, side) {
            (RecordSize::Bits24, 0) => be24(&bytes[0..3]),
            (RecordSize::Bits24, _) => be24(&bytes[3..6]),
            // Middle byte: high nibble belongs to the left record, low nibble to the right
            (RecordSize::Bits28, 0) => (((bytes[3] >> 4) as u32) << 24) | be24(&bytes[0..3]),
            (RecordSize::Bits28, _) => (((bytes[3] & 0x0F) as u32) << 24) | be24(&bytes[4..7]),
            (RecordSize::Bits32, 0) => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            (RecordSize::Bits32, _) => u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    /// Record reached by following 96 zero bits from the root of an IPv6 tree
    ///
    /// Any other edge pointing at this record is an IPv4 alias. `None` for
    /// IPv4 trees or when the walk never leaves the root.
    fn ipv4_start(&self) -> Result<Option<u32>, MmdbError> {
        if self.header.ip_version != IpVersion::V6 {
            return Ok(None);
        }

        let mut node = 0u32;
        for _ in 0..IPV4_SUBTREE_DEPTH {
            if node >= self.header.node_count {
                break;
            }
            node = self.read_record(node, 0)?;
        }
        Ok(Some(node).filter(|n| *n != 0))
    }

    /// Enumerate every data-bearing network
    pub fn networks(&self, skip_aliased: bool) -> Networks<'a> {
        let (ipv4_start, error) = match self.ipv4_start() {
            Ok(start) => (start, None),
            Err(e) => (None, Some(e)),
        };

        let mut stack = Vec::with_capacity(self.header.ip_version.bit_count() as usize + 1);
        if error.is_none() {
            stack.push(Pending {
                bits: 0,
                depth: 0,
                record: 0,
            });
        }

        Networks {
            tree: *self,
            stack,
            skip_aliased,
            ipv4_start,
            error,
        }
    }
}

/// A network stored in the tree, with its data offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeNetwork {
    pub addr: IpAddr,
    pub prefix_len: u8,
    pub data_offset: usize,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    /// Address bits chosen so far, right-aligned to the tree width
    bits: u128,
    depth: u8,
    record: u32,
}

/// Depth-first walk over the tree yielding networks in ascending address order
///
/// With `skip_aliased`, edges that lead into the IPv4 subtree from anywhere
/// other than ::/96 are not followed, and networks inside ::/96 come out as
/// IPv4 networks. A malformed tree yields one error and then ends.
pub struct Networks<'a> {
    tree: SearchTree<'a>,
    stack: Vec<Pending>,
    skip_aliased: bool,
    ipv4_start: Option<u32>,
    error: Option<MmdbError>,
}

impl Networks<'_> {
    fn width(&self) -> u8 {
        self.tree.header.ip_version.bit_count()
    }

    /// First 96 bits of a path are zero
    fn in_ipv4_subtree(&self, item: &Pending) -> bool {
        if item.depth == 0 {
            return true;
        }
        let width = self.width();
        let full = item.bits << (width - item.depth.min(width));
        full >> 32 == 0
    }

    fn to_network(&self, item: &Pending, data_offset: usize) -> TreeNetwork {
        let width = self.width();
        let shifted = if item.depth == 0 {
            0
        } else {
            item.bits << (width - item.depth)
        };

        let (addr, prefix_len) = match self.tree.header.ip_version {
            IpVersion::V4 => (IpAddr::V4(Ipv4Addr::from(shifted as u32)), item.depth),
            IpVersion::V6 => {
                if self.skip_aliased && item.depth >= IPV4_SUBTREE_DEPTH && shifted >> 32 == 0 {
                    (
                        IpAddr::V4(Ipv4Addr::from(shifted as u32)),
                        item.depth - IPV4_SUBTREE_DEPTH,
                    )
                } else {
                    (IpAddr::V6(Ipv6Addr::from(shifted)), item.depth)
                }
            }
        };

        TreeNetwork {
            addr,
            prefix_len,
            data_offset,
        }
    }

    fn fail(&mut self, err: MmdbError) -> Option<Result<TreeNetwork, MmdbError>> {
        self.stack.clear();
        Some(Err(err))
    }
}

impl Iterator for Networks<'_> {
    type Item = Result<TreeNetwork, MmdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.error.take() {
            return Some(Err(err));
        }

        while let Some(item) = self.stack.pop() {
            if item.record == self.tree.header.node_count {
                continue;
            }

            if self.skip_aliased
                && self.ipv4_start == Some(item.record)
                && !self.in_ipv4_subtree(&item)
            {
                continue;
            }

            let node = match self.tree.classify(item.record) {
                Ok(Record::Node(node)) => node,
                Ok(Record::Data(offset)) => return Some(Ok(self.to_network(&item, offset))),
                Ok(Record::Empty) => continue,
                Err(e) => return self.fail(e),
            };

            if item.depth >= self.width() {
                return self.fail(MmdbError::InvalidFormat(format!(
                    "search tree deeper than {} bits",
                    self.width()
                )));
            }

            let (left, right) = match (
                self.tree.read_record(node, 0),
                self.tree.read_record(node, 1),
            ) {
                (Ok(left), Ok(right)) => (left, right),
                (Err(e), _) | (_, Err(e)) => return self.fail(e),
            };

            // Right pushed first so the left (lower) half is visited first
            self.stack.push(Pending {
                bits: (item.bits << 1) | 1,
                depth: item.depth + 1,
                record: right,
            });
            self.stack.push(Pending {
                bits: item.bits << 1,
                depth: item.depth + 1,
                record: left,
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// IPv4 tree, 24-bit records:
    /// node 0: left -> node 1, right -> empty
    /// node 1: left -> data@0 (0.0.0.0/2), right -> data@5 (64.0.0.0/2)
    fn small_v4_tree() -> (Vec<u8>, MmdbHeader) {
        let node_count = 2u32;
        let empty = node_count;
        let data = |off: u32| node_count + 16 + off;
        let mut bytes = Vec::new();
        for record in [1, empty, data(0), data(5)] {
            bytes.extend_from_slice(&record.to_be_bytes()[1..]);
        }
        let header = MmdbHeader {
            node_count,
            record_size: RecordSize::Bits24,
            ip_version: IpVersion::V4,
            tree_size: bytes.len(),
            data_section_start: bytes.len() + 16,
            metadata_start: bytes.len() + 32,
        };
        (bytes, header)
    }

    #[test]
    fn test_lookup_v4_tree() {
        let (bytes, header) = small_v4_tree();
        let tree = SearchTree::new(&bytes, header);

        let hit = tree.lookup("10.1.2.3".parse().unwrap()).unwrap().unwrap();
        assert_eq!(hit.prefix_len, 2);
        assert_eq!(hit.data_offset, 0);

        let hit = tree.lookup("100.0.0.1".parse().unwrap()).unwrap().unwrap();
        assert_eq!(hit.data_offset, 5);

        assert_eq!(tree.lookup("200.0.0.1".parse().unwrap()).unwrap(), None);
        assert_eq!(tree.lookup("::1".parse().unwrap()).unwrap(), None);
    }

    #[test]
    fn test_networks_in_order() {
        let (bytes, header) = small_v4_tree();
        let tree = SearchTree::new(&bytes, header);
        let networks: Vec<TreeNetwork> = tree.networks(true).map(|n| n.unwrap()).collect();
        assert_eq!(
            networks,
            vec![
                TreeNetwork {
                    addr: "0.0.0.0".parse().unwrap(),
                    prefix_len: 2,
                    data_offset: 0
                },
                TreeNetwork {
                    addr: "64.0.0.0".parse().unwrap(),
                    prefix_len: 2,
                    data_offset: 5
                },
            ]
        );
    }

    #[test]
    fn test_read_28bit_records() {
        let header = MmdbHeader {
            node_count: 1,
            record_size: RecordSize::Bits28,
            ip_version: IpVersion::V4,
            tree_size: 7,
            data_section_start: 23,
            metadata_start: 23,
        };
        let bytes = [0x12, 0x34, 0x56, 0xAB, 0x78, 0x9A, 0xBC];
        let tree = SearchTree::new(&bytes, header);
        assert_eq!(tree.read_record(0, 0).unwrap(), 0x0A12_3456);
        assert_eq!(tree.read_record(0, 1).unwrap(), 0x0B78_9ABC);
        assert!(tree.read_record(1, 0).is_err());
    }

    #[test]
    fn test_corrupt_tree_yields_single_error() {
        // node 0 points at itself forever
        let header = MmdbHeader {
            node_count: 1,
            record_size: RecordSize::Bits32,
            ip_version: IpVersion::V4,
            tree_size: 8,
            data_section_start: 24,
            metadata_start: 24,
        };
        let bytes = [0u8; 8];
        let tree = SearchTree::new(&bytes, header);
        let results: Vec<_> = tree.networks(false).collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }
}
