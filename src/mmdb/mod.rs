//! MaxMind DB (MMDB) support
//!
//! - **types**: constants, errors, record sizes
//! - **data**: data section encoder and decoder
//! - **format**: metadata parsing and section offsets
//! - **tree**: search tree lookups and network enumeration
//! - **reader**: file-backed reader that feeds the loader
//! - **writer**: builds country databases

pub mod data;
pub mod format;
pub mod reader;
pub mod tree;
pub mod types;
pub mod writer;

pub use data::DataValue;
pub use format::{find_metadata_marker, Metadata, MmdbHeader};
pub use reader::{CountryNetworks, CountryRecord, Reader};
pub use types::{IpVersion, MmdbError, RecordSize, METADATA_MARKER};
pub use writer::CountryDbWriter;
