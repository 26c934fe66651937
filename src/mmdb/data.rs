//! MMDB data section encoding and decoding
//!
//! Implements the MaxMind DB data types:
//! - **Pointer**: reference to another item, followed transparently on decode
//! - **String**, **Bytes**: sized payloads
//! - **Double**, **Float**: IEEE 754, 8 and 4 bytes
//! - **Uint16/32/64/128**, **Int32**: big-endian, leading zero bytes omitted
//! - **Map**, **Array**: sized containers
//! - **Bool**: value stored in the size field
//!
//! Every item starts with a control byte: type in the top 3 bits, size in the
//! low 5. Type 0 means "extended": the real type is 7 plus the following
//! byte. Sizes 29, 30 and 31 pull 1, 2 or 3 extra size bytes.
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use super::types::MmdbError;
use std::collections::HashMap;

/// Maximum nesting of maps/arrays accepted by the decoder
const MAX_DEPTH: usize = 64;

/// Decoded data value
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys only)
    Map(HashMap<String, DataValue>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// Member of a map value
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        match self {
            DataValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Follow a path of map keys
    pub fn path(&self, keys: &[&str]) -> Option<&DataValue> {
        keys.iter().try_fold(self, |value, key| value.get(key))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any unsigned integer that fits in u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::Uint16(n) => Some(*n as u64),
            DataValue::Uint32(n) => Some(*n as u64),
            DataValue::Uint64(n) => Some(*n),
            DataValue::Uint128(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Convert to JSON for display
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value};

        match self {
            DataValue::String(s) => json!(s),
            DataValue::Double(d) => json!(d),
            DataValue::Float(f) => json!(f),
            DataValue::Bytes(b) => json!(b),
            DataValue::Uint16(n) => json!(n),
            DataValue::Uint32(n) => json!(n),
            DataValue::Uint64(n) => json!(n),
            DataValue::Uint128(n) => json!(n.to_string()),
            DataValue::Int32(n) => json!(n),
            DataValue::Bool(b) => json!(b),
            DataValue::Array(items) => Value::Array(items.iter().map(DataValue::to_json).collect()),
            DataValue::Map(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let object = keys
                    .into_iter()
                    .map(|k| (k.clone(), map[k].to_json()))
                    .collect();
                Value::Object(object)
            }
        }
    }
}

/// Data section encoder
///
/// Builds a data section by encoding values and tracking offsets.
/// Identical values get the same offset.
pub struct DataEncoder {
    /// Encoded data buffer
    buffer: Vec<u8>,
    /// Map from serialized value to offset (for deduplication)
    dedup_map: HashMap<Vec<u8>, u32>,
}

impl DataEncoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            dedup_map: HashMap::new(),
        }
    }

    /// Encode a value and return its offset
    ///
    /// If the value was previously encoded, returns the existing offset.
    pub fn encode(&mut self, value: &DataValue) -> Result<u32, MmdbError> {
        let mut temp = Vec::new();
        Self::encode_to_buffer(value, &mut temp);

        if let Some(&offset) = self.dedup_map.get(&temp) {
            return Ok(offset);
        }

        let offset = u32::try_from(self.buffer.len())
            .map_err(|_| MmdbError::BuildError("data section exceeds 4 GiB".to_string()))?;
        self.buffer.extend_from_slice(&temp);
        self.dedup_map.insert(temp, offset);
        Ok(offset)
    }

    /// Get the final encoded data section
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Encode a single value without deduplication (used for metadata)
    pub fn encode_standalone(value: &DataValue) -> Vec<u8> {
        let mut buffer = Vec::new();
        Self::encode_to_buffer(value, &mut buffer);
        buffer
    }

    fn encode_to_buffer(value: &DataValue, buffer: &mut Vec<u8>) {
        match value {
            DataValue::String(s) => {
                write_control(2, s.len(), buffer);
                buffer.extend_from_slice(s.as_bytes());
            }
            DataValue::Double(d) => {
                write_control(3, 8, buffer);
                buffer.extend_from_slice(&d.to_be_bytes());
            }
            DataValue::Bytes(b) => {
                write_control(4, b.len(), buffer);
                buffer.extend_from_slice(b);
            }
            DataValue::Uint16(n) => write_uint(5, &n.to_be_bytes(), buffer),
            DataValue::Uint32(n) => write_uint(6, &n.to_be_bytes(), buffer),
            DataValue::Map(m) => {
                write_control(7, m.len(), buffer);

                // Sorted by key for deterministic output
                let mut pairs: Vec<_> = m.iter().collect();
                pairs.sort_by_key(|(k, _)| *k);
                for (key, value) in pairs {
                    Self::encode_to_buffer(&DataValue::String(key.clone()), buffer);
                    Self::encode_to_buffer(value, buffer);
                }
            }
            DataValue::Int32(n) => write_uint(8, &n.to_be_bytes(), buffer),
            DataValue::Uint64(n) => write_uint(9, &n.to_be_bytes(), buffer),
            DataValue::Uint128(n) => write_uint(10, &n.to_be_bytes(), buffer),
            DataValue::Array(a) => {
                write_control(11, a.len(), buffer);
                for value in a {
                    Self::encode_to_buffer(value, buffer);
                }
            }
            DataValue::Bool(b) => write_control(14, *b as usize, buffer),
            DataValue::Float(f) => {
                write_control(15, 4, buffer);
                buffer.extend_from_slice(&f.to_be_bytes());
            }
        }
    }
}

impl Default for DataEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write control byte(s) for `type_id` with payload `size`
///
/// Layout: control byte, then the extended type byte (types >= 8), then any
/// extra size bytes.
fn write_control(type_id: u8, size: usize, buffer: &mut Vec<u8>) {
    let (type_bits, extended) = if type_id <= 7 {
        (type_id << 5, None)
    } else {
        (0, Some(type_id - 7))
    };

    let (size_bits, extra): (u8, Vec<u8>) = if size < 29 {
        (size as u8, Vec::new())
    } else if size < 29 + 256 {
        (29, vec![(size - 29) as u8])
    } else if size < 29 + 256 + 65536 {
        (30, ((size - 285) as u16).to_be_bytes().to_vec())
    } else {
        (31, ((size - 65821) as u32).to_be_bytes()[1..].to_vec())
    };

    buffer.push(type_bits | size_bits);
    if let Some(ext) = extended {
        buffer.push(ext);
    }
    buffer.extend_from_slice(&extra);
}

/// Integers are stored with leading zero bytes stripped
fn write_uint(type_id: u8, be_bytes: &[u8], buffer: &mut Vec<u8>) {
    let first = be_bytes
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(be_bytes.len());
    let significant = &be_bytes[first..];
    write_control(type_id, significant.len(), buffer);
    buffer.extend_from_slice(significant);
}

/// Data section decoder
///
/// Decodes values from a buffer whose offset 0 is the base for pointers
/// (the data section start, or the metadata start).
pub struct DataDecoder<'a> {
    buffer: &'a [u8],
}

impl<'a> DataDecoder<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Decode the value at `offset`, following pointers
    pub fn decode(&self, offset: usize) -> Result<DataValue, MmdbError> {
        let mut cursor = offset;
        self.decode_at(&mut cursor, 0)
    }

    fn decode_at(&self, cursor: &mut usize, depth: usize) -> Result<DataValue, MmdbError> {
        if depth > MAX_DEPTH {
            return Err(decode_err("maximum nesting depth exceeded"));
        }

        let ctrl = self.read_byte(cursor)?;
        let mut type_id = ctrl >> 5;

        if type_id == 1 {
            let target = self.read_pointer(ctrl, cursor)?;
            let mut target_cursor = target;
            let value_ctrl = self.buffer.get(target).copied().ok_or_else(|| {
                decode_err(&format!("pointer target {} out of bounds", target))
            })?;
            if value_ctrl >> 5 == 1 {
                return Err(decode_err("pointer to pointer"));
            }
            return self.decode_at(&mut target_cursor, depth + 1);
        }

        if type_id == 0 {
            let ext = self.read_byte(cursor)?;
            type_id = ext
                .checked_add(7)
                .filter(|t| *t >= 8)
                .ok_or_else(|| decode_err(&format!("invalid extended type {}", ext)))?;
        }

        let size = self.read_size(ctrl & 0x1F, cursor)?;

        match type_id {
            2 => {
                let bytes = self.read_bytes(cursor, size)?;
                let s = std::str::from_utf8(bytes).map_err(|_| decode_err("invalid UTF-8"))?;
                Ok(DataValue::String(s.to_string()))
            }
            3 => {
                if size != 8 {
                    return Err(decode_err("double must be 8 bytes"));
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(self.read_bytes(cursor, 8)?);
                Ok(DataValue::Double(f64::from_be_bytes(bytes)))
            }
            4 => Ok(DataValue::Bytes(self.read_bytes(cursor, size)?.to_vec())),
            5 => Ok(DataValue::Uint16(self.read_uint(cursor, size, 2)? as u16)),
            6 => Ok(DataValue::Uint32(self.read_uint(cursor, size, 4)? as u32)),
            7 => {
                let mut map = HashMap::with_capacity(size.min(64));
                for _ in 0..size {
                    let key = match self.decode_at(cursor, depth + 1)? {
                        DataValue::String(s) => s,
                        _ => return Err(decode_err("map key must be string")),
                    };
                    let value = self.decode_at(cursor, depth + 1)?;
                    map.insert(key, value);
                }
                Ok(DataValue::Map(map))
            }
            8 => Ok(DataValue::Int32(self.read_uint(cursor, size, 4)? as u32 as i32)),
            9 => Ok(DataValue::Uint64(self.read_uint(cursor, size, 8)? as u64)),
            10 => Ok(DataValue::Uint128(self.read_uint(cursor, size, 16)?)),
            11 => {
                let mut array = Vec::with_capacity(size.min(64));
                for _ in 0..size {
                    array.push(self.decode_at(cursor, depth + 1)?);
                }
                Ok(DataValue::Array(array))
            }
            14 => match size {
                0 => Ok(DataValue::Bool(false)),
                1 => Ok(DataValue::Bool(true)),
                _ => Err(decode_err("bool size must be 0 or 1")),
            },
            15 => {
                if size != 4 {
                    return Err(decode_err("float must be 4 bytes"));
                }
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(self.read_bytes(cursor, 4)?);
                Ok(DataValue::Float(f32::from_be_bytes(bytes)))
            }
            other => Err(decode_err(&format!("unsupported data type {}", other))),
        }
    }

    fn read_pointer(&self, ctrl: u8, cursor: &mut usize) -> Result<usize, MmdbError> {
        let size = (ctrl >> 3) & 0x3;
        let high = (ctrl & 0x7) as usize;
        let bytes = self.read_bytes(cursor, size as usize + 1)?;
        let tail = bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);

        Ok(match size {
            0 => (high << 8) | tail,
            1 => ((high << 16) | tail) + 2048,
            2 => ((high << 24) | tail) + 526_336,
            _ => tail,
        })
    }

    fn read_size(&self, size_bits: u8, cursor: &mut usize) -> Result<usize, MmdbError> {
        let extra = |n: usize, cursor: &mut usize| -> Result<usize, MmdbError> {
            let bytes = self.read_bytes(cursor, n)?;
            Ok(bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize))
        };

        match size_bits {
            0..=28 => Ok(size_bits as usize),
            29 => Ok(29 + extra(1, cursor)?),
            30 => Ok(285 + extra(2, cursor)?),
            _ => Ok(65_821 + extra(3, cursor)?),
        }
    }

    fn read_uint(&self, cursor: &mut usize, size: usize, max: usize) -> Result<u128, MmdbError> {
        if size > max {
            return Err(decode_err(&format!(
                "integer of {} bytes exceeds {} bytes",
                size, max
            )));
        }
        let bytes = self.read_bytes(cursor, size)?;
        Ok(bytes.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128))
    }

    fn read_byte(&self, cursor: &mut usize) -> Result<u8, MmdbError> {
        let byte = self
            .buffer
            .get(*cursor)
            .copied()
            .ok_or_else(|| decode_err(&format!("offset {} out of bounds", cursor)))?;
        *cursor += 1;
        Ok(byte)
    }

    fn read_bytes(&self, cursor: &mut usize, len: usize) -> Result<&'a [u8], MmdbError> {
        let end = cursor
            .checked_add(len)
            .filter(|end| *end <= self.buffer.len())
            .ok_or_else(|| decode_err(&format!("{} bytes at offset {} out of bounds", len, cursor)))?;
        let bytes = &self.buffer[*cursor..end];
        *cursor = end;
        Ok(bytes)
    }
}

fn decode_err(msg: &str) -> MmdbError {
    MmdbError::DecodeError(msg.to_string())
}
