//! Canonical address prefixes
//!
//! A [`Prefix`] is an address plus a prefix length with every bit beyond the
//! length cleared. Two prefixes are equal iff their canonical (address, length)
//! pairs are equal, and they order by address first, then by length. IPv4
//! prefixes order before IPv6 prefixes.
//!
//! The text form is the usual `address/length` notation, used both for
//! parsing lookup input and for rendering ranges.

use crate::error::{GeoError, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Address family of a prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    V4,
    V6,
}

impl Family {
    /// Width of an address in this family, in bits
    pub const fn max_len(self) -> u8 {
        match self {
            Family::V4 => 32,
            Family::V6 => 128,
        }
    }
}

/// Canonical (masked) network prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Prefix {
    // Field order matters: the derived Ord compares address before length.
    addr: IpAddr,
    len: u8,
}

impl Prefix {
    /// Build a canonical prefix, masking host bits off `addr`
    ///
    /// Fails if `len` exceeds the width of the address family.
    pub fn new(addr: IpAddr, len: u8) -> Result<Self> {
        let family = family_of(&addr);
        if len > family.max_len() {
            return Err(GeoError::InvalidArgument(format!(
                "prefix length {} exceeds {} for {}",
                len,
                family.max_len(),
                addr
            )));
        }

        Ok(Prefix {
            addr: mask(addr, len),
            len,
        })
    }

    /// Network address (host bits cleared)
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Prefix length in bits
    pub fn prefix_len(&self) -> u8 {
        self.len
    }

    pub fn family(&self) -> Family {
        family_of(&self.addr)
    }

    /// Packed exact-match key for IPv4 prefixes
    ///
    /// The length occupies bits 32..40 and the address bits 0..32, so distinct
    /// (address, length) pairs never share a key. Returns `None` for IPv6.
    pub fn v4_key(&self) -> Option<u64> {
        match self.addr {
            IpAddr::V4(v4) => Some(((self.len as u64) << 32) | u32::from(v4) as u64),
            IpAddr::V6(_) => None,
        }
    }
}

fn family_of(addr: &IpAddr) -> Family {
    match addr {
        IpAddr::V4(_) => Family::V4,
        IpAddr::V6(_) => Family::V6,
    }
}

fn mask(addr: IpAddr, len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
            IpAddr::V4(Ipv4Addr::from(bits & mask))
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let mask = if len == 0 { 0 } else { u128::MAX << (128 - len) };
            IpAddr::V6(Ipv6Addr::from(bits & mask))
        }
    }
}

impl FromStr for Prefix {
    type Err = GeoError;

    /// Parse `address/length`, ignoring surrounding whitespace
    ///
    /// A bare address without a length is rejected. Host bits are masked off,
    /// so `10.1.2.3/8` parses to `10.0.0.0/8`.
    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let invalid = || GeoError::InvalidArgument(format!("invalid prefix: {:?}", s));

        let (addr_part, len_part) = text.split_once('/').ok_or_else(invalid)?;
        // Decimal digits only, no leading zeros ("0" itself is fine)
        if len_part.is_empty()
            || len_part.len() > 3
            || !len_part.bytes().all(|b| b.is_ascii_digit())
            || (len_part.len() > 1 && len_part.starts_with('0'))
        {
            return Err(invalid());
        }

        let addr: IpAddr = addr_part.parse().map_err(|_| invalid())?;
        let len: u8 = len_part.parse().map_err(|_| invalid())?;

        Prefix::new(addr, len).map_err(|_| invalid())
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl Serialize for Prefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Prefix {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_masks_host_bits() {
        let prefix = p("10.1.2.3/8");
        assert_eq!(prefix.to_string(), "10.0.0.0/8");
        assert_eq!(prefix.prefix_len(), 8);
        assert_eq!(prefix, p("10.0.0.0/8"));

        let v6 = p("2001:db8:ffff::1/32");
        assert_eq!(v6.to_string(), "2001:db8::/32");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(p("  192.168.0.0/16\n"), p("192.168.0.0/16"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "10.0.0.0",
            "10.0.0.0/",
            "10.0.0.0/33",
            "10.0.0.0/+8",
            "10.0.0.0/-1",
            "10.0.0/8",
            "2001:db8::/129",
            "not-an-ip/8",
            "10.0.0.0/8/8",
            "10.0.0.0/08",
            "10.0.0.0/008",
            "::/00",
        ] {
            let err = bad.parse::<Prefix>().unwrap_err();
            assert!(
                matches!(err, GeoError::InvalidArgument(_)),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_zero_and_full_length() {
        assert_eq!(p("1.2.3.4/0").to_string(), "0.0.0.0/0");
        assert_eq!(p("1.2.3.4/32").to_string(), "1.2.3.4/32");
        assert_eq!(p("::1/128").to_string(), "::1/128");
        assert_eq!(p("ffff::/0").to_string(), "::/0");
    }

    #[test]
    fn test_mapped_address_stays_v6() {
        let prefix = p("::ffff:10.0.0.0/104");
        assert_eq!(prefix.family(), Family::V6);
        assert!(prefix.v4_key().is_none());
    }

    #[test]
    fn test_ordering_address_then_length() {
        let mut list = vec![
            p("10.0.0.0/9"),
            p("2001:db8::/32"),
            p("10.0.0.0/8"),
            p("9.0.0.0/8"),
        ];
        list.sort();
        let rendered: Vec<String> = list.iter().map(|p| p.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["9.0.0.0/8", "10.0.0.0/8", "10.0.0.0/9", "2001:db8::/32"]
        );
    }

    #[test]
    fn test_v4_key_distinguishes_lengths() {
        let a = p("10.0.0.0/8").v4_key().unwrap();
        let b = p("10.0.0.0/9").v4_key().unwrap();
        assert_ne!(a, b);
        assert_eq!(a, (8u64 << 32) | 0x0A00_0000);
    }

    #[test]
    fn test_serializes_as_text() {
        let json = serde_json::to_string(&p("10.0.0.0/8")).unwrap();
        assert_eq!(json, "\"10.0.0.0/8\"");
    }
}
