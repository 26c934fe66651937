//! Database files written by CountryDbWriter, read back through the loader

use geocoder::{
    load, load_file, CancelToken, CountryDbWriter, GeoError, LoadOptions, Reader, RecordSize,
    StoreHolder,
};
use std::fs;
use std::net::IpAddr;
use tempfile::TempDir;

fn aliased_db() -> Vec<u8> {
    let mut writer = CountryDbWriter::new().with_ipv4_aliases(true);
    writer.insert("10.0.0.0/8".parse().unwrap(), "RU").unwrap();
    writer.insert("192.168.0.0/16".parse().unwrap(), "kz").unwrap();
    writer
        .insert_with_registered("2001:db8::/32".parse().unwrap(), None, Some("US"))
        .unwrap();
    writer.build().unwrap()
}

#[test]
fn test_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("country.mmdb");
    fs::write(&path, aliased_db()).unwrap();

    let store = load_file(&path, &LoadOptions::default(), &CancelToken::new()).unwrap();
    assert_eq!(store.stats().ipv4_networks, 2);
    assert_eq!(store.stats().ipv6_networks, 1);
    assert_eq!(store.country_codes(), vec!["KZ", "RU", "US"]);
    assert_eq!(store.lookup_exact("192.168.0.0/16").unwrap(), "KZ");
    // Registered country stands in for a missing country
    assert_eq!(store.lookup_exact("2001:db8::/32").unwrap(), "US");
}

#[test]
fn test_aliases_are_skipped_by_default() {
    let reader = Reader::from_bytes(aliased_db()).unwrap();
    let store = load(&reader, &LoadOptions::default(), &CancelToken::new()).unwrap();

    assert_eq!(store.stats().total_networks, 3);
    assert!(store.lookup_exact("::ffff:10.0.0.0/104").is_err());
    assert!(store.lookup_exact("2002:a00::/24").is_err());
}

#[test]
fn test_keep_aliased_yields_raw_ipv6() {
    let reader = Reader::from_bytes(aliased_db()).unwrap();
    let opts = LoadOptions::default().with_skip_aliased(false);
    let store = load(&reader, &opts, &CancelToken::new()).unwrap();

    // Each IPv4 network is reachable under ::/96 and the three alias roots
    assert_eq!(store.stats().ipv4_networks, 0);
    assert_eq!(store.stats().ipv6_networks, 2 * 4 + 1);
    assert_eq!(store.lookup_exact("::a00:0/104").unwrap(), "RU");
    assert_eq!(store.lookup_exact("::ffff:10.0.0.0/104").unwrap(), "RU");
    assert_eq!(store.lookup_exact("2001:a00::/40").unwrap(), "RU");
    assert_eq!(store.lookup_exact("2002:c0a8::/32").unwrap(), "KZ");
    assert!(store.lookup_exact("10.0.0.0/8").is_err());
}

#[test]
fn test_record_sizes_load_identically() {
    let mut loaded = Vec::new();
    for size in [RecordSize::Bits24, RecordSize::Bits28, RecordSize::Bits32] {
        let mut writer = CountryDbWriter::new().with_record_size(size);
        for i in 0..64u32 {
            let cidr = format!("{}.{}.0.0/16", 1 + i / 8, (i % 8) * 32);
            let code = if i % 3 == 0 { "DE" } else { "NL" };
            writer.insert(cidr.parse().unwrap(), code).unwrap();
        }
        let reader = Reader::from_bytes(writer.build().unwrap()).unwrap();
        let store = load(&reader, &LoadOptions::default(), &CancelToken::new()).unwrap();

        let ranges = (store.ranges("DE").unwrap(), store.ranges("NL").unwrap());
        assert_eq!(ranges.0.len() + ranges.1.len(), 64);
        loaded.push(ranges);
    }
    assert!(loaded.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_missing_country_uses_fallback() {
    let mut writer = CountryDbWriter::new();
    writer
        .insert_with_registered("203.0.113.0/24".parse().unwrap(), None, None)
        .unwrap();
    let reader = Reader::from_bytes(writer.build().unwrap()).unwrap();

    let store = load(&reader, &LoadOptions::default(), &CancelToken::new()).unwrap();
    assert_eq!(store.lookup_exact("203.0.113.0/24").unwrap(), "ZZ");

    let opts = LoadOptions::default().with_fallback_code("xx");
    let store = load(&reader, &opts, &CancelToken::new()).unwrap();
    assert_eq!(store.country_codes(), vec!["XX"]);
}

#[test]
fn test_cancelled_load_leaves_holder_untouched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("country.mmdb");
    fs::write(&path, aliased_db()).unwrap();

    let holder = StoreHolder::open(&path, &LoadOptions::default(), &CancelToken::new()).unwrap();
    let before = holder.snapshot();

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = holder
        .reload(&path, &LoadOptions::default(), &cancel)
        .unwrap_err();
    assert_eq!(err, GeoError::Cancelled);
    assert_eq!(holder.generation(), 1);
    assert!(std::sync::Arc::ptr_eq(&before, &holder.snapshot()));
}

#[test]
fn test_holder_reader_answers_ip_lookups() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("country.mmdb");
    fs::write(&path, aliased_db()).unwrap();

    let holder = StoreHolder::open(&path, &LoadOptions::default(), &CancelToken::new()).unwrap();
    let reader = holder.reader().unwrap();
    let ip: IpAddr = "::ffff:192.168.1.1".parse().unwrap();
    let (record, _) = reader.lookup(ip).unwrap().unwrap();
    assert_eq!(record.country.as_deref(), Some("kz"));
}
