//! Query façade for transport layers
//!
//! [`GeoService`] answers the geocoder API over whatever store is current in
//! a [`StoreHolder`]. Each call takes one snapshot, so a concurrent reload
//! never mixes two stores inside one answer. Errors carry an
//! [`ErrorKind`](crate::error::ErrorKind) for the transport to map onto its
//! own status codes.

use crate::country::normalize_iso;
use crate::error::{GeoError, Result};
use crate::holder::StoreHolder;
use crate::loader::{effective_fallback_code, DEFAULT_FALLBACK_CODE};
use crate::prefix::Prefix;
use crate::query::{RangeStream, SharedPage};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

/// Liveness information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

/// A country code with the number of ranges it owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountryRangeCount {
    pub iso_code: String,
    pub ranges_count: usize,
}

/// Country resolved for one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpCountry {
    pub ip: String,
    pub iso_code: String,
}

/// Every range of one country, shared with the store
#[derive(Debug, Clone)]
pub struct CountryNetworks {
    pub iso_code: String,
    networks: Arc<[Prefix]>,
}

impl CountryNetworks {
    pub fn networks(&self) -> &[Prefix] {
        &self.networks
    }
}

impl Serialize for CountryNetworks {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("CountryNetworks", 2)?;
        state.serialize_field("iso_code", &self.iso_code)?;
        state.serialize_field("networks", self.networks())?;
        state.end()
    }
}

/// Owner of an exact canonical prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkOwner {
    pub network: Prefix,
    pub iso_code: String,
}

/// Geocoder API over a reloadable store
pub struct GeoService {
    holder: Arc<StoreHolder>,
    fallback_code: String,
    started: Instant,
}

impl GeoService {
    pub fn new(holder: Arc<StoreHolder>) -> Self {
        Self {
            holder,
            fallback_code: DEFAULT_FALLBACK_CODE.to_string(),
            started: Instant::now(),
        }
    }

    /// Code reported for addresses with no country; blank keeps the default
    pub fn with_fallback_code(mut self, code: &str) -> Self {
        self.fallback_code = effective_fallback_code(code);
        self
    }

    pub fn holder(&self) -> &Arc<StoreHolder> {
        &self.holder
    }

    pub fn health(&self) -> Health {
        Health {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }

    /// Every known code with its range count, sorted by code
    pub fn countries(&self) -> Vec<CountryRangeCount> {
        let store = self.holder.snapshot();
        store
            .country_codes()
            .into_iter()
            .map(|code| CountryRangeCount {
                ranges_count: store.range_count(&code),
                iso_code: code,
            })
            .collect()
    }

    /// Longest-prefix country for each address, in input order
    pub fn ip_data<S: AsRef<str>>(&self, ips: &[S]) -> Result<Vec<IpCountry>> {
        let reader = self
            .holder
            .reader()
            .ok_or_else(|| {
                GeoError::InvalidArgument("mmdb reader is not initialized".to_string())
            })?;
        if ips.is_empty() {
            return Err(GeoError::InvalidArgument("ips must not be empty".to_string()));
        }

        let mut out = Vec::with_capacity(ips.len());
        for raw in ips {
            let text = raw.as_ref().trim();
            if text.is_empty() {
                return Err(GeoError::InvalidArgument("empty ip".to_string()));
            }
            let addr: IpAddr = text
                .parse()
                .map_err(|_| GeoError::InvalidArgument(format!("invalid ip: {}", text)))?;

            let record = match reader.lookup(addr) {
                Ok(hit) => hit.map(|(record, _)| record),
                Err(e) => {
                    tracing::debug!(ip = %addr, error = %e, "ip lookup failed");
                    None
                }
            };
            let iso_code = record
                .and_then(|r| {
                    [r.country, r.registered_country]
                        .into_iter()
                        .flatten()
                        .map(|code| normalize_iso(&code))
                        .find(|code| !code.is_empty())
                })
                .unwrap_or_else(|| self.fallback_code.clone());

            out.push(IpCountry {
                ip: text.to_string(),
                iso_code,
            });
        }
        Ok(out)
    }

    /// Full range lists for each code, in input order
    ///
    /// All codes are checked before anything is returned.
    pub fn country_networks<S: AsRef<str>>(&self, codes: &[S]) -> Result<Vec<CountryNetworks>> {
        if codes.is_empty() {
            return Err(GeoError::InvalidArgument(
                "isoCodes must not be empty".to_string(),
            ));
        }

        let store = self.holder.snapshot();
        codes
            .iter()
            .map(|code| {
                let iso_code = non_empty_code(code.as_ref())?;
                let networks = store.ranges_shared(&iso_code)?;
                Ok(CountryNetworks { iso_code, networks })
            })
            .collect()
    }

    /// One page of a country's ranges
    pub fn country_networks_paged(&self, code: &str, page: i64, size: i64) -> Result<SharedPage> {
        let iso_code = non_empty_code(code)?;
        self.holder.snapshot().paginate_shared(&iso_code, page, size)
    }

    /// Chunked ranges for each code, in input order
    pub fn stream_country_networks<S: AsRef<str>>(
        &self,
        codes: &[S],
        chunk_size: Option<usize>,
    ) -> Result<RangeStream> {
        self.holder.snapshot().stream_ranges(codes, chunk_size)
    }

    /// Owner of exactly `cidr`
    pub fn lookup_network(&self, cidr: &str) -> Result<NetworkOwner> {
        let network: Prefix = cidr.parse()?;
        let store = self.holder.snapshot();
        let iso_code = store
            .lookup_prefix(&network)
            .ok_or_else(|| GeoError::NotFound(format!("no country for prefix {}", network)))?
            .to_string();
        Ok(NetworkOwner { network, iso_code })
    }
}

fn non_empty_code(code: &str) -> Result<String> {
    let canonical = normalize_iso(code);
    if canonical.is_empty() {
        return Err(GeoError::InvalidArgument(
            "isoCode must not be empty".to_string(),
        ));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{self, CancelToken, LoadOptions, RawEntry};

    fn service() -> GeoService {
        let entries = vec![
            RawEntry::new("10.0.0.0".parse().unwrap(), 8, Some("RU")),
            RawEntry::new("11.0.0.0".parse().unwrap(), 8, Some("RU")),
            RawEntry::new("2001:db8::".parse().unwrap(), 32, Some("US")),
        ];
        let store = loader::load(&entries, &LoadOptions::default(), &CancelToken::new()).unwrap();
        GeoService::new(Arc::new(StoreHolder::new(store)))
    }

    #[test]
    fn test_countries_sorted_with_counts() {
        let countries = service().countries();
        assert_eq!(
            countries,
            vec![
                CountryRangeCount {
                    iso_code: "RU".into(),
                    ranges_count: 2
                },
                CountryRangeCount {
                    iso_code: "US".into(),
                    ranges_count: 1
                },
            ]
        );
    }

    #[test]
    fn test_country_networks_validation() {
        let svc = service();
        let out = svc.country_networks(&["us", "RU"]).unwrap();
        assert_eq!(out[0].iso_code, "US");
        assert_eq!(out[1].networks().len(), 2);

        let err = svc.country_networks::<&str>(&[]).unwrap_err();
        assert_eq!(err, GeoError::InvalidArgument("isoCodes must not be empty".into()));
        let err = svc.country_networks(&["RU", " "]).unwrap_err();
        assert_eq!(err, GeoError::InvalidArgument("isoCode must not be empty".into()));
        let err = svc.country_networks(&["RU", "xx"]).unwrap_err();
        assert_eq!(err, GeoError::NotFound("unknown iso code: XX".into()));
    }

    #[test]
    fn test_paged_errors() {
        let svc = service();
        assert_eq!(
            svc.country_networks_paged("RU", -1, 10).unwrap_err(),
            GeoError::InvalidArgument("page must be >= 0".into())
        );
        assert_eq!(
            svc.country_networks_paged("RU", 0, 0).unwrap_err(),
            GeoError::InvalidArgument("size must be >= 1".into())
        );
        let page = svc.country_networks_paged("ru", 0, 1).unwrap();
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.content()[0].to_string(), "10.0.0.0/8");
    }

    #[test]
    fn test_ip_data_requires_reader() {
        let err = service().ip_data(&["10.0.0.1"]).unwrap_err();
        assert_eq!(
            err,
            GeoError::InvalidArgument("mmdb reader is not initialized".into())
        );
        assert!(err.is_client_error());
    }

    #[test]
    fn test_ip_data_blank_fallback_keeps_default() {
        let mut writer = crate::mmdb::CountryDbWriter::new();
        writer.insert("10.0.0.0/8".parse().unwrap(), "RU").unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("country.mmdb");
        std::fs::write(&path, writer.build().unwrap()).unwrap();

        let holder = StoreHolder::open(&path, &LoadOptions::default(), &CancelToken::new()).unwrap();
        let svc = GeoService::new(Arc::new(holder)).with_fallback_code("  ");

        let out = svc.ip_data(&["10.1.1.1", "192.0.2.1"]).unwrap();
        assert_eq!(out[0].iso_code, "RU");
        assert_eq!(out[1].iso_code, DEFAULT_FALLBACK_CODE);
    }

    #[test]
    fn test_lookup_network() {
        let svc = service();
        let owner = svc.lookup_network("2001:db8::/32").unwrap();
        assert_eq!(owner.iso_code, "US");
        assert!(matches!(
            svc.lookup_network("10.0.0.0/9"),
            Err(GeoError::NotFound(_))
        ));
        assert!(matches!(
            svc.lookup_network("10.0.0.0"),
            Err(GeoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_health() {
        let health = service().health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }
}
