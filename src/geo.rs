//! Abstract geolocation lookups. The daemon never opens a GeoIP database
//! itself; it is handed an `Arc<dyn GeoResolver>` at construction time.

use std::net::IpAddr;

/// A geolocation record for a single IP address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoInfo {
    pub ip: IpAddr,
    pub country: Option<String>,
    pub city: Option<String>,
    pub asn: Option<u32>,
    pub asn_org: Option<String>,
}

/// Read-mostly geolocation lookup. A single shared handle is safe for
/// concurrent lookups from multiple envelope-processing tasks.
pub trait GeoResolver: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> Option<GeoInfo>;
}

/// A `GeoResolver` backed by a MaxMind GeoLite2/GeoIP2 database file.
///
/// Provided as one concrete collaborator; the daemon itself is generic over
/// `dyn GeoResolver` and never constructs this type implicitly.
pub struct MaxMindGeoResolver {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindGeoResolver {
    pub fn open(path: &std::path::Path) -> anyhow::Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path)?;
        Ok(MaxMindGeoResolver { reader })
    }
}

impl GeoResolver for MaxMindGeoResolver {
    fn lookup(&self, ip: IpAddr) -> Option<GeoInfo> {
        let city: maxminddb::geoip2::City = self.reader.lookup(ip).ok()?;
        let country = city
            .country
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|n| n.get("en"))
            .map(|s| s.to_string());
        let city_name = city
            .city
            .as_ref()
            .and_then(|c| c.names.as_ref())
            .and_then(|n| n.get("en"))
            .map(|s| s.to_string());
        Some(GeoInfo {
            ip,
            country,
            city: city_name,
            asn: None,
            asn_org: None,
        })
    }
}

/// A resolver that never finds anything. Useful for tests and for deployments
/// that run without a GeoIP database configured.
pub struct NullGeoResolver;

impl GeoResolver for NullGeoResolver {
    fn lookup(&self, _ip: IpAddr) -> Option<GeoInfo> {
        None
    }
}
