//! Derives per-message statistics: hashes, domains, URLs and GeoIP
//! enrichment. Run once per envelope by the processor stage.

use std::net::IpAddr;
use std::sync::Arc;

use linkify::{LinkFinder, LinkKind};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::envelope::mime::{MimePart, MimePartsExtractor};
use crate::envelope::{Envelope, MailAddress};
use crate::geo::{GeoInfo, GeoResolver};

#[derive(Debug, Clone, Default)]
pub struct EnvelopeStats {
    pub subject: String,
    pub source_domain: String,
    pub destination_domain: String,
    pub forward_domains: Vec<String>,

    pub message_hash: String,
    pub from_hash: String,
    pub to_hash: String,
    pub forward_hash: Vec<String>,

    pub remote_info: Vec<GeoInfo>,
    pub from_info: Vec<GeoInfo>,
    pub destination_info: Vec<GeoInfo>,
    pub forward_info: Vec<Vec<GeoInfo>>,

    pub urls: Vec<String>,
    pub attachments: Vec<MimePart>,
    pub email_parts: Vec<MimePart>,

    pub spf_pass: bool,
    pub dkim_pass: bool,
}

fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(digest)
}

/// Resolves MX -> A/AAAA -> GeoIP for a single domain. Any DNS failure is
/// logged and treated as "no info", never fatal to the caller.
pub struct DomainResolver {
    resolver: Option<hickory_resolver::TokioAsyncResolver>,
    geo: Arc<dyn GeoResolver>,
}

impl DomainResolver {
    pub fn new(resolver: Option<hickory_resolver::TokioAsyncResolver>, geo: Arc<dyn GeoResolver>) -> Self {
        DomainResolver { resolver, geo }
    }

    pub async fn resolve_domain(&self, domain: &str) -> Vec<GeoInfo> {
        let mut infos = Vec::new();
        if domain.is_empty() {
            return infos;
        }
        let Some(resolver) = &self.resolver else {
            return infos;
        };

        let mx_lookup = match resolver.mx_lookup(domain).await {
            Ok(r) => r,
            Err(e) => {
                debug!(domain, error = %e, "mx lookup failed");
                return infos;
            }
        };

        for mx in mx_lookup.iter() {
            let host = mx.exchange().to_utf8();
            for ip in self.resolve_host(&host).await {
                if let Some(info) = self.geo.lookup(ip) {
                    infos.push(info);
                }
            }
        }
        infos
    }

    async fn resolve_host(&self, host: &str) -> Vec<IpAddr> {
        let mut addrs = Vec::new();
        let Some(resolver) = &self.resolver else {
            return addrs;
        };
        if let Ok(resp) = resolver.lookup_ip(host).await {
            addrs.extend(resp.iter());
        } else {
            warn!(host, "a/aaaa lookup failed");
        }
        addrs
    }
}

pub struct StatsDeriver {
    domain_resolver: DomainResolver,
}

impl StatsDeriver {
    pub fn new(domain_resolver: DomainResolver) -> Self {
        StatsDeriver { domain_resolver }
    }

    pub async fn derive(&self, envelope: &Envelope) -> EnvelopeStats {
        let mut stats = EnvelopeStats::default();

        stats.subject = envelope
            .header("Subject")
            .map(decode_rfc2047)
            .unwrap_or_default();

        let (attachments, email_parts) = match MimePartsExtractor::extract(&envelope.message) {
            Ok(parts) => {
                let (att, rest): (Vec<_>, Vec<_>) = parts.into_iter().partition(|p| p.is_attachment);
                (att, rest)
            }
            Err(e) => {
                warn!(envelope_id = %envelope.id, error = %e, "mime parse failed");
                (Vec::new(), Vec::new())
            }
        };
        stats.attachments = attachments;
        stats.email_parts = email_parts;

        let body_text = String::from_utf8_lossy(&envelope.body);
        stats.urls = extract_urls(&body_text);

        stats.message_hash = sha256_hex(&envelope.message);
        stats.from_hash = sha256_hex(envelope.from.address.as_bytes());
        stats.to_hash = sha256_hex(envelope.to.address.as_bytes());

        stats.source_domain = envelope.from.domain().to_string();
        stats.destination_domain = envelope.to.domain().to_string();

        stats.remote_info = self
            .domain_resolver
            .geo
            .lookup(envelope.remote_ip)
            .into_iter()
            .collect();

        stats.from_info = self.domain_resolver.resolve_domain(&stats.source_domain).await;
        stats.destination_info = self
            .domain_resolver
            .resolve_domain(&stats.destination_domain)
            .await;

        for recipient in &envelope.forward {
            stats.forward_hash.push(sha256_hex(recipient.address.as_bytes()));
            let domain = recipient.domain().to_string();
            let info = self.domain_resolver.resolve_domain(&domain).await;
            stats.forward_domains.push(domain);
            stats.forward_info.push(info);
        }

        stats
    }
}

fn extract_urls(text: &str) -> Vec<String> {
    let mut finder = LinkFinder::new();
    finder.kinds(&[LinkKind::Url]);
    finder.links(text).map(|l| l.as_str().to_string()).collect()
}

/// Decodes RFC 2047 encoded-words (`=?charset?enc?text?=`) in a header
/// value. Falls back to the raw value on any malformed encoded-word.
fn decode_rfc2047(raw: &str) -> String {
    match mailparse::parse_header(format!("Subject: {}\r\n", raw).as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => raw.to_string(),
    }
}

#[allow(dead_code)]
fn empty_address_hash() -> String {
    sha256_hex(MailAddress::default().address.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    struct FixedGeoResolver(GeoInfo);

    impl GeoResolver for FixedGeoResolver {
        fn lookup(&self, _ip: IpAddr) -> Option<GeoInfo> {
            Some(self.0.clone())
        }
    }

    #[tokio::test]
    async fn remote_ip_is_geo_resolved() {
        let remote_ip: IpAddr = "203.0.113.9".parse().unwrap();
        let geo = Arc::new(FixedGeoResolver(GeoInfo {
            ip: remote_ip,
            country: Some("US".to_string()),
            city: None,
            asn: None,
            asn_org: None,
        }));
        let deriver = StatsDeriver::new(DomainResolver::new(None, geo));

        let envelope = Envelope::new("id1".into(), remote_ip, 2525, SystemTime::now());
        let stats = deriver.derive(&envelope).await;

        assert_eq!(stats.remote_info.len(), 1);
        assert_eq!(stats.remote_info[0].country.as_deref(), Some("US"));
    }

    #[test]
    fn hashes_are_sha256_hex() {
        let hash = sha256_hex(b"a@x");
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn url_extraction_finds_strict_urls() {
        let urls = extract_urls("visit https://example.org/path for more");
        assert_eq!(urls, vec!["https://example.org/path".to_string()]);
    }

    #[test]
    fn rfc2047_subject_is_decoded() {
        let decoded = decode_rfc2047("=?UTF-8?B?aGVsbG8=?=");
        assert_eq!(decoded, "hello");
    }

    #[test]
    fn plain_subject_passes_through() {
        let decoded = decode_rfc2047("hello world");
        assert_eq!(decoded, "hello world");
    }
}
