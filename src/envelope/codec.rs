//! Hand-rolled, versioned, length-prefixed binary serialization for
//! `Envelope`. Deliberately not a native object-graph serializer: captures
//! must remain readable by a later version of this crate even after the
//! in-memory `Envelope` type grows fields.
//!
//! Wire format (all integers little-endian):
//! `u8 version | u64 secs | u32 nanos | u8 ip_kind | ip bytes | u16 port |
//!  u8 securely_delivered | str(from) | str(to) | u32 forward_count |
//!  forward_count * str | u32 message_len | message bytes | str(id) |
//!  u8 has_stats | stats block`
//!
//! `headers` and `body` are not persisted: they are cheap to re-derive from
//! `message` on decode. `stats` requires live DNS/GeoIP lookups and is not
//! re-derivable after the fact, so it is persisted verbatim as an optional
//! trailing block.

use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::envelope::stats::EnvelopeStats;
use crate::envelope::{Envelope, MailAddress, MimePart};
use crate::geo::GeoInfo;

const FORMAT_VERSION: u8 = 1;
const IP_V4: u8 = 4;
const IP_V6: u8 = 6;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("buffer truncated at {0}")]
    Truncated(&'static str),
    #[error("unsupported envelope format version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid utf-8 in field {0}")]
    InvalidUtf8(&'static str),
    #[error("unknown ip address kind {0}")]
    UnknownIpKind(u8),
}

pub fn encode(envelope: &Envelope) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(FORMAT_VERSION);

    let since_epoch = envelope
        .timestamp
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    buf.put_u64_le(since_epoch.as_secs());
    buf.put_u32_le(since_epoch.subsec_nanos());

    match envelope.remote_ip {
        IpAddr::V4(v4) => {
            buf.put_u8(IP_V4);
            buf.put_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            buf.put_u8(IP_V6);
            buf.put_slice(&v6.octets());
        }
    }
    buf.put_u16_le(envelope.remote_port);
    buf.put_u8(envelope.securely_delivered as u8);

    put_str(&mut buf, &envelope.from.address);
    put_str(&mut buf, &envelope.to.address);

    buf.put_u32_le(envelope.forward.len() as u32);
    for addr in &envelope.forward {
        put_str(&mut buf, &addr.address);
    }

    buf.put_u32_le(envelope.message.len() as u32);
    buf.put_slice(&envelope.message);

    put_str(&mut buf, &envelope.id);

    match &envelope.stats {
        Some(stats) => {
            buf.put_u8(1);
            put_stats(&mut buf, stats);
        }
        None => buf.put_u8(0),
    }

    buf.freeze()
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_opt_str(buf: &mut BytesMut, s: &Option<String>) {
    match s {
        Some(s) => {
            buf.put_u8(1);
            put_str(buf, s);
        }
        None => buf.put_u8(0),
    }
}

fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
}

fn put_str_vec(buf: &mut BytesMut, items: &[String]) {
    buf.put_u32_le(items.len() as u32);
    for item in items {
        put_str(buf, item);
    }
}

fn put_geo_info(buf: &mut BytesMut, info: &GeoInfo) {
    match info.ip {
        IpAddr::V4(v4) => {
            buf.put_u8(IP_V4);
            buf.put_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            buf.put_u8(IP_V6);
            buf.put_slice(&v6.octets());
        }
    }
    put_opt_str(buf, &info.country);
    put_opt_str(buf, &info.city);
    match info.asn {
        Some(asn) => {
            buf.put_u8(1);
            buf.put_u32_le(asn);
        }
        None => buf.put_u8(0),
    }
    put_opt_str(buf, &info.asn_org);
}

fn put_geo_info_vec(buf: &mut BytesMut, items: &[GeoInfo]) {
    buf.put_u32_le(items.len() as u32);
    for item in items {
        put_geo_info(buf, item);
    }
}

fn put_mime_part(buf: &mut BytesMut, part: &MimePart) {
    put_str(buf, &part.mime_type);
    put_opt_str(buf, &part.charset);
    put_opt_str(buf, &part.filename);
    buf.put_u64_le(part.size as u64);
    put_opt_str(buf, &part.creation_date);
    put_opt_str(buf, &part.modification_date);
    put_opt_str(buf, &part.read_date);
    put_str(buf, &part.encoding);
    put_opt_str(buf, &part.description);
    buf.put_u8(part.is_attachment as u8);
    put_bytes(buf, &part.data);
}

fn put_mime_part_vec(buf: &mut BytesMut, items: &[MimePart]) {
    buf.put_u32_le(items.len() as u32);
    for item in items {
        put_mime_part(buf, item);
    }
}

fn put_stats(buf: &mut BytesMut, stats: &EnvelopeStats) {
    put_str(buf, &stats.subject);
    put_str(buf, &stats.source_domain);
    put_str(buf, &stats.destination_domain);
    put_str_vec(buf, &stats.forward_domains);

    put_str(buf, &stats.message_hash);
    put_str(buf, &stats.from_hash);
    put_str(buf, &stats.to_hash);
    put_str_vec(buf, &stats.forward_hash);

    put_geo_info_vec(buf, &stats.remote_info);
    put_geo_info_vec(buf, &stats.from_info);
    put_geo_info_vec(buf, &stats.destination_info);
    buf.put_u32_le(stats.forward_info.len() as u32);
    for infos in &stats.forward_info {
        put_geo_info_vec(buf, infos);
    }

    put_str_vec(buf, &stats.urls);
    put_mime_part_vec(buf, &stats.attachments);
    put_mime_part_vec(buf, &stats.email_parts);

    buf.put_u8(stats.spf_pass as u8);
    buf.put_u8(stats.dkim_pass as u8);
}

pub fn decode(mut data: Bytes) -> Result<Envelope, CodecError> {
    require(&data, 1, "version")?;
    let version = data.get_u8();
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    require(&data, 12, "timestamp")?;
    let secs = data.get_u64_le();
    let nanos = data.get_u32_le();
    let timestamp = UNIX_EPOCH + Duration::new(secs, nanos);

    require(&data, 1, "ip_kind")?;
    let ip_kind = data.get_u8();
    let remote_ip = match ip_kind {
        IP_V4 => {
            require(&data, 4, "ipv4")?;
            let mut octets = [0u8; 4];
            data.copy_to_slice(&mut octets);
            IpAddr::from(octets)
        }
        IP_V6 => {
            require(&data, 16, "ipv6")?;
            let mut octets = [0u8; 16];
            data.copy_to_slice(&mut octets);
            IpAddr::from(octets)
        }
        other => return Err(CodecError::UnknownIpKind(other)),
    };

    require(&data, 2, "port")?;
    let remote_port = data.get_u16_le();

    require(&data, 1, "securely_delivered")?;
    let securely_delivered = data.get_u8() != 0;

    let from = MailAddress::new(get_str(&mut data, "from")?);
    let to = MailAddress::new(get_str(&mut data, "to")?);

    require(&data, 4, "forward_count")?;
    let forward_count = data.get_u32_le();
    let mut forward = Vec::with_capacity(forward_count as usize);
    for _ in 0..forward_count {
        forward.push(MailAddress::new(get_str(&mut data, "forward")?));
    }

    require(&data, 4, "message_len")?;
    let message_len = data.get_u32_le() as usize;
    require(&data, message_len, "message")?;
    let message = data.copy_to_bytes(message_len).to_vec();

    let id = get_str(&mut data, "id")?;

    require(&data, 1, "has_stats")?;
    let has_stats = data.get_u8() != 0;
    let stats = if has_stats {
        Some(get_stats(&mut data)?)
    } else {
        None
    };

    let headers = crate::envelope::mime::MimePartsExtractor::headers(&message).unwrap_or_default();
    let body = mailparse::parse_mail(&message)
        .map(|m| m.get_body_raw().unwrap_or_default())
        .unwrap_or_default();

    let mut envelope = Envelope::new(id, remote_ip, remote_port, timestamp);
    envelope.from = from;
    envelope.to = to;
    envelope.forward = forward;
    envelope.securely_delivered = securely_delivered;
    envelope.message = message;
    envelope.headers = headers;
    envelope.body = body;
    envelope.stats = stats;
    Ok(envelope)
}

fn get_opt_str(data: &mut Bytes, field: &'static str) -> Result<Option<String>, CodecError> {
    require(data, 1, field)?;
    if data.get_u8() == 0 {
        return Ok(None);
    }
    Ok(Some(get_str(data, field)?))
}

fn get_bytes(data: &mut Bytes, field: &'static str) -> Result<Vec<u8>, CodecError> {
    require(data, 4, field)?;
    let len = data.get_u32_le() as usize;
    require(data, len, field)?;
    Ok(data.copy_to_bytes(len).to_vec())
}

fn get_str_vec(data: &mut Bytes, field: &'static str) -> Result<Vec<String>, CodecError> {
    require(data, 4, field)?;
    let count = data.get_u32_le();
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        items.push(get_str(data, field)?);
    }
    Ok(items)
}

fn get_geo_info(data: &mut Bytes, field: &'static str) -> Result<GeoInfo, CodecError> {
    require(data, 1, field)?;
    let ip_kind = data.get_u8();
    let ip = match ip_kind {
        IP_V4 => {
            require(data, 4, field)?;
            let mut octets = [0u8; 4];
            data.copy_to_slice(&mut octets);
            IpAddr::from(octets)
        }
        IP_V6 => {
            require(data, 16, field)?;
            let mut octets = [0u8; 16];
            data.copy_to_slice(&mut octets);
            IpAddr::from(octets)
        }
        other => return Err(CodecError::UnknownIpKind(other)),
    };
    let country = get_opt_str(data, field)?;
    let city = get_opt_str(data, field)?;
    require(data, 1, field)?;
    let asn = if data.get_u8() != 0 {
        require(data, 4, field)?;
        Some(data.get_u32_le())
    } else {
        None
    };
    let asn_org = get_opt_str(data, field)?;
    Ok(GeoInfo {
        ip,
        country,
        city,
        asn,
        asn_org,
    })
}

fn get_geo_info_vec(data: &mut Bytes, field: &'static str) -> Result<Vec<GeoInfo>, CodecError> {
    require(data, 4, field)?;
    let count = data.get_u32_le();
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        items.push(get_geo_info(data, field)?);
    }
    Ok(items)
}

fn get_mime_part(data: &mut Bytes, field: &'static str) -> Result<MimePart, CodecError> {
    let mime_type = get_str(data, field)?;
    let charset = get_opt_str(data, field)?;
    let filename = get_opt_str(data, field)?;
    require(data, 8, field)?;
    let size = data.get_u64_le() as usize;
    let creation_date = get_opt_str(data, field)?;
    let modification_date = get_opt_str(data, field)?;
    let read_date = get_opt_str(data, field)?;
    let encoding = get_str(data, field)?;
    let description = get_opt_str(data, field)?;
    require(data, 1, field)?;
    let is_attachment = data.get_u8() != 0;
    let part_data = get_bytes(data, field)?;
    Ok(MimePart {
        mime_type,
        charset,
        filename,
        size,
        creation_date,
        modification_date,
        read_date,
        encoding,
        description,
        is_attachment,
        data: part_data,
    })
}

fn get_mime_part_vec(data: &mut Bytes, field: &'static str) -> Result<Vec<MimePart>, CodecError> {
    require(data, 4, field)?;
    let count = data.get_u32_le();
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        items.push(get_mime_part(data, field)?);
    }
    Ok(items)
}

fn get_stats(data: &mut Bytes) -> Result<EnvelopeStats, CodecError> {
    let mut stats = EnvelopeStats::default();
    stats.subject = get_str(data, "stats.subject")?;
    stats.source_domain = get_str(data, "stats.source_domain")?;
    stats.destination_domain = get_str(data, "stats.destination_domain")?;
    stats.forward_domains = get_str_vec(data, "stats.forward_domains")?;

    stats.message_hash = get_str(data, "stats.message_hash")?;
    stats.from_hash = get_str(data, "stats.from_hash")?;
    stats.to_hash = get_str(data, "stats.to_hash")?;
    stats.forward_hash = get_str_vec(data, "stats.forward_hash")?;

    stats.remote_info = get_geo_info_vec(data, "stats.remote_info")?;
    stats.from_info = get_geo_info_vec(data, "stats.from_info")?;
    stats.destination_info = get_geo_info_vec(data, "stats.destination_info")?;

    require(data, 4, "stats.forward_info")?;
    let forward_info_count = data.get_u32_le();
    let mut forward_info = Vec::with_capacity(forward_info_count as usize);
    for _ in 0..forward_info_count {
        forward_info.push(get_geo_info_vec(data, "stats.forward_info")?);
    }
    stats.forward_info = forward_info;

    stats.urls = get_str_vec(data, "stats.urls")?;
    stats.attachments = get_mime_part_vec(data, "stats.attachments")?;
    stats.email_parts = get_mime_part_vec(data, "stats.email_parts")?;

    require(data, 2, "stats.flags")?;
    stats.spf_pass = data.get_u8() != 0;
    stats.dkim_pass = data.get_u8() != 0;

    Ok(stats)
}

fn require(data: &Bytes, n: usize, field: &'static str) -> Result<(), CodecError> {
    if data.remaining() < n {
        Err(CodecError::Truncated(field))
    } else {
        Ok(())
    }
}

fn get_str(data: &mut Bytes, field: &'static str) -> Result<String, CodecError> {
    require(data, 4, field)?;
    let len = data.get_u32_le() as usize;
    require(data, len, field)?;
    let raw = data.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn sample_envelope() -> Envelope {
        let mut env = Envelope::new(
            "abc123".into(),
            "203.0.113.7".parse().unwrap(),
            2525,
            SystemTime::now(),
        );
        env.from = MailAddress::new("a@x");
        env.to = MailAddress::new("b@y");
        env.forward = vec![MailAddress::new("c@z")];
        env.message = b"Subject: hi\r\n\r\nhello\r\n".to_vec();
        env.securely_delivered = true;
        env
    }

    #[test]
    fn round_trips() {
        let original = sample_envelope();
        let encoded = encode(&original);
        let decoded = decode(encoded).unwrap();
        assert_eq!(decoded.id, original.id);
        assert_eq!(decoded.from, original.from);
        assert_eq!(decoded.to, original.to);
        assert_eq!(decoded.forward, original.forward);
        assert_eq!(decoded.message, original.message);
        assert_eq!(decoded.remote_ip, original.remote_ip);
        assert_eq!(decoded.remote_port, original.remote_port);
        assert_eq!(decoded.securely_delivered, original.securely_delivered);
    }

    #[test]
    fn stats_round_trip() {
        let mut original = sample_envelope();
        let mut stats = EnvelopeStats::default();
        stats.subject = "hi".to_string();
        stats.source_domain = "x".to_string();
        stats.message_hash = "deadbeef".to_string();
        stats.forward_hash = vec!["one".to_string(), "two".to_string()];
        stats.from_info = vec![GeoInfo {
            ip: "203.0.113.7".parse().unwrap(),
            country: Some("US".to_string()),
            city: None,
            asn: Some(64512),
            asn_org: Some("Example ASN".to_string()),
        }];
        stats.forward_info = vec![Vec::new(), vec![GeoInfo {
            ip: "198.51.100.2".parse().unwrap(),
            country: None,
            city: Some("Springfield".to_string()),
            asn: None,
            asn_org: None,
        }]];
        stats.urls = vec!["https://example.org".to_string()];
        stats.spf_pass = true;
        original.stats = Some(stats);

        let encoded = encode(&original);
        let decoded = decode(encoded).unwrap();
        let decoded_stats = decoded.stats.expect("stats preserved across the round trip");

        assert_eq!(decoded_stats.subject, "hi");
        assert_eq!(decoded_stats.message_hash, "deadbeef");
        assert_eq!(decoded_stats.forward_hash, vec!["one", "two"]);
        assert_eq!(decoded_stats.from_info.len(), 1);
        assert_eq!(decoded_stats.from_info[0].asn, Some(64512));
        assert_eq!(decoded_stats.forward_info.len(), 2);
        assert!(decoded_stats.forward_info[0].is_empty());
        assert_eq!(decoded_stats.forward_info[1][0].city.as_deref(), Some("Springfield"));
        assert_eq!(decoded_stats.urls, vec!["https://example.org"]);
        assert!(decoded_stats.spf_pass);
        assert!(!decoded_stats.dkim_pass);
    }

    #[test]
    fn envelope_without_stats_decodes_to_none() {
        let original = sample_envelope();
        let encoded = encode(&original);
        let decoded = decode(encoded).unwrap();
        assert!(decoded.stats.is_none());
    }

    #[test]
    fn rejects_unknown_version() {
        let mut buf = BytesMut::new();
        buf.put_u8(99);
        let err = decode(buf.freeze()).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion(99)));
    }

    #[test]
    fn rejects_truncated_buffer() {
        let encoded = encode(&sample_envelope());
        let truncated = encoded.slice(0..encoded.len() - 5);
        assert!(decode(truncated).is_err());
    }
}
