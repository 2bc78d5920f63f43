//! The envelope data model: the canonical record of one accepted message,
//! and the statistics derived from it by the processor stage.

pub mod codec;
pub mod mime;
pub mod stats;

use std::net::IpAddr;
use std::time::SystemTime;

pub use mime::MimePart;
pub use stats::EnvelopeStats;

/// A parsed mail address as captured off the wire. `address` never includes
/// the angle brackets; `parameters` holds the `KEY=VALUE` tokens that
/// followed the address on a `MAIL FROM`/`RCPT TO` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailAddress {
    pub address: String,
}

impl MailAddress {
    pub fn new(address: impl Into<String>) -> Self {
        MailAddress {
            address: address.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.address.is_empty()
    }

    /// Substring after the first `@`, or empty if there is none.
    pub fn domain(&self) -> &str {
        match self.address.find('@') {
            Some(idx) => &self.address[idx + 1..],
            None => "",
        }
    }
}

/// The canonical record of one accepted message.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: String,
    pub remote_ip: IpAddr,
    pub remote_port: u16,
    pub from: MailAddress,
    pub to: MailAddress,
    pub forward: Vec<MailAddress>,
    pub timestamp: SystemTime,
    pub securely_delivered: bool,
    pub message: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub stats: Option<EnvelopeStats>,
}

impl Envelope {
    pub fn new(id: String, remote_ip: IpAddr, remote_port: u16, timestamp: SystemTime) -> Self {
        Envelope {
            id,
            remote_ip,
            remote_port,
            from: MailAddress::default(),
            to: MailAddress::default(),
            forward: Vec::new(),
            timestamp,
            securely_delivered: false,
            message: Vec::new(),
            headers: Vec::new(),
            body: Vec::new(),
            stats: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
