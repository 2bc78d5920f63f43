//! Day-bucketed embedded key/value store for captured envelopes.
//!
//! Buckets are `sled` trees named `YYYY-MM-DD` (UTC). Keys are envelope ids,
//! values are the binary encoding from [`crate::envelope::codec`].

use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::envelope::{codec, Envelope};

fn bucket_name(ts: SystemTime) -> String {
    let dt: DateTime<Utc> = ts.into();
    dt.format("%Y-%m-%d").to_string()
}

/// Durable storage of captured envelopes, keyed by day and envelope id.
pub trait StorageEngine: Send + Sync {
    fn store(&self, envelope: &Envelope) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<Envelope>>;
    fn view_date(&self, date: &str) -> Result<Vec<Envelope>>;
    fn view_today(&self) -> Result<Vec<Envelope>>;
}

/// `sled`-backed implementation. `sled` serializes writes internally and
/// allows concurrent reads, which is exactly what the day-bucket contract
/// requires.
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let db = sled::open(path).with_context(|| format!("opening sled db at {:?}", path))?;
        Ok(SledStorage { db })
    }

    fn tree_for_date(&self, date: &str) -> Result<sled::Tree> {
        Ok(self.db.open_tree(date)?)
    }
}

impl StorageEngine for SledStorage {
    fn store(&self, envelope: &Envelope) -> Result<()> {
        let bucket = bucket_name(envelope.timestamp);
        let tree = self.tree_for_date(&bucket)?;
        let encoded = codec::encode(envelope);
        tree.insert(envelope.id.as_bytes(), encoded.to_vec())?;
        tree.flush()?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Envelope>> {
        let today = bucket_name(SystemTime::now());
        let tree = self.tree_for_date(&today)?;
        match tree.get(id.as_bytes())? {
            Some(raw) => Ok(Some(codec::decode(bytes::Bytes::copy_from_slice(&raw))?)),
            None => Ok(None),
        }
    }

    fn view_date(&self, date: &str) -> Result<Vec<Envelope>> {
        if !self.db.tree_names().iter().any(|n| n == date.as_bytes()) {
            return Ok(Vec::new());
        }
        let tree = self.tree_for_date(date)?;
        let mut envelopes = Vec::new();
        for item in tree.iter() {
            let (key, raw) = item?;
            match codec::decode(bytes::Bytes::copy_from_slice(&raw)) {
                Ok(env) => envelopes.push(env),
                Err(e) => {
                    warn!(
                        bucket = date,
                        key = %String::from_utf8_lossy(&key),
                        error = %e,
                        "dropping undecodable envelope"
                    );
                }
            }
        }
        Ok(envelopes)
    }

    fn view_today(&self) -> Result<Vec<Envelope>> {
        self.view_date(&bucket_name(SystemTime::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MailAddress;

    fn temp_storage() -> SledStorage {
        let dir = tempfile::tempdir().unwrap();
        SledStorage::open(dir.path()).unwrap()
    }

    fn sample(id: &str) -> Envelope {
        let mut env = Envelope::new(id.into(), "127.0.0.1".parse().unwrap(), 2525, SystemTime::now());
        env.from = MailAddress::new("a@x");
        env.to = MailAddress::new("b@y");
        env.message = b"Subject: hi\r\n\r\nhello\r\n".to_vec();
        env
    }

    #[test]
    fn store_and_view_today() {
        let storage = temp_storage();
        storage.store(&sample("id1")).unwrap();
        let envelopes = storage.view_today().unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].id, "id1");
    }

    #[test]
    fn missing_date_bucket_is_empty() {
        let storage = temp_storage();
        let envelopes = storage.view_date("2000-01-01").unwrap();
        assert!(envelopes.is_empty());
    }

    #[test]
    fn overwrite_same_id_replaces_value() {
        let storage = temp_storage();
        storage.store(&sample("id1")).unwrap();
        let mut updated = sample("id1");
        updated.message = b"Subject: v2\r\n\r\nbye\r\n".to_vec();
        storage.store(&updated).unwrap();
        let envelopes = storage.view_today().unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].message, updated.message);
    }
}
