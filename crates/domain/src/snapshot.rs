//! Sorted, hashed, immutable capability snapshots (§3 "Snapshot").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::spec::SpecKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    Cache,
    Live,
}

/// One entry in a tool/resource/prompt snapshot. `key` is the tool/resource
/// name or resource URI; ordering and dedup rules vary by capability and are
/// applied by the caller (the aggregator index), not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub spec_key: SpecKey,
    pub server_name: String,
    pub schema: serde_json::Value,
    pub source: EntrySource,
    pub cached_at: DateTime<Utc>,
}

/// An immutable, sorted, hashed list of capability entries at a point in
/// time (§3 "Snapshot"). Equal entry sets always hash to the same ETag
/// (invariant 4 / testable property 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub etag: String,
    pub entries: Vec<Entry>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            etag: compute_etag(&[]),
            entries: Vec::new(),
        }
    }

    /// `entries` must already be sorted by the capability's canonical order;
    /// this function does not re-sort, only hashes.
    pub fn from_sorted(entries: Vec<Entry>) -> Self {
        let etag = compute_etag(&entries);
        Self { etag, entries }
    }
}

fn compute_etag(entries: &[Entry]) -> String {
    let mut hasher = Sha256::new();
    for e in entries {
        hasher.update(e.key.as_bytes());
        hasher.update(b"\0");
        hasher.update(e.spec_key.as_bytes());
        hasher.update(b"\0");
        hasher.update(e.server_name.as_bytes());
        hasher.update(b"\0");
        hasher.update(e.schema.to_string().as_bytes());
        hasher.update(b"\x1e");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, spec_key: &str) -> Entry {
        Entry {
            key: key.into(),
            spec_key: spec_key.into(),
            server_name: "srv".into(),
            schema: serde_json::json!({}),
            source: EntrySource::Live,
            cached_at: Utc::now(),
        }
    }

    #[test]
    fn equal_entries_equal_etag() {
        let a = Snapshot::from_sorted(vec![entry("a", "k1"), entry("b", "k2")]);
        let b = Snapshot::from_sorted(vec![entry("a", "k1"), entry("b", "k2")]);
        assert_eq!(a.etag, b.etag);
    }

    #[test]
    fn different_entries_different_etag() {
        let a = Snapshot::from_sorted(vec![entry("a", "k1")]);
        let b = Snapshot::from_sorted(vec![entry("a", "k2")]);
        assert_ne!(a.etag, b.etag);
    }

    #[test]
    fn empty_snapshot_has_stable_etag() {
        let a = Snapshot::empty();
        let b = Snapshot::from_sorted(vec![]);
        assert_eq!(a.etag, b.etag);
    }
}
