//! Per-client filtering of aggregator snapshots (§4.7).

use std::collections::BTreeSet;

use muxd_domain::{Entry, Snapshot, SpecKey};

/// Keep only entries whose spec is visible to the client, then recompute
/// the ETag over the filtered set — necessarily different from the
/// unfiltered snapshot's ETag (§4.7). Filtering is by `spec_key` rather
/// than `serverName`: every `Entry` here always carries a populated
/// `spec_key`, so the spec's §4.7 "fall back to specKey if serverName is
/// empty" clause collapses to filtering on `spec_key` alone.
pub fn filter_snapshot(snapshot: &Snapshot, visible_spec_keys: &BTreeSet<SpecKey>) -> Snapshot {
    let filtered: Vec<Entry> = snapshot
        .entries
        .iter()
        .filter(|e| visible_spec_keys.contains(&e.spec_key))
        .cloned()
        .collect();
    Snapshot::from_sorted(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use muxd_domain::EntrySource;

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
    fn hides_entries_outside_visible_set() {
        let snapshot = Snapshot::from_sorted(vec![entry("a", "s1"), entry("b", "s2")]);
        let visible: BTreeSet<SpecKey> = ["s1".to_string()].into_iter().collect();
        let filtered = filter_snapshot(&snapshot, &visible);
        assert_eq!(filtered.entries.len(), 1);
        assert_eq!(filtered.entries[0].key, "a");
    }

    #[test]
    fn filtered_etag_differs_from_global_etag() {
        let snapshot = Snapshot::from_sorted(vec![entry("a", "s1"), entry("b", "s2")]);
        let visible: BTreeSet<SpecKey> = ["s1".to_string()].into_iter().collect();
        let filtered = filter_snapshot(&snapshot, &visible);
        assert_ne!(filtered.etag, snapshot.etag);
    }

    #[test]
    fn fully_visible_snapshot_keeps_same_etag() {
        let snapshot = Snapshot::from_sorted(vec![entry("a", "s1")]);
        let visible: BTreeSet<SpecKey> = ["s1".to_string()].into_iter().collect();
        let filtered = filter_snapshot(&snapshot, &visible);
        assert_eq!(filtered.etag, snapshot.etag);
    }
}
