//! Merging per-spec fragments into one canonically-ordered snapshot
//! (§4.5.1 step 2-3, §3 "Snapshot").

use std::collections::{HashMap, HashSet};

use muxd_domain::{Entry, SpecKey};

use crate::capability::Capability;

/// Merge every spec's last-known fragment into one deduplicated,
/// canonically-sorted entry list.
///
/// Dedup key is the entry's `key` (tool/resource/prompt name, or resource
/// URI) across all specs. Conflicts — the same name/URI contributed by two
/// different specs — are resolved by spec-name lexical order: entries are
/// sorted by `server_name` before deduping, so the lexically-first spec's
/// entry survives (§9 Open Questions, "Tool name collision across specs").
pub fn merge(capability: Capability, fragments: &HashMap<SpecKey, Vec<Entry>>) -> Vec<Entry> {
    let mut all: Vec<Entry> = fragments.values().flat_map(|v| v.iter().cloned()).collect();
    all.sort_by(|a, b| a.server_name.cmp(&b.server_name).then(a.key.cmp(&b.key)));

    let mut seen = HashSet::new();
    let mut deduped = Vec::with_capacity(all.len());
    for entry in all {
        if seen.insert(entry.key.clone()) {
            deduped.push(entry);
        }
    }

    sort_canonical(capability, &mut deduped);
    deduped
}

/// Final snapshot ordering (§3): tools by `(specKey, name, serverName)`,
/// resources by URI, prompts by name. `key` holds the name/URI in every
/// case.
fn sort_canonical(capability: Capability, entries: &mut [Entry]) {
    match capability {
        Capability::Tools => entries.sort_by(|a, b| {
            a.spec_key
                .cmp(&b.spec_key)
                .then(a.key.cmp(&b.key))
                .then(a.server_name.cmp(&b.server_name))
        }),
        Capability::Resources | Capability::Prompts => entries.sort_by(|a, b| a.key.cmp(&b.key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use muxd_domain::EntrySource;

    fn entry(key: &str, spec_key: &str, server_name: &str) -> Entry {
        Entry {
            key: key.into(),
            spec_key: spec_key.into(),
            server_name: server_name.into(),
            schema: serde_json::json!({}),
            source: EntrySource::Live,
            cached_at: Utc::now(),
        }
    }

    #[test]
    fn dedupes_name_collision_by_lexical_spec_name() {
        let mut fragments = HashMap::new();
        fragments.insert("fp-zeta".to_string(), vec![entry("search", "fp-zeta", "zeta")]);
        fragments.insert("fp-alpha".to_string(), vec![entry("search", "fp-alpha", "alpha")]);
        let merged = merge(Capability::Tools, &fragments);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].server_name, "alpha");
    }

    #[test]
    fn keeps_distinct_names_from_different_specs() {
        let mut fragments = HashMap::new();
        fragments.insert("fp-a".to_string(), vec![entry("search", "fp-a", "a")]);
        fragments.insert("fp-b".to_string(), vec![entry("fetch", "fp-b", "b")]);
        let merged = merge(Capability::Tools, &fragments);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn resources_sort_by_uri() {
        let mut fragments = HashMap::new();
        fragments.insert(
            "fp-a".to_string(),
            vec![entry("file:///b", "fp-a", "a"), entry("file:///a", "fp-a", "a")],
        );
        let merged = merge(Capability::Resources, &fragments);
        assert_eq!(merged[0].key, "file:///a");
        assert_eq!(merged[1].key, "file:///b");
    }
}
