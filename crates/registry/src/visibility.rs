//! Tag-based spec visibility (§3 invariant 5, §4.6.1 step 2) and the
//! activate/deactivate set arithmetic used by registration (§4.6.1).

use std::collections::{BTreeMap, BTreeSet, HashSet};

use muxd_domain::spec::tags_intersect;
use muxd_domain::{Spec, SpecKey};

/// `{spec ∈ catalog : intersect(client.tags, spec.tags) non-empty, OR
/// spec.tags empty ⇒ always visible}` (§3 invariant 5).
pub fn visible_spec_keys(client_tags: &[String], catalog: &BTreeMap<SpecKey, Spec>) -> BTreeSet<SpecKey> {
    catalog
        .iter()
        .filter(|(_, spec)| spec.tags.is_empty() || tags_intersect(client_tags, &spec.tags))
        .map(|(key, _)| key.clone())
        .collect()
}

/// `filterOverlap(A, B) = (A\B, B\A)` (§4.6.1, testable property 9):
/// cancels a spec that appears in both the to-activate and to-deactivate
/// sets so a reference-count churn doesn't trigger a no-op restart.
pub fn filter_overlap(a: &BTreeSet<SpecKey>, b: &BTreeSet<SpecKey>) -> (Vec<SpecKey>, Vec<SpecKey>) {
    let a_set: HashSet<&SpecKey> = a.iter().collect();
    let b_set: HashSet<&SpecKey> = b.iter().collect();
    let only_a: Vec<SpecKey> = a.iter().filter(|k| !b_set.contains(k)).cloned().collect();
    let only_b: Vec<SpecKey> = b.iter().filter(|k| !a_set.contains(k)).cloned().collect();
    (only_a, only_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxd_domain::{ActivationMode, SessionStrategy, Transport};

    fn spec(name: &str, tags: &[&str]) -> Spec {
        Spec {
            name: name.into(),
            transport: Transport::Stdio {
                command: "true".into(),
                args: vec![],
            },
            env: Default::default(),
            working_dir: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            max_concurrent: 4,
            min_ready: 0,
            session_strategy: SessionStrategy::Stateless,
            session_ttl_seconds: 0,
            idle_seconds: 300,
            drain_timeout_seconds: 10,
            activation_mode: ActivationMode::OnDemand,
            protocol_version: "2024-11-05".into(),
            ping_interval_seconds: 30,
            disabled: false,
            expose_tools: None,
        }
    }

    #[test]
    fn untagged_spec_is_always_visible() {
        let mut catalog = BTreeMap::new();
        let s = spec("s1", &[]);
        catalog.insert(s.fingerprint(), s);
        let visible = visible_spec_keys(&["blue".into()], &catalog);
        assert_eq!(visible.len(), 1);
    }

    #[test]
    fn tagged_spec_requires_overlap() {
        let mut catalog = BTreeMap::new();
        let blue = spec("s1", &["blue"]);
        let red = spec("s2", &["red"]);
        catalog.insert(blue.fingerprint(), blue);
        catalog.insert(red.fingerprint(), red);
        let visible = visible_spec_keys(&["blue".into()], &catalog);
        assert_eq!(visible.len(), 1);
    }

    #[test]
    fn filter_overlap_cancels_common_elements() {
        let a: BTreeSet<SpecKey> = ["x".to_string(), "y".to_string()].into_iter().collect();
        let b: BTreeSet<SpecKey> = ["y".to_string(), "z".to_string()].into_iter().collect();
        let (only_a, only_b) = filter_overlap(&a, &b);
        assert_eq!(only_a, vec!["x".to_string()]);
        assert_eq!(only_b, vec!["z".to_string()]);
    }
}
