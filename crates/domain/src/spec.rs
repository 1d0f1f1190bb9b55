//! The declarative description of one backend server (§3 "Spec").

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

fn d_max_concurrent() -> u32 {
    4
}
fn d_min_ready() -> u32 {
    0
}
fn d_idle_seconds() -> u64 {
    300
}
fn d_drain_timeout_seconds() -> u64 {
    10
}
fn d_protocol_version() -> String {
    "2024-11-05".to_string()
}
fn d_ping_interval_seconds() -> u64 {
    30
}
fn d_session_ttl_seconds() -> u64 {
    0
}

/// How a backend instance is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum Transport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    StreamableHttp {
        endpoint: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl Transport {
    fn canonical(&self) -> String {
        match self {
            Transport::Stdio { command, args } => {
                format!("stdio\x1f{command}\x1f{}", args.join("\x1f"))
            }
            Transport::StreamableHttp { endpoint, headers } => {
                let mut hdrs: Vec<_> = headers.iter().collect();
                hdrs.sort_by(|a, b| a.0.cmp(b.0));
                let joined = hdrs
                    .into_iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("\x1f");
                format!("streamable-http\x1f{endpoint}\x1f{joined}")
            }
        }
    }
}

/// Routing/pooling discipline for a spec's instances (§4.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStrategy {
    Stateless,
    Stateful,
    Persistent,
    Singleton,
}

impl Default for SessionStrategy {
    fn default() -> Self {
        SessionStrategy::Stateless
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivationMode {
    OnDemand,
    AlwaysOn,
}

impl Default for ActivationMode {
    fn default() -> Self {
        ActivationMode::OnDemand
    }
}

/// One backend server description (§3 "Spec").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spec {
    pub name: String,
    #[serde(flatten)]
    pub transport: Transport,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default = "d_min_ready")]
    pub min_ready: u32,
    #[serde(default)]
    pub session_strategy: SessionStrategy,
    #[serde(default = "d_session_ttl_seconds")]
    pub session_ttl_seconds: u64,
    #[serde(default = "d_idle_seconds")]
    pub idle_seconds: u64,
    #[serde(default = "d_drain_timeout_seconds")]
    pub drain_timeout_seconds: u64,
    #[serde(default)]
    pub activation_mode: ActivationMode,
    #[serde(default = "d_protocol_version")]
    pub protocol_version: String,
    #[serde(default = "d_ping_interval_seconds")]
    pub ping_interval_seconds: u64,
    #[serde(default)]
    pub disabled: bool,
    /// If present, only these tool names are exposed from this spec.
    #[serde(default)]
    pub expose_tools: Option<Vec<String>>,
}

/// Stable content hash over every semantically load-bearing field.
///
/// Fingerprint equality must imply behavioral equivalence, so every field
/// that changes how the backend behaves (transport, env, tags, concurrency,
/// session handling) is folded in; `disabled` is deliberately excluded since
/// toggling it doesn't change the fingerprint of the underlying process —
/// the catalog loader drops disabled specs before diffing, not this hash.
pub type SpecKey = String;

impl Spec {
    /// Normalize tags and env ordering so the fingerprint is deterministic
    /// regardless of how the loader produced the spec.
    pub fn normalize(&mut self) {
        self.tags = normalize_tags(&self.tags);
    }

    pub fn fingerprint(&self) -> SpecKey {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.transport.canonical().as_bytes());
        hasher.update(b"\0");

        for (k, v) in self.env.iter() {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b"\x1f");
        }
        hasher.update(b"\0");

        if let Some(wd) = &self.working_dir {
            hasher.update(wd.as_bytes());
        }
        hasher.update(b"\0");

        let mut tags = self.tags.clone();
        tags.sort();
        tags.dedup();
        hasher.update(tags.join("\x1f").as_bytes());
        hasher.update(b"\0");

        hasher.update(self.max_concurrent.to_le_bytes());
        hasher.update(self.min_ready.to_le_bytes());
        hasher.update([u8::from(self.session_strategy)]);
        hasher.update(self.session_ttl_seconds.to_le_bytes());
        hasher.update(self.idle_seconds.to_le_bytes());
        hasher.update(self.drain_timeout_seconds.to_le_bytes());
        hasher.update([match self.activation_mode {
            ActivationMode::OnDemand => 0u8,
            ActivationMode::AlwaysOn => 1u8,
        }]);
        hasher.update(self.protocol_version.as_bytes());

        if let Some(expose) = &self.expose_tools {
            let mut names = expose.clone();
            names.sort();
            hasher.update(names.join("\x1f").as_bytes());
        }

        hex::encode(hasher.finalize())
    }
}

impl From<SessionStrategy> for u8 {
    fn from(s: SessionStrategy) -> u8 {
        match s {
            SessionStrategy::Stateless => 0,
            SessionStrategy::Stateful => 1,
            SessionStrategy::Persistent => 2,
            SessionStrategy::Singleton => 3,
        }
    }
}

pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// True if `a` and `b` have at least one element in common.
pub fn tags_intersect(a: &[String], b: &[String]) -> bool {
    a.iter().any(|x| b.contains(x))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Spec {
        Spec {
            name: "weather".into(),
            transport: Transport::Stdio {
                command: "weather-mcp".into(),
                args: vec!["--port".into(), "0".into()],
            },
            env: BTreeMap::new(),
            working_dir: None,
            tags: vec!["blue".into()],
            max_concurrent: 4,
            min_ready: 1,
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
    fn fingerprint_stable_across_tag_order() {
        let mut a = sample();
        let mut b = sample();
        b.tags = vec!["blue".into(), "blue".into()];
        a.normalize();
        b.normalize();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_command() {
        let a = sample();
        let mut b = sample();
        b.transport = Transport::Stdio {
            command: "weather-mcp-v2".into(),
            args: vec!["--port".into(), "0".into()],
        };
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_disabled_flag() {
        let a = sample();
        let mut b = sample();
        b.disabled = true;
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn tag_intersection() {
        assert!(tags_intersect(&["blue".into()], &["blue".into(), "red".into()]));
        assert!(!tags_intersect(&["blue".into()], &["red".into()]));
    }

    #[test]
    fn normalize_tags_dedupes_and_sorts() {
        let tags = normalize_tags(&["Blue".into(), " blue ".into(), "Red".into()]);
        assert_eq!(tags, vec!["blue".to_string(), "red".to_string()]);
    }
}
