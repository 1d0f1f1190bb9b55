//! On-disk configuration format and startup validation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::catalog::RuntimeConfig;
use crate::spec::Spec;

/// The file-level configuration shape (TOML). This is what a catalog
/// provider parses before turning it into a `CatalogState`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub specs: Vec<Spec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }
}

impl Config {
    /// Structural validation that can run before any spec is fingerprinted
    /// or any backend is started. Startup aborts only on `Error`-severity
    /// issues; `Warning`s are logged and otherwise ignored.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut seen_names = HashSet::new();

        for spec in &self.specs {
            if spec.name.trim().is_empty() {
                issues.push(ConfigIssue::error("spec with empty name"));
                continue;
            }
            if !seen_names.insert(spec.name.clone()) {
                issues.push(ConfigIssue::error(format!(
                    "duplicate spec name: {}",
                    spec.name
                )));
            }
            if spec.max_concurrent == 0 {
                issues.push(ConfigIssue::error(format!(
                    "{}: max_concurrent must be >= 1",
                    spec.name
                )));
            }
            if spec.min_ready > spec.max_concurrent {
                issues.push(ConfigIssue::warning(format!(
                    "{}: min_ready ({}) exceeds max_concurrent ({}), will be clamped",
                    spec.name, spec.min_ready, spec.max_concurrent
                )));
            }
            if let Some(expose) = &spec.expose_tools {
                if expose.is_empty() {
                    issues.push(ConfigIssue::warning(format!(
                        "{}: expose_tools present but empty, hides every tool",
                        spec.name
                    )));
                }
            }
        }

        if self.runtime.server_init_retry_base_seconds == 0 {
            issues.push(ConfigIssue::error(
                "runtime.server_init_retry_base_seconds must be >= 1",
            ));
        }
        if self.runtime.server_init_retry_max_seconds < self.runtime.server_init_retry_base_seconds
        {
            issues.push(ConfigIssue::error(
                "runtime.server_init_retry_max_seconds must be >= retry_base_seconds",
            ));
        }
        if self.runtime.page_size == 0 {
            issues.push(ConfigIssue::error("runtime.page_size must be >= 1"));
        }

        issues
    }

    pub fn has_fatal_issues(issues: &[ConfigIssue]) -> bool {
        issues.iter().any(|i| i.severity == ConfigSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ActivationMode, SessionStrategy, Transport};
    use std::collections::BTreeMap;

    fn spec(name: &str) -> Spec {
        Spec {
            name: name.into(),
            transport: Transport::Stdio {
                command: "true".into(),
                args: vec![],
            },
            env: BTreeMap::new(),
            working_dir: None,
            tags: vec![],
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
    fn duplicate_names_are_an_error() {
        let cfg = Config {
            runtime: RuntimeConfig::default(),
            specs: vec![spec("a"), spec("a")],
        };
        let issues = cfg.validate();
        assert!(Config::has_fatal_issues(&issues));
    }

    #[test]
    fn clean_config_has_no_errors() {
        let cfg = Config {
            runtime: RuntimeConfig::default(),
            specs: vec![spec("a"), spec("b")],
        };
        let issues = cfg.validate();
        assert!(!Config::has_fatal_issues(&issues));
    }

    #[test]
    fn min_ready_above_max_concurrent_is_a_warning_not_error() {
        let mut s = spec("a");
        s.min_ready = 10;
        s.max_concurrent = 2;
        let cfg = Config {
            runtime: RuntimeConfig::default(),
            specs: vec![s],
        };
        let issues = cfg.validate();
        assert!(!Config::has_fatal_issues(&issues));
        assert!(issues.iter().any(|i| i.severity == ConfigSeverity::Warning));
    }
}
