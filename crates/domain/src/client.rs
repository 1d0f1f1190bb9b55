//! Registered-client bookkeeping (§3 "ClientState").

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::spec::SpecKey;

/// One registered client (§3 "ClientState"). Created on first
/// `RegisterClient`, mutated only under the registry lock, destroyed by
/// explicit unregister or heartbeat reaping.
#[derive(Debug, Clone)]
pub struct ClientState {
    pub name: String,
    pub pid: u32,
    pub tags: Vec<String>,
    pub visible_spec_keys: BTreeSet<SpecKey>,
    pub last_heartbeat: DateTime<Utc>,
}

impl ClientState {
    pub fn new(name: impl Into<String>, pid: u32, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            pid,
            tags,
            visible_spec_keys: BTreeSet::new(),
            last_heartbeat: Utc::now(),
        }
    }
}

/// What `RegisterClient` hands back to the caller (§6 RPC surface).
#[derive(Debug, Clone)]
pub struct ClientRegistration {
    pub name: String,
    pub pid: u32,
    pub tags: Vec<String>,
    pub visible_spec_keys: Vec<SpecKey>,
}
