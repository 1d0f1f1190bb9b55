//! Shared data model for the muxd control plane: specs, catalog state and
//! diffing, instances, snapshots, client state, config, and the error
//! taxonomy every other muxd crate builds on.

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod instance;
pub mod snapshot;
pub mod spec;

pub use catalog::{CatalogDiff, CatalogState, CatalogSummary, RuntimeConfig};
pub use client::{ClientRegistration, ClientState};
pub use config::Config;
pub use error::{Error, Result};
pub use instance::{Instance, InstanceState, StartCause, StartReason};
pub use snapshot::{Entry, EntrySource, Snapshot};
pub use spec::{ActivationMode, SessionStrategy, Spec, SpecKey, Transport};
