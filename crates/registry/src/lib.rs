//! `muxd-registry` — client registration, tag-based spec visibility, spec
//! reference counting, and heartbeat reaping (§4.6).

pub mod error;
pub mod reaper;
pub mod registry;
pub mod visibility;

pub use error::RegistryError;
pub use reaper::pid_is_alive;
pub use registry::ClientRegistry;
pub use visibility::{filter_overlap, visible_spec_keys};
