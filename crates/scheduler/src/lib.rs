//! `muxd-scheduler` — per-spec instance pools: acquire/release, min-ready
//! targets, idle eviction, and health probing (§4.3).
//!
//! The scheduler is the exclusive owner of every pool's instances. It calls
//! into `muxd-lifecycle` to start and stop individual instances but never
//! inspects their transport directly.

pub mod error;
pub mod pool;
pub mod scheduler;

pub use error::SchedulerError;
pub use pool::{Pool, PoolEntry, PoolStatus};
pub use scheduler::Scheduler;
