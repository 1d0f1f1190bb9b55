//! `muxd-init-supervisor` — drives every spec's pool toward its desired
//! min-ready target, retrying failed starts with exponential backoff and
//! surfacing structured init status (§4.4).

pub mod error;
pub mod status;
pub mod supervisor;

pub use error::SupervisorError;
pub use status::{classify, InitState, InitStatus};
pub use supervisor::InitSupervisor;
