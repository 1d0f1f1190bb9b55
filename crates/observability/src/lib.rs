//! `muxd-observability` — runtime/init-status views, their periodic
//! refresh workers, and the central log fan-out (§4.8).

pub mod error;
pub mod log;
pub mod observability;
pub mod status_view;

pub use error::ObservabilityError;
pub use log::{LogBroadcaster, LogEntry, LogLevel};
pub use observability::{ObservabilityService, INIT_STATUS_INTERVAL, RUNTIME_STATUS_INTERVAL};
pub use status_view::{InitStatusView, RuntimeStatusView};
