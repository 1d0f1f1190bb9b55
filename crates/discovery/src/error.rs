//! Errors raised by the discovery service (§4.7, §7).

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("invalid cursor")]
    InvalidCursor,

    /// Deliberately used for both "genuinely absent" and "exists but not
    /// visible to this client" (§4.7: "invisible entity ⇒ NotFound,
    /// indistinguishable from absent, to prevent tag enumeration").
    #[error("not found: {0}")]
    NotFound(String),

    #[error("client not registered: {0}")]
    UnknownClient(String),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] muxd_scheduler::SchedulerError),
}

impl From<DiscoveryError> for muxd_domain::Error {
    fn from(e: DiscoveryError) -> Self {
        match e {
            DiscoveryError::InvalidCursor => muxd_domain::Error::InvalidCursor,
            DiscoveryError::NotFound(m) => muxd_domain::Error::NotFound(m),
            DiscoveryError::UnknownClient(m) => {
                muxd_domain::Error::FailedPrecondition(format!("client not registered: {m}"))
            }
            DiscoveryError::Scheduler(e) => e.into(),
        }
    }
}
