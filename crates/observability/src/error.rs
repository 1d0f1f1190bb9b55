//! Errors raised by the observability service (§4.8, §7).

#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("client not registered: {0}")]
    UnknownClient(String),

    #[error(transparent)]
    Supervisor(#[from] muxd_init_supervisor::SupervisorError),
}

impl From<ObservabilityError> for muxd_domain::Error {
    fn from(e: ObservabilityError) -> Self {
        match e {
            ObservabilityError::UnknownClient(m) => {
                muxd_domain::Error::FailedPrecondition(format!("client not registered: {m}"))
            }
            ObservabilityError::Supervisor(e) => e.into(),
        }
    }
}
