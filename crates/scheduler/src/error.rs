//! Errors raised by the scheduler (§4.3, §7).

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("unknown spec key: {0}")]
    NotFound(String),

    #[error("no ready instance available")]
    Unavailable,

    #[error("canceled")]
    Canceled,

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] muxd_lifecycle::LifecycleError),

    #[error("internal scheduler error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// True for the fatal-init-error subset (§4.4): the init supervisor
    /// suspends instead of retrying.
    pub fn is_fatal(&self) -> bool {
        match self {
            SchedulerError::Lifecycle(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<SchedulerError> for muxd_domain::Error {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::NotFound(m) => muxd_domain::Error::UnknownSpecKey(m),
            SchedulerError::Unavailable => {
                muxd_domain::Error::Unavailable("no ready instance available".into())
            }
            SchedulerError::Canceled => muxd_domain::Error::Canceled,
            SchedulerError::Lifecycle(e) => e.into(),
            SchedulerError::Internal(m) => muxd_domain::Error::Internal(m),
        }
    }
}
