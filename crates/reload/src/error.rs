//! Errors raised by config providers and the reload manager (§4.1, §4.9).

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    /// A runtime-config field that cannot change without a process restart
    /// (bind address) was edited (§4.1 last bullet).
    #[error("reload requires a restart: bind address changed")]
    RequiresRestart,

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Scheduler(#[from] muxd_scheduler::SchedulerError),
}

impl From<ReloadError> for muxd_domain::Error {
    fn from(e: ReloadError) -> Self {
        match e {
            ReloadError::RequiresRestart => {
                muxd_domain::Error::FailedPrecondition("reload requires a restart".into())
            }
            ReloadError::Invalid(m) => muxd_domain::Error::Config(m),
            ReloadError::Io(e) => muxd_domain::Error::Io(e),
            ReloadError::Scheduler(e) => e.into(),
        }
    }
}
