#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("unknown spec key: {0}")]
    NotFound(String),
}

impl From<SupervisorError> for muxd_domain::Error {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::NotFound(m) => muxd_domain::Error::UnknownSpecKey(m),
        }
    }
}
