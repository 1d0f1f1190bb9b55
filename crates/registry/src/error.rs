//! Errors raised by the client registry (§7).

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("client not registered: {0}")]
    NotFound(String),
}

impl From<RegistryError> for muxd_domain::Error {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::InvalidArgument(m) => muxd_domain::Error::InvalidArgument(m),
            RegistryError::NotFound(m) => muxd_domain::Error::FailedPrecondition(format!(
                "client not registered: {m}"
            )),
        }
    }
}
