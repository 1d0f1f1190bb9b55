//! Shared error type used across all muxd crates.
//!
//! Variant names are the stable error codes the control plane surfaces to
//! clients (see the error taxonomy in the design doc); internal subsystems
//! return this type directly rather than layering a narrower enum underneath,
//! since the codes themselves are already the right granularity.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal: {0}")]
    Internal(String),

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("unknown spec key: {0}")]
    UnknownSpecKey(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// True for the init-error subset that short-circuits retry (§4.2, §4.4).
    pub fn is_fatal_init_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidCommand(_)
                | Error::ExecutableNotFound(_)
                | Error::PermissionDenied(_)
                | Error::UnsupportedProtocol(_)
                | Error::UnknownSpecKey(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
