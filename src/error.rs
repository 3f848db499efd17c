//! Error types for outbox-rs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Stored invocation fields cannot be split or decoded.
    #[error("malformed outbox record: {0}")]
    MalformedRecord(String),

    /// An argument could not be serialized at enqueue time.
    #[error("unsupported argument: {0}")]
    UnsupportedArgument(String),

    /// A stored type identifier is unknown to this process.
    #[error("unresolvable type: {0}")]
    TypeResolution(String),

    /// No registered service/method matches the stored method key.
    #[error("invocation target not found: {0}")]
    TargetNotFound(String),

    /// The invoked method itself failed.
    #[error("{0}")]
    Invocation(String),

    #[error("outbox record not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors scoped to a single record. The relay turns these into a
    /// `FAIL` row; anything else aborts the sweep.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            Error::MalformedRecord(_)
                | Error::UnsupportedArgument(_)
                | Error::TypeResolution(_)
                | Error::TargetNotFound(_)
                | Error::Invocation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
