/// Error kinds the orchestrator core recognises.
///
/// Tool-level failures are deliberately absent: a failed tool is data in the
/// turn stream (`status: "failed"`), never an error that unwinds the loop.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("could not acquire lock on {path} within {timeout_secs} seconds")]
    LockTimeout { path: String, timeout_secs: u64 },

    #[error("LM transport error: {0}")]
    LmTransport(String),

    #[error("prompt exceeds context window limit ({tokens} / {limit} tokens)")]
    ContextOverflow { tokens: u64, limit: u64 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Process exit code for this error: 1 = retryable, 2 = permanent/abort.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::LockTimeout { .. } | Error::LmTransport(_) | Error::Io(_) => 1,
            Error::NotFound(_)
            | Error::Validation(_)
            | Error::ContextOverflow { .. }
            | Error::Protocol(_)
            | Error::Json(_) => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
