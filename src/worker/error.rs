//! Errors raised while talking to the worker process.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Failure of a worker request.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("cannot start worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("cannot write request to worker: {0}")]
    Write(#[source] io::Error),

    #[error("cannot encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("cannot decode worker result: {0}")]
    Decode(#[source] serde_json::Error),

    /// No response arrived within the request timeout.
    #[error("no response from worker within {0:?}")]
    Timeout(Duration),

    /// The worker went away before answering.
    #[error("worker exited before responding")]
    WorkerExited,

    /// The server refused the login or could not be reached.
    #[error("cannot connect to database: {0}")]
    ConnectionFailed(String),

    /// Any other error response; `code` is the worker's error code.
    #[error("{message} ({code})")]
    Remote { code: String, message: String },
}

impl WorkerError {
    /// Map an error response onto a variant.
    pub(crate) fn from_response(code: &str, message: &str) -> Self {
        match code {
            CONNECTION_FAILED => Self::ConnectionFailed(message.to_string()),
            WORKER_EXITED => Self::WorkerExited,
            _ => Self::Remote {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}

const CONNECTION_FAILED: &str = "CONNECTION_FAILED";

/// Code given to requests still pending when the worker's output closes.
pub(crate) const WORKER_EXITED: &str = "WORKER_EXITED";

impl From<tokio::sync::oneshot::error::RecvError> for WorkerError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::WorkerExited
    }
}
