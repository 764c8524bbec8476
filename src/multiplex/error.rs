//! Error types for the consumption loop.

use std::time::Duration;

use thiserror::Error;

/// Error raised by an event source itself, outside of any event payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The connection to the driver or server was lost.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The driver produced something the source could not interpret.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Fatal condition that stopped the consumption loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MultiplexError {
    /// Connection or protocol level failure.
    #[error("transport error: {message}")]
    Transport { code: Option<i32>, message: String },

    /// Server-reported statement error, fatal only when the caller asked to
    /// fail on the first statement error.
    #[error("statement error{}: {message}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
    Statement { code: Option<i32>, message: String },

    /// The caller cancelled the execution.
    #[error("execution cancelled")]
    Cancelled,

    /// The execution did not finish before its deadline.
    #[error("execution exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl MultiplexError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            code: None,
            message: message.into(),
        }
    }

    /// Whether the error came from cancellation or a deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded(_))
    }
}

impl From<SourceError> for MultiplexError {
    fn from(err: SourceError) -> Self {
        Self::transport(err.to_string())
    }
}
