//! Event kinds produced by an execution's event source.

use serde::{Deserialize, Serialize};

/// Where an error reported by the event source came from.
///
/// Classification happens where the source produces the event, so the
/// multiplexer never has to inspect an error's dynamic type to decide whether
/// it is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOrigin {
    /// Reported by the server for a single statement (constraint violation,
    /// bad object name, ...). The execution as a whole carries on.
    Server,
    /// Raised by the driver or transport (malformed protocol, connection
    /// loss). Always fatal.
    Transport,
}

impl ErrorOrigin {
    /// Whether an error of this origin aborts the consumption loop.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorOrigin::Transport)
    }
}

/// One out-of-band message from an in-flight execution.
///
/// Exhaustion of the source is not a variant: `EventSource::next_event`
/// returns `Ok(None)` once the execution is finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Informational diagnostic from the server (`PRINT`, low-severity `RAISERROR`).
    Notice { message: String },

    /// An error reported by the server or the driver.
    Error {
        origin: ErrorOrigin,
        /// SQL Server error number, when the server supplied one.
        code: Option<i32>,
        message: String,
    },

    /// Mutation count for a non-`SELECT` statement.
    RowsAffected { count: u64 },

    /// The cursor should attempt to move to the next result set.
    NextResultSet,

    /// A row is (or may be) available in the active result set.
    NextRow,
}

impl Event {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Notice { .. } => "notice",
            Event::Error { .. } => "error",
            Event::RowsAffected { .. } => "rows_affected",
            Event::NextResultSet => "next_result_set",
            Event::NextRow => "next_row",
        }
    }
}
