//! The consumption loop.
//!
//! One execution produces an ordered stream of events: notices, errors, row
//! counts, result-set boundaries and row-availability signals. The driver and
//! the consumer share a bounded transport buffer, so the consumer has to keep
//! pulling until the driver considers the execution finished. A consumer that
//! stops after the first result set leaves the driver blocked on a full buffer
//! while it waits for rows that will never arrive.
//!
//! [`run`] therefore never returns before it has seen the end of the stream,
//! a fatal error, or a cancellation.

use std::future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::Level;

use super::cancel::CancelHandle;
use super::cursor::{Cursor, Diagnostic};
use super::error::{MultiplexError, SourceError};
use super::event::Event;
use super::sink::DiagnosticsSink;
use super::source::EventSource;

/// Upper bound on how long a cancelled source may take to acknowledge.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Knobs for one consumption run.
#[derive(Debug, Clone, Default)]
pub struct MultiplexOptions {
    /// Treat the first server-reported statement error as fatal.
    pub fail_on_statement_error: bool,
    /// Abort if the stream is not drained within this duration.
    pub deadline: Option<Duration>,
    /// Explicit cancellation signal.
    pub cancel: Option<CancelHandle>,
}

impl MultiplexOptions {
    /// Stop at the first statement error instead of logging it and draining on.
    pub fn strict(mut self, strict: bool) -> Self {
        self.fail_on_statement_error = strict;
        self
    }

    /// Fail with `DeadlineExceeded` if the drain outlasts `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort the run as soon as `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Counters describing how a run went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiplexStats {
    /// Completed pulls from the source, including the final end-of-stream.
    pub events_pulled: usize,
    pub result_sets: usize,
    pub rows: usize,
    pub notices: usize,
    pub statement_errors: usize,
}

/// What [`run`] hands back: the cursor, always, plus the first fatal error.
///
/// Rows and result sets materialized before a fatal error stay in the cursor.
#[derive(Debug)]
pub struct MultiplexOutcome {
    pub cursor: Cursor,
    pub error: Option<MultiplexError>,
    pub stats: MultiplexStats,
}

impl MultiplexOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Drop the partial cursor on failure.
    pub fn into_result(self) -> Result<Cursor, MultiplexError> {
        match self.error {
            None => Ok(self.cursor),
            Some(err) => Err(err),
        }
    }
}

enum Pull {
    Event(Result<Option<Event>, SourceError>),
    Cancelled,
    DeadlineExceeded,
}

/// Drain `source` to completion.
///
/// The source must belong to an execution whose query has already been
/// submitted. Notices and non-fatal statement errors go to `sink` and are
/// recorded in the cursor; row counts accumulate in the cursor; result sets
/// and rows are materialized as the corresponding events arrive.
pub async fn run<S>(
    source: &mut S,
    sink: &dyn DiagnosticsSink,
    options: &MultiplexOptions,
) -> MultiplexOutcome
where
    S: EventSource + ?Sized,
{
    let deadline = options.deadline.map(|d| Instant::now() + d);
    let mut cursor = Cursor::new();
    let mut stats = MultiplexStats::default();
    let mut has_more_result_sets = true;

    let error = loop {
        let pulled = tokio::select! {
            biased;
            _ = wait_cancelled(options.cancel.as_ref()) => Pull::Cancelled,
            _ = wait_deadline(deadline) => Pull::DeadlineExceeded,
            next = source.next_event() => Pull::Event(next),
        };

        let event = match pulled {
            Pull::Event(Ok(Some(event))) => event,
            Pull::Event(Ok(None)) => {
                stats.events_pulled += 1;
                tracing::debug!(
                    events = stats.events_pulled,
                    has_more_result_sets,
                    "event stream drained"
                );
                break None;
            }
            Pull::Event(Err(err)) => {
                stats.events_pulled += 1;
                break Some(MultiplexError::from(err));
            }
            Pull::Cancelled => {
                abandon(source).await;
                break Some(MultiplexError::Cancelled);
            }
            Pull::DeadlineExceeded => {
                abandon(source).await;
                break Some(MultiplexError::DeadlineExceeded(
                    options.deadline.unwrap_or_default(),
                ));
            }
        };
        stats.events_pulled += 1;
        tracing::trace!(kind = event.kind(), "event");

        match event {
            Event::Notice { message } => {
                stats.notices += 1;
                sink.emit(Level::INFO, &message);
                cursor.record(Diagnostic::Notice { message });
            }

            Event::Error {
                origin,
                code,
                message,
            } if origin.is_fatal() => {
                break Some(MultiplexError::Transport { code, message });
            }

            Event::Error { code, message, .. } => {
                stats.statement_errors += 1;
                if options.fail_on_statement_error {
                    break Some(MultiplexError::Statement { code, message });
                }
                sink.emit(Level::INFO, &statement_error_line(code, &message));
                cursor.record(Diagnostic::StatementError { code, message });
            }

            Event::RowsAffected { count } => {
                cursor.add_rows_affected(count);
                sink.emit(Level::INFO, &format!("{count} rows affected"));
            }

            Event::NextResultSet => match source.advance_result_set() {
                Ok(Some(columns)) => {
                    has_more_result_sets = true;
                    stats.result_sets += 1;
                    sink.emit(
                        Level::INFO,
                        &format!(
                            "result set {} started ({} columns)",
                            stats.result_sets,
                            columns.len()
                        ),
                    );
                    cursor.begin_result_set(columns);
                }
                // Keep pulling: the driver still expects the stream to be
                // drained up to its end.
                Ok(None) => {
                    has_more_result_sets = false;
                    tracing::debug!("no further result sets");
                }
                Err(err) => break Some(err.into()),
            },

            Event::NextRow => match source.advance_row() {
                Ok(Some(row)) => {
                    stats.rows += 1;
                    tracing::debug!(row = stats.rows, "row available");
                    cursor.push_row(row);
                }
                Ok(None) => tracing::debug!("row signal without a row"),
                Err(err) => break Some(err.into()),
            },
        }
    };

    if let Some(err) = &error {
        tracing::debug!(error = %err, events = stats.events_pulled, "consumption loop aborted");
    }

    MultiplexOutcome {
        cursor,
        error,
        stats,
    }
}

async fn wait_cancelled(cancel: Option<&CancelHandle>) {
    match cancel {
        Some(cancel) => cancel.cancelled().await,
        None => future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}

async fn abandon<S: EventSource + ?Sized>(source: &mut S) {
    if tokio::time::timeout(CANCEL_GRACE, source.cancel())
        .await
        .is_err()
    {
        tracing::warn!("event source did not acknowledge cancellation");
    }
}

fn statement_error_line(code: Option<i32>, message: &str) -> String {
    match code {
        Some(code) => format!("statement error {code}: {message}"),
        None => format!("statement error: {message}"),
    }
}
