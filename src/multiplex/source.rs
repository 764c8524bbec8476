//! The event source seam between the multiplexer and a database driver.

use async_trait::async_trait;

use super::cursor::{Column, Row};
use super::error::SourceError;
use super::event::Event;

/// Per-execution stream of protocol events plus the row cursor they refer to.
///
/// A value implementing this trait only exists once the query has been
/// submitted, so the consumption loop can never run ahead of submission.
/// Methods take `&mut self`: one execution is driven by exactly one consumer.
#[async_trait]
pub trait EventSource: Send {
    /// Wait for the next event.
    ///
    /// Returns `Ok(None)` once the execution is exhausted. This is the only
    /// suspension point of the consumption loop; the future must be safe to
    /// drop at any await point so that cancellation can interrupt it.
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError>;

    /// Try to move to the next result set after a `NextResultSet` event.
    ///
    /// Returns the new result set's columns, or `None` when no further result
    /// set exists.
    fn advance_result_set(&mut self) -> Result<Option<Vec<Column>>, SourceError>;

    /// Try to move one row forward in the active result set after a
    /// `NextRow` event. `None` means no row is available right now.
    fn advance_row(&mut self) -> Result<Option<Row>, SourceError>;

    /// Ask the driver to abandon the execution. Best effort.
    async fn cancel(&mut self) {}
}
