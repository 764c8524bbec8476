//! Streaming result protocol multiplexer.
//!
//! Turns one execution's interleaved stream of protocol events into a
//! [`Cursor`] plus a trail of diagnostics, draining the stream to its end so
//! the driver never stalls on a full transport buffer.
//!
//! ```text
//!   EventSource ──next_event()──▶ run() ──▶ Cursor (result sets, rows, counts)
//!        ▲                          │
//!        └─advance_result_set()/────┤
//!          advance_row()            └──▶ DiagnosticsSink (notices, statement errors)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sqlprobe::multiplex::{run, MultiplexOptions, TracingSink};
//!
//! let mut stream = client.stream_query("mssql", &conn_str, "SELECT 1").await?;
//! let cursor = run(&mut stream, &TracingSink, &MultiplexOptions::default())
//!     .await
//!     .into_result()?;
//! ```

mod cancel;
mod cursor;
mod error;
mod event;
mod multiplexer;
mod sink;
mod source;

pub use cancel::CancelHandle;
pub use cursor::{Column, Cursor, Diagnostic, ResultSet, Row};
pub use error::{MultiplexError, SourceError};
pub use event::{ErrorOrigin, Event};
pub use multiplexer::{run, MultiplexOptions, MultiplexOutcome, MultiplexStats};
pub use sink::{DiagnosticsSink, RecordingSink, TracingSink};
pub use source::EventSource;
