//! Worker communication module.
//!
//! The probe never speaks TDS itself. A long-running driver worker process
//! owns the database connection; the probe talks to it over NDJSON on
//! stdin/stdout and consumes streaming executions as [`EventSource`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    sqlprobe (Rust + Tokio)                      │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                    WorkerClient (Async)                   │  │
//! │  │  - Spawns the worker as child process                     │  │
//! │  │  - Request IDs correlate responses and stream frames      │  │
//! │  │  - One bounded frame channel per QueryStream              │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                              │                                   │
//! │               stdin (NDJSON) │ stdout (NDJSON)                  │
//! │                              ▼                                   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              Driver Worker (Long-Running Child Process)         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`EventSource`]: crate::multiplex::EventSource

mod client;
pub mod embedded;
mod error;
pub mod protocol;
mod replay;
mod stream;

pub use client::{WorkerClient, DEFAULT_STREAM_BUFFER};
pub use embedded::{extract_worker, is_embedded_available};
pub use error::{WorkerError, WorkerResult};
pub use replay::{ReplayError, ReplaySource};
pub use stream::QueryStream;
