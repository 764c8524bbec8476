//! # sqlprobe
//!
//! Diagnostic probe for SQL Server: open one connection, run one query, and
//! log everything the server sends back.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │             CLI (flags, settings file, logging)          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [probe::execute]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Strategy: straight | transaction | message-loop        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [multiplex::run]  (message-loop)
//! ┌─────────────────────────────────────────────────────────┐
//! │   Multiplexer: drains notices, errors, row counts,       │
//! │   result-set and row signals into a Cursor               │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [worker::QueryStream]
//! ┌─────────────────────────────────────────────────────────┐
//! │          Driver worker process (NDJSON over stdio)       │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod logging;
pub mod multiplex;
pub mod probe;
pub mod worker;

pub use multiplex::{Cursor, Event, EventSource, MultiplexError, MultiplexOptions};
pub use probe::{execute, ProbeError, ProbeOptions, Strategy};
