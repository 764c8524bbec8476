//! Protocol types for worker communication.
//!
//! Every line on the worker's stdin/stdout is one JSON document. Requests and
//! their single response are correlated by `id`. Streaming executions
//! (`query.stream`) answer with any number of [`StreamFrame`]s carrying the
//! same `id`, terminated by a `done` event.

use serde::{Deserialize, Serialize};

use crate::multiplex::{Column, ErrorOrigin};

// ============================================================================
// Request/Response Envelope
// ============================================================================

/// Request envelope sent to the worker.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation.
    pub id: String,
    /// Method name (e.g., "query.stream").
    pub method: String,
    /// Method-specific parameters.
    pub params: serde_json::Value,
}

/// Response envelope received from the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to.
    pub id: String,
    /// Whether the request succeeded.
    pub success: bool,
    /// Result data (present if success = true).
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error information (present if success = false).
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

/// Error information in a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    /// Error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// One event of a streaming execution.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamFrame {
    /// ID of the `query.stream` request this frame belongs to.
    pub id: String,
    pub event: StreamEvent,
}

/// Anything the worker can write on a line.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    Frame(StreamFrame),
    Response(ResponseEnvelope),
}

// ============================================================================
// Connection Parameters (included in all requests)
// ============================================================================

/// Database connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Database driver name (e.g., "mssql").
    pub driver: String,
    /// Driver-specific connection string.
    pub connection_string: String,
}

// ============================================================================
// Query Execution Parameters
// ============================================================================

/// Parameters for `query.execute` and `query.stream`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteQueryParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    /// SQL query to execute.
    pub sql: String,
    /// Query parameters (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<serde_json::Value>>,
    /// Run inside a transaction that is committed once rows are read.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub transaction: bool,
}

/// Parameters for `query.cancel`.
#[derive(Debug, Clone, Serialize)]
pub struct CancelQueryParams {
    /// ID of the `query.stream` request to abandon.
    pub query_id: String,
}

// ============================================================================
// Query Execution Response Types
// ============================================================================

/// Response from `query.execute`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteQueryResponse {
    /// Result column descriptions.
    pub columns: Vec<Column>,
    /// Result data rows.
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Number of rows returned.
    pub row_count: i32,
    /// Rows affected (for INSERT/UPDATE/DELETE).
    #[serde(default)]
    pub rows_affected: Option<i64>,
}

// ============================================================================
// Stream Events
// ============================================================================

/// Wire form of one execution event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Notice {
        message: String,
    },
    Error {
        origin: ErrorOrigin,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        message: String,
    },
    RowsAffected {
        count: u64,
    },
    /// `columns` is absent when the driver found no further result set.
    NextResultSet {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        columns: Option<Vec<Column>>,
    },
    /// `values` is absent when the row signal carried no row.
    NextRow {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        values: Option<Vec<serde_json::Value>>,
    },
    Done,
}

impl StreamEvent {
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self::Error {
            origin: ErrorOrigin::Transport,
            code: None,
            message: message.into(),
        }
    }
}

// ============================================================================
// Method Names
// ============================================================================

/// Worker method names.
pub mod methods {
    pub const EXECUTE_QUERY: &str = "query.execute";
    pub const STREAM_QUERY: &str = "query.stream";
    pub const CANCEL_QUERY: &str = "query.cancel";
}
