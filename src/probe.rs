//! Query strategies and the caller-facing `execute` entry point.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ConnectionConfig, ConnectionError};
use crate::multiplex::{
    self, Column, Cursor, DiagnosticsSink, MultiplexError, MultiplexOptions, ResultSet, Row,
};
use crate::worker::protocol::ExecuteQueryResponse;
use crate::worker::{WorkerClient, WorkerError};

/// Plan-cache diagnostic query the probe runs when none is given.
///
/// `TOP 50` together with `ORDER BY` over this many columns is the shape that
/// used to leave naive consumers hanging.
pub const DEFAULT_QUERY: &str = r#"SELECT TOP 50 'Top 50 queries' AS Description,
       a.*,
       SUBSTRING(SqlText, (qs.statement_start_offset/2)+1,
           ((CASE qs.statement_end_offset
                WHEN -1 THEN DATALENGTH(SqlText)
                ELSE qs.statement_end_offset
             END - qs.statement_start_offset)/2) + 1) AS statement,
       qs.*,
       queryplan.query_plan AS query_plan_ext_xml
FROM (SELECT DB_NAME(dbid) AS [Database],
             plan_handle,
             UseCounts,
             RefCounts,
             size_in_bytes,
             Cacheobjtype,
             Objtype,
             st.text AS SqlText
      FROM sys.dm_exec_cached_plans cp
           CROSS APPLY sys.dm_exec_sql_text(plan_handle) st
      WHERE (LEFT(TEXT,300) LIKE '%SOME_MATCHING_TEXT%')) a
     CROSS APPLY sys.dm_exec_query_plan(a.plan_handle) queryplan
     INNER JOIN sys.dm_exec_query_stats qs ON qs.plan_handle = a.plan_handle
WHERE queryplan.query_plan IS NOT NULL
  AND DATEDIFF(hour, qs.last_execution_time, GETDATE()) < 12
ORDER BY qs.total_elapsed_time DESC"#;

/// How the query is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Plain execution, whole result collected by the worker.
    Straight,
    /// Execution inside a transaction committed after the rows are read.
    Transaction,
    /// Streamed execution drained by the multiplexer.
    #[default]
    MessageLoop,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Straight => "straight",
            Strategy::Transaction => "transaction",
            Strategy::MessageLoop => "message-loop",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "straight" | "plain" => Ok(Strategy::Straight),
            "transaction" | "tx" => Ok(Strategy::Transaction),
            "message-loop" | "message_loop" | "messageloop" | "stream" => {
                Ok(Strategy::MessageLoop)
            }
            other => Err(format!(
                "unknown strategy '{other}' (expected straight, transaction or message-loop)"
            )),
        }
    }
}

/// Options for one probe execution.
#[derive(Debug, Clone, Default)]
pub struct ProbeOptions {
    pub strategy: Strategy,
    /// Only honored by [`Strategy::MessageLoop`].
    pub multiplex: MultiplexOptions,
}

/// Everything that can stop a probe execution.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Invalid connection parameters, raised before anything is sent.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConnectionError),

    /// The worker could not run the request.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// The consumption loop hit a fatal condition.
    #[error(transparent)]
    Multiplex(#[from] MultiplexError),
}

impl ProbeError {
    /// Whether the error came from cancellation or a deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ProbeError::Multiplex(err) if err.is_cancellation())
    }
}

/// Run `query` against `connection` with the configured strategy.
///
/// Connection parameters are validated before the worker is contacted. For
/// the message-loop strategy the event stream is drained to its end before
/// this returns; partial results of a failed stream are discarded here (use
/// [`multiplex::run`] directly to keep them).
pub async fn execute(
    client: &WorkerClient,
    connection: &ConnectionConfig,
    query: &str,
    options: &ProbeOptions,
    sink: &dyn DiagnosticsSink,
) -> Result<Cursor, ProbeError> {
    connection.validate()?;
    let driver = connection.driver_name();
    let connection_string = connection.to_connection_string();

    tracing::debug!(strategy = %options.strategy, "executing query");

    match options.strategy {
        Strategy::Straight => {
            let response = client
                .execute_query(driver, &connection_string, query)
                .await?;
            Ok(cursor_from_response(response))
        }
        Strategy::Transaction => {
            let response = client
                .execute_in_transaction(driver, &connection_string, query)
                .await?;
            Ok(cursor_from_response(response))
        }
        Strategy::MessageLoop => {
            let mut stream = client
                .stream_query(driver, &connection_string, query)
                .await?;
            let outcome = multiplex::run(&mut stream, sink, &options.multiplex).await;
            tracing::debug!(
                events = outcome.stats.events_pulled,
                result_sets = outcome.stats.result_sets,
                rows = outcome.stats.rows,
                "message loop finished"
            );
            Ok(outcome.into_result()?)
        }
    }
}

/// Convert a collected worker result into a single-result-set cursor.
pub fn cursor_from_response(response: ExecuteQueryResponse) -> Cursor {
    let ExecuteQueryResponse {
        columns,
        rows,
        rows_affected,
        ..
    } = response;

    let result_sets = if columns.is_empty() && rows.is_empty() {
        Vec::new()
    } else {
        vec![result_set(columns, rows)]
    };
    let rows_affected = rows_affected.map_or(0, |n| u64::try_from(n).unwrap_or(0));
    Cursor::from_result_sets(result_sets, rows_affected)
}

fn result_set(columns: Vec<Column>, rows: Vec<Vec<serde_json::Value>>) -> ResultSet {
    ResultSet::with_rows(columns, rows.into_iter().map(Row::new).collect())
}
