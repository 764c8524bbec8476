//! Integration tests for the consumption loop.
//!
//! A scripted source plays back a fixed sequence of events and counts how
//! often it was pulled, so the tests can tell whether the loop drained the
//! stream or stopped early.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::json;
use sqlprobe::multiplex::{
    run, Column, Diagnostic, ErrorOrigin, Event, EventSource, MultiplexError, MultiplexOptions,
    RecordingSink, Row, SourceError,
};
use tracing::Level;

// ============================================================================
// Scripted Source
// ============================================================================

/// One scripted pull.
enum Step {
    Event(Event),
    Fail(SourceError),
}

#[derive(Default)]
struct ScriptedSource {
    steps: VecDeque<Step>,
    result_sets: VecDeque<Option<Vec<Column>>>,
    rows: VecDeque<Option<Row>>,
    pulls: usize,
}

impl ScriptedSource {
    fn new() -> Self {
        Self::default()
    }

    fn event(mut self, event: Event) -> Self {
        self.steps.push_back(Step::Event(event));
        self
    }

    fn fail(mut self, err: SourceError) -> Self {
        self.steps.push_back(Step::Fail(err));
        self
    }

    /// `NextResultSet` that finds a set with these columns.
    fn result_set(mut self, columns: &[&str]) -> Self {
        self.result_sets.push_back(Some(
            columns.iter().map(|name| Column::new(*name, "INT")).collect(),
        ));
        self.event(Event::NextResultSet)
    }

    /// `NextResultSet` that finds nothing.
    fn no_result_set(mut self) -> Self {
        self.result_sets.push_back(None);
        self.event(Event::NextResultSet)
    }

    fn row(mut self, n: i64) -> Self {
        self.rows.push_back(Some(Row::new(vec![json!(n)])));
        self.event(Event::NextRow)
    }

    /// `NextRow` that finds no row.
    fn empty_row(mut self) -> Self {
        self.rows.push_back(None);
        self.event(Event::NextRow)
    }

    fn remaining(&self) -> usize {
        self.steps.len()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        self.pulls += 1;
        match self.steps.pop_front() {
            Some(Step::Event(event)) => Ok(Some(event)),
            Some(Step::Fail(err)) => Err(err),
            None => Ok(None),
        }
    }

    fn advance_result_set(&mut self) -> Result<Option<Vec<Column>>, SourceError> {
        Ok(self.result_sets.pop_front().flatten())
    }

    fn advance_row(&mut self) -> Result<Option<Row>, SourceError> {
        Ok(self.rows.pop_front().flatten())
    }
}

fn notice(message: &str) -> Event {
    Event::Notice {
        message: message.to_string(),
    }
}

fn server_error(code: i32, message: &str) -> Event {
    Event::Error {
        origin: ErrorOrigin::Server,
        code: Some(code),
        message: message.to_string(),
    }
}

fn transport_error(message: &str) -> Event {
    Event::Error {
        origin: ErrorOrigin::Transport,
        code: None,
        message: message.to_string(),
    }
}

fn values(cursor: &sqlprobe::Cursor) -> Vec<serde_json::Value> {
    cursor.rows().map(|row| row.values()[0].clone()).collect()
}

// ============================================================================
// Draining
// ============================================================================

#[tokio::test]
async fn test_single_result_set_is_drained_to_the_end() {
    let mut source = ScriptedSource::new()
        .event(notice("Changed database context to 'master'."))
        .result_set(&["n"])
        .row(1)
        .row(2)
        .event(Event::RowsAffected { count: 2 })
        .no_result_set();
    let sink = RecordingSink::new();

    let outcome = run(&mut source, &sink, &MultiplexOptions::default()).await;

    assert!(outcome.is_ok(), "unexpected error: {:?}", outcome.error);
    // Six events plus the end of the stream.
    assert_eq!(source.pulls, 7);
    assert_eq!(outcome.stats.events_pulled, 7);
    assert_eq!(outcome.cursor.row_count(), 2);
    assert_eq!(values(&outcome.cursor), [json!(1), json!(2)]);
    assert_eq!(outcome.cursor.rows_affected(), 2);
    assert_eq!(
        sink.messages_at(Level::INFO)[0],
        "Changed database context to 'master'."
    );
}

#[tokio::test]
async fn test_notice_rows_and_empty_signals_pull_seven_events() {
    let mut source = ScriptedSource::new()
        .event(notice("ok"))
        .result_set(&["n"])
        .row(1)
        .row(2)
        .empty_row()
        .no_result_set();

    let outcome = run(&mut source, &RecordingSink::new(), &MultiplexOptions::default()).await;

    assert!(outcome.error.is_none());
    assert_eq!(outcome.cursor.row_count(), 2);
    assert_eq!(source.pulls, 7);
}

#[tokio::test]
async fn test_empty_next_result_set_does_not_stop_the_loop() {
    let mut source = ScriptedSource::new()
        .result_set(&["a"])
        .row(1)
        .no_result_set()
        .event(notice("late notice"))
        .event(Event::RowsAffected { count: 3 });

    let outcome = run(&mut source, &RecordingSink::new(), &MultiplexOptions::default()).await;

    assert!(outcome.is_ok());
    assert_eq!(source.remaining(), 0);
    assert_eq!(outcome.cursor.rows_affected(), 3);
    assert_eq!(outcome.cursor.diagnostics().len(), 1);
}

#[tokio::test]
async fn test_rows_arrive_in_source_order() {
    let mut source = ScriptedSource::new().result_set(&["n"]);
    for n in 0..100 {
        source = source.row(n);
    }

    let outcome = run(&mut source, &RecordingSink::new(), &MultiplexOptions::default()).await;

    let expected: Vec<_> = (0..100).map(|n| json!(n)).collect();
    assert_eq!(values(&outcome.cursor), expected);
    assert_eq!(outcome.stats.rows, 100);
}

#[tokio::test]
async fn test_multiple_result_sets() {
    let mut source = ScriptedSource::new()
        .result_set(&["a"])
        .row(1)
        .result_set(&["b", "c"])
        .row(2)
        .row(3)
        .no_result_set();

    let outcome = run(&mut source, &RecordingSink::new(), &MultiplexOptions::default()).await;
    let mut cursor = outcome.cursor;

    assert_eq!(outcome.stats.result_sets, 2);
    assert_eq!(cursor.columns()[0].name, "a");
    assert!(cursor.next_row());
    assert!(!cursor.next_row());
    assert!(cursor.next_result_set());
    assert_eq!(cursor.columns().len(), 2);
    assert!(cursor.next_row());
    assert!(cursor.next_row());
    assert_eq!(cursor.current_row().unwrap().get(0), Some(&json!(3)));
    assert!(!cursor.next_result_set());
}

#[tokio::test]
async fn test_row_signal_without_row_is_skipped() {
    let mut source = ScriptedSource::new()
        .result_set(&["n"])
        .row(1)
        .empty_row()
        .row(2);

    let outcome = run(&mut source, &RecordingSink::new(), &MultiplexOptions::default()).await;

    assert!(outcome.is_ok());
    assert_eq!(values(&outcome.cursor), [json!(1), json!(2)]);
}

// ============================================================================
// Diagnostics
// ============================================================================

#[tokio::test]
async fn test_statement_error_is_logged_and_execution_continues() {
    let mut source = ScriptedSource::new()
        .event(server_error(2627, "Violation of PRIMARY KEY constraint"))
        .event(Event::RowsAffected { count: 5 });
    let sink = RecordingSink::new();

    let outcome = run(&mut source, &sink, &MultiplexOptions::default()).await;

    assert!(outcome.is_ok());
    assert_eq!(outcome.cursor.rows_affected(), 5);
    assert_eq!(outcome.stats.statement_errors, 1);
    assert_eq!(
        outcome.cursor.diagnostics(),
        [Diagnostic::StatementError {
            code: Some(2627),
            message: "Violation of PRIMARY KEY constraint".to_string(),
        }]
    );
    insta::assert_debug_snapshot!(sink.messages_at(Level::INFO), @r#"
    [
        "statement error 2627: Violation of PRIMARY KEY constraint",
        "5 rows affected",
    ]
    "#);
}

#[tokio::test]
async fn test_strict_mode_reports_first_statement_error() {
    let mut source = ScriptedSource::new()
        .result_set(&["n"])
        .row(1)
        .event(server_error(208, "Invalid object name 'nope'."))
        .row(2);

    let outcome = run(
        &mut source,
        &RecordingSink::new(),
        &MultiplexOptions::default().strict(true),
    )
    .await;

    assert_eq!(
        outcome.error,
        Some(MultiplexError::Statement {
            code: Some(208),
            message: "Invalid object name 'nope'.".to_string(),
        })
    );
    assert_eq!(outcome.cursor.row_count(), 1);
    assert_eq!(source.remaining(), 1);
}

#[tokio::test]
async fn test_notices_go_to_sink_in_order() {
    let mut source = ScriptedSource::new()
        .event(notice("one"))
        .event(notice("two"))
        .event(notice("three"));
    let sink = RecordingSink::new();

    let outcome = run(&mut source, &sink, &MultiplexOptions::default()).await;

    assert_eq!(sink.messages_at(Level::INFO), ["one", "two", "three"]);
    assert_eq!(outcome.stats.notices, 3);
    assert!(outcome.cursor.diagnostics().iter().all(|d| !d.is_error()));
}

// ============================================================================
// Fatal Errors
// ============================================================================

#[tokio::test]
async fn test_transport_error_stops_immediately() {
    let mut source = ScriptedSource::new()
        .event(transport_error("connection reset by peer"))
        .result_set(&["n"])
        .row(1);

    let outcome = run(&mut source, &RecordingSink::new(), &MultiplexOptions::default()).await;

    assert_eq!(
        outcome.error,
        Some(MultiplexError::transport("connection reset by peer"))
    );
    assert_eq!(outcome.cursor.row_count(), 0);
    assert_eq!(source.pulls, 1);
    assert_eq!(source.remaining(), 2);
}

#[tokio::test]
async fn test_partial_results_survive_a_fatal_error() {
    let mut source = ScriptedSource::new()
        .result_set(&["n"])
        .row(1)
        .row(2)
        .fail(SourceError::Transport("socket closed".to_string()))
        .row(3);

    let outcome = run(&mut source, &RecordingSink::new(), &MultiplexOptions::default()).await;

    assert!(!outcome.is_ok());
    assert_eq!(values(&outcome.cursor), [json!(1), json!(2)]);
    assert_eq!(source.remaining(), 1);

    let err = outcome.into_result().unwrap_err();
    assert_eq!(err.to_string(), "transport error: transport failure: socket closed");
}

#[tokio::test]
async fn test_end_of_stream_is_sticky() {
    let mut source = ScriptedSource::new();
    let first = run(&mut source, &RecordingSink::new(), &MultiplexOptions::default()).await;
    let second = run(&mut source, &RecordingSink::new(), &MultiplexOptions::default()).await;

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(source.pulls, 2);
}
