//! Caller-facing cursor over the result sets of one execution.

use serde::{Deserialize, Serialize};

/// Column description of a result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name or alias.
    pub name: String,
    /// Database-specific type name.
    pub data_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// One row, snapshotted when the multiplexer advanced over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    values: Vec<serde_json::Value>,
}

impl Row {
    pub fn new(values: Vec<serde_json::Value>) -> Self {
        Self { values }
    }

    /// Value at a column position.
    pub fn get(&self, index: usize) -> Option<&serde_json::Value> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[serde_json::Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One ordered sequence of rows produced by a single statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(columns: Vec<Column>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
}

/// Non-fatal message recorded while draining an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Informational server message.
    Notice { message: String },
    /// Server-reported statement error that did not abort the execution.
    StatementError { code: Option<i32>, message: String },
}

impl Diagnostic {
    pub fn message(&self) -> &str {
        match self {
            Diagnostic::Notice { message } | Diagnostic::StatementError { message, .. } => message,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Diagnostic::StatementError { .. })
    }
}

/// Iteration handle over everything one execution produced.
///
/// The multiplexer fills the cursor while it drains the event stream; the
/// caller reads it afterwards. Reading never touches the connection: rows are
/// owned snapshots.
///
/// Reading follows the usual database cursor shape: the cursor starts before
/// the first row of the first result set, [`Cursor::next_row`] moves forward
/// within the active result set and [`Cursor::next_result_set`] moves to the
/// following one.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    result_sets: Vec<ResultSet>,
    rows_affected: u64,
    diagnostics: Vec<Diagnostic>,
    set_index: usize,
    row_index: Option<usize>,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cursor from already materialized result sets.
    pub fn from_result_sets(result_sets: Vec<ResultSet>, rows_affected: u64) -> Self {
        Self {
            result_sets,
            rows_affected,
            ..Self::default()
        }
    }

    // ------------------------------------------------------------------
    // Filling (multiplexer side)
    // ------------------------------------------------------------------

    pub(crate) fn begin_result_set(&mut self, columns: Vec<Column>) {
        self.result_sets.push(ResultSet::new(columns));
    }

    /// Append a row to the active result set, opening an anonymous one if the
    /// source delivered a row before announcing any result set.
    pub(crate) fn push_row(&mut self, row: Row) {
        if self.result_sets.is_empty() {
            self.result_sets.push(ResultSet::default());
        }
        if let Some(active) = self.result_sets.last_mut() {
            active.rows.push(row);
        }
    }

    pub(crate) fn add_rows_affected(&mut self, count: u64) {
        self.rows_affected = self.rows_affected.saturating_add(count);
    }

    pub(crate) fn record(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    // ------------------------------------------------------------------
    // Reading (caller side)
    // ------------------------------------------------------------------

    /// Move to the next row of the active result set.
    ///
    /// Returns `false` once the active result set is exhausted.
    pub fn next_row(&mut self) -> bool {
        let len = match self.result_sets.get(self.set_index) {
            Some(set) => set.rows.len(),
            None => return false,
        };
        let next = self.row_index.map_or(0, |i| i + 1);
        if next < len {
            self.row_index = Some(next);
            true
        } else {
            self.row_index = Some(len);
            false
        }
    }

    /// Move to the next result set. Returns `false` if there is none.
    pub fn next_result_set(&mut self) -> bool {
        if self.set_index + 1 < self.result_sets.len() {
            self.set_index += 1;
            self.row_index = None;
            true
        } else {
            false
        }
    }

    /// Whether the cursor is positioned on a row.
    pub fn has_row(&self) -> bool {
        self.current_row().is_some()
    }

    /// The row the cursor is positioned on.
    pub fn current_row(&self) -> Option<&Row> {
        let set = self.result_sets.get(self.set_index)?;
        set.rows.get(self.row_index?)
    }

    /// Columns of the active result set.
    pub fn columns(&self) -> &[Column] {
        self.result_sets
            .get(self.set_index)
            .map(|set| set.columns.as_slice())
            .unwrap_or(&[])
    }

    /// Rewind to the first row of the first result set.
    pub fn rewind(&mut self) {
        self.set_index = 0;
        self.row_index = None;
    }

    /// Total rows affected by non-`SELECT` statements.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn result_sets(&self) -> &[ResultSet] {
        &self.result_sets
    }

    /// Row count across all result sets.
    pub fn row_count(&self) -> usize {
        self.result_sets.iter().map(|set| set.rows.len()).sum()
    }

    /// All rows of all result sets, in source order.
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.result_sets.iter().flat_map(|set| set.rows.iter())
    }

    /// Notices and non-fatal statement errors, in source order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}
