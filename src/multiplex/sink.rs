//! Diagnostics sinks: where notices and non-fatal errors are reported.

use std::sync::Mutex;

use tracing::Level;

/// Receives `(level, message)` pairs while an execution is drained.
///
/// Sinks cannot fail the loop: `emit` has no return value and implementations
/// swallow their own errors.
pub trait DiagnosticsSink: Send + Sync {
    fn emit(&self, level: Level, message: &str);
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn emit(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "sqlprobe::server", "{message}"),
            Level::WARN => tracing::warn!(target: "sqlprobe::server", "{message}"),
            Level::INFO => tracing::info!(target: "sqlprobe::server", "{message}"),
            Level::DEBUG => tracing::debug!(target: "sqlprobe::server", "{message}"),
            _ => tracing::trace!(target: "sqlprobe::server", "{message}"),
        }
    }
}

/// Keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<(Level, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Messages emitted at exactly `level`.
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }
}

impl DiagnosticsSink for RecordingSink {
    fn emit(&self, level: Level, message: &str) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push((level, message.to_string()));
    }
}
