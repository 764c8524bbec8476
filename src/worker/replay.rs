//! Replay of a captured event stream.
//!
//! A capture is NDJSON: one [`StreamEvent`] per line, either bare
//! (`{"type":"notice","message":"ok"}`) or as a full worker frame
//! (`{"id":"...","event":{...}}`). Replaying a capture through the
//! multiplexer reproduces a problematic execution without a database.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::protocol::{StreamEvent, StreamFrame};
use super::stream::Staging;
use crate::multiplex::{Column, Event, EventSource, Row, SourceError};

/// Error loading a capture.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to read capture: {0}")]
    Read(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CaptureLine {
    Frame(StreamFrame),
    Bare(StreamEvent),
}

/// [`EventSource`] over a recorded sequence of stream events.
#[derive(Debug)]
pub struct ReplaySource {
    events: VecDeque<StreamEvent>,
    staging: Staging,
    finished: bool,
    pulled: usize,
}

impl ReplaySource {
    pub fn new(events: impl IntoIterator<Item = StreamEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
            staging: Staging::default(),
            finished: false,
            pulled: 0,
        }
    }

    /// Parse an NDJSON capture. Blank lines are skipped.
    pub fn parse(capture: &str) -> Result<Self, ReplayError> {
        let mut events = Vec::new();
        for (index, line) in capture.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed: CaptureLine =
                serde_json::from_str(line).map_err(|source| ReplayError::Parse {
                    line: index + 1,
                    source,
                })?;
            events.push(match parsed {
                CaptureLine::Frame(frame) => frame.event,
                CaptureLine::Bare(event) => event,
            });
        }
        Ok(Self::new(events))
    }

    /// Load an NDJSON capture from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ReplayError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Number of events handed out so far.
    pub fn pulled(&self) -> usize {
        self.pulled
    }

    /// Events not yet pulled.
    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl EventSource for ReplaySource {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        if self.finished {
            return Ok(None);
        }
        let Some(frame) = self.events.pop_front() else {
            self.finished = true;
            return Err(SourceError::Transport(
                "capture ended before the execution finished".to_string(),
            ));
        };
        self.pulled += 1;
        match self.staging.stage(frame) {
            Some(event) => Ok(Some(event)),
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    fn advance_result_set(&mut self) -> Result<Option<Vec<Column>>, SourceError> {
        Ok(self.staging.take_result_set())
    }

    fn advance_row(&mut self) -> Result<Option<Row>, SourceError> {
        Ok(self.staging.take_row())
    }
}
