//! Streaming executions: the worker side of [`EventSource`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::BufWriter;
use tokio::process::ChildStdin;
use tokio::sync::{mpsc, Mutex};

use super::client::{envelope, write_request};
use super::protocol::{methods, CancelQueryParams, StreamEvent};
use crate::multiplex::{Column, Event, EventSource, Row, SourceError};

/// Routing table from stream request IDs to their frame channels.
pub(crate) type StreamRoutes = Arc<DashMap<String, mpsc::Sender<StreamEvent>>>;

/// Payload of the last result-set or row signal, held until the consumer
/// advances over it.
#[derive(Debug, Default)]
pub(crate) struct Staging {
    result_set: Option<Vec<Column>>,
    row: Option<Row>,
}

impl Staging {
    /// Split a wire event into the event the multiplexer sees and the payload
    /// the following `advance_*` call returns. `None` marks the end of the stream.
    pub(crate) fn stage(&mut self, event: StreamEvent) -> Option<Event> {
        let event = match event {
            StreamEvent::Notice { message } => Event::Notice { message },
            StreamEvent::Error {
                origin,
                code,
                message,
            } => Event::Error {
                origin,
                code,
                message,
            },
            StreamEvent::RowsAffected { count } => Event::RowsAffected { count },
            StreamEvent::NextResultSet { columns } => {
                self.result_set = columns;
                Event::NextResultSet
            }
            StreamEvent::NextRow { values } => {
                self.row = values.map(Row::new);
                Event::NextRow
            }
            StreamEvent::Done => return None,
        };
        Some(event)
    }

    pub(crate) fn take_result_set(&mut self) -> Option<Vec<Column>> {
        self.result_set.take()
    }

    pub(crate) fn take_row(&mut self) -> Option<Row> {
        self.row.take()
    }
}

/// One in-flight `query.stream` execution.
///
/// Frames arrive through a bounded channel filled by the client's reader
/// task. When this stream stops being drained the channel fills up, the
/// reader task blocks, and the worker blocks writing to its stdout; draining
/// to the `done` event is what keeps the pipe moving.
pub struct QueryStream {
    id: String,
    frames: mpsc::Receiver<StreamEvent>,
    staging: Staging,
    finished: bool,
    routes: StreamRoutes,
    stdin: Arc<Mutex<BufWriter<ChildStdin>>>,
}

impl QueryStream {
    pub(crate) fn new(
        id: String,
        frames: mpsc::Receiver<StreamEvent>,
        routes: StreamRoutes,
        stdin: Arc<Mutex<BufWriter<ChildStdin>>>,
    ) -> Self {
        Self {
            id,
            frames,
            staging: Staging::default(),
            finished: false,
            routes,
            stdin,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.routes.remove(&self.id);
    }
}

#[async_trait]
impl EventSource for QueryStream {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        if self.finished {
            return Ok(None);
        }
        match self.frames.recv().await {
            Some(frame) => match self.staging.stage(frame) {
                Some(event) => Ok(Some(event)),
                None => {
                    self.finish();
                    Ok(None)
                }
            },
            None => {
                self.finish();
                Err(SourceError::Transport(
                    "worker stream closed before the execution finished".to_string(),
                ))
            }
        }
    }

    fn advance_result_set(&mut self) -> Result<Option<Vec<Column>>, SourceError> {
        Ok(self.staging.take_result_set())
    }

    fn advance_row(&mut self) -> Result<Option<Row>, SourceError> {
        Ok(self.staging.take_row())
    }

    async fn cancel(&mut self) {
        if self.finished {
            return;
        }
        self.finish();

        let params = CancelQueryParams {
            query_id: self.id.clone(),
        };
        let sent = match envelope(methods::CANCEL_QUERY, params) {
            Ok(request) => write_request(&self.stdin, &request).await,
            Err(err) => Err(err),
        };
        if let Err(err) = sent {
            tracing::warn!(query_id = %self.id, error = %err, "failed to send cancel request");
        }
    }
}

impl Drop for QueryStream {
    fn drop(&mut self) {
        self.routes.remove(&self.id);
    }
}
