//! Async client for communicating with the database worker process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};

use super::error::{WorkerError, WorkerResult, WORKER_EXITED};
use super::protocol::{
    methods, ConnectionParams, ErrorInfo, ExecuteQueryParams, ExecuteQueryResponse,
    RequestEnvelope, ResponseEnvelope, StreamEvent, WorkerMessage,
};
use super::stream::{QueryStream, StreamRoutes};
use crate::config::Settings;

/// Default timeout for requests (30 seconds).
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default capacity of a streaming execution's frame buffer.
pub const DEFAULT_STREAM_BUFFER: usize = 64;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>>;

/// Async client for the database worker.
///
/// The client spawns the worker as a child process and communicates via
/// NDJSON (newline-delimited JSON) over stdin/stdout. Each request has a
/// unique ID for correlation with responses, enabling concurrent requests.
/// Streaming executions share the same pipe; their frames are routed to a
/// bounded channel per execution.
///
/// # Example
///
/// ```ignore
/// use sqlprobe::worker::WorkerClient;
///
/// let client = WorkerClient::spawn("./sqlprobe-worker").await?;
/// let mut stream = client.stream_query("mssql", &conn_str, "SELECT 1").await?;
/// ```
pub struct WorkerClient {
    /// Writer for sending requests to worker stdin.
    stdin: Arc<Mutex<BufWriter<ChildStdin>>>,

    /// Map of pending request IDs to response channels.
    pending: PendingMap,

    /// Map of streaming request IDs to frame channels.
    streams: StreamRoutes,

    /// Handle to the worker child process.
    _child: Child,

    /// Handle to the background reader task.
    reader_task: tokio::task::JoinHandle<()>,

    /// Request timeout duration.
    timeout: Duration,

    /// Capacity of each stream's frame buffer.
    stream_buffer: usize,
}

impl WorkerClient {
    /// Spawn a new worker process.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker process cannot be spawned.
    pub async fn spawn<P: AsRef<Path>>(worker_path: P) -> WorkerResult<Self> {
        Self::spawn_with_args_and_timeout(
            worker_path,
            &[],
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
        .await
    }

    /// Spawn a worker using settings configuration.
    ///
    /// This method will:
    /// 1. Use embedded worker if available and configured
    /// 2. Fall back to configured worker path
    /// 3. Search common locations as last resort
    pub async fn spawn_with_settings(settings: &Settings) -> WorkerResult<Self> {
        let worker_path = Self::resolve_worker_path(settings)?;
        let client = Self::spawn_with_args_and_timeout(
            &worker_path,
            &settings.worker.args,
            Duration::from_secs(settings.worker.timeout_secs),
        )
        .await?;
        Ok(client.with_stream_buffer(settings.worker.stream_buffer))
    }

    /// Resolve the worker binary path from settings.
    fn resolve_worker_path(settings: &Settings) -> WorkerResult<PathBuf> {
        // Try embedded worker first if enabled
        if settings.worker.embedded && super::embedded::is_embedded_available() {
            return super::embedded::extract_worker();
        }

        if let Some(path) = settings.worker_path() {
            return Ok(path);
        }

        Err(WorkerError::Spawn(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Worker binary not found. Set worker.path in config, pass --worker, or build with --features embedded-worker",
        )))
    }

    /// Spawn a worker with arguments and custom timeout.
    pub async fn spawn_with_args_and_timeout<P: AsRef<Path>>(
        worker_path: P,
        args: &[String],
        timeout: Duration,
    ) -> WorkerResult<Self> {
        let mut child = Command::new(worker_path.as_ref())
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::Spawn)?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                return Err(WorkerError::Spawn(std::io::Error::other(
                    "worker stdio not captured",
                )))
            }
        };

        let stdin = Arc::new(Mutex::new(BufWriter::new(stdin)));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let streams: StreamRoutes = Arc::new(DashMap::new());

        // Spawn background reader task
        let reader_task = Self::spawn_reader_task(stdout, pending.clone(), streams.clone());

        tracing::debug!(worker = %worker_path.as_ref().display(), "worker spawned");

        Ok(Self {
            stdin,
            pending,
            streams,
            _child: child,
            reader_task,
            timeout,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        })
    }

    /// Set the capacity of each stream's frame buffer.
    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity.max(1);
        self
    }

    /// Spawn the background task that reads responses from the worker.
    fn spawn_reader_task(
        stdout: ChildStdout,
        pending: PendingMap,
        streams: StreamRoutes,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        // EOF - worker exited
                        break;
                    }
                    Ok(_) => match serde_json::from_str::<WorkerMessage>(&line) {
                        Ok(WorkerMessage::Frame(frame)) => {
                            let route = streams.get(&frame.id).map(|tx| tx.value().clone());
                            if let Some(tx) = route {
                                // Blocks while the consumer is not draining.
                                if tx.send(frame.event).await.is_err() {
                                    streams.remove(&frame.id);
                                }
                            }
                        }
                        Ok(WorkerMessage::Response(resp)) => {
                            Self::route_response(resp, &pending, &streams).await;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "worker: failed to parse message");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "worker: read error");
                        break;
                    }
                }
            }

            tracing::debug!("worker output closed");

            // Worker exited - notify all pending requests with error responses
            let mut pending = pending.lock().await;
            for (id, tx) in pending.drain() {
                let error_response = ResponseEnvelope {
                    id,
                    success: false,
                    result: None,
                    error: Some(ErrorInfo {
                        code: WORKER_EXITED.to_string(),
                        message: "Worker process exited unexpectedly".to_string(),
                    }),
                };
                let _ = tx.send(error_response);
            }

            // Open streams get a transport error if there is room; either way
            // dropping the senders ends them with a closed channel.
            for route in streams.iter() {
                let _ = route
                    .value()
                    .try_send(StreamEvent::transport_error("worker process exited"));
            }
            streams.clear();
        })
    }

    async fn route_response(resp: ResponseEnvelope, pending: &PendingMap, streams: &StreamRoutes) {
        if let Some(tx) = pending.lock().await.remove(&resp.id) {
            let _ = tx.send(resp);
            return;
        }
        if resp.success {
            return;
        }
        // A streaming request the worker refused before producing frames.
        if let Some((_, tx)) = streams.remove(&resp.id) {
            let message = resp
                .error
                .map(|e| format!("{} ({})", e.message, e.code))
                .unwrap_or_else(|| "worker rejected the stream".to_string());
            let _ = tx.send(StreamEvent::transport_error(message)).await;
        }
    }

    /// Send a request and wait for its single response, bounded by the
    /// client timeout. Error responses are mapped by `WorkerError::from_response`.
    pub async fn request<P, R>(&self, method: &str, params: P) -> WorkerResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let request = envelope(method, params)?;
        let id = request.id.clone();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if let Err(err) = write_request(&self.stdin, &request).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        // Wait for response with timeout
        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(resp) => resp?,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(WorkerError::Timeout(self.timeout));
            }
        };

        // Process response
        if response.success {
            let result = response.result.unwrap_or(serde_json::Value::Null);
            serde_json::from_value(result).map_err(WorkerError::Decode)
        } else {
            let error = response.error.unwrap_or_else(|| ErrorInfo {
                code: "UNKNOWN".to_string(),
                message: "Unknown error".to_string(),
            });
            Err(WorkerError::from_response(&error.code, &error.message))
        }
    }

    /// Start a streaming request. Frames for it are delivered to the returned
    /// stream until the worker sends `done`.
    pub async fn stream<P: Serialize>(&self, method: &str, params: P) -> WorkerResult<QueryStream> {
        let request = envelope(method, params)?;
        let id = request.id.clone();

        // Route before sending so no early frame is lost.
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        self.streams.insert(id.clone(), tx);

        if let Err(err) = write_request(&self.stdin, &request).await {
            self.streams.remove(&id);
            return Err(err);
        }

        Ok(QueryStream::new(
            id,
            rx,
            self.streams.clone(),
            self.stdin.clone(),
        ))
    }

    /// Check if the worker is still running.
    ///
    /// Returns `true` if the worker process appears to be running,
    /// `false` if the reader task has finished (indicating worker exit).
    pub fn is_alive(&self) -> bool {
        !self.reader_task.is_finished()
    }
}

// Convenience methods for query execution
impl WorkerClient {
    /// Execute a SQL query and collect the whole result.
    pub async fn execute_query(
        &self,
        driver: &str,
        connection_string: &str,
        sql: &str,
    ) -> WorkerResult<ExecuteQueryResponse> {
        self.request(
            methods::EXECUTE_QUERY,
            query_params(driver, connection_string, sql, false),
        )
        .await
    }

    /// Execute a SQL query inside a transaction and collect the whole result.
    pub async fn execute_in_transaction(
        &self,
        driver: &str,
        connection_string: &str,
        sql: &str,
    ) -> WorkerResult<ExecuteQueryResponse> {
        self.request(
            methods::EXECUTE_QUERY,
            query_params(driver, connection_string, sql, true),
        )
        .await
    }

    /// Start a SQL query whose events are streamed back as they happen.
    pub async fn stream_query(
        &self,
        driver: &str,
        connection_string: &str,
        sql: &str,
    ) -> WorkerResult<QueryStream> {
        self.stream(
            methods::STREAM_QUERY,
            query_params(driver, connection_string, sql, false),
        )
        .await
    }
}

fn query_params(
    driver: &str,
    connection_string: &str,
    sql: &str,
    transaction: bool,
) -> ExecuteQueryParams {
    ExecuteQueryParams {
        connection: ConnectionParams {
            driver: driver.to_string(),
            connection_string: connection_string.to_string(),
        },
        sql: sql.to_string(),
        args: None,
        transaction,
    }
}

/// Wrap `params` in an envelope with a fresh request ID.
pub(crate) fn envelope<P: Serialize>(method: &str, params: P) -> WorkerResult<RequestEnvelope> {
    Ok(RequestEnvelope {
        id: uuid::Uuid::new_v4().to_string(),
        method: method.to_string(),
        params: serde_json::to_value(params).map_err(WorkerError::Encode)?,
    })
}

/// Write one request line to the worker.
pub(crate) async fn write_request(
    stdin: &Mutex<BufWriter<ChildStdin>>,
    request: &RequestEnvelope,
) -> WorkerResult<()> {
    let line = serde_json::to_string(request).map_err(WorkerError::Encode)? + "\n";
    let mut stdin = stdin.lock().await;
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(WorkerError::Write)?;
    stdin.flush().await.map_err(WorkerError::Write)
}
