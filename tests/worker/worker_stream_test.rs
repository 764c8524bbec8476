//! Integration tests against a scripted worker process.
//!
//! The fake worker is a shell script speaking the NDJSON protocol: it reads
//! one request line, pulls the request id out of it and prints canned
//! responses or stream frames for that id.
#![cfg(unix)]

use std::time::Duration;

use serde_json::json;
use sqlprobe::config::ConnectionConfig;
use sqlprobe::multiplex::{CancelHandle, MultiplexError, MultiplexOptions, RecordingSink};
use sqlprobe::probe::{self, ProbeError, ProbeOptions, Strategy};
use sqlprobe::worker::{WorkerClient, WorkerError};

/// Reads the first request and stores its id in `$id`.
const READ_REQUEST: &str = r#"read -r line
id=$(printf '%s\n' "$line" | sed -n 's/^{"id":"\([^"]*\)".*/\1/p')
"#;

/// Keeps the worker alive until the client closes stdin.
const IDLE: &str = "cat >/dev/null\n";

const TEST_BOUND: Duration = Duration::from_secs(20);

async fn fake_worker(body: &str, stream_buffer: usize) -> WorkerClient {
    let script = format!("{READ_REQUEST}{body}");
    WorkerClient::spawn_with_args_and_timeout(
        "sh",
        &["-c".to_string(), script],
        Duration::from_secs(10),
    )
    .await
    .expect("failed to spawn fake worker")
    .with_stream_buffer(stream_buffer)
}

fn connection() -> ConnectionConfig {
    ConnectionConfig::mssql("localhost", 1433, "sa", "secret")
}

fn options(strategy: Strategy) -> ProbeOptions {
    ProbeOptions {
        strategy,
        multiplex: MultiplexOptions::default(),
    }
}

/// Frames for one result set of `rows` integer rows, without `done`.
fn result_set_frames(rows: usize) -> String {
    format!(
        r#"printf '{{"id":"%s","event":{{"type":"next_result_set","columns":[{{"name":"n","data_type":"INT"}}]}}}}\n' "$id"
i=0
while [ $i -lt {rows} ]; do
  printf '{{"id":"%s","event":{{"type":"next_row","values":[%d]}}}}\n' "$id" "$i"
  i=$((i+1))
done
"#
    )
}

const TRAILER: &str = r#"printf '{"id":"%s","event":{"type":"rows_affected","count":0}}\n' "$id"
printf '{"id":"%s","event":{"type":"next_result_set"}}\n' "$id"
printf '{"id":"%s","event":{"type":"done"}}\n' "$id"
"#;

// ============================================================================
// Message Loop
// ============================================================================

#[tokio::test]
async fn test_stream_larger_than_buffer_is_drained() {
    let body = format!("{}{TRAILER}{IDLE}", result_set_frames(200));
    let client = fake_worker(&body, 8).await;

    let cursor = tokio::time::timeout(
        TEST_BOUND,
        probe::execute(
            &client,
            &connection(),
            "SELECT n FROM numbers ORDER BY n DESC",
            &options(Strategy::MessageLoop),
            &RecordingSink::new(),
        ),
    )
    .await
    .expect("message loop did not finish")
    .unwrap();

    assert_eq!(cursor.row_count(), 200);
    let values: Vec<_> = cursor.rows().map(|row| row.values()[0].clone()).collect();
    let expected: Vec<_> = (0..200).map(|n| json!(n)).collect();
    assert_eq!(values, expected);
    assert!(client.is_alive());
}

#[tokio::test]
async fn test_worker_exit_mid_stream_is_a_transport_error() {
    let body = result_set_frames(1);
    let client = fake_worker(&body, 8).await;

    let err = tokio::time::timeout(
        TEST_BOUND,
        probe::execute(
            &client,
            &connection(),
            "SELECT 1",
            &options(Strategy::MessageLoop),
            &RecordingSink::new(),
        ),
    )
    .await
    .expect("message loop did not finish")
    .unwrap_err();

    assert!(
        matches!(err, ProbeError::Multiplex(MultiplexError::Transport { .. })),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_rejected_stream_is_a_transport_error() {
    let body = format!(
        r#"printf '{{"id":"%s","success":false,"error":{{"code":"CONNECTION_FAILED","message":"Login failed for user sa."}}}}\n' "$id"
{IDLE}"#
    );
    let client = fake_worker(&body, 8).await;

    let err = probe::execute(
        &client,
        &connection(),
        "SELECT 1",
        &options(Strategy::MessageLoop),
        &RecordingSink::new(),
    )
    .await
    .unwrap_err();

    match err {
        ProbeError::Multiplex(MultiplexError::Transport { message, .. }) => {
            assert_eq!(message, "Login failed for user sa. (CONNECTION_FAILED)");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_cancel_stalled_stream_sends_query_cancel() {
    // One row, then nothing: the worker never finishes the execution. It
    // records the stream id and the next request line, then publishes the
    // log with an atomic rename.
    let log = std::env::temp_dir().join(format!("sqlprobe-cancel-{}.log", std::process::id()));
    let staging = log.with_extension("tmp");
    let _ = std::fs::remove_file(&log);
    let body = format!(
        r#"printf '%s\n' "$id" > '{staging}'
{frames}read -r next
printf '%s\n' "$next" >> '{staging}'
mv '{staging}' '{log}'
{IDLE}"#,
        staging = staging.display(),
        log = log.display(),
        frames = result_set_frames(1),
    );
    let client = fake_worker(&body, 8).await;
    let cancel = CancelHandle::new();
    let cancellable = ProbeOptions {
        strategy: Strategy::MessageLoop,
        multiplex: MultiplexOptions::default().with_cancel(cancel.clone()),
    };

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let err = tokio::time::timeout(
        TEST_BOUND,
        probe::execute(
            &client,
            &connection(),
            "SELECT 1",
            &cancellable,
            &RecordingSink::new(),
        ),
    )
    .await
    .expect("cancellation did not unblock the loop")
    .unwrap_err();
    assert!(err.is_cancellation());

    let recorded = tokio::time::timeout(TEST_BOUND, async {
        loop {
            if let Ok(contents) = std::fs::read_to_string(&log) {
                return contents;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("worker never received a follow-up request");
    let _ = std::fs::remove_file(&log);

    let mut lines = recorded.lines();
    let stream_id = lines.next().unwrap();
    let request: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();

    assert_eq!(request["method"], "query.cancel");
    assert_eq!(request["params"]["query_id"], stream_id);
    assert_ne!(request["id"], stream_id);
}

// ============================================================================
// Collected Strategies
// ============================================================================

const COLLECTED_RESPONSE: &str = r#"printf '{"id":"%s","success":true,"result":{"columns":[{"name":"n","data_type":"INT"}],"rows":[[1],[2]],"row_count":2}}\n' "$id"
"#;

#[tokio::test]
async fn test_straight_strategy() {
    let client = fake_worker(&format!("{COLLECTED_RESPONSE}{IDLE}"), 8).await;

    let mut cursor = probe::execute(
        &client,
        &connection(),
        "SELECT n FROM numbers",
        &options(Strategy::Straight),
        &RecordingSink::new(),
    )
    .await
    .unwrap();

    assert_eq!(cursor.columns()[0].name, "n");
    assert!(cursor.next_row());
    assert_eq!(cursor.current_row().unwrap().get(0), Some(&json!(1)));
    assert!(cursor.next_row());
    assert!(!cursor.next_row());
}

#[tokio::test]
async fn test_transaction_strategy_sends_transaction_flag() {
    // Answer only when the request asks for a transaction.
    let body = format!(
        r#"case "$line" in
  *'"transaction":true'*) {COLLECTED_RESPONSE} ;;
  *) printf '{{"id":"%s","success":false,"error":{{"code":"INVALID_REQUEST","message":"expected a transaction"}}}}\n' "$id" ;;
esac
{IDLE}"#
    );
    let client = fake_worker(&body, 8).await;

    let cursor = probe::execute(
        &client,
        &connection(),
        "SELECT n FROM numbers",
        &options(Strategy::Transaction),
        &RecordingSink::new(),
    )
    .await
    .unwrap();

    assert_eq!(cursor.row_count(), 2);
}

#[tokio::test]
async fn test_worker_error_response() {
    let body = format!(
        r#"printf '{{"id":"%s","success":false,"error":{{"code":"CONNECTION_FAILED","message":"Login failed"}}}}\n' "$id"
{IDLE}"#
    );
    let client = fake_worker(&body, 8).await;

    let err = probe::execute(
        &client,
        &connection(),
        "SELECT 1",
        &options(Strategy::Straight),
        &RecordingSink::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        ProbeError::Worker(WorkerError::ConnectionFailed(_))
    ));
}

#[tokio::test]
async fn test_invalid_connection_is_rejected_before_sending() {
    // The worker would answer anything; the request must never get there.
    let client = fake_worker(&format!("{COLLECTED_RESPONSE}{IDLE}"), 8).await;
    let connection = ConnectionConfig::mssql("localhost", 1433, "", "secret");

    let err = probe::execute(
        &client,
        &connection,
        "SELECT 1",
        &options(Strategy::Straight),
        &RecordingSink::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ProbeError::Configuration(_)));
}
