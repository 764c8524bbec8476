//! sqlprobe CLI - run one query against SQL Server and log what comes back
//!
//! Usage:
//!   sqlprobe --username <user> --password <pwd> [--hostname <host>] [--port <port>] [--debug]
//!   sqlprobe --replay <capture.ndjson>
//!
//! Examples:
//!   sqlprobe --username sa --password pwd --hostname 10.0.0.12
//!   sqlprobe --username sa --password pwd --strategy transaction --query "SELECT 1"
//!   sqlprobe --replay hang.ndjson --deadline-secs 5

use clap::builder::NonEmptyStringValueParser;
use clap::{Parser, ValueEnum};
use sqlprobe::config::{ConnectionConfig, Driver, Settings};
use sqlprobe::multiplex::{self, CancelHandle, Cursor, MultiplexOptions, TracingSink};
use sqlprobe::probe::{self, ProbeOptions, Strategy, DEFAULT_QUERY};
use sqlprobe::worker::{ReplaySource, WorkerClient, WorkerResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sqlprobe")]
#[command(about = "sqlprobe - run one query against SQL Server and log everything it returns")]
#[command(version)]
#[command(after_help = "Example: --username user --password pwd --hostname 10.0.0.12")]
struct Cli {
    /// SQL Server username (required)
    #[arg(long, env = "SQLPROBE_DB_USER", required_unless_present = "replay",
          value_parser = NonEmptyStringValueParser::new())]
    username: Option<String>,

    /// SQL Server password (required)
    #[arg(long, env = "SQLPROBE_DB_PASSWORD", hide_env_values = true,
          required_unless_present = "replay", value_parser = NonEmptyStringValueParser::new())]
    password: Option<String>,

    /// SQL Server hostname (default: localhost)
    #[arg(long, env = "SQLPROBE_DB_HOST", value_parser = NonEmptyStringValueParser::new())]
    hostname: Option<String>,

    /// SQL Server port (default: 1433)
    #[arg(long, env = "SQLPROBE_DB_PORT", value_parser = clap::value_parser!(u16))]
    port: Option<u16>,

    /// Initial database
    #[arg(long, env = "SQLPROBE_DB_NAME")]
    database: Option<String>,

    /// Sets log level to debug
    #[arg(long)]
    debug: bool,

    /// Execution strategy (default: message-loop)
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Query to run instead of the built-in plan-cache query
    #[arg(long, conflicts_with = "query_file")]
    query: Option<String>,

    /// File holding the query to run
    #[arg(long)]
    query_file: Option<PathBuf>,

    /// Abort the message loop after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Treat the first statement error as fatal
    #[arg(long)]
    strict: bool,

    /// Path to the driver worker binary
    #[arg(long)]
    worker: Option<PathBuf>,

    /// Settings file (default: sqlprobe.toml or ~/.config/sqlprobe/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replay a captured NDJSON event stream instead of querying a server
    #[arg(long)]
    replay: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// Plain query
    Straight,
    /// Query inside a transaction
    Transaction,
    /// Streamed query drained event by event
    MessageLoop,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Straight => Strategy::Straight,
            StrategyArg::Transaction => Strategy::Transaction,
            StrategyArg::MessageLoop => Strategy::MessageLoop,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    sqlprobe::logging::init(cli.debug);

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load settings");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancelHandle::new();
    spawn_interrupt_handler(cancel.clone());
    let multiplex_options = multiplex_options(&cli, &settings, cancel);

    match &cli.replay {
        Some(capture) => cmd_replay(capture, &multiplex_options).await,
        None => cmd_probe(&cli, &settings, multiplex_options).await,
    }
}

fn multiplex_options(cli: &Cli, settings: &Settings, cancel: CancelHandle) -> MultiplexOptions {
    let mut options = MultiplexOptions::default()
        .strict(cli.strict || settings.probe.fail_on_statement_error)
        .with_cancel(cancel);
    if let Some(secs) = cli.deadline_secs.or(settings.probe.deadline_secs) {
        options = options.with_deadline(Duration::from_secs(secs));
    }
    options
}

/// Cancel the execution on Ctrl-C instead of leaving it hanging.
fn spawn_interrupt_handler(cancel: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling execution");
            cancel.cancel();
        }
    });
}

async fn cmd_probe(cli: &Cli, settings: &Settings, multiplex: MultiplexOptions) -> ExitCode {
    let driver = match settings.connection.driver_type() {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "Invalid connection settings");
            return ExitCode::FAILURE;
        }
    };

    let connection = connection_config(cli, settings, driver);

    let query = match resolve_query(cli, settings) {
        Ok(q) => q,
        Err(message) => {
            tracing::error!("{message}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        "Connection to database: {}",
        connection.redacted_connection_string()
    );

    let client = match spawn_worker(cli, settings).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Error opening connection to database");
            return ExitCode::FAILURE;
        }
    };

    let options = ProbeOptions {
        strategy: cli
            .strategy
            .map(Strategy::from)
            .unwrap_or(settings.probe.strategy),
        multiplex,
    };

    tracing::info!(strategy = %options.strategy, "Executing query");

    let mut cursor = match probe::execute(&client, &connection, &query, &options, &TracingSink).await
    {
        Ok(cursor) => cursor,
        Err(e) => {
            tracing::error!(error = %e, "Failed to execute query");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Executed query");
    read_rows(&mut cursor);
    tracing::info!("Completed successfully");
    ExitCode::SUCCESS
}

/// Connection parameters: command line (or its `SQLPROBE_DB_*` fallback)
/// first, then the settings file, then `localhost` and the driver's port.
fn connection_config(cli: &Cli, settings: &Settings, driver: Driver) -> ConnectionConfig {
    let file = &settings.connection;
    let hostname = cli
        .hostname
        .clone()
        .or_else(|| file.hostname.clone())
        .unwrap_or_else(|| "localhost".to_string());
    let port = cli.port.or(file.port).unwrap_or_else(|| driver.default_port());

    let connection = ConnectionConfig::mssql(
        hostname,
        port,
        cli.username.clone().unwrap_or_default(),
        cli.password.clone().unwrap_or_default(),
    );
    match cli.database.clone().or_else(|| file.database.clone()) {
        Some(database) => connection.with_database(database),
        None => connection,
    }
}

async fn cmd_replay(capture: &Path, options: &MultiplexOptions) -> ExitCode {
    let mut source = match ReplaySource::from_file(capture) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, file = %capture.display(), "Failed to load capture");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(file = %capture.display(), events = source.remaining(), "Replaying capture");
    let outcome = multiplex::run(&mut source, &TracingSink, options).await;
    tracing::info!(
        events = outcome.stats.events_pulled,
        result_sets = outcome.stats.result_sets,
        rows = outcome.stats.rows,
        notices = outcome.stats.notices,
        statement_errors = outcome.stats.statement_errors,
        "Replay finished"
    );

    match outcome.error {
        None => {
            let mut cursor = outcome.cursor;
            read_rows(&mut cursor);
            ExitCode::SUCCESS
        }
        Some(e) => {
            tracing::error!(
                error = %e,
                rows = outcome.cursor.row_count(),
                unread_events = source.remaining(),
                "Replay aborted"
            );
            ExitCode::FAILURE
        }
    }
}

fn resolve_query(cli: &Cli, settings: &Settings) -> Result<String, String> {
    if let Some(query) = &cli.query {
        return Ok(query.clone());
    }
    if let Some(path) = &cli.query_file {
        return fs::read_to_string(path)
            .map_err(|e| format!("Error reading file '{}': {}", path.display(), e));
    }
    match settings.probe.resolved_query() {
        Ok(Some(query)) => Ok(query),
        Ok(None) => Ok(DEFAULT_QUERY.to_string()),
        Err(e) => Err(format!("Invalid probe.query setting: {e}")),
    }
}

async fn spawn_worker(cli: &Cli, settings: &Settings) -> WorkerResult<WorkerClient> {
    match &cli.worker {
        Some(path) => Ok(WorkerClient::spawn_with_args_and_timeout(
            path,
            &settings.worker.args,
            Duration::from_secs(settings.worker.timeout_secs),
        )
        .await?
        .with_stream_buffer(settings.worker.stream_buffer)),
        None => WorkerClient::spawn_with_settings(settings).await,
    }
}

fn read_rows(cursor: &mut Cursor) {
    loop {
        while cursor.next_row() {
            tracing::info!("Reading row...");
            if let Some(row) = cursor.current_row() {
                tracing::debug!(values = ?row.values(), "row");
            }
        }
        if !cursor.next_result_set() {
            break;
        }
    }
    tracing::info!(
        rows = cursor.row_count(),
        result_sets = cursor.result_sets().len(),
        rows_affected = cursor.rows_affected(),
        "Read all rows"
    );
}
