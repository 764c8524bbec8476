//! TOML-based configuration for sqlprobe.
//!
//! Supports a config file (sqlprobe.toml) with environment variable expansion.
//! Command-line flags override everything here.
//!
//! Example configuration:
//! ```toml
//! [connection]
//! driver = "mssql"
//! hostname = "db01.internal"
//! port = 1433
//! database = "master"
//!
//! [worker]
//! path = "${HOME}/bin/sqlprobe-worker"
//! timeout_secs = 30
//! stream_buffer = 64
//!
//! [probe]
//! strategy = "message-loop"
//! deadline_secs = 300
//! fail_on_statement_error = false
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::connection::Driver;
use crate::probe::Strategy;
use crate::worker::DEFAULT_STREAM_BUFFER;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Connection defaults.
    pub connection: ConnectionSettings,

    /// Worker configuration.
    pub worker: WorkerSettings,

    /// Probe behavior.
    pub probe: ProbeSettings,
}

/// Connection defaults used when the command line leaves them out.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Database driver (mssql).
    pub driver: String,

    /// Server hostname.
    pub hostname: Option<String>,

    /// Server port.
    pub port: Option<u16>,

    /// Initial database.
    pub database: Option<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            driver: "mssql".to_string(),
            hostname: None,
            port: None,
            database: None,
        }
    }
}

impl ConnectionSettings {
    /// Get the driver type.
    pub fn driver_type(&self) -> Result<Driver, SettingsError> {
        Driver::from_str(&self.driver)
            .map_err(|_| SettingsError::UnsupportedDriver(self.driver.clone()))
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Path to worker binary (if not using embedded).
    pub path: Option<String>,

    /// Use embedded worker binary.
    pub embedded: bool,

    /// Extra command-line arguments for the worker.
    pub args: Vec<String>,

    /// Timeout for non-streaming requests, in seconds.
    pub timeout_secs: u64,

    /// Frames buffered per streaming execution before the worker is
    /// back-pressured.
    pub stream_buffer: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            path: None,
            embedded: true,
            args: Vec::new(),
            timeout_secs: 30,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

/// Probe behavior.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProbeSettings {
    /// Execution strategy.
    pub strategy: Strategy,

    /// Abort a message-loop execution after this many seconds.
    pub deadline_secs: Option<u64>,

    /// Treat the first statement error as fatal.
    pub fail_on_statement_error: bool,

    /// Query to run instead of the built-in diagnostic query
    /// (supports `${ENV_VAR}` expansion; a bare `$name` is left alone).
    pub query: Option<String>,
}

impl ProbeSettings {
    /// Get the configured query with `${VAR}` references expanded.
    ///
    /// T-SQL uses `$` itself (`$5.00`, `OUTPUT $action`, `$IDENTITY`), so
    /// only the braced form is substituted.
    pub fn resolved_query(&self) -> Result<Option<String>, SettingsError> {
        self.query.as_deref().map(expand_braced_env_vars).transpose()
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `SQLPROBE_CONFIG`
    /// 2. `./sqlprobe.toml`
    /// 3. `~/.config/sqlprobe/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("SQLPROBE_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("sqlprobe.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("sqlprobe").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Get the worker binary path.
    ///
    /// Returns the configured path, or searches the usual locations and
    /// `PATH`.
    pub fn worker_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.worker.path {
            let expanded = expand_env_vars(path).ok()?;
            return Some(PathBuf::from(expanded));
        }

        let candidates = [
            "sqlprobe-worker",
            "./sqlprobe-worker",
            "./worker/bin/sqlprobe-worker",
        ];

        for candidate in candidates {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Some(path);
            }
        }

        // Try PATH
        if let Ok(output) = std::process::Command::new("which")
            .arg("sqlprobe-worker")
            .output()
        {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(PathBuf::from(path));
                }
            }
        }

        None
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            // $VAR ends at the first non-alphanumeric/underscore
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                var_name.push(ch);
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}

/// Expand only `${VAR}` references, leaving every other `$` untouched.
pub fn expand_braced_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let var_name = &rest[start + 2..start + 2 + len];
        let value =
            env::var(var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.to_string()))?;
        result.push_str(&rest[..start]);
        result.push_str(&value);
        rest = &rest[start + 2 + len + 1..];
    }

    result.push_str(rest);
    Ok(result)
}
