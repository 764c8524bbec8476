//! Configuration module for sqlprobe.
//!
//! Handles connection parameters, the optional TOML settings file, and
//! environment variable expansion.

mod connection;
mod settings;

pub use connection::{ConnectionConfig, ConnectionError, Driver};
pub use settings::{
    expand_braced_env_vars, expand_env_vars, ConnectionSettings, ProbeSettings, Settings,
    SettingsError, WorkerSettings,
};
