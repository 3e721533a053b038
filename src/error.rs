//! Error types for probes, handlers and component configuration.

use std::time::Duration;
use thiserror::Error;

/// Failure to take a measurement. Recoverable: the probe keeps its last value.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("measurement unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while handling an event. Logged by the dispatcher, never fatal.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}")]
    ExitStatus {
        command: String,
        status: std::process::ExitStatus,
    },

    #[error("'{command}' did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A component's configuration section could not be used.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("section '{0}' not found")]
    MissingSection(String),

    #[error("section '{section}' is invalid: {source}")]
    Invalid {
        section: String,
        #[source]
        source: toml::de::Error,
    },
}
