//! CLI Error types and handling
//!
//! This module defines error types specific to CLI operations.

use clusterq::broker::error::BrokerError;
use clusterq::config::ConfigError;
use std::fmt;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub enum CliError {
    UnknownCommand(String),
    NoCommand,
    ConfigurationError(String),
    StartupFailure(String),
    IoError(String),
    ParseError { field: String, message: String },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::UnknownCommand(cmd) => {
                write!(f, "Unknown command '{}'. Use --help to see available commands", cmd)
            }
            CliError::NoCommand => {
                write!(f, "No command provided. Use --help to see available commands")
            }
            CliError::ConfigurationError(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            CliError::StartupFailure(msg) => {
                write!(f, "Startup failure: {}", msg)
            }
            CliError::IoError(msg) => {
                write!(f, "IO error: {}", msg)
            }
            CliError::ParseError { field, message } => {
                write!(f, "Parse error ({}): {}", field, message)
            }
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::IoError(err.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::ConfigurationError(err.to_string())
    }
}

impl From<BrokerError> for CliError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Config(msg) => CliError::ConfigurationError(msg),
            other => CliError::StartupFailure(other.to_string()),
        }
    }
}
