pub mod broker;
pub mod monitor;
pub mod nameserver;

pub use broker::handle_broker_command;
pub use monitor::handle_monitor_command;
pub use nameserver::handle_nameserver_command;

use crate::error::{CliError, CliResult};
use clap::ArgMatches;
use std::str::FromStr;

/// Reads a required argument and parses it.
pub(crate) fn parse_arg<T>(matches: &ArgMatches, name: &str) -> CliResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = matches.value_of(name).ok_or_else(|| CliError::ParseError {
        field: name.to_string(),
        message: format!("--{} is not specified", name),
    })?;
    value.parse().map_err(|e: T::Err| CliError::ParseError {
        field: name.to_string(),
        message: format!("invalid value '{}': {}", value, e),
    })
}
