//! Module for handling errors in the broker system.
//!
//! [`BrokerError`] covers failures of the broker process itself: binding its
//! listeners, invalid configuration, and network or I/O problems while
//! starting up. [`RoutingError`] covers rejected messaging commands; its
//! display text is exactly the error line sent back to the client.
//!
//! # Examples
//! ```
//! use clusterq::broker::error::{BrokerError, RoutingError};
//!
//! let error = BrokerError::Config("election.id must be set".to_string());
//! assert_eq!(format!("{}", error), "Configuration error: election.id must be set");
//!
//! assert_eq!(RoutingError::NoQueueDeclared.to_string(), "error no queue declared");
//! ```

use crate::network::error::NetworkError;
use std::error::Error;
use std::fmt;
use thiserror::Error as ThisError;

/// Represents different types of errors that can occur while running a broker.
#[derive(Debug)]
pub enum BrokerError {
    /// A listener could not be bound to its address.
    Bind(String),
    /// The configuration is unusable.
    Config(String),
    /// A network operation failed.
    Network(NetworkError),
    /// Represents an error related to I/O operations.
    IoError(std::io::Error),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

impl From<std::io::Error> for BrokerError {
    fn from(error: std::io::Error) -> Self {
        BrokerError::IoError(error)
    }
}

impl From<NetworkError> for BrokerError {
    fn from(error: NetworkError) -> Self {
        BrokerError::Network(error)
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BrokerError::Bind(msg) => write!(f, "Bind error: {}", msg),
            BrokerError::Config(msg) => write!(f, "Configuration error: {}", msg),
            BrokerError::Network(err) => write!(f, "Network error: {}", err),
            BrokerError::IoError(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl Error for BrokerError {
    /// Returns the source of the error, if any.
    ///
    /// # Examples
    ///
    /// ```
    /// use clusterq::broker::error::BrokerError;
    /// use std::error::Error;
    /// use std::io;
    ///
    /// let io_error = io::Error::new(io::ErrorKind::Other, "an I/O error");
    /// let broker_error: BrokerError = io_error.into();
    /// assert!(broker_error.source().is_some());
    /// ```
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BrokerError::IoError(err) => Some(err),
            BrokerError::Network(err) => Some(err),
            _ => None,
        }
    }
}

/// A messaging command that was rejected.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("error invalid exchange type. Valid types: DEFAULT, DIRECT, FANOUT, TOPIC")]
    InvalidExchangeType(String),

    #[error("error exchange already exists with a different type")]
    ExchangeTypeConflict { name: String },

    #[error("error no exchange declared")]
    NoExchangeDeclared,

    #[error("error no queue declared")]
    NoQueueDeclared,
}
