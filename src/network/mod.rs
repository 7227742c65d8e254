//! Network plumbing shared by every protocol the cluster speaks.
//!
//! This module provides newline-delimited TCP connections, the single
//! connect/banner/request/reply round trip used for peer communication, and
//! a task-per-connection acceptor.

pub mod connection;
pub mod error;
pub mod listener;

pub use connection::{LineConnection, LineWriter, request_reply};
pub use error::{NetworkError, NetworkResult};
pub use listener::Listener;
