//! The election protocol spoken on a broker's election port.
//!
//! | Request | Reply |
//! |---|---|
//! | `ping` | `pong` |
//! | `elect <id>` | `ok` (ring, bully), `vote <own-id> <granted-id>` (raft), nothing (none) |
//! | `declare <id>` | `ack <own-id>`, nothing when election is disabled |
//!
//! An unknown command is answered with a usage error and ends the session.

use crate::broker::leader::election::ElectionCoordinator;
use crate::network::connection::LineConnection;
use crate::protocol::USAGE_ERROR;
use log::debug;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const BANNER: &str = "ok LEP";

/// A parsed election request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionCommand {
    Ping,
    Elect(i64),
    Declare(i64),
    /// A known command with wrong arguments; carries the usage reply.
    Usage(&'static str),
    Unknown,
}

impl ElectionCommand {
    /// # Examples
    ///
    /// ```
    /// use clusterq::protocol::election::ElectionCommand;
    ///
    /// assert_eq!(ElectionCommand::parse("elect 3"), ElectionCommand::Elect(3));
    /// assert_eq!(
    ///     ElectionCommand::parse("declare x"),
    ///     ElectionCommand::Usage("error usage: declare <id>")
    /// );
    /// assert_eq!(ElectionCommand::parse("vote 1 2"), ElectionCommand::Unknown);
    /// ```
    pub fn parse(line: &str) -> Self {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["ping", ..] => ElectionCommand::Ping,
            ["elect", rest @ ..] => match parse_id(rest) {
                Some(id) => ElectionCommand::Elect(id),
                None => ElectionCommand::Usage("error usage: elect <id>"),
            },
            ["declare", rest @ ..] => match parse_id(rest) {
                Some(id) => ElectionCommand::Declare(id),
                None => ElectionCommand::Usage("error usage: declare <id>"),
            },
            _ => ElectionCommand::Unknown,
        }
    }
}

fn parse_id(args: &[&str]) -> Option<i64> {
    match args {
        [id] => id.parse().ok(),
        _ => None,
    }
}

/// Serves one election-protocol client.
///
/// The reply to `elect` is written before the follow-up work runs, so the
/// requesting peer is never kept waiting on an election that continues here.
pub async fn serve(stream: TcpStream, coordinator: Arc<ElectionCoordinator>, shutdown: CancellationToken) {
    let session = Uuid::new_v4();
    let mut connection = match LineConnection::new(stream) {
        Ok(connection) => connection,
        Err(e) => {
            debug!("[{}] Failed to set up election session: {}", session, e);
            return;
        }
    };
    debug!("[{}] Election session from {}", session, connection.peer_addr());

    if connection.send_line(BANNER).await.is_err() {
        return;
    }

    let handle_requests = async {
        loop {
            let line = match connection.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    debug!("[{}] Read error: {}", session, e);
                    break;
                }
            };

            let (reply, close) = match ElectionCommand::parse(&line) {
                ElectionCommand::Ping => (Some(coordinator.handle_ping().to_string()), false),
                ElectionCommand::Elect(sender) => {
                    let response = coordinator.respond_to_elect(sender);
                    if let Some(reply) = &response.reply {
                        if connection.send_line(reply).await.is_err() {
                            break;
                        }
                    }
                    if let Some(follow_up) = response.follow_up {
                        coordinator.complete(follow_up).await;
                    }
                    (None, false)
                }
                ElectionCommand::Declare(leader) => (coordinator.handle_declare(leader).await, false),
                ElectionCommand::Usage(usage) => (Some(usage.to_string()), false),
                ElectionCommand::Unknown => (Some(USAGE_ERROR.to_string()), true),
            };

            if let Some(reply) = reply {
                if connection.send_line(&reply).await.is_err() {
                    break;
                }
            }
            if close {
                break;
            }
        }
    };

    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = handle_requests => {}
    }

    connection.close().await;
    debug!("[{}] Election session closed", session);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ElectionCommand::parse("ping"), ElectionCommand::Ping);
        assert_eq!(ElectionCommand::parse("elect 12"), ElectionCommand::Elect(12));
        assert_eq!(ElectionCommand::parse("declare 4"), ElectionCommand::Declare(4));
        assert_eq!(
            ElectionCommand::parse("elect"),
            ElectionCommand::Usage("error usage: elect <id>")
        );
        assert_eq!(
            ElectionCommand::parse("elect 1 2"),
            ElectionCommand::Usage("error usage: elect <id>")
        );
        assert_eq!(ElectionCommand::parse(""), ElectionCommand::Unknown);
        assert_eq!(ElectionCommand::parse("PING"), ElectionCommand::Unknown);
    }
}
