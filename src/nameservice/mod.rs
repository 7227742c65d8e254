//! Name resolution service.
//!
//! Brokers register a domain name for their messaging address so clients can
//! find the current leader. The server keeps the mapping in memory and speaks
//! a line protocol:
//!
//! | Request | Reply |
//! |---|---|
//! | `register <name> <host:port>` | `ok` |
//! | `resolve <name>` | `<host:port>` or `error domain not found` |
//! | `unregister <name>` | `ok` |
//! | `exit` | `ok bye`, then the session ends |
//!
//! [`NameServiceClient`] is the client side used by brokers.

use crate::network::connection::{LineConnection, request_reply};
use crate::network::error::{NetworkError, NetworkResult};
use crate::network::listener::Listener;
use dashmap::DashMap;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const BANNER: &str = "ok SDP";

/// In-memory name registry served over TCP.
#[derive(Debug, Clone, Default)]
pub struct NameServer {
    entries: Arc<DashMap<String, String>>,
}

impl NameServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<String> {
        self.entries.get(name).map(|address| address.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Executes one request line and returns the reply.
    ///
    /// # Examples
    ///
    /// ```
    /// use clusterq::nameservice::NameServer;
    ///
    /// let server = NameServer::new();
    /// assert_eq!(server.process_command("register leader.cluster 127.0.0.1:7000"), "ok");
    /// assert_eq!(server.process_command("resolve leader.cluster"), "127.0.0.1:7000");
    /// assert_eq!(server.process_command("resolve nothing"), "error domain not found");
    /// ```
    pub fn process_command(&self, line: &str) -> String {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let reply = match parts.first().copied() {
            Some("register") => match parts.as_slice() {
                [_, name, address] => {
                    self.entries.insert(name.to_string(), address.to_string());
                    info!("Registered {} -> {}", name, address);
                    "ok"
                }
                _ => "error usage: register <name> <ip:port>",
            },
            Some("resolve") => match parts.as_slice() {
                [_, name] => return self.lookup(name).unwrap_or_else(|| "error domain not found".to_string()),
                _ => "error usage: resolve <name>",
            },
            Some("unregister") => match parts.as_slice() {
                [_, name] => {
                    self.entries.remove(*name);
                    info!("Unregistered {}", name);
                    "ok"
                }
                _ => "error usage: unregister <name>",
            },
            Some("exit") => "ok bye",
            _ => "error usage: <command> <args>",
        };
        reply.to_string()
    }

    /// Serves one client connection until it sends `exit` or disconnects.
    pub async fn serve_connection(&self, stream: TcpStream, shutdown: CancellationToken) {
        let session = Uuid::new_v4();
        let mut connection = match LineConnection::new(stream) {
            Ok(connection) => connection,
            Err(e) => {
                debug!("[{}] Failed to set up name service session: {}", session, e);
                return;
            }
        };
        debug!("[{}] Name service session from {}", session, connection.peer_addr());

        if connection.send_line(BANNER).await.is_err() {
            return;
        }

        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = connection.read_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    debug!("[{}] Read error: {}", session, e);
                    break;
                }
            };

            let reply = self.process_command(&line);
            if connection.send_line(&reply).await.is_err() {
                break;
            }
            if line.trim() == "exit" {
                break;
            }
        }

        connection.close().await;
        debug!("[{}] Name service session closed", session);
    }

    /// Accepts clients on `listener` until `shutdown` is cancelled.
    pub fn spawn(&self, listener: Listener, shutdown: CancellationToken) -> JoinHandle<()> {
        let server = self.clone();
        listener.spawn(shutdown, move |stream, token| {
            let server = server.clone();
            async move { server.serve_connection(stream, token).await }
        })
    }
}

/// Client for the name resolution service.
#[derive(Debug, Clone)]
pub struct NameServiceClient {
    host: String,
    port: u16,
    timeout: Option<Duration>,
}

impl NameServiceClient {
    pub fn new(host: &str, port: u16, timeout: Option<Duration>) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn request(&self, message: &str) -> NetworkResult<String> {
        request_reply(&self.host, self.port, message, self.timeout).await
    }

    async fn request_ok(&self, message: &str) -> NetworkResult<()> {
        match self.request(message).await? {
            reply if reply == "ok" => Ok(()),
            reply => Err(NetworkError::UnexpectedReply(reply)),
        }
    }

    pub async fn register(&self, name: &str, address: &str) -> NetworkResult<()> {
        self.request_ok(&format!("register {} {}", name, address)).await
    }

    /// Returns the registered address, or `None` if the name is unknown.
    pub async fn resolve(&self, name: &str) -> NetworkResult<Option<String>> {
        let reply = self.request(&format!("resolve {}", name)).await?;
        if reply.starts_with("error") {
            Ok(None)
        } else {
            Ok(Some(reply))
        }
    }

    pub async fn unregister(&self, name: &str) -> NetworkResult<()> {
        self.request_ok(&format!("unregister {}", name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_errors() {
        let server = NameServer::new();
        assert_eq!(
            server.process_command("register only-name"),
            "error usage: register <name> <ip:port>"
        );
        assert_eq!(server.process_command("resolve"), "error usage: resolve <name>");
        assert_eq!(
            server.process_command("unregister a b"),
            "error usage: unregister <name>"
        );
        assert_eq!(server.process_command("lookup x"), "error usage: <command> <args>");
        assert_eq!(server.process_command(""), "error usage: <command> <args>");
        assert_eq!(server.process_command("exit"), "ok bye");
    }

    #[test]
    fn test_register_overwrites_and_unregister_removes() {
        let server = NameServer::new();
        server.process_command("register a 127.0.0.1:1");
        server.process_command("register a 127.0.0.1:2");
        assert_eq!(server.lookup("a").as_deref(), Some("127.0.0.1:2"));

        assert_eq!(server.process_command("unregister a"), "ok");
        assert!(server.is_empty());
        assert_eq!(server.process_command("unregister a"), "ok");
    }

    /// Tests the client against a running server.
    ///
    /// # Purpose
    /// Registration, resolution and removal work over TCP, banner included.
    ///
    /// # Steps
    /// 1. Start a name server on an ephemeral port.
    /// 2. Register, resolve and unregister a name with the client.
    /// 3. Resolve the removed name and expect `None`.
    #[tokio::test]
    async fn test_client_round_trip() {
        let server = NameServer::new();
        let listener = Listener::bind("SDP-Listener", "127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().port();
        let shutdown = CancellationToken::new();
        let handle = server.spawn(listener, shutdown.clone());

        let client = NameServiceClient::new("127.0.0.1", port, Some(Duration::from_secs(2)));
        client.register("leader.cluster", "127.0.0.1:7000").await.unwrap();
        assert_eq!(
            client.resolve("leader.cluster").await.unwrap().as_deref(),
            Some("127.0.0.1:7000")
        );
        client.unregister("leader.cluster").await.unwrap();
        assert_eq!(client.resolve("leader.cluster").await.unwrap(), None);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_session_ends_after_exit() {
        let server = NameServer::new();
        let listener = Listener::bind("SDP-Listener", "127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().port();
        let shutdown = CancellationToken::new();
        let _handle = server.spawn(listener, shutdown.clone());

        let mut connection = LineConnection::connect("127.0.0.1", port).await.unwrap();
        assert_eq!(connection.expect_line().await.unwrap(), BANNER);
        assert_eq!(connection.request("exit").await.unwrap(), "ok bye");
        assert_eq!(connection.read_line().await.unwrap(), None);
        shutdown.cancel();
    }
}
