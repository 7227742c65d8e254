//! Publish statistics over UDP.
//!
//! Every successful `publish` on a broker sends one datagram of the form
//! `<host>:<port> <routing-key>` to the monitoring endpoint. The
//! [`MonitoringServer`] counts them per broker address and routing key.

use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MAX_DATAGRAM_SIZE: usize = 1024;

type Statistics = BTreeMap<String, BTreeMap<String, u64>>;

/// Collects publish statistics sent by brokers.
#[derive(Debug, Clone, Default)]
pub struct MonitoringServer {
    statistics: Arc<Mutex<Statistics>>,
}

impl MonitoringServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one datagram. Anything other than exactly two tokens is ignored.
    ///
    /// Returns whether the datagram was counted.
    pub fn record(&self, datagram: &str) -> bool {
        let parts: Vec<&str> = datagram.split_whitespace().collect();
        let [server, routing_key] = parts.as_slice() else {
            debug!("Ignoring malformed monitoring datagram '{}'", datagram);
            return false;
        };

        *self
            .statistics
            .lock()
            .entry(server.to_string())
            .or_default()
            .entry(routing_key.to_string())
            .or_insert(0) += 1;
        true
    }

    /// Total number of counted messages across all brokers and keys.
    pub fn received_messages(&self) -> u64 {
        self.statistics
            .lock()
            .values()
            .flat_map(|keys| keys.values())
            .sum()
    }

    /// Renders the statistics as `Server <address>` lines, each followed by
    /// one indented `<routing-key> <count>` line per key.
    ///
    /// # Examples
    ///
    /// ```
    /// use clusterq::monitoring::MonitoringServer;
    ///
    /// let server = MonitoringServer::new();
    /// server.record("127.0.0.1:20000 stock.usd");
    /// server.record("127.0.0.1:20000 stock.usd");
    /// assert_eq!(server.statistics(), "Server 127.0.0.1:20000\n  stock.usd 2\n");
    /// ```
    pub fn statistics(&self) -> String {
        let statistics = self.statistics.lock();
        let mut report = String::new();
        for (server, keys) in statistics.iter() {
            let _ = writeln!(report, "Server {}", server);
            for (key, count) in keys {
                let _ = writeln!(report, "  {} {}", key, count);
            }
        }
        report
    }

    /// Receives datagrams on `socket` until `token` is cancelled.
    pub fn spawn(&self, socket: UdpSocket, token: CancellationToken) -> JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
            loop {
                let received = tokio::select! {
                    _ = token.cancelled() => break,
                    received = socket.recv_from(&mut buffer) => received,
                };
                match received {
                    Ok((len, from)) => {
                        let datagram = String::from_utf8_lossy(&buffer[..len]);
                        debug!("Monitoring datagram from {}: {}", from, datagram);
                        server.record(&datagram);
                    }
                    Err(e) => warn!("Monitoring socket receive failed: {}", e),
                }
            }
            debug!("Monitoring server stopped");
        })
    }
}

/// Sends publish notifications to a monitoring server.
#[derive(Debug)]
pub struct MonitoringNotifier {
    socket: UdpSocket,
    target: SocketAddr,
}

impl MonitoringNotifier {
    /// Binds an ephemeral local socket and resolves the monitoring endpoint.
    pub async fn connect(host: &str, port: u16) -> io::Result<Self> {
        let target = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {}", host)))?;
        let bind_addr: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Reports one publish from the broker reachable at `origin`. Send failures are logged.
    pub async fn notify(&self, origin: SocketAddr, routing_key: &str) {
        let datagram = format!("{}:{} {}", origin.ip(), origin.port(), routing_key);
        if let Err(e) = self.socket.send_to(datagram.as_bytes(), self.target).await {
            debug!("Failed to send monitoring datagram to {}: {}", self.target, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_record_counts_per_server_and_key() {
        let server = MonitoringServer::new();
        assert!(server.record("10.0.0.1:1 a"));
        assert!(server.record("10.0.0.1:1 a"));
        assert!(server.record("10.0.0.1:1 b"));
        assert!(server.record("10.0.0.2:1 a"));
        assert!(!server.record("10.0.0.2:1"));
        assert!(!server.record("10.0.0.2:1 a b"));

        assert_eq!(server.received_messages(), 4);
        assert_eq!(
            server.statistics(),
            "Server 10.0.0.1:1\n  a 2\n  b 1\nServer 10.0.0.2:1\n  a 1\n"
        );
    }

    /// Tests notifier and server over a real UDP socket.
    ///
    /// # Purpose
    /// A notification sent by a broker is counted by the server.
    ///
    /// # Steps
    /// 1. Start the server on an ephemeral UDP port.
    /// 2. Send two notifications.
    /// 3. Wait until both are counted.
    #[tokio::test]
    async fn test_notifier_reaches_server() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let server = MonitoringServer::new();
        let token = CancellationToken::new();
        let handle = server.spawn(socket, token.clone());

        let notifier = MonitoringNotifier::connect("127.0.0.1", port).await.unwrap();
        let origin: SocketAddr = "127.0.0.1:20000".parse().unwrap();
        notifier.notify(origin, "orders.created").await;
        notifier.notify(origin, "orders.created").await;

        for _ in 0..50 {
            if server.received_messages() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(
            server.statistics(),
            "Server 127.0.0.1:20000\n  orders.created 2\n"
        );

        token.cancel();
        handle.await.unwrap();
    }
}
