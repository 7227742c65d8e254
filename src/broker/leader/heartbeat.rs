//! Module for the heartbeat mechanism between the leader and its followers.
//!
//! [`HeartbeatMonitor`] runs on every broker with election enabled. It polls
//! the time since the leader was last heard from and starts an election once
//! that exceeds the heartbeat timeout.
//!
//! [`LeaderHeartbeat`] runs only while a broker is leader. It keeps one
//! connection open to every peer and sends `ping` on each of them every ping
//! interval, which the peers answer with `pong` after refreshing their own
//! heartbeat timestamp.

use crate::broker::leader::election::ElectionCoordinator;
use crate::broker::leader::peer::Peer;
use crate::broker::leader::state::{BrokerState, Role};
use crate::network::connection::LineConnection;
use crate::network::error::{NetworkError, NetworkResult};
use futures_util::future::join_all;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Default interval between two follower checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Watches for a silent leader and starts elections.
pub struct HeartbeatMonitor {
    coordinator: Arc<ElectionCoordinator>,
    poll_interval: Duration,
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(coordinator: Arc<ElectionCoordinator>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            coordinator,
            poll_interval,
            timeout,
        }
    }

    /// Whether a non-leader has gone longer than the timeout without a heartbeat.
    pub fn is_expired(&self) -> bool {
        let state = self.coordinator.state();
        state.role() != Role::Leader && state.heartbeat_elapsed() > self.timeout
    }

    /// Performs one check and runs an election if the leader went silent.
    ///
    /// The heartbeat timestamp is refreshed before the election starts, so a
    /// failed election is retried one timeout later rather than on the next poll.
    /// Returns whether an election was started.
    pub async fn poll_once(&self) -> bool {
        if !self.is_expired() {
            return false;
        }

        let state = self.coordinator.state();
        warn!(
            "Broker {} has not heard from a leader for {:?}, starting election",
            self.coordinator.own_id(),
            state.heartbeat_elapsed()
        );
        state.touch_heartbeat();
        self.coordinator.initiate_election().await;
        true
    }

    /// Runs the monitor loop until `token` is cancelled.
    ///
    /// The loop sleeps the poll interval on every iteration, including while
    /// this broker is the leader.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!(
                "Heartbeat monitor started for broker {}",
                self.coordinator.own_id()
            );
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = self.poll_once() => {}
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(self.poll_interval) => {}
                }
            }
            debug!(
                "Heartbeat monitor stopped for broker {}",
                self.coordinator.own_id()
            );
        })
    }
}

struct PeerLink {
    peer: Peer,
    connection: Option<LineConnection>,
}

/// Pings every peer while this broker is the leader.
///
/// Each peer is served by its own loop, so a peer that stops answering only
/// delays its own pings. Every connect and ping is bounded by the smaller of
/// the I/O timeout and the ping interval.
pub struct LeaderHeartbeat {
    peers: Vec<Peer>,
    state: Arc<BrokerState>,
    interval: Duration,
    io_timeout: Option<Duration>,
}

impl LeaderHeartbeat {
    pub fn new(
        peers: Vec<Peer>,
        state: Arc<BrokerState>,
        interval: Duration,
        io_timeout: Option<Duration>,
    ) -> Self {
        Self {
            peers,
            state,
            interval,
            io_timeout,
        }
    }

    /// Upper bound for a single exchange with one peer.
    fn link_timeout(&self) -> Duration {
        match self.io_timeout {
            Some(limit) => limit.min(self.interval),
            None => self.interval,
        }
    }

    async fn bounded<T, F>(&self, operation: F) -> NetworkResult<T>
    where
        F: std::future::Future<Output = NetworkResult<T>>,
    {
        timeout(self.link_timeout(), operation).await?
    }

    async fn connect(&self, peer: &Peer) -> Option<LineConnection> {
        let result = self
            .bounded(async {
                let mut connection = LineConnection::connect(&peer.host, peer.port).await?;
                connection.expect_line().await?;
                Ok::<_, NetworkError>(connection)
            })
            .await;

        match result {
            Ok(connection) => Some(connection),
            Err(e) => {
                debug!("Heartbeat connection to peer {} failed: {}", peer, e);
                None
            }
        }
    }

    async fn ping(&self, connection: &mut LineConnection) -> NetworkResult<()> {
        let reply = self.bounded(connection.request("ping")).await?;
        if reply == "pong" {
            Ok(())
        } else {
            Err(NetworkError::UnexpectedReply(reply))
        }
    }

    /// Pings one peer, reconnecting first if the link was lost.
    async fn tick(&self, link: &mut PeerLink) {
        if link.connection.is_none() {
            link.connection = self.connect(&link.peer).await;
        }
        if let Some(connection) = link.connection.as_mut() {
            if let Err(e) = self.ping(connection).await {
                debug!("Heartbeat to peer {} failed: {}", link.peer, e);
                link.connection = None;
            }
        }
    }

    async fn keep_alive(&self, peer: Peer, token: &CancellationToken) {
        let mut link = PeerLink {
            peer,
            connection: None,
        };

        while self.state.role() == Role::Leader {
            let completed = tokio::select! {
                _ = token.cancelled() => false,
                _ = self.tick(&mut link) => true,
            };
            if !completed {
                break;
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
        }

        if let Some(connection) = link.connection {
            connection.close().await;
        }
    }

    /// Runs until this broker stops being leader or `token` is cancelled,
    /// then closes every peer connection.
    pub async fn run(self, token: CancellationToken) {
        let loops = self
            .peers
            .iter()
            .cloned()
            .map(|peer| self.keep_alive(peer, &token));
        join_all(loops).await;
        info!("Leader heartbeat stopped");
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }
}
