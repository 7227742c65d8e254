//! Helpers for starting brokers on ephemeral ports.
#![allow(dead_code)]

use clusterq::broker::Broker;
use clusterq::broker::leader::ElectionMode;
use clusterq::config::ClusterConfig;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{Instant, sleep};

/// Listeners bound before any broker starts, so every peer port is known up front.
pub struct PendingBroker {
    pub id: i64,
    pub messaging: TcpListener,
    pub election: TcpListener,
}

impl PendingBroker {
    pub async fn bind(id: i64) -> Self {
        Self {
            id,
            messaging: TcpListener::bind("127.0.0.1:0").await.unwrap(),
            election: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub fn election_port(&self) -> u16 {
        self.election.local_addr().unwrap().port()
    }
}

/// A port nothing listens on.
pub async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Election config for broker `id` with `peers` as `(id, election port)` in the given order.
///
/// The heartbeat timeout is long enough that no election starts on its own.
pub fn election_config(mode: ElectionMode, id: i64, peers: &[(i64, u16)]) -> ClusterConfig {
    let mut config = ClusterConfig::default();
    config.broker.component_id = format!("broker-{}", id);
    config.election.mode = mode;
    config.election.id = id;
    config.election.peer_hosts = peers.iter().map(|_| "127.0.0.1".to_string()).collect();
    config.election.peer_ports = peers.iter().map(|(_, port)| *port).collect();
    config.election.peer_ids = peers.iter().map(|(id, _)| *id).collect();
    config.election.heartbeat_timeout_ms = 60_000;
    config.election.ping_interval_ms = Some(200);
    config.election.peer_timeout_ms = 2000;
    config
}

/// Routes broker logs through the test harness; `RUST_LOG=debug` shows election traffic.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub async fn start(pending: PendingBroker, config: ClusterConfig) -> Broker {
    init_logging();
    Broker::start_with_listeners(config, pending.messaging, pending.election)
        .await
        .expect("Failed to start broker")
}

/// Starts a fully meshed cluster; every broker lists its peers in ascending id order.
pub async fn start_cluster(
    mode: ElectionMode,
    ids: &[i64],
    configure: impl Fn(&mut ClusterConfig),
) -> Vec<Broker> {
    let mut pending = Vec::new();
    for id in ids {
        pending.push(PendingBroker::bind(*id).await);
    }
    let ports: Vec<(i64, u16)> = pending.iter().map(|p| (p.id, p.election_port())).collect();

    let mut brokers = Vec::new();
    for broker in pending {
        let peers: Vec<(i64, u16)> = ports.iter().copied().filter(|(id, _)| *id != broker.id).collect();
        let mut config = election_config(mode, broker.id, &peers);
        configure(&mut config);
        brokers.push(start(broker, config).await);
    }
    brokers
}

pub async fn shutdown_all(brokers: Vec<Broker>) {
    for broker in brokers {
        broker.shutdown().await;
    }
}

/// Polls `condition` until it holds, failing the test after `limit`.
pub async fn wait_for(limit: Duration, what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + limit;
    while !condition() {
        if Instant::now() >= deadline {
            panic!("Timed out waiting for {}", what);
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub fn leaders(brokers: &[Broker]) -> Vec<Option<i64>> {
    brokers.iter().map(|broker| broker.leader()).collect()
}
