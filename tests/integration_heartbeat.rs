//! Integration tests for leader heartbeats and failover
mod common;

use clusterq::broker::leader::{ElectionMode, Role};
use common::*;
use std::time::Duration;

fn fast_heartbeat(config: &mut clusterq::ClusterConfig) {
    config.election.heartbeat_timeout_ms = 500;
    config.election.ping_interval_ms = Some(100);
    config.election.poll_interval_ms = 20;
    config.election.peer_timeout_ms = 1000;
}

/// Tests that a silent cluster elects a leader by itself.
///
/// # Purpose
/// Followers that never hear a heartbeat must start an election.
///
/// # Steps
/// 1. Start two bully brokers with a short heartbeat timeout.
/// 2. Do not initiate anything.
/// 3. Verify both converge on broker 2.
#[tokio::test]
async fn test_missing_leader_triggers_election() {
    let brokers = start_cluster(ElectionMode::Bully, &[1, 2], fast_heartbeat).await;

    wait_for(Duration::from_secs(10), "leader 2", || {
        leaders(&brokers) == vec![Some(2), Some(2)]
    })
    .await;

    shutdown_all(brokers).await;
}

/// Tests failover after the leader stops.
///
/// # Purpose
/// Once pings stop, the remaining broker must take over.
///
/// # Steps
/// 1. Start brokers 1 and 2 and wait for leader 2.
/// 2. Verify broker 1 stays a follower across several timeouts while 2 pings.
/// 3. Shut broker 2 down.
/// 4. Verify broker 1 becomes leader.
#[tokio::test]
async fn test_leader_failure_triggers_failover() {
    let mut brokers = start_cluster(ElectionMode::Bully, &[1, 2], fast_heartbeat).await;

    wait_for(Duration::from_secs(10), "leader 2", || {
        leaders(&brokers) == vec![Some(2), Some(2)]
    })
    .await;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(brokers[0].leader(), Some(2));
    assert_eq!(brokers[0].role(), Role::Follower);
    assert!(brokers[0].state().heartbeat_elapsed() < Duration::from_millis(500));

    let leader = brokers.pop().unwrap();
    leader.shutdown().await;

    let survivor = &brokers[0];
    wait_for(Duration::from_secs(10), "failover to broker 1", || {
        survivor.leader() == Some(1) && survivor.role() == Role::Leader
    })
    .await;

    shutdown_all(brokers).await;
}

#[tokio::test]
async fn test_disabled_election_never_elects() {
    let brokers = start_cluster(ElectionMode::None, &[1, 2], fast_heartbeat).await;

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(leaders(&brokers), vec![None, None]);

    shutdown_all(brokers).await;
}
