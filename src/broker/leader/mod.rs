//! Module for leader election and broker leader state.
//!
//! This module contains the election state of a broker, the peer
//! communication primitives, the election algorithms and the heartbeats that
//! keep followers from starting elections while a leader is alive.

pub mod election;
pub mod heartbeat;
pub mod peer;
pub mod state;

pub use election::{DomainRegistration, ElectionCoordinator};
pub use heartbeat::{HeartbeatMonitor, LeaderHeartbeat};
pub use peer::{Peer, PeerCommunicator};
pub use state::{BrokerState, ElectionMode, Role};
