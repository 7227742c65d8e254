//! Module for the broker election state.
//!
//! The [`Role`] enum represents the different roles a broker can hold.
//! A broker can be a follower, a candidate in an election, or a leader.
//!
//! [`BrokerState`] holds the election status of one broker. Every field is an
//! independent atomic: readers may briefly observe a role and a leader id that
//! disagree while a transition is in flight.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::time::Duration;

/// Sentinel for "no known leader".
pub const NO_LEADER: i64 = -1;
/// Sentinel for "no vote cast this term".
pub const NO_VOTE: i64 = -1;

/// The `Role` enum represents the different roles a broker can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// The broker follows the current leader.
    #[default]
    Follower,
    /// The broker is taking part in an election.
    Candidate,
    /// The broker is the leader and sends heartbeats to its peers.
    Leader,
}

impl Role {
    fn to_u8(self) -> u8 {
        match self {
            Role::Follower => 0,
            Role::Candidate => 1,
            Role::Leader => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Role::Candidate,
            2 => Role::Leader,
            _ => Role::Follower,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => write!(f, "Follower"),
            Role::Candidate => write!(f, "Candidate"),
            Role::Leader => write!(f, "Leader"),
        }
    }
}

/// The leader election algorithm a cluster runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ElectionMode {
    /// Election disabled; the broker registers its plain domain at startup.
    #[default]
    None,
    Ring,
    Bully,
    /// Single-round majority vote.
    Raft,
}

impl ElectionMode {
    pub fn is_enabled(self) -> bool {
        self != ElectionMode::None
    }
}

impl FromStr for ElectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ElectionMode::None),
            "ring" => Ok(ElectionMode::Ring),
            "bully" => Ok(ElectionMode::Bully),
            "raft" => Ok(ElectionMode::Raft),
            other => Err(format!("unknown election mode '{}'", other)),
        }
    }
}

/// Unrecognised modes disable election.
impl From<String> for ElectionMode {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl From<ElectionMode> for String {
    fn from(mode: ElectionMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for ElectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionMode::None => write!(f, "none"),
            ElectionMode::Ring => write!(f, "ring"),
            ElectionMode::Bully => write!(f, "bully"),
            ElectionMode::Raft => write!(f, "raft"),
        }
    }
}

/// Concurrently shared election status of one broker.
#[derive(Debug)]
pub struct BrokerState {
    mode: ElectionMode,
    role: AtomicU8,
    leader_id: AtomicI64,
    voted_for: AtomicI64,
    last_heartbeat_ms: AtomicI64,
}

impl BrokerState {
    /// Creates a follower with no known leader, no vote and a fresh heartbeat.
    pub fn new(mode: ElectionMode) -> Self {
        Self {
            mode,
            role: AtomicU8::new(Role::Follower.to_u8()),
            leader_id: AtomicI64::new(NO_LEADER),
            voted_for: AtomicI64::new(NO_VOTE),
            last_heartbeat_ms: AtomicI64::new(now_millis()),
        }
    }

    pub fn mode(&self) -> ElectionMode {
        self.mode
    }

    pub fn role(&self) -> Role {
        Role::from_u8(self.role.load(Ordering::SeqCst))
    }

    pub fn set_role(&self, role: Role) {
        self.role.store(role.to_u8(), Ordering::SeqCst);
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    /// Raw leader id, [`NO_LEADER`] when unknown.
    pub fn leader_id(&self) -> i64 {
        self.leader_id.load(Ordering::SeqCst)
    }

    pub fn leader(&self) -> Option<i64> {
        match self.leader_id() {
            NO_LEADER => None,
            id => Some(id),
        }
    }

    pub fn set_leader_id(&self, id: i64) {
        self.leader_id.store(id, Ordering::SeqCst);
    }

    pub fn clear_leader(&self) {
        self.set_leader_id(NO_LEADER);
    }

    pub fn voted_for(&self) -> i64 {
        self.voted_for.load(Ordering::SeqCst)
    }

    pub fn set_voted_for(&self, id: i64) {
        self.voted_for.store(id, Ordering::SeqCst);
    }

    pub fn reset_vote(&self) {
        self.set_voted_for(NO_VOTE);
    }

    /// Grants the vote to `candidate` if none was cast yet.
    ///
    /// Returns `Ok(candidate)` when the vote was recorded, or `Err(existing)`
    /// with the broker that already holds it.
    pub fn try_vote(&self, candidate: i64) -> Result<i64, i64> {
        self.voted_for
            .compare_exchange(NO_VOTE, candidate, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| candidate)
    }

    pub fn last_heartbeat_millis(&self) -> i64 {
        self.last_heartbeat_ms.load(Ordering::SeqCst)
    }

    pub fn set_last_heartbeat_millis(&self, timestamp: i64) {
        self.last_heartbeat_ms.store(timestamp, Ordering::SeqCst);
    }

    /// Records that the leader was heard from just now.
    pub fn touch_heartbeat(&self) {
        self.set_last_heartbeat_millis(now_millis());
    }

    /// Time since the last heartbeat, zero if the clock went backwards.
    pub fn heartbeat_elapsed(&self) -> Duration {
        let elapsed = now_millis() - self.last_heartbeat_millis();
        Duration::from_millis(elapsed.max(0) as u64)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
