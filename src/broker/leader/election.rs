//! Module for leader election.
//!
//! The [`ElectionCoordinator`] drives one of three election algorithms over
//! the election protocol, both as the broker that starts an election and as
//! the broker answering `elect` and `declare` requests from its peers.
//!
//! * **Ring** passes `elect <id>` around the configured peer order, carrying the
//!   highest id seen. The broker that receives its own id back becomes leader.
//! * **Bully** challenges every peer with a higher id. A broker that hears from
//!   none of them becomes leader.
//! * **Raft** asks every peer for its vote in a single round. A strict majority
//!   of granted votes makes the candidate leader.
//!
//! A leader announces itself with `declare <id>`, starts pinging its peers and
//! registers the election domain with the name service.

use crate::broker::leader::heartbeat::LeaderHeartbeat;
use crate::broker::leader::peer::PeerCommunicator;
use crate::broker::leader::state::{BrokerState, ElectionMode, Role};
use crate::nameservice::NameServiceClient;
use log::{debug, error, info};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where and under which names a broker registers its messaging address.
#[derive(Debug, Clone)]
pub struct DomainRegistration {
    pub client: NameServiceClient,
    /// Registered at startup when election is disabled.
    pub domain: String,
    /// Registered by whichever broker wins an election.
    pub election_domain: String,
    /// Messaging address in `host:port` form.
    pub address: String,
}

/// Work a responder still has to do after its reply was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// Announce this broker as leader.
    DeclareLeadership,
    /// Pass `elect <candidate>` on to the next reachable peer.
    ForwardElection { candidate: i64 },
    /// Challenge the peers with higher ids and take over if none answers.
    ChallengeHigherPeers,
}

/// The answer to an `elect` request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElectionResponse {
    pub reply: Option<String>,
    pub follow_up: Option<FollowUp>,
}

impl ElectionResponse {
    fn with_reply(reply: String, follow_up: Option<FollowUp>) -> Self {
        Self {
            reply: Some(reply),
            follow_up,
        }
    }
}

pub struct ElectionCoordinator {
    state: Arc<BrokerState>,
    peers: PeerCommunicator,
    ping_interval: Duration,
    registration: Option<DomainRegistration>,
    leader_heartbeat: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl ElectionCoordinator {
    /// Creates a coordinator.
    ///
    /// # Arguments
    ///
    /// * `state` - The election state shared with the rest of the broker.
    /// * `peers` - Communicator for the other brokers of the cluster.
    /// * `ping_interval` - How often a leader pings its peers.
    /// * `registration` - Name service registration, if any.
    /// * `shutdown` - Parent token of the leader heartbeat task.
    pub fn new(
        state: Arc<BrokerState>,
        peers: PeerCommunicator,
        ping_interval: Duration,
        registration: Option<DomainRegistration>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state,
            peers,
            ping_interval,
            registration,
            leader_heartbeat: Mutex::new(None),
            shutdown,
        }
    }

    pub fn own_id(&self) -> i64 {
        self.peers.own_id()
    }

    pub fn state(&self) -> &Arc<BrokerState> {
        &self.state
    }

    pub fn mode(&self) -> ElectionMode {
        self.state.mode()
    }

    fn elect_message(&self, candidate: i64) -> String {
        format!("elect {}", candidate)
    }

    /// Starts an election from this broker and runs it to completion.
    pub async fn initiate_election(&self) {
        let own_id = self.own_id();
        self.state.set_role(Role::Candidate);
        self.state.clear_leader();
        let message = self.elect_message(own_id);

        match self.mode() {
            ElectionMode::Ring => {
                info!("Broker {} initiating RING election", own_id);
                if !self.peers.forward_sequential(&message, "ok").await {
                    debug!("Broker {} could not reach any ring successor", own_id);
                }
            }
            ElectionMode::Bully => {
                info!("Broker {} initiating BULLY election", own_id);
                if !self.peers.broadcast_to_higher_ids(&message, "ok").await {
                    info!(
                        "Broker {} received no responses, declaring itself as leader",
                        own_id
                    );
                    self.become_leader().await;
                }
            }
            ElectionMode::Raft => {
                info!("Broker {} initiating RAFT election", own_id);
                if self.peers.majority_vote(&message).await {
                    info!(
                        "Broker {} received majority of votes, declaring itself as leader",
                        own_id
                    );
                    self.become_leader().await;
                } else {
                    info!("Broker {} received not enough votes for RAFT election", own_id);
                }
            }
            ElectionMode::None => debug!("Broker {} has election disabled", own_id),
        }
    }

    /// Applies an `elect <sender>` request to the local state.
    ///
    /// The caller sends [`ElectionResponse::reply`] first and then passes the
    /// follow-up to [`ElectionCoordinator::complete`].
    pub fn respond_to_elect(&self, sender: i64) -> ElectionResponse {
        let own_id = self.own_id();
        self.state.clear_leader();

        match self.mode() {
            ElectionMode::Ring if sender == own_id => {
                self.state.set_role(Role::Leader);
                self.state.set_leader_id(own_id);
                ElectionResponse::with_reply("ok".to_string(), Some(FollowUp::DeclareLeadership))
            }
            ElectionMode::Ring => {
                let candidate = sender.max(own_id);
                self.state.set_role(if candidate == sender {
                    Role::Follower
                } else {
                    Role::Candidate
                });
                ElectionResponse::with_reply(
                    "ok".to_string(),
                    Some(FollowUp::ForwardElection { candidate }),
                )
            }
            ElectionMode::Bully => {
                self.state.set_role(Role::Candidate);
                let follow_up = (own_id > sender).then_some(FollowUp::ChallengeHigherPeers);
                ElectionResponse::with_reply("ok".to_string(), follow_up)
            }
            ElectionMode::Raft => {
                self.state.set_role(Role::Candidate);
                let granted = match self.state.try_vote(sender) {
                    Ok(candidate) => candidate,
                    Err(existing) => existing,
                };
                ElectionResponse::with_reply(format!("vote {} {}", own_id, granted), None)
            }
            ElectionMode::None => ElectionResponse::default(),
        }
    }

    /// Runs the work left over from [`ElectionCoordinator::respond_to_elect`].
    pub async fn complete(&self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::DeclareLeadership => self.declare_leader().await,
            FollowUp::ForwardElection { candidate } => {
                let message = self.elect_message(candidate);
                self.peers.forward_sequential(&message, "ok").await;
            }
            FollowUp::ChallengeHigherPeers => {
                let message = self.elect_message(self.own_id());
                if !self.peers.broadcast_to_higher_ids(&message, "ok").await {
                    self.become_leader().await;
                }
            }
        }
    }

    /// Applies `declare <leader_id>` and returns the acknowledgment, if any.
    pub async fn handle_declare(&self, leader_id: i64) -> Option<String> {
        let own_id = self.own_id();
        match self.mode() {
            ElectionMode::Raft => {
                self.state.reset_vote();
                self.state.set_role(Role::Follower);
            }
            ElectionMode::Bully => self.state.set_role(Role::Follower),
            ElectionMode::Ring => {
                if leader_id != own_id {
                    let message = format!("declare {}", leader_id);
                    self.peers.forward_sequential(&message, "ack").await;
                }
            }
            ElectionMode::None => {}
        }

        self.state.set_leader_id(leader_id);
        debug!("Broker {} acknowledges leader {}", own_id, leader_id);
        self.mode()
            .is_enabled()
            .then(|| format!("ack {}", own_id))
    }

    /// Records a heartbeat from the leader.
    pub fn handle_ping(&self) -> &'static str {
        self.state.touch_heartbeat();
        "pong"
    }

    async fn become_leader(&self) {
        self.state.set_role(Role::Leader);
        self.state.set_leader_id(self.own_id());
        self.declare_leader().await;
    }

    /// Announces this broker as leader, starts pinging peers and registers the
    /// election domain.
    pub async fn declare_leader(&self) {
        let own_id = self.own_id();
        let message = format!("declare {}", own_id);
        match self.mode() {
            ElectionMode::Ring => {
                self.peers.forward_sequential(&message, "ack").await;
            }
            ElectionMode::Bully | ElectionMode::Raft => {
                let acks = self.peers.broadcast_all(&message, "ack").await;
                debug!("Broker {} leadership acknowledged by {} peers", own_id, acks);
            }
            ElectionMode::None => {}
        }
        info!("Broker {} is now the leader", own_id);

        self.start_leader_heartbeat();
        self.register_domain().await;
    }

    fn start_leader_heartbeat(&self) {
        let token = self.shutdown.child_token();
        if let Some(previous) = self.leader_heartbeat.lock().replace(token.clone()) {
            previous.cancel();
        }

        LeaderHeartbeat::new(
            self.peers.peers().to_vec(),
            self.state.clone(),
            self.ping_interval,
            self.peers.request_timeout(),
        )
        .spawn(token);
    }

    /// Registers this broker's messaging address with the name service.
    ///
    /// Uses the plain domain when election is disabled and the election domain
    /// otherwise. Failures are logged and otherwise ignored.
    pub async fn register_domain(&self) {
        let Some(registration) = &self.registration else {
            debug!("Broker {} has no name service configured", self.own_id());
            return;
        };
        let domain = if self.mode().is_enabled() {
            &registration.election_domain
        } else {
            &registration.domain
        };

        match registration.client.register(domain, &registration.address).await {
            Ok(()) => info!("Successfully registered broker domain: {}", domain),
            Err(e) => error!(
                "Domain registration failed for broker-domain: {}. Unable to reach name service at {}: {}",
                domain,
                registration.client.endpoint(),
                e
            ),
        }
    }

    /// Stops the leader heartbeat, if one is running.
    pub fn stop(&self) {
        if let Some(token) = self.leader_heartbeat.lock().take() {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for ElectionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectionCoordinator")
            .field("own_id", &self.own_id())
            .field("mode", &self.mode())
            .field("role", &self.state.role())
            .field("leader", &self.state.leader())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::leader::peer::Peer;
    use crate::broker::leader::state::{NO_LEADER, NO_VOTE};

    /// Coordinator whose single peer is unreachable.
    fn isolated(own_id: i64, mode: ElectionMode) -> ElectionCoordinator {
        let peers = PeerCommunicator::new(
            own_id,
            vec![Peer::new(own_id + 1, "127.0.0.1", 1)],
            Some(Duration::from_millis(200)),
        );
        ElectionCoordinator::new(
            Arc::new(BrokerState::new(mode)),
            peers,
            Duration::from_millis(100),
            None,
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_ring_elect_with_own_id_wins() {
        let coordinator = isolated(2, ElectionMode::Ring);
        let response = coordinator.respond_to_elect(2);
        assert_eq!(response.reply.as_deref(), Some("ok"));
        assert_eq!(response.follow_up, Some(FollowUp::DeclareLeadership));
        assert_eq!(coordinator.state().role(), Role::Leader);
        assert_eq!(coordinator.state().leader(), Some(2));
    }

    #[test]
    fn test_ring_elect_forwards_highest_id() {
        let coordinator = isolated(2, ElectionMode::Ring);
        coordinator.state().set_leader_id(7);

        let response = coordinator.respond_to_elect(5);
        assert_eq!(
            response.follow_up,
            Some(FollowUp::ForwardElection { candidate: 5 })
        );
        assert_eq!(coordinator.state().role(), Role::Follower);
        assert_eq!(coordinator.state().leader_id(), NO_LEADER);

        let response = coordinator.respond_to_elect(1);
        assert_eq!(
            response.follow_up,
            Some(FollowUp::ForwardElection { candidate: 2 })
        );
        assert_eq!(coordinator.state().role(), Role::Candidate);
    }

    #[test]
    fn test_bully_elect_challenges_only_from_lower_sender() {
        let coordinator = isolated(2, ElectionMode::Bully);
        let response = coordinator.respond_to_elect(1);
        assert_eq!(response.reply.as_deref(), Some("ok"));
        assert_eq!(response.follow_up, Some(FollowUp::ChallengeHigherPeers));

        let response = coordinator.respond_to_elect(3);
        assert_eq!(response.reply.as_deref(), Some("ok"));
        assert_eq!(response.follow_up, None);
        assert_eq!(coordinator.state().role(), Role::Candidate);
    }

    /// Tests vote granting in RAFT mode.
    ///
    /// # Purpose
    /// A broker grants one vote per term and tells later candidates who holds it.
    ///
    /// # Steps
    /// 1. Receive `elect 1` and grant the vote.
    /// 2. Receive `elect 3` and report the existing vote for broker 1.
    /// 3. Receive `declare 1`, which resets the vote and makes the broker a follower.
    #[tokio::test]
    async fn test_raft_single_vote_until_declare() {
        let coordinator = isolated(2, ElectionMode::Raft);

        assert_eq!(
            coordinator.respond_to_elect(1).reply.as_deref(),
            Some("vote 2 1")
        );
        assert_eq!(
            coordinator.respond_to_elect(3).reply.as_deref(),
            Some("vote 2 1")
        );
        assert_eq!(coordinator.state().role(), Role::Candidate);

        assert_eq!(coordinator.handle_declare(1).await.as_deref(), Some("ack 2"));
        assert_eq!(coordinator.state().voted_for(), NO_VOTE);
        assert_eq!(coordinator.state().role(), Role::Follower);
        assert_eq!(coordinator.state().leader(), Some(1));
    }

    #[tokio::test]
    async fn test_none_mode_is_silent() {
        let coordinator = isolated(2, ElectionMode::None);
        assert_eq!(coordinator.respond_to_elect(1), ElectionResponse::default());
        assert_eq!(coordinator.handle_declare(1).await, None);
        assert_eq!(coordinator.state().leader(), Some(1));
    }

    #[test]
    fn test_ping_refreshes_heartbeat() {
        let coordinator = isolated(1, ElectionMode::Bully);
        coordinator.state().set_last_heartbeat_millis(0);
        assert_eq!(coordinator.handle_ping(), "pong");
        assert!(coordinator.state().heartbeat_elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_bully_without_reachable_peers_becomes_leader() {
        let coordinator = isolated(1, ElectionMode::Bully);
        coordinator.initiate_election().await;
        assert_eq!(coordinator.state().role(), Role::Leader);
        assert_eq!(coordinator.state().leader(), Some(1));
        coordinator.stop();
    }

    #[tokio::test]
    async fn test_raft_without_votes_stays_candidate() {
        let coordinator = isolated(1, ElectionMode::Raft);
        coordinator.initiate_election().await;
        assert_eq!(coordinator.state().role(), Role::Candidate);
        assert_eq!(coordinator.state().leader(), None);
    }
}
