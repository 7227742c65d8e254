//! Module for communicating with peer brokers over the election protocol.
//!
//! Every interaction is a short-lived round trip: connect, read the peer's
//! banner, send one line, read one reply line, close. A peer that cannot be
//! reached, fails mid-exchange or exceeds the request timeout simply counts as
//! not having responded.

use crate::network::connection::request_reply;
use log::debug;
use std::fmt;
use std::time::Duration;

/// Address and election id of one peer broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: i64,
    pub host: String,
    pub port: u16,
}

impl Peer {
    pub fn new(id: i64, host: &str, port: u16) -> Self {
        Self {
            id,
            host: host.to_string(),
            port,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

/// Implements the four peer interaction patterns the election algorithms use.
#[derive(Debug, Clone)]
pub struct PeerCommunicator {
    own_id: i64,
    peers: Vec<Peer>,
    request_timeout: Option<Duration>,
}

impl PeerCommunicator {
    /// Creates a communicator for broker `own_id`.
    ///
    /// # Arguments
    ///
    /// * `own_id` - The election id of this broker.
    /// * `peers` - The other brokers, in configured order.
    /// * `request_timeout` - Upper bound for one round trip; `None` waits indefinitely.
    ///
    /// # Examples
    ///
    /// ```
    /// use clusterq::broker::leader::peer::{Peer, PeerCommunicator};
    /// use std::time::Duration;
    ///
    /// let peers = vec![Peer::new(2, "127.0.0.1", 7002), Peer::new(3, "127.0.0.1", 7003)];
    /// let communicator = PeerCommunicator::new(1, peers, Some(Duration::from_secs(1)));
    /// assert_eq!(communicator.own_id(), 1);
    /// assert_eq!(communicator.peers().len(), 2);
    /// ```
    pub fn new(own_id: i64, peers: Vec<Peer>, request_timeout: Option<Duration>) -> Self {
        Self {
            own_id,
            peers,
            request_timeout,
        }
    }

    pub fn own_id(&self) -> i64 {
        self.own_id
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Sends `message` to `peer` and returns its reply, or `None` on any failure.
    pub async fn send(&self, peer: &Peer, message: &str) -> Option<String> {
        match request_reply(&peer.host, peer.port, message, self.request_timeout).await {
            Ok(reply) => {
                debug!("Peer {} replied '{}' to '{}'", peer, reply, message);
                Some(reply)
            }
            Err(e) => {
                debug!("Peer {} did not respond to '{}': {}", peer, message, e);
                None
            }
        }
    }

    async fn send_expecting(&self, peer: &Peer, message: &str, expected: &str) -> bool {
        self.send(peer, message)
            .await
            .is_some_and(|reply| reply.starts_with(expected))
    }

    /// Tries peers in configured order and stops at the first reply starting with `expected`.
    pub async fn forward_sequential(&self, message: &str, expected: &str) -> bool {
        for peer in &self.peers {
            if self.send_expecting(peer, message, expected).await {
                return true;
            }
        }
        false
    }

    /// Sends `message` to every peer and returns how many replied with `expected`.
    pub async fn broadcast_all(&self, message: &str, expected: &str) -> usize {
        let mut matched = 0;
        for peer in &self.peers {
            if self.send_expecting(peer, message, expected).await {
                matched += 1;
            }
        }
        matched
    }

    /// Contacts only peers with a higher id than this broker, stopping at the
    /// first reply starting with `expected`. Returns whether any peer matched.
    pub async fn broadcast_to_higher_ids(&self, message: &str, expected: &str) -> bool {
        for peer in self.peers.iter().filter(|peer| peer.id > self.own_id) {
            if self.send_expecting(peer, message, expected).await {
                return true;
            }
        }
        false
    }

    /// Asks every peer for its vote.
    ///
    /// A reply grants the vote when its third token equals this broker's id.
    /// Returns true when strictly more than half of the peers granted it.
    pub async fn majority_vote(&self, message: &str) -> bool {
        let mut granted = 0;
        for peer in &self.peers {
            if let Some(reply) = self.send(peer, message).await {
                if is_vote_for(&reply, self.own_id) {
                    granted += 1;
                }
            }
        }
        debug!(
            "Broker {} received {} of {} votes",
            self.own_id,
            granted,
            self.peers.len()
        );
        granted > self.peers.len() / 2
    }
}

/// Whether a `vote <voter> <granted>` reply grants the vote to `candidate`.
fn is_vote_for(reply: &str, candidate: i64) -> bool {
    reply
        .split_whitespace()
        .nth(2)
        .and_then(|token| token.parse::<i64>().ok())
        == Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::connection::LineConnection;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    /// Starts a fake election peer that answers every request with `reply`
    /// and counts the requests it received.
    async fn fake_peer(id: i64, reply: &'static str) -> (Peer, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut connection = LineConnection::new(stream).unwrap();
                    connection.send_line("ok LEP").await.unwrap();
                    if let Ok(Some(_)) = connection.read_line().await {
                        counter.fetch_add(1, Ordering::SeqCst);
                        connection.send_line(reply).await.unwrap();
                    }
                });
            }
        });
        (Peer::new(id, "127.0.0.1", port), hits)
    }

    async fn unreachable_peer(id: i64) -> Peer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        Peer::new(id, "127.0.0.1", port)
    }

    fn communicator(own_id: i64, peers: Vec<Peer>) -> PeerCommunicator {
        PeerCommunicator::new(own_id, peers, Some(Duration::from_secs(2)))
    }

    #[test]
    fn test_is_vote_for() {
        assert!(is_vote_for("vote 2 1", 1));
        assert!(!is_vote_for("vote 2 3", 1));
        assert!(!is_vote_for("vote 2", 1));
        assert!(!is_vote_for("vote 2 x", 1));
    }

    #[tokio::test]
    async fn test_forward_sequential_stops_at_first_match() {
        let dead = unreachable_peer(2).await;
        let (first, first_hits) = fake_peer(3, "ok").await;
        let (second, second_hits) = fake_peer(4, "ok").await;

        let communicator = communicator(1, vec![dead, first, second]);
        assert!(communicator.forward_sequential("elect 1", "ok").await);
        assert_eq!(first_hits.load(Ordering::SeqCst), 1);
        assert_eq!(second_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_forward_sequential_without_match() {
        let (peer, _) = fake_peer(2, "nope").await;
        let communicator = communicator(1, vec![peer]);
        assert!(!communicator.forward_sequential("elect 1", "ok").await);
    }

    #[tokio::test]
    async fn test_broadcast_all_reaches_every_peer() {
        let (a, a_hits) = fake_peer(2, "ack 2").await;
        let (b, b_hits) = fake_peer(3, "ack 3").await;
        let dead = unreachable_peer(4).await;

        let communicator = communicator(1, vec![a, dead, b]);
        assert_eq!(communicator.broadcast_all("declare 1", "ack").await, 2);
        assert_eq!(a_hits.load(Ordering::SeqCst), 1);
        assert_eq!(b_hits.load(Ordering::SeqCst), 1);
    }

    /// Tests that only higher-id peers are contacted.
    ///
    /// # Purpose
    /// Bully elections must never ask lower-id peers to take over.
    ///
    /// # Steps
    /// 1. Configure one lower and one higher peer.
    /// 2. Broadcast from broker 2.
    /// 3. Verify only the higher peer saw the request.
    #[tokio::test]
    async fn test_broadcast_to_higher_ids_skips_lower_peers() {
        let (lower, lower_hits) = fake_peer(1, "ok").await;
        let (higher, higher_hits) = fake_peer(3, "ok").await;

        let communicator = communicator(2, vec![lower, higher]);
        assert!(communicator.broadcast_to_higher_ids("elect 2", "ok").await);
        assert_eq!(lower_hits.load(Ordering::SeqCst), 0);
        assert_eq!(higher_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_broadcast_to_higher_ids_with_no_higher_peer() {
        let (lower, lower_hits) = fake_peer(1, "ok").await;
        let communicator = communicator(3, vec![lower]);
        assert!(!communicator.broadcast_to_higher_ids("elect 3", "ok").await);
        assert_eq!(lower_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_majority_vote_split_elects_nobody() {
        let (a, _) = fake_peer(2, "vote 2 2").await;
        let (b, _) = fake_peer(3, "vote 3 3").await;
        let (c, _) = fake_peer(4, "vote 4 1").await;

        let communicator = communicator(1, vec![a, b, c]);
        assert!(!communicator.majority_vote("elect 1").await);
    }

    #[tokio::test]
    async fn test_majority_vote_with_two_of_three() {
        let (a, _) = fake_peer(2, "vote 2 1").await;
        let (b, _) = fake_peer(3, "vote 3 1").await;
        let c = unreachable_peer(4).await;

        let communicator = communicator(1, vec![a, b, c]);
        assert!(communicator.majority_vote("elect 1").await);
    }
}
