//! Module for the broker process.
//!
//! A [`Broker`] serves two ports: the messaging port, where clients declare
//! exchanges and queues and publish or subscribe, and the election port,
//! where peer brokers run leader election and the leader sends heartbeats.
//! With election enabled a heartbeat monitor starts an election whenever the
//! leader goes silent; with election disabled the broker registers its plain
//! domain with the name service once at startup.

pub mod binding;
pub mod error;
pub mod exchange;
pub mod leader;
pub mod queue;
pub mod routing;

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::leader::election::{DomainRegistration, ElectionCoordinator};
use crate::broker::leader::heartbeat::HeartbeatMonitor;
use crate::broker::leader::peer::PeerCommunicator;
use crate::broker::leader::state::{BrokerState, Role};
use crate::broker::routing::RoutingTable;
use crate::config::ClusterConfig;
use crate::monitoring::MonitoringNotifier;
use crate::nameservice::NameServiceClient;
use crate::network::listener::Listener;
use crate::protocol;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Broker {
    config: ClusterConfig,
    state: Arc<BrokerState>,
    routing: Arc<RoutingTable>,
    coordinator: Arc<ElectionCoordinator>,
    messaging_addr: SocketAddr,
    election_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Broker {
    /// Binds both ports on `broker.host` and starts serving.
    pub async fn start(config: ClusterConfig) -> BrokerResult<Self> {
        let host = config.broker.host.clone();
        let messaging = TcpListener::bind((host.as_str(), config.broker.port))
            .await
            .map_err(|e| BrokerError::Bind(format!("{}:{}: {}", host, config.broker.port, e)))?;
        let election = TcpListener::bind((host.as_str(), config.election.port))
            .await
            .map_err(|e| BrokerError::Bind(format!("{}:{}: {}", host, config.election.port, e)))?;
        Self::start_with_listeners(config, messaging, election).await
    }

    /// Starts serving on already bound listeners.
    ///
    /// The configured ports are ignored; the broker advertises the port the
    /// messaging listener is actually bound to.
    pub async fn start_with_listeners(
        config: ClusterConfig,
        messaging: TcpListener,
        election: TcpListener,
    ) -> BrokerResult<Self> {
        config
            .validate()
            .map_err(|errors| BrokerError::Config(errors.join("; ")))?;

        let shutdown = CancellationToken::new();
        let messaging = Listener::from_listener("SMQP-Listener", messaging)?;
        let election = Listener::from_listener("LEP-Listener", election)?;
        let messaging_addr = messaging.local_addr();
        let election_addr = election.local_addr();

        let state = Arc::new(BrokerState::new(config.election.mode));
        let routing = Arc::new(RoutingTable::new());
        let peers = PeerCommunicator::new(config.election.id, config.peers(), config.peer_timeout());
        let registration = config.name_service.enabled.then(|| DomainRegistration {
            client: NameServiceClient::new(
                &config.name_service.host,
                config.name_service.port,
                config.peer_timeout(),
            ),
            domain: config.broker.domain.clone(),
            election_domain: config.election.domain.clone(),
            address: format!("{}:{}", config.broker.host, messaging_addr.port()),
        });
        let coordinator = Arc::new(ElectionCoordinator::new(
            state.clone(),
            peers,
            config.ping_interval(),
            registration,
            shutdown.clone(),
        ));

        let notifier = match config.monitoring.endpoint() {
            Some((host, port)) => match MonitoringNotifier::connect(&host, port).await {
                Ok(notifier) => Some(Arc::new(notifier)),
                Err(e) => {
                    warn!("Monitoring disabled, cannot reach {}:{}: {}", host, port, e);
                    None
                }
            },
            None => None,
        };

        let mut tasks = Vec::new();
        {
            let routing = routing.clone();
            tasks.push(messaging.spawn(shutdown.child_token(), move |stream, token| {
                protocol::messaging::serve(stream, routing.clone(), notifier.clone(), token)
            }));
        }
        {
            let coordinator = coordinator.clone();
            tasks.push(election.spawn(shutdown.child_token(), move |stream, token| {
                protocol::election::serve(stream, coordinator.clone(), token)
            }));
        }

        if state.mode().is_enabled() {
            let monitor = HeartbeatMonitor::new(
                coordinator.clone(),
                config.poll_interval(),
                config.heartbeat_timeout(),
            );
            tasks.push(monitor.spawn(shutdown.child_token()));
        } else {
            coordinator.register_domain().await;
        }

        info!(
            "Started broker: {} (election {}, id {})",
            config.broker.component_id, config.election.mode, config.election.id
        );

        Ok(Self {
            config,
            state,
            routing,
            coordinator,
            messaging_addr,
            election_addr,
            shutdown,
            tasks,
        })
    }

    pub fn id(&self) -> i64 {
        self.config.election.id
    }

    /// The current leader's election id, if one is known.
    pub fn leader(&self) -> Option<i64> {
        self.state.leader()
    }

    pub fn role(&self) -> Role {
        self.state.role()
    }

    pub fn state(&self) -> &Arc<BrokerState> {
        &self.state
    }

    pub fn routing(&self) -> &Arc<RoutingTable> {
        &self.routing
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn messaging_addr(&self) -> SocketAddr {
        self.messaging_addr
    }

    pub fn election_addr(&self) -> SocketAddr {
        self.election_addr
    }

    /// Starts an election from this broker and waits for it to finish locally.
    pub async fn initiate_election(&self) {
        self.coordinator.initiate_election().await;
    }

    /// Stops listeners, sessions, the heartbeat monitor and the leader heartbeat.
    pub async fn shutdown(self) {
        self.coordinator.stop();
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Broker {} shutdown complete.", self.config.broker.component_id);
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("id", &self.id())
            .field("messaging_addr", &self.messaging_addr)
            .field("election_addr", &self.election_addr)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
