//! The messaging protocol spoken on a broker's messaging port.
//!
//! Each connection gets its own [`MessagingSession`] holding the exchange and
//! queue the client declared last and, while subscribed, the task delivering
//! queue messages to the client.
//!
//! | Request | Reply |
//! |---|---|
//! | `exchange <type> <name>` | `ok` or an error |
//! | `queue <name>` | `ok` |
//! | `bind <binding-key>` | `ok` or an error |
//! | `publish <routing-key> <message...>` | `ok` or an error |
//! | `subscribe` | `ok`, then one message per line until `stop` |
//! | `stop` | nothing; only valid while subscribed |
//! | `exit` | `ok bye`, then the session ends |
//!
//! While subscribed every command other than `stop` is ignored.

use crate::broker::error::RoutingError;
use crate::broker::exchange::{Exchange, ExchangeType};
use crate::broker::queue::Queue;
use crate::broker::routing::RoutingTable;
use crate::monitoring::MonitoringNotifier;
use crate::network::connection::{LineConnection, LineWriter};
use crate::protocol::USAGE_ERROR;
use log::debug;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const BANNER: &str = "ok SMQP";

struct Subscription {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct MessagingSession {
    id: Uuid,
    routing: Arc<RoutingTable>,
    notifier: Option<Arc<MonitoringNotifier>>,
    writer: LineWriter,
    origin: SocketAddr,
    shutdown: CancellationToken,
    current_exchange: Option<Arc<Exchange>>,
    current_queue: Option<Arc<Queue>>,
    subscription: Option<Subscription>,
    finished: bool,
}

impl MessagingSession {
    /// Creates a session writing replies and subscription messages to `writer`.
    ///
    /// `origin` is the broker address reported in monitoring datagrams.
    pub fn new(
        routing: Arc<RoutingTable>,
        notifier: Option<Arc<MonitoringNotifier>>,
        writer: LineWriter,
        origin: SocketAddr,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            routing,
            notifier,
            writer,
            origin,
            shutdown,
            current_exchange: None,
            current_queue: None,
            subscription: None,
            finished: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|subscription| !subscription.handle.is_finished())
    }

    /// Whether the client asked to end the session.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn current_exchange(&self) -> Option<&Arc<Exchange>> {
        self.current_exchange.as_ref()
    }

    pub fn current_queue(&self) -> Option<&Arc<Queue>> {
        self.current_queue.as_ref()
    }

    /// Executes one command line and returns the reply to send, if any.
    pub async fn process_command(&mut self, line: &str) -> Option<String> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let command = parts.first().copied().unwrap_or("");

        if self.is_subscribed() {
            if command == "stop" {
                self.stop().await;
            }
            return None;
        }

        let result = match command {
            "exchange" => self.declare_exchange(&parts),
            "queue" => self.declare_queue(&parts),
            "bind" => self.bind(&parts),
            "publish" => self.publish(&parts).await,
            "subscribe" => return self.subscribe().err().map(|e| e.to_string()),
            "exit" => {
                self.finished = true;
                Ok("ok bye".to_string())
            }
            _ => Ok(USAGE_ERROR.to_string()),
        };

        Some(result.unwrap_or_else(|e| e.to_string()))
    }

    fn declare_exchange(&mut self, parts: &[&str]) -> Result<String, RoutingError> {
        let [_, kind, name] = parts else {
            return Ok("error usage: exchange <type> <name>".to_string());
        };
        let kind: ExchangeType = kind.parse()?;
        self.current_exchange = Some(self.routing.declare_exchange(kind, name)?);
        Ok("ok".to_string())
    }

    fn declare_queue(&mut self, parts: &[&str]) -> Result<String, RoutingError> {
        let [_, name] = parts else {
            return Ok("error usage: queue <name>".to_string());
        };
        self.current_queue = Some(self.routing.declare_queue(name));
        Ok("ok".to_string())
    }

    fn bind(&mut self, parts: &[&str]) -> Result<String, RoutingError> {
        let [_, key] = parts else {
            return Ok("error usage: bind <binding-key>".to_string());
        };
        let exchange = self
            .current_exchange
            .as_ref()
            .ok_or(RoutingError::NoExchangeDeclared)?;
        let queue = self
            .current_queue
            .as_ref()
            .ok_or(RoutingError::NoQueueDeclared)?;
        exchange.bind(key, queue.clone());
        Ok("ok".to_string())
    }

    async fn publish(&mut self, parts: &[&str]) -> Result<String, RoutingError> {
        if parts.len() < 3 {
            return Ok("error usage: publish <routing-key> <message>".to_string());
        }
        let exchange = self
            .current_exchange
            .as_ref()
            .ok_or(RoutingError::NoExchangeDeclared)?;

        let routing_key = parts[1];
        let message = parts[2..].join(" ");
        let delivered = exchange.publish(routing_key, &message);
        debug!(
            "[{}] Published to {} queue(s) via '{}' with key '{}'",
            self.id,
            delivered,
            exchange.name(),
            routing_key
        );

        if let Some(notifier) = &self.notifier {
            notifier.notify(self.origin, routing_key).await;
        }
        Ok("ok".to_string())
    }

    /// Starts delivering the current queue; the queue itself sends the `ok`.
    fn subscribe(&mut self) -> Result<(), RoutingError> {
        let queue = self
            .current_queue
            .clone()
            .ok_or(RoutingError::NoQueueDeclared)?;

        let token = self.shutdown.child_token();
        let writer = self.writer.clone();
        let dispatch_token = token.clone();
        let session = self.id;
        let handle = tokio::spawn(async move {
            if let Err(e) = queue.dispatch(&writer, &dispatch_token).await {
                debug!("[{}] Subscription to '{}' ended: {}", session, queue.name(), e);
            }
        });

        debug!("[{}] Subscribed", self.id);
        self.subscription = Some(Subscription { token, handle });
        Ok(())
    }

    /// Cancels the active subscription and waits for its task to finish.
    pub async fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.token.cancel();
            if let Err(e) = subscription.handle.await {
                debug!("[{}] Subscription task failed: {}", self.id, e);
            }
            debug!("[{}] Subscription stopped", self.id);
        }
    }
}

/// Serves one messaging client until it exits, disconnects or `shutdown` is cancelled.
pub async fn serve(
    stream: TcpStream,
    routing: Arc<RoutingTable>,
    notifier: Option<Arc<MonitoringNotifier>>,
    shutdown: CancellationToken,
) {
    let mut connection = match LineConnection::new(stream) {
        Ok(connection) => connection,
        Err(e) => {
            debug!("Failed to set up messaging session: {}", e);
            return;
        }
    };
    let mut session = MessagingSession::new(
        routing,
        notifier,
        connection.writer(),
        connection.local_addr(),
        shutdown.clone(),
    );
    debug!("[{}] Messaging session from {}", session.id(), connection.peer_addr());

    if connection.send_line(BANNER).await.is_ok() {
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = connection.read_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    debug!("[{}] Read error: {}", session.id(), e);
                    break;
                }
            };

            if let Some(reply) = session.process_command(&line).await {
                if connection.send_line(&reply).await.is_err() {
                    break;
                }
            }
            if session.is_finished() {
                break;
            }
        }
    }

    session.stop().await;
    connection.close().await;
    debug!("[{}] Messaging session closed", session.id());
}
