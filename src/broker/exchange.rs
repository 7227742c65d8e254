//! Module for exchanges.
//!
//! An exchange has a name, an immutable type, and the binding storage that
//! type calls for. Publishing to an exchange resolves the routing key against
//! the storage and appends the message to every resolved queue.

use crate::broker::binding::Bindings;
use crate::broker::error::RoutingError;
use crate::broker::queue::Queue;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeType {
    Default,
    Direct,
    Fanout,
    Topic,
}

impl ExchangeType {
    pub fn valid_types() -> [ExchangeType; 4] {
        [
            ExchangeType::Default,
            ExchangeType::Direct,
            ExchangeType::Fanout,
            ExchangeType::Topic,
        ]
    }
}

impl FromStr for ExchangeType {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(ExchangeType::Default),
            "direct" => Ok(ExchangeType::Direct),
            "fanout" => Ok(ExchangeType::Fanout),
            "topic" => Ok(ExchangeType::Topic),
            _ => Err(RoutingError::InvalidExchangeType(s.to_string())),
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeType::Default => write!(f, "default"),
            ExchangeType::Direct => write!(f, "direct"),
            ExchangeType::Fanout => write!(f, "fanout"),
            ExchangeType::Topic => write!(f, "topic"),
        }
    }
}

/// A named exchange routing messages to bound queues.
///
/// # Examples
///
/// ```
/// use clusterq::broker::exchange::{Exchange, ExchangeType};
/// use clusterq::broker::queue::Queue;
/// use std::sync::Arc;
///
/// let exchange = Exchange::new("logs", ExchangeType::Fanout);
/// let a = Arc::new(Queue::new("a"));
/// let b = Arc::new(Queue::new("b"));
/// exchange.bind("ignored", a.clone());
/// exchange.bind("ignored", b.clone());
///
/// assert_eq!(exchange.publish("any.key", "hello"), 2);
/// assert_eq!(a.try_take().as_deref(), Some("hello"));
/// assert_eq!(b.try_take().as_deref(), Some("hello"));
/// ```
#[derive(Debug)]
pub struct Exchange {
    name: String,
    kind: ExchangeType,
    bindings: Bindings,
}

impl Exchange {
    pub fn new(name: &str, kind: ExchangeType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            bindings: Bindings::for_type(kind),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ExchangeType {
        self.kind
    }

    pub fn bind(&self, key: &str, queue: Arc<Queue>) {
        self.bindings.add_binding(key, queue);
    }

    pub fn route(&self, routing_key: &str) -> Vec<Arc<Queue>> {
        self.bindings.resolve(routing_key)
    }

    /// Appends `message` to every queue the key resolves to and returns how many there were.
    pub fn publish(&self, routing_key: &str, message: &str) -> usize {
        let queues = self.route(routing_key);
        for queue in &queues {
            queue.publish(message);
        }
        queues.len()
    }
}
