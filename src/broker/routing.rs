//! Module for the broker-wide exchange and queue registries.
//!
//! Both registries only grow. Declaring an existing name returns the existing
//! entry, so concurrent sessions declaring the same exchange or queue end up
//! sharing one instance.

use crate::broker::error::RoutingError;
use crate::broker::exchange::{Exchange, ExchangeType};
use crate::broker::queue::Queue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::debug;
use std::sync::Arc;

/// Name of the exchange every queue is bound to under its own name.
pub const DEFAULT_EXCHANGE: &str = "default";

#[derive(Debug)]
pub struct RoutingTable {
    exchanges: DashMap<String, Arc<Exchange>>,
    queues: DashMap<String, Arc<Queue>>,
    default_exchange: Arc<Exchange>,
}

impl RoutingTable {
    /// Creates the registries seeded with the `default` exchange.
    pub fn new() -> Self {
        let default_exchange = Arc::new(Exchange::new(DEFAULT_EXCHANGE, ExchangeType::Default));
        let exchanges = DashMap::new();
        exchanges.insert(DEFAULT_EXCHANGE.to_string(), default_exchange.clone());
        Self {
            exchanges,
            queues: DashMap::new(),
            default_exchange,
        }
    }

    /// Returns the exchange called `name`, creating it with `kind` if it does not exist.
    ///
    /// Fails when the exchange exists with a different type; the existing
    /// exchange keeps its type.
    pub fn declare_exchange(&self, kind: ExchangeType, name: &str) -> Result<Arc<Exchange>, RoutingError> {
        let exchange = self
            .exchanges
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Declared {} exchange '{}'", kind, name);
                Arc::new(Exchange::new(name, kind))
            })
            .clone();

        if exchange.kind() != kind {
            return Err(RoutingError::ExchangeTypeConflict {
                name: name.to_string(),
            });
        }
        Ok(exchange)
    }

    /// Returns the queue called `name`, creating it if needed.
    ///
    /// A new queue is bound into the default exchange under its own name.
    pub fn declare_queue(&self, name: &str) -> Arc<Queue> {
        let (queue, created) = match self.queues.entry(name.to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let queue = Arc::new(Queue::new(name));
                entry.insert(queue.clone());
                (queue, true)
            }
        };

        if created {
            debug!("Declared queue '{}'", name);
            self.default_exchange.bind(name, queue.clone());
        }
        queue
    }

    pub fn exchange(&self, name: &str) -> Option<Arc<Exchange>> {
        self.exchanges.get(name).map(|exchange| exchange.clone())
    }

    pub fn queue(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.get(name).map(|queue| queue.clone())
    }

    pub fn default_exchange(&self) -> Arc<Exchange> {
        self.default_exchange.clone()
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.len()
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_default_exchange_exists() {
        let table = RoutingTable::new();
        let exchange = table.exchange(DEFAULT_EXCHANGE).unwrap();
        assert_eq!(exchange.kind(), ExchangeType::Default);
        assert_eq!(table.exchange_count(), 1);
    }

    #[test]
    fn test_declare_exchange_returns_existing() {
        let table = RoutingTable::new();
        let first = table.declare_exchange(ExchangeType::Topic, "events").unwrap();
        let second = table.declare_exchange(ExchangeType::Topic, "events").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    /// Tests that re-declaring with another type is rejected.
    ///
    /// # Purpose
    /// An exchange's type never changes once declared.
    ///
    /// # Steps
    /// 1. Declare `foo` as a topic exchange.
    /// 2. Declare `foo` as a direct exchange and expect a conflict.
    /// 3. Verify `foo` is still a topic exchange.
    #[test]
    fn test_declare_exchange_type_conflict() {
        let table = RoutingTable::new();
        table.declare_exchange(ExchangeType::Topic, "foo").unwrap();

        let result = table.declare_exchange(ExchangeType::Direct, "foo");
        assert!(matches!(result, Err(RoutingError::ExchangeTypeConflict { .. })));
        assert_eq!(table.exchange("foo").unwrap().kind(), ExchangeType::Topic);
    }

    #[test]
    fn test_new_queue_bound_to_default_exchange() {
        let table = RoutingTable::new();
        let queue = table.declare_queue("jobs");
        let again = table.declare_queue("jobs");
        assert!(Arc::ptr_eq(&queue, &again));

        assert_eq!(table.default_exchange().publish("jobs", "work"), 1);
        assert_eq!(queue.try_take().as_deref(), Some("work"));
        assert_eq!(table.queue_count(), 1);
    }

    #[test]
    fn test_concurrent_declarations_share_one_queue() {
        let table = Arc::new(RoutingTable::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || table.declare_queue("shared"))
            })
            .collect();

        let queues: Vec<Arc<Queue>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(queues.iter().all(|q| Arc::ptr_eq(q, &queues[0])));

        // Bound once despite the racing declarations.
        assert_eq!(table.default_exchange().route("shared").len(), 1);
    }
}
