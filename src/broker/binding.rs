//! Module for binding storages.
//!
//! A binding storage remembers which queues are bound to an exchange and
//! under which key, and resolves the routing key of a published message to
//! the queues that should receive it. There is one storage per exchange type:
//!
//! * [`DirectBindings`] delivers to queues bound under exactly the routing key.
//! * [`FanoutBindings`] delivers to every bound queue and ignores the key.
//! * [`TopicBindings`] matches dot-separated keys against patterns where `*`
//!   stands for exactly one segment and `#` for zero or more segments.
//!
//! Resolution returns each queue at most once, in the order it was first
//! reached. Binding the same queue twice under the same key is a no-op.
//!
//! # Example
//! ```
//! use clusterq::broker::binding::TopicBindings;
//! use clusterq::broker::queue::Queue;
//! use std::sync::Arc;
//!
//! let bindings = TopicBindings::new();
//! let audit = Arc::new(Queue::new("audit"));
//! bindings.add_binding("orders.#", audit.clone());
//!
//! assert_eq!(bindings.resolve("orders").len(), 1);
//! assert_eq!(bindings.resolve("orders.eu.created").len(), 1);
//! assert!(bindings.resolve("payments.eu").is_empty());
//! ```

use crate::broker::exchange::ExchangeType;
use crate::broker::queue::Queue;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// Wildcard matching exactly one segment.
pub const SINGLE_WILDCARD: &str = "*";
/// Wildcard matching zero or more segments.
pub const MULTI_WILDCARD: &str = "#";

/// Appends `queue` unless the same queue is already present.
fn push_unique(queues: &mut Vec<Arc<Queue>>, queue: &Arc<Queue>) {
    if !queues.iter().any(|existing| Arc::ptr_eq(existing, queue)) {
        queues.push(queue.clone());
    }
}

/// Exact-match bindings.
#[derive(Debug, Default)]
pub struct DirectBindings {
    routes: DashMap<String, Vec<Arc<Queue>>>,
}

impl DirectBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binding(&self, key: &str, queue: Arc<Queue>) {
        let mut queues = self.routes.entry(key.to_string()).or_default();
        push_unique(&mut queues, &queue);
    }

    pub fn resolve(&self, routing_key: &str) -> Vec<Arc<Queue>> {
        self.routes
            .get(routing_key)
            .map(|queues| queues.clone())
            .unwrap_or_default()
    }
}

/// Bindings that deliver to every bound queue.
#[derive(Debug, Default)]
pub struct FanoutBindings {
    queues: RwLock<Vec<Arc<Queue>>>,
}

impl FanoutBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// The key is accepted for symmetry with the other storages and ignored.
    pub fn add_binding(&self, _key: &str, queue: Arc<Queue>) {
        push_unique(&mut self.queues.write(), &queue);
    }

    pub fn resolve(&self, _routing_key: &str) -> Vec<Arc<Queue>> {
        self.queues.read().clone()
    }
}

#[derive(Debug, Default)]
struct TopicNode {
    children: DashMap<String, Arc<TopicNode>>,
    queues: RwLock<Vec<Arc<Queue>>>,
}

impl TopicNode {
    fn child(&self, segment: &str) -> Option<Arc<TopicNode>> {
        self.children.get(segment).map(|child| child.clone())
    }

    fn child_or_insert(&self, segment: &str) -> Arc<TopicNode> {
        self.children
            .entry(segment.to_string())
            .or_default()
            .clone()
    }

    fn collect(&self, matched: &mut Vec<Arc<Queue>>) {
        for queue in self.queues.read().iter() {
            push_unique(matched, queue);
        }
    }

    /// Walks every branch that can match `segments[index..]` and collects the queues reached.
    ///
    /// `visited` holds the `(node, index)` states already walked. Consecutive
    /// `#` nodes reach the same state along many paths, and each state only
    /// needs to be walked once.
    fn resolve(
        &self,
        segments: &[&str],
        index: usize,
        visited: &mut HashSet<(usize, usize)>,
        matched: &mut Vec<Arc<Queue>>,
    ) {
        if !visited.insert((self as *const TopicNode as usize, index)) {
            return;
        }

        if let Some(multi) = self.child(MULTI_WILDCARD) {
            // `#` absorbs any number of segments, including none.
            for next in index..=segments.len() {
                multi.resolve(segments, next, visited, matched);
            }
        }

        let Some(head) = segments.get(index) else {
            self.collect(matched);
            return;
        };

        if let Some(single) = self.child(SINGLE_WILDCARD) {
            single.resolve(segments, index + 1, visited, matched);
        }
        if *head != SINGLE_WILDCARD && *head != MULTI_WILDCARD {
            if let Some(literal) = self.child(head) {
                literal.resolve(segments, index + 1, visited, matched);
            }
        }
    }
}

/// Pattern bindings stored in a trie keyed by segment.
#[derive(Debug, Default)]
pub struct TopicBindings {
    root: Arc<TopicNode>,
}

impl TopicBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binding(&self, pattern: &str, queue: Arc<Queue>) {
        let mut node = self.root.clone();
        for segment in pattern.split('.') {
            node = node.child_or_insert(segment);
        }
        push_unique(&mut node.queues.write(), &queue);
    }

    pub fn resolve(&self, routing_key: &str) -> Vec<Arc<Queue>> {
        let segments: Vec<&str> = routing_key.split('.').collect();
        let mut matched = Vec::new();
        self.root.resolve(&segments, 0, &mut HashSet::new(), &mut matched);
        matched
    }
}

/// The binding storage of one exchange, selected by exchange type.
#[derive(Debug)]
pub enum Bindings {
    Direct(DirectBindings),
    Fanout(FanoutBindings),
    Topic(TopicBindings),
}

impl Bindings {
    /// Default exchanges route like direct ones.
    pub fn for_type(kind: ExchangeType) -> Self {
        match kind {
            ExchangeType::Default | ExchangeType::Direct => Bindings::Direct(DirectBindings::new()),
            ExchangeType::Fanout => Bindings::Fanout(FanoutBindings::new()),
            ExchangeType::Topic => Bindings::Topic(TopicBindings::new()),
        }
    }

    pub fn add_binding(&self, key: &str, queue: Arc<Queue>) {
        match self {
            Bindings::Direct(bindings) => bindings.add_binding(key, queue),
            Bindings::Fanout(bindings) => bindings.add_binding(key, queue),
            Bindings::Topic(bindings) => bindings.add_binding(key, queue),
        }
    }

    pub fn resolve(&self, routing_key: &str) -> Vec<Arc<Queue>> {
        match self {
            Bindings::Direct(bindings) => bindings.resolve(routing_key),
            Bindings::Fanout(bindings) => bindings.resolve(routing_key),
            Bindings::Topic(bindings) => bindings.resolve(routing_key),
        }
    }
}
