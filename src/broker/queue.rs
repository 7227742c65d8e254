//! Module for named message queues.
//!
//! A [`Queue`] is an unbounded FIFO of message payloads. Publishing never
//! blocks. A subscriber drains the queue through [`Queue::dispatch`], which
//! suspends while the queue is empty and resumes as soon as a message arrives.
//!
//! # Example
//! ```
//! use clusterq::broker::queue::Queue;
//!
//! let queue = Queue::new("orders");
//! queue.publish("first");
//! queue.publish("second");
//! assert_eq!(queue.len(), 2);
//! assert_eq!(queue.try_take().as_deref(), Some("first"));
//! ```

use crate::network::connection::LineWriter;
use crate::network::error::NetworkResult;
use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub struct Queue {
    name: String,
    messages: Mutex<VecDeque<String>>,
    available: Notify,
}

impl Queue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            messages: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a message and wakes one waiting subscriber.
    pub fn publish(&self, message: &str) {
        self.messages.lock().push_back(message.to_string());
        self.available.notify_one();
    }

    /// Removes the head of the queue without waiting.
    pub fn try_take(&self) -> Option<String> {
        self.messages.lock().pop_front()
    }

    /// Removes the head of the queue, waiting for a message if it is empty.
    ///
    /// Each message is handed to exactly one caller.
    pub async fn take(&self) -> String {
        loop {
            let notified = self.available.notified();
            if let Some(message) = self.try_take() {
                return message;
            }
            notified.await;
        }
    }

    /// Puts a message back at the head, ahead of everything still pending.
    pub fn requeue_front(&self, message: String) {
        self.messages.lock().push_front(message);
        self.available.notify_one();
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Delivers messages to a subscriber connection until cancelled.
    ///
    /// Sends `ok` first, then one line per message in publish order. A message
    /// whose write fails is put back at the head of the queue and the error is
    /// returned, so a dropped subscriber loses nothing.
    pub async fn dispatch(&self, writer: &LineWriter, token: &CancellationToken) -> NetworkResult<()> {
        writer.send_line("ok").await?;
        debug!("Subscriber attached to queue '{}'", self.name);

        loop {
            let message = tokio::select! {
                _ = token.cancelled() => break,
                message = self.take() => message,
            };

            if let Err(e) = writer.send_line(&message).await {
                self.requeue_front(message);
                debug!("Subscriber of queue '{}' went away: {}", self.name, e);
                return Err(e);
            }
        }

        debug!("Subscription to queue '{}' stopped", self.name);
        Ok(())
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("pending", &self.len())
            .finish()
    }
}
