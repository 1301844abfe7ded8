//! Subscribers
//!
//! A `Subscriber` is the room-side half of one listener: the sending end of
//! a small bounded queue plus a `Closer` that can force the listener's
//! transport shut. The receiving end of the queue belongs to whoever
//! drains it to the network (see `transport::connection`).
//!
//! The queue is deliberately small. A full queue means the consumer cannot
//! keep up, and the room responds by evicting it instead of buffering more
//! or blocking the publisher.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Unique identifier of a subscriber within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Capability to force a subscriber's transport closed.
///
/// Implementations must be idempotent and must not block: `close_slow` is
/// called from inside a room's fan-out.
pub trait Closer: Send + Sync {
    fn close_slow(&self);
}

/// Outcome of a single non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue at capacity; the subscriber is a slow consumer.
    Full,
    /// The draining side is gone.
    Gone,
}

pub struct Subscriber {
    id: SubscriberId,
    sender: mpsc::Sender<Bytes>,
    capacity: usize,
    closer: Arc<dyn Closer>,
}

impl Subscriber {
    /// Creates a subscriber whose queue holds at most `capacity` payloads.
    ///
    /// Returns the receiving half of the queue for the caller to drain.
    pub fn new(capacity: usize, closer: Arc<dyn Closer>) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let subscriber = Arc::new(Self {
            id: SubscriberId::new(),
            sender,
            capacity,
            closer,
        });
        (subscriber, receiver)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues `payload` without waiting.
    pub fn try_deliver(&self, payload: Bytes) -> Delivery {
        match self.sender.try_send(payload) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        }
    }

    pub fn close_slow(&self) {
        self.closer.close_slow();
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .finish()
    }
}
