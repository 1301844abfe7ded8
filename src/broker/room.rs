//! Rooms
//!
//! A `Room` holds the subscribers of one topic and fans published payloads
//! out to them. Publishing goes through the room's rate limiter first, then
//! enqueues on every subscriber without waiting on any of them. Subscribers
//! whose queue is full are evicted through their `Closer` and dropped from
//! the set; the rest still receive the payload.
//!
//! Concurrency notes:
//! - fan-out iterates under the read lock, add/remove take the write lock
//! - no lock is held while waiting on the rate limiter

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broker::key::RoomKey;
use crate::broker::limiter::RateLimiter;
use crate::broker::subscriber::{Delivery, Subscriber, SubscriberId};
use crate::utils::error::PublishError;

/// Per-room policy shared by every room of a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    /// Capacity of each subscriber's outbound queue.
    pub queue_capacity: usize,
    /// One publish token is added per interval.
    pub publish_interval: Duration,
    /// Tokens that may accumulate while the room is quiet.
    pub publish_burst: u32,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            publish_interval: Duration::from_millis(100),
            publish_burst: 8,
        }
    }
}

/// Result of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub evicted: usize,
}

#[derive(Debug)]
pub struct Room {
    key: RoomKey,
    config: RoomConfig,
    limiter: RateLimiter,
    members: RwLock<Members>,
}

#[derive(Debug)]
struct Members {
    subscribers: HashMap<SubscriberId, Arc<Subscriber>>,
    /// Set while the room has no subscribers.
    idle_since: Option<Instant>,
}

impl Room {
    pub fn new(key: RoomKey, config: RoomConfig) -> Self {
        let limiter = RateLimiter::new(config.publish_interval, config.publish_burst);
        Self {
            key,
            config,
            limiter,
            members: RwLock::new(Members {
                subscribers: HashMap::new(),
                idle_since: Some(Instant::now()),
            }),
        }
    }

    pub fn key(&self) -> &RoomKey {
        &self.key
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn subscriber_count(&self) -> usize {
        self.members.read().subscribers.len()
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.members.read().subscribers.contains_key(id)
    }

    pub fn add_subscriber(&self, subscriber: Arc<Subscriber>) {
        let mut members = self.members.write();
        members.subscribers.insert(subscriber.id(), subscriber);
        members.idle_since = None;
    }

    /// Removes a subscriber. Returns `false` if it was not a member, which
    /// is not an error: eviction and connection teardown may both remove.
    pub fn remove_subscriber(&self, id: &SubscriberId) -> bool {
        let mut members = self.members.write();
        let removed = members.subscribers.remove(id).is_some();
        if removed && members.subscribers.is_empty() {
            members.idle_since = Some(Instant::now());
        }
        removed
    }

    /// Rate-limits, then delivers `payload` to every current subscriber.
    ///
    /// Fails only if `cancel` fires while waiting for the rate limiter, in
    /// which case nothing is delivered.
    pub async fn publish(
        &self,
        payload: Bytes,
        cancel: &CancellationToken,
    ) -> Result<FanOut, PublishError> {
        self.limiter.acquire(cancel).await?;

        let mut fan_out = FanOut::default();
        let mut dropped = Vec::new();
        {
            let members = self.members.read();
            for (id, subscriber) in &members.subscribers {
                match subscriber.try_deliver(payload.clone()) {
                    Delivery::Queued => fan_out.delivered += 1,
                    Delivery::Full => {
                        warn!(room = %self.key, subscriber = %id, "evicting slow consumer");
                        subscriber.close_slow();
                        fan_out.evicted += 1;
                        dropped.push(*id);
                    }
                    Delivery::Gone => dropped.push(*id),
                }
            }
        }

        for id in &dropped {
            self.remove_subscriber(id);
        }

        debug!(
            room = %self.key,
            bytes = payload.len(),
            delivered = fan_out.delivered,
            evicted = fan_out.evicted,
            "published"
        );
        Ok(fan_out)
    }

    /// True when the room has had no subscribers for at least `grace`.
    pub(crate) fn is_idle_for(&self, grace: Duration, now: Instant) -> bool {
        self.members
            .read()
            .idle_since
            .is_some_and(|since| now.saturating_duration_since(since) >= grace)
    }
}
