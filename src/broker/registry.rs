//! Room registry
//!
//! The `RoomRegistry` maps room keys to rooms. Rooms are created the first
//! time a key is resolved and reused afterwards; at most one `Room` is ever
//! visible for a given key, however many tasks race to create it.
//!
//! The registry is an ordinary value: the server constructs one, wraps it in
//! an `Arc` and hands it to every connection and publisher.
//!
//! Idle rooms are kept forever unless a sweeper is running (see
//! `RoomRegistry::run_sweeper`). Lock order is registry first, then room.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::key::RoomKey;
use crate::broker::room::{FanOut, Room, RoomConfig};
use crate::broker::subscriber::Subscriber;
use crate::utils::error::PublishError;

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomKey, Arc<Room>>>,
    config: RoomConfig,
}

impl RoomRegistry {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.rooms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.read().is_empty()
    }

    /// Returns the room for `key` without creating it.
    pub fn get(&self, key: &RoomKey) -> Option<Arc<Room>> {
        self.rooms.read().get(key).cloned()
    }

    /// Returns the room for `key`, creating it if needed.
    pub fn resolve(&self, key: &RoomKey) -> Arc<Room> {
        if let Some(room) = self.rooms.read().get(key) {
            return room.clone();
        }

        let mut rooms = self.rooms.write();
        rooms
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(room = %key, "creating room");
                Arc::new(Room::new(key.clone(), self.config.clone()))
            })
            .clone()
    }

    /// Resolves `key` and adds `subscriber` to the room as one step, so a
    /// concurrent idle sweep cannot retire the room in between.
    pub fn join(&self, key: &RoomKey, subscriber: Arc<Subscriber>) -> Arc<Room> {
        {
            let rooms = self.rooms.read();
            if let Some(room) = rooms.get(key) {
                room.add_subscriber(subscriber);
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write();
        let room = rooms
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(room = %key, "creating room");
                Arc::new(Room::new(key.clone(), self.config.clone()))
            })
            .clone();
        room.add_subscriber(subscriber);
        room
    }

    /// Publishes `payload` to the room for `key`. Unknown rooms are created.
    pub async fn publish(
        &self,
        key: &RoomKey,
        payload: Bytes,
        cancel: &CancellationToken,
    ) -> Result<FanOut, PublishError> {
        let room = self.resolve(key);
        room.publish(payload, cancel).await
    }

    /// Drops rooms that have had no subscribers for at least `grace`.
    /// Returns how many were removed.
    pub fn sweep_idle(&self, grace: Duration) -> usize {
        let now = Instant::now();
        let mut rooms = self.rooms.write();
        let before = rooms.len();
        rooms.retain(|_, room| !room.is_idle_for(grace, now));
        before - rooms.len()
    }

    /// Periodically sweeps idle rooms until `shutdown` fires.
    pub async fn run_sweeper(
        self: Arc<Self>,
        interval: Duration,
        grace: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = self.sweep_idle(grace);
                    if removed > 0 {
                        info!(removed, remaining = self.len(), "swept idle rooms");
                    }
                }
            }
        }
    }
}
