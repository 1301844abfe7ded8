//! The `broker` module is the in-memory broadcast core: room keys, the
//! per-room rate limiter, subscribers, rooms and the room registry.

pub mod key;
pub mod limiter;
pub mod registry;
pub mod room;
pub mod subscriber;

pub use key::{RoomKey, TopicType};
pub use registry::RoomRegistry;
pub use room::{FanOut, Room, RoomConfig};
pub use subscriber::{Closer, Delivery, Subscriber, SubscriberId};

#[cfg(test)]
mod tests;
