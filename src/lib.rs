//! # roomcast
//!
//! `roomcast` is the real-time broadcast core of a forum: every forum,
//! article and poll has a room, and whatever is published to a room is
//! fanned out to all WebSocket listeners subscribed to it.
//!
//! Delivery is built so that one slow listener cannot hold up the others:
//! each subscriber has a small bounded queue, fan-out never waits on a
//! queue, and a subscriber whose queue overflows is disconnected. Each room
//! also rate-limits how fast it accepts publishes.
//!
//! ## Core Modules
//!
//! - `broker`: room keys, rate limiter, subscribers, rooms and the room registry.
//! - `transport`: the WebSocket server, the HTTP publish endpoint and the
//!   per-connection read/write loops.
//! - `config`: loading server and room policy from files and the environment.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod config;
pub mod transport;
pub mod utils;
