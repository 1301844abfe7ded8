//! The `transport` module connects the broadcast core to the network.
//!
//! It runs the WebSocket server, maps subscribe routes to room keys, asks
//! the authenticator for an identity, and runs the per-connection read and
//! write loops that move payloads between sockets and rooms. A separate
//! HTTP listener accepts publishes from outside the room.

pub mod auth;
pub mod connection;
pub mod publish;
pub mod route;
pub mod websocket;

pub use auth::{AllowAnonymous, Authenticator, Identity};
pub use connection::{Connection, ConnectionConfig, ConnectionState, subscribe};
