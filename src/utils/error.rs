//! The `error` module defines the error types used within `roomcast`.
//!
//! Room and registry operations only fail through cancellation; everything
//! else that can go wrong belongs to a single connection and never leaks
//! into shared room state.

use std::time::Duration;

use thiserror::Error;

/// A room key or subscribe route could not be built from caller input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomKeyError {
    #[error("room type is required")]
    MissingType,
    #[error("unknown room type: {0}")]
    UnknownType(String),
    #[error("room id is required")]
    MissingId,
    #[error("no room route matches {0}")]
    UnknownRoute(String),
}

/// A publish did not reach the fan-out stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The rate limiter wait was cancelled; the payload was not delivered.
    #[error("publish cancelled while waiting for the room rate limiter")]
    Cancelled,
}

/// Terminal condition of one subscribed connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The subscriber's queue overflowed and it was dropped as a slow consumer.
    #[error("connection evicted as a slow consumer")]
    Evicted,
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
    #[error("connection cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),
}

impl ConnectionError {
    /// True for endings that are part of a normal client lifecycle.
    pub fn is_normal_close(&self) -> bool {
        matches!(
            self,
            ConnectionError::Cancelled
                | ConnectionError::Transport(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
                )
        )
    }
}
