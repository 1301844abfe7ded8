use std::time::Duration;

use serde::Deserialize;
use tungstenite::protocol::WebSocketConfig;

use crate::broker::RoomConfig;
use crate::transport::ConnectionConfig;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server: ServerSettings,
    pub rooms: RoomSettings,
    pub logging: LoggingSettings,
}

/// Where the server listens and how large an inbound message may be.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    /// WebSocket subscribe port.
    pub port: u16,
    /// HTTP publish port.
    pub publish_port: u16,
    /// Caps WebSocket messages and HTTP publish bodies alike.
    pub max_message_bytes: usize,
    pub handshake_timeout_secs: u64,
    /// How long shutdown waits for open connections to close.
    pub shutdown_grace_secs: u64,
}

/// Room and per-connection delivery policy.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RoomSettings {
    pub queue_capacity: usize,
    pub publish_interval_ms: u64,
    pub publish_burst: u32,
    pub write_timeout_secs: u64,
    pub relay_inbound: bool,
    /// Rooms without subscribers for this long are dropped; 0 keeps them forever.
    pub idle_grace_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub rooms: Option<PartialRoomSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub publish_port: Option<u16>,
    pub max_message_bytes: Option<usize>,
    pub handshake_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialRoomSettings {
    pub queue_capacity: Option<usize>,
    pub publish_interval_ms: Option<u64>,
    pub publish_burst: Option<u32>,
    pub write_timeout_secs: Option<u64>,
    pub relay_inbound: Option<bool>,
    pub idle_grace_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                publish_port: 8081,
                max_message_bytes: 8192,
                handshake_timeout_secs: 10,
                shutdown_grace_secs: 10,
            },
            rooms: RoomSettings {
                queue_capacity: 16,
                publish_interval_ms: 100,
                publish_burst: 8,
                write_timeout_secs: 5,
                relay_inbound: true,
                idle_grace_secs: 0,
                sweep_interval_secs: 60,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let rooms = self.rooms.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(defaults.server.host),
                port: server.port.unwrap_or(defaults.server.port),
                publish_port: server
                    .publish_port
                    .unwrap_or(defaults.server.publish_port),
                max_message_bytes: server
                    .max_message_bytes
                    .unwrap_or(defaults.server.max_message_bytes),
                handshake_timeout_secs: server
                    .handshake_timeout_secs
                    .unwrap_or(defaults.server.handshake_timeout_secs),
                shutdown_grace_secs: server
                    .shutdown_grace_secs
                    .unwrap_or(defaults.server.shutdown_grace_secs),
            },
            rooms: RoomSettings {
                queue_capacity: rooms
                    .queue_capacity
                    .unwrap_or(defaults.rooms.queue_capacity),
                publish_interval_ms: rooms
                    .publish_interval_ms
                    .unwrap_or(defaults.rooms.publish_interval_ms),
                publish_burst: rooms.publish_burst.unwrap_or(defaults.rooms.publish_burst),
                write_timeout_secs: rooms
                    .write_timeout_secs
                    .unwrap_or(defaults.rooms.write_timeout_secs),
                relay_inbound: rooms.relay_inbound.unwrap_or(defaults.rooms.relay_inbound),
                idle_grace_secs: rooms
                    .idle_grace_secs
                    .unwrap_or(defaults.rooms.idle_grace_secs),
                sweep_interval_secs: rooms
                    .sweep_interval_secs
                    .unwrap_or(defaults.rooms.sweep_interval_secs),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(defaults.logging.level),
            },
        }
    }
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn publish_addr(&self) -> String {
        format!("{}:{}", self.host, self.publish_port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_bytes))
            .max_frame_size(Some(self.max_message_bytes))
    }
}

impl RoomSettings {
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            queue_capacity: self.queue_capacity,
            publish_interval: Duration::from_millis(self.publish_interval_ms),
            publish_burst: self.publish_burst,
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            relay_inbound: self.relay_inbound,
        }
    }

    /// `(sweep interval, grace)` when idle room eviction is enabled.
    pub fn idle_eviction(&self) -> Option<(Duration, Duration)> {
        if self.idle_grace_secs == 0 {
            return None;
        }
        Some((
            Duration::from_secs(self.sweep_interval_secs.max(1)),
            Duration::from_secs(self.idle_grace_secs),
        ))
    }
}
