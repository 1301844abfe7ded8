//! WebSocket transport
//!
//! Accepts TCP connections and upgrades them to WebSockets on
//! `/websocket/{type}/{id}`. Responsibilities:
//! - reject upgrade requests with a bad route (400) or no identity (401)
//! - register the subscriber with its room during the handshake
//! - hand the established socket to `Connection::serve`
//! - give up on peers that never finish the handshake
//! - on shutdown, stop accepting, cancel every connection and wait (bounded)
//!   for their close frames to go out

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;

use crate::broker::RoomRegistry;
use crate::config::Settings;
use crate::transport::auth::{AllowAnonymous, Authenticator};
use crate::transport::connection::Connection;
use crate::transport::route::room_key_from_path;
use crate::utils::error::ConnectionError;

/// Binds `addr` and serves until `shutdown` fires.
pub async fn start_websocket_server(
    addr: String,
    registry: Arc<RoomRegistry>,
    settings: Settings,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("WebSocket server listening on ws://{addr}");

    serve(listener, registry, settings, Arc::new(AllowAnonymous), shutdown).await;
    Ok(())
}

/// Accept loop over an already bound listener. Returns once every
/// connection has finished or `server.shutdown_grace_secs` ran out.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<RoomRegistry>,
    settings: Settings,
    authenticator: Arc<dyn Authenticator>,
    shutdown: CancellationToken,
) {
    let settings = Arc::new(settings);
    let tracker = TaskTracker::new();

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {e}");
                    continue;
                }
            },
        };

        tracker.spawn(handle_connection(
            stream,
            peer,
            registry.clone(),
            settings.clone(),
            authenticator.clone(),
            shutdown.clone(),
        ));
    }

    info!("WebSocket server stopped accepting connections");
    drain(tracker, settings.server.shutdown_grace(), "WebSocket").await;
}

/// Waits for the tracked connection tasks, at most `grace`.
pub(crate) async fn drain(tracker: TaskTracker, grace: Duration, server: &str) {
    tracker.close();
    if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
        warn!(
            open = tracker.len(),
            "{server} connections still open after {grace:?}, abandoning them"
        );
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<RoomRegistry>,
    settings: Arc<Settings>,
    authenticator: Arc<dyn Authenticator>,
    shutdown: CancellationToken,
) {
    let mut pending: Option<Connection> = None;

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let key = room_key_from_path(request.uri().path())
            .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))?;
        let identity = authenticator.authenticate(request).ok_or_else(|| {
            reject(
                StatusCode::UNAUTHORIZED,
                "authentication required".to_string(),
            )
        })?;

        pending = Some(Connection::register(
            &registry,
            &key,
            identity,
            settings.rooms.connection_config(),
        ));
        Ok(response)
    };

    let handshake = tokio::time::timeout(
        settings.server.handshake_timeout(),
        accept_hdr_async_with_config(stream, callback, Some(settings.server.websocket_config())),
    );
    let ws = tokio::select! {
        _ = shutdown.cancelled() => return,
        accepted = handshake => match accepted {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                debug!(%peer, "WebSocket handshake error: {e}");
                return;
            }
            Err(_) => {
                debug!(%peer, "WebSocket handshake timed out");
                return;
            }
        },
    };

    let Some(connection) = pending.take() else {
        return;
    };
    let room = connection.room().key().clone();

    match connection.serve(ws, shutdown).await {
        Ok(()) => debug!(%peer, %room, "connection closed"),
        Err(e) if e.is_normal_close() => debug!(%peer, %room, "connection closed: {e}"),
        Err(ConnectionError::Evicted) => warn!(%peer, %room, "dropped slow consumer"),
        Err(e) => warn!(%peer, %room, "subscribe error: {e}"),
    }
}

fn reject(status: StatusCode, reason: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason));
    *response.status_mut() = status;
    response
}
