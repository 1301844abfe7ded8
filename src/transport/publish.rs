//! HTTP publish endpoint
//!
//! `POST /publish/{type}/{id}` fans the request body out to the room as one
//! payload. Replies:
//! - 202 once the payload has been handed to every subscriber queue
//! - 400 when the path names no room, 404 for any other path
//! - 405 for anything but `POST`
//! - 413 when the body exceeds `server.max_message_bytes`
//! - 503 when shutdown interrupts a publish waiting on the rate limit

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::broker::RoomRegistry;
use crate::config::Settings;
use crate::transport::route::{PUBLISH_PREFIX, room_key_from_publish_path};
use crate::transport::websocket::drain;
use crate::utils::error::{PublishError, RoomKeyError};

/// Binds `server.publish_port` and serves until `shutdown` fires.
pub async fn start_publish_server(
    registry: Arc<RoomRegistry>,
    settings: Settings,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = settings.server.publish_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Publish endpoint listening on http://{addr}/{PUBLISH_PREFIX}/{{type}}/{{id}}");

    serve_publish(listener, registry, settings, shutdown).await;
    Ok(())
}

/// Accept loop over an already bound listener.
pub async fn serve_publish(
    listener: TcpListener,
    registry: Arc<RoomRegistry>,
    settings: Settings,
    shutdown: CancellationToken,
) {
    let max_body = settings.server.max_message_bytes;
    let tracker = TaskTracker::new();

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept publish connection: {e}");
                    continue;
                }
            },
        };

        let registry = registry.clone();
        let shutdown = shutdown.clone();
        tracker.spawn(async move {
            let requests = shutdown.clone();
            let service = service_fn(move |request| {
                handle_publish(request, registry.clone(), max_body, requests.clone())
            });
            let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            tokio::pin!(connection);

            let served = tokio::select! {
                served = connection.as_mut() => Some(served),
                _ = shutdown.cancelled() => None,
            };
            let served = match served {
                Some(served) => served,
                None => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };
            if let Err(e) = served {
                debug!(%peer, "publish connection error: {e}");
            }
        });
    }

    info!("Publish endpoint stopped accepting connections");
    drain(tracker, settings.server.shutdown_grace(), "publish").await;
}

async fn handle_publish(
    request: Request<Incoming>,
    registry: Arc<RoomRegistry>,
    max_body: usize,
    shutdown: CancellationToken,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if request.method() != Method::POST {
        return Ok(reply(StatusCode::METHOD_NOT_ALLOWED, "only POST is allowed"));
    }

    let key = match room_key_from_publish_path(request.uri().path()) {
        Ok(key) => key,
        Err(e @ RoomKeyError::UnknownRoute(_)) => {
            return Ok(reply(StatusCode::NOT_FOUND, e.to_string()));
        }
        Err(e) => return Ok(reply(StatusCode::BAD_REQUEST, e.to_string())),
    };

    let payload = match Limited::new(request.into_body(), max_body).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            return Ok(reply(StatusCode::PAYLOAD_TOO_LARGE, "request too large"));
        }
        Err(e) => {
            debug!(%key, "unreadable publish body: {e}");
            return Ok(reply(StatusCode::BAD_REQUEST, "unreadable request body"));
        }
    };

    // scoped to this request: a client that hangs up drops the wait with it
    let cancel = shutdown.child_token();
    match registry.publish(&key, payload, &cancel).await {
        Ok(fan_out) => {
            debug!(
                %key,
                delivered = fan_out.delivered,
                evicted = fan_out.evicted,
                "published over HTTP"
            );
            Ok(reply(StatusCode::ACCEPTED, Bytes::new()))
        }
        Err(PublishError::Cancelled) => {
            Ok(reply(StatusCode::SERVICE_UNAVAILABLE, "server is shutting down"))
        }
    }
}

fn reply(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}
