//! Connection adapter
//!
//! Bridges one WebSocket to one room subscriber. A connection goes through
//! `Connecting -> Subscribed -> Draining -> Closed`:
//!
//! - `Connecting`: the subscriber is already a member of its room while the
//!   handshake is still running. If the room evicts it in that window the
//!   closed flag is set and `serve` aborts instead of proceeding.
//! - `Subscribed`: a read loop relays inbound frames to the room; the write
//!   loop drains the subscriber queue onto the socket with a deadline per
//!   write.
//! - `Draining`/`Closed`: whichever loop ends first cancels the other, the
//!   socket is closed once and the subscriber leaves the room.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::Utf8Bytes;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::{CloseFrame, Message as WsMessage};

use crate::broker::{Closer, Room, RoomKey, RoomRegistry, Subscriber, SubscriberId};
use crate::transport::auth::Identity;
use crate::utils::error::{ConnectionError, PublishError};

/// Close reason sent to evicted subscribers.
pub const SLOW_CONSUMER_REASON: &str = "connection too slow to keep up with messages";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Subscribed,
    Draining,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// A single write taking longer than this is fatal to the connection.
    pub write_timeout: Duration,
    /// Relay inbound text/binary frames to the room.
    pub relay_inbound: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(5),
            relay_inbound: true,
        }
    }
}

/// `Closer` handed to the room. Eviction only flips the flag and wakes the
/// write loop; the socket itself is closed by the task that owns it.
#[derive(Debug, Default)]
pub(crate) struct ConnectionCloser {
    closed: Mutex<bool>,
    evicted: CancellationToken,
}

impl ConnectionCloser {
    /// False if the connection was closed before the transport came up.
    fn establish(&self) -> bool {
        !*self.closed.lock()
    }

    /// Marks the connection closed so a late eviction becomes a no-op.
    fn close(&self) {
        *self.closed.lock() = true;
    }

    fn is_evicted(&self) -> bool {
        self.evicted.is_cancelled()
    }
}

impl Closer for ConnectionCloser {
    fn close_slow(&self) {
        let mut closed = self.closed.lock();
        if *closed {
            return;
        }
        *closed = true;
        self.evicted.cancel();
    }
}

pub struct Connection {
    id: SubscriberId,
    identity: Identity,
    room: Arc<Room>,
    queue: mpsc::Receiver<Bytes>,
    closer: Arc<ConnectionCloser>,
    config: ConnectionConfig,
    state: ConnectionState,
}

impl Connection {
    /// Creates the subscriber and joins the room for `key`.
    ///
    /// Called before the transport handshake completes; the connection
    /// leaves the room again when dropped.
    pub fn register(
        registry: &RoomRegistry,
        key: &RoomKey,
        identity: Identity,
        config: ConnectionConfig,
    ) -> Self {
        let closer = Arc::new(ConnectionCloser::default());
        let (subscriber, queue) = Subscriber::new(registry.config().queue_capacity, closer.clone());
        let id = subscriber.id();
        let room = registry.join(key, subscriber);
        debug!(room = %key, subscriber = %id, user = %identity, "subscriber registered");

        Self {
            id,
            identity,
            room,
            queue,
            closer,
            config,
            state: ConnectionState::Connecting,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Runs the connection until it ends. Blocks for the connection's lifetime.
    pub async fn serve<S>(
        mut self,
        ws: WebSocketStream<S>,
        shutdown: CancellationToken,
    ) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if !self.closer.establish() {
            self.state = ConnectionState::Closed;
            return Err(ConnectionError::Evicted);
        }
        self.state = ConnectionState::Subscribed;
        info!(room = %self.room.key(), subscriber = %self.id, user = %self.identity, "subscribed");

        let cancel = shutdown.child_token();
        let (mut sink, stream) = ws.split();
        let reader = tokio::spawn(read_loop(
            stream,
            self.room.clone(),
            self.config.relay_inbound,
            cancel.clone(),
        ));

        let written = write_loop(
            &mut sink,
            &mut self.queue,
            &self.closer,
            &cancel,
            self.config.write_timeout,
        )
        .await;

        self.state = ConnectionState::Draining;
        cancel.cancel();
        let read = match reader.await {
            Ok(read) => read,
            Err(e) => {
                warn!(subscriber = %self.id, "read loop failed: {e}");
                Ok(())
            }
        };
        self.closer.close();

        let result = match written {
            Ok(()) if shutdown.is_cancelled() => Err(ConnectionError::Cancelled),
            Ok(()) => read,
            Err(e) => Err(e),
        };

        if !matches!(result, Err(ConnectionError::WriteTimeout(_))) {
            let frame = self.closer.is_evicted().then(|| CloseFrame {
                code: CloseCode::Policy,
                reason: SLOW_CONSUMER_REASON.into(),
            });
            close_transport(&mut sink, frame, self.config.write_timeout).await;
        }

        self.state = ConnectionState::Closed;
        info!(room = %self.room.key(), subscriber = %self.id, "unsubscribed");
        result
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.room.remove_subscriber(&self.id);
    }
}

/// Registers and serves a connection whose transport is already established.
pub async fn subscribe<S>(
    registry: &RoomRegistry,
    key: &RoomKey,
    identity: Identity,
    ws: WebSocketStream<S>,
    config: ConnectionConfig,
    shutdown: CancellationToken,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    Connection::register(registry, key, identity, config)
        .serve(ws, shutdown)
        .await
}

async fn read_loop<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    room: Arc<Room>,
    relay: bool,
    cancel: CancellationToken,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let outcome = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            frame = stream.next() => frame,
        };

        match frame {
            None | Some(Ok(WsMessage::Close(_))) => break Ok(()),
            Some(Err(e)) => break Err(e.into()),
            Some(Ok(msg)) if relay && (msg.is_text() || msg.is_binary()) => {
                match room.publish(msg.into_data(), &cancel).await {
                    Ok(_) => {}
                    Err(PublishError::Cancelled) => break Ok(()),
                }
            }
            // pings are answered by tungstenite
            Some(Ok(_)) => {}
        }
    };

    cancel.cancel();
    outcome
}

async fn write_loop<S>(
    sink: &mut SplitSink<WebSocketStream<S>, WsMessage>,
    queue: &mut mpsc::Receiver<Bytes>,
    closer: &ConnectionCloser,
    cancel: &CancellationToken,
    write_timeout: Duration,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let payload = tokio::select! {
            biased;
            _ = closer.evicted.cancelled() => return Err(ConnectionError::Evicted),
            _ = cancel.cancelled() => return Ok(()),
            payload = queue.recv() => match payload {
                Some(payload) => payload,
                None => return Ok(()),
            },
        };

        let write = tokio::time::timeout(write_timeout, sink.send(frame_for(payload)));
        tokio::select! {
            biased;
            _ = closer.evicted.cancelled() => return Err(ConnectionError::Evicted),
            written = write => match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(ConnectionError::WriteTimeout(write_timeout)),
            },
        }
    }
}

/// UTF-8 payloads travel as text frames, anything else as binary.
fn frame_for(payload: Bytes) -> WsMessage {
    match Utf8Bytes::try_from(payload.clone()) {
        Ok(text) => WsMessage::Text(text),
        Err(_) => WsMessage::Binary(payload),
    }
}

async fn close_transport<S>(
    sink: &mut SplitSink<WebSocketStream<S>, WsMessage>,
    frame: Option<CloseFrame>,
    deadline: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let closing = async move {
        if frame.is_some() {
            sink.send(WsMessage::Close(frame)).await?;
        }
        sink.close().await
    };
    match tokio::time::timeout(deadline, closing).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("close handshake failed: {e}"),
        Err(_) => debug!("close handshake timed out"),
    }
}
