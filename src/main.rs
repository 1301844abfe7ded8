//! CLI for roomcast
//!
//! Subcommands:
//! - `server`: run the WebSocket subscribe server and the HTTP publish endpoint
//! - `client`: join a room, optionally post one message, print what arrives

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use roomcast::broker::{RoomKey, RoomRegistry};
use roomcast::config::load_config;
use roomcast::transport::publish::start_publish_server;
use roomcast::transport::route::path_for;
use roomcast::transport::websocket::start_websocket_server;
use roomcast::utils::logging;
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tungstenite::protocol::Message as WsMessage;

#[derive(Parser)]
#[command(name = "roomcast")]
enum Command {
    /// Start the WebSocket server
    Server,
    /// Join a room and print the messages broadcast to it
    Client {
        /// Server base URL
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        /// Room type: forum, article or poll
        #[arg(long, default_value = "forum")]
        room_type: String,
        /// Room identifier
        #[arg(long)]
        room_id: String,
        /// Message to post once connected
        #[arg(long)]
        say: Option<String>,
        /// Name shown as the message author
        #[arg(long, default_value = "anonymous")]
        author: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    match cmd {
        Command::Server => {
            if let Err(e) = run_server().await {
                // no-op unless config loading failed before logging was set up
                logging::init("info");
                error!("Server failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Command::Client {
            url,
            room_type,
            room_id,
            say,
            author,
        } => {
            logging::init("info");
            if let Err(e) = run_client(&url, &room_type, &room_id, say, &author).await {
                error!("Client failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    logging::init(&config.logging.level);

    let registry = Arc::new(RoomRegistry::new(config.rooms.room_config()));
    let shutdown = CancellationToken::new();

    if let Some((interval, grace)) = config.rooms.idle_eviction() {
        tokio::spawn(registry.clone().run_sweeper(interval, grace, shutdown.clone()));
    }

    let servers = async {
        tokio::try_join!(
            start_websocket_server(
                config.server.addr(),
                registry.clone(),
                config.clone(),
                shutdown.clone(),
            ),
            start_publish_server(registry.clone(), config.clone(), shutdown.clone()),
        )
    };
    tokio::pin!(servers);

    tokio::select! {
        served = &mut servers => {
            served?;
            error!("Servers exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Closing connections.");
            shutdown.cancel();
            // both servers return once their connections are closed or the grace ran out
            servers.await?;
            info!("Shutdown complete.");
        }
    }

    Ok(())
}

async fn run_client(
    url: &str,
    room_type: &str,
    room_id: &str,
    say: Option<String>,
    author: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = RoomKey::parse(room_type, room_id)?;
    let endpoint = format!("{}{}", url.trim_end_matches('/'), path_for(&key));

    let (mut ws_stream, _response) = connect_async(endpoint.as_str()).await?;
    info!("Joined {key} at {endpoint}");

    if let Some(content) = say {
        // payloads are opaque to the server; the forum frontend expects JSON
        let message = json!({ "author": author, "content": content });
        ws_stream
            .send(WsMessage::Text(message.to_string().into()))
            .await?;
    }

    let interrupted = loop {
        tokio::select! {
            incoming = ws_stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => println!("{text}"),
                Some(Ok(WsMessage::Binary(data))) => println!("<{} bytes>", data.len()),
                Some(Ok(WsMessage::Close(frame))) => {
                    info!("Server closed the connection: {frame:?}");
                    break false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => break false,
            },
            _ = tokio::signal::ctrl_c() => break true,
        }
    };

    if interrupted {
        ws_stream.close(None).await?;
    }

    Ok(())
}
