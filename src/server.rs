//! Relay server: WebSocket accept loop and per-viewer connection handling.
//!
//! Each viewer gets the connect snapshot, then every broadcast. A viewer too
//! slow to keep up with the broadcast buffer is resynced from the registry
//! instead of silently missing state changes.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::analysis::Analyzer;
use crate::camera::DirectoryCamera;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::protocol::{ClientCommand, ServerEvent};
use crate::registry::{RegistrySettings, SessionRegistry};

/// Build the registry described by `config` and serve until the listener fails.
pub async fn serve(config: &RelayConfig) -> Result<(), RelayError> {
    let analyzer = Analyzer::from_config(&config.analyzer)?;
    let camera = Arc::new(DirectoryCamera::new(&config.frames_dir));
    let registry = SessionRegistry::new(camera, analyzer, RegistrySettings::from(config));

    let listener = TcpListener::bind(&config.bind).await?;
    info!(
        addr = %listener.local_addr()?,
        frames = %config.frames_dir.display(),
        analyzer = %config.analyzer.backend,
        "relay listening"
    );
    serve_on(listener, registry).await
}

/// Accept viewers on an already bound listener.
///
/// Viewer connections belong to this future: dropping or aborting it closes
/// every open connection.
pub async fn serve_on(listener: TcpListener, registry: SessionRegistry) -> Result<(), RelayError> {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                let registry = registry.clone();
                connections.spawn(async move {
                    match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws_stream) => handle_viewer(ws_stream, registry).await,
                        Err(e) => warn!(%addr, error = %e, "websocket handshake failed"),
                    }
                });
            }
            Some(finished) = connections.join_next() => {
                if let Err(e) = finished {
                    warn!(error = %e, "viewer task failed");
                }
            }
        }
    }
}

async fn send_event<S>(sink: &mut S, event: &ServerEvent) -> Result<(), RelayError>
where
    S: SinkExt<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = event.encode()?;
    sink.send(WsMessage::Text(text)).await?;
    Ok(())
}

async fn send_all<S>(sink: &mut S, events: &[ServerEvent]) -> Result<(), RelayError>
where
    S: SinkExt<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    for event in events {
        send_event(sink, event).await?;
    }
    Ok(())
}

/// Serve one connected viewer until it disconnects.
pub async fn handle_viewer<S>(ws_stream: WebSocketStream<S>, registry: SessionRegistry)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (viewer_id, mut events) = registry.join();
    info!(viewer = %viewer_id, viewers = registry.viewer_count(), "viewer connected");

    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    // Snapshot for this viewer only, then a fresh count for everyone.
    let mut connected = true;
    if let Err(e) = send_all(&mut ws_sink, &registry.connect_snapshot()).await {
        debug!(viewer = %viewer_id, error = %e, "snapshot send failed");
        connected = false;
    }
    registry.broadcast_client_count();

    while connected {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => match ClientCommand::decode(&text) {
                        Ok(command) => {
                            debug!(viewer = %viewer_id, command = command.name(), "command received");
                            registry.handle_command(command).await;
                        }
                        Err(e) => warn!(viewer = %viewer_id, error = %e, "dropping malformed command"),
                    },
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary / ping / pong
                    Some(Err(e)) => {
                        debug!(viewer = %viewer_id, error = %e, "websocket read failed");
                        break;
                    }
                }
            }

            bcast = events.recv() => {
                match bcast {
                    Ok(event) => {
                        if let Err(e) = send_event(&mut ws_sink, &event).await {
                            debug!(viewer = %viewer_id, error = %e, "websocket write failed");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(viewer = %viewer_id, skipped, "viewer lagging, resyncing");
                        let (fresh, catch_up) = registry.resync();
                        events = fresh;
                        if let Err(e) = send_all(&mut ws_sink, &catch_up).await {
                            debug!(viewer = %viewer_id, error = %e, "resync send failed");
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    registry.leave(&viewer_id);
    info!(viewer = %viewer_id, viewers = registry.viewer_count(), "viewer disconnected");
    registry.broadcast_client_count();
}
