//! WebSocket relay server with room-scoped routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── RoomRegistry ── Room actor (membership, code buffer,
//! Client B ──┘        │            Document, VoiceRoster, flush timer)
//!                     │
//!                     └── SnapshotSink (periodic document hand-off)
//! ```
//!
//! Each connection runs one task that relays inbound frames to the
//! registry and drains its outbox back onto the socket. Disconnect
//! handling releases the connection's seat, voice entry, and outbox
//! before the task ends, so nothing keeps referencing a closed socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::document::{NullSink, SnapshotSink};
use crate::protocol::{MessageKind, RelayMessage};
use crate::registry::RoomRegistry;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per connection before the relay starts dropping
    pub outbox_capacity: usize,
    /// Events buffered per room actor
    pub room_queue_capacity: usize,
    /// Interval between document snapshot hand-offs to the sink
    pub flush_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            outbox_capacity: 256,
            room_queue_capacity: 256,
            flush_interval: Duration::from_secs(2),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// The relay server.
pub struct SyncServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a server with no snapshot persistence.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_sink(config, Arc::new(NullSink))
    }

    /// Create a server handing periodic document snapshots to `sink`.
    pub fn with_sink(config: ServerConfig, sink: Arc<dyn SnapshotSink>) -> Self {
        let registry = Arc::new(RoomRegistry::new(
            sink,
            config.room_queue_capacity,
            config.flush_interval,
        ));
        Self {
            config,
            registry,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, registry, stats, config).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RoomRegistry>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Seat for this connection, assigned by its Join frame.
        let mut client_id: Option<Uuid> = None;
        let (out_tx, mut out_rx) = mpsc::channel(config.outbox_capacity);

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            let frame = match RelayMessage::decode(&bytes) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {addr}: {e}");
                                    continue;
                                }
                            };

                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            match frame.kind {
                                MessageKind::Join => {
                                    // One identity per socket; a rejoin must
                                    // reuse the connection id it arrived with.
                                    if client_id.is_some_and(|id| id != frame.sender) {
                                        log::warn!(
                                            "Ignoring join with mismatched id from {addr}"
                                        );
                                        continue;
                                    }
                                    let username = frame
                                        .user()
                                        .map(|p| p.username)
                                        .unwrap_or_else(|_| "Anonymous".to_string());
                                    client_id = Some(frame.sender);

                                    match registry
                                        .join(&frame.room, frame.sender, &username, out_tx.clone())
                                        .await
                                    {
                                        Ok(members) => {
                                            // The join "return value": a private
                                            // membership snapshot. Others got the
                                            // broadcast from the room actor.
                                            let joined = RelayMessage::joined(
                                                frame.sender,
                                                &frame.room,
                                                members,
                                                &username,
                                            );
                                            let encoded = joined.encode()?;
                                            ws_sender.send(Message::Binary(encoded.into())).await?;

                                            let mut s = stats.write().await;
                                            s.active_rooms = registry.room_count().await;
                                        }
                                        Err(e) => {
                                            log::warn!("Join failed for {addr}: {e}");
                                        }
                                    }
                                }

                                MessageKind::Ping => {
                                    let pong = RelayMessage::pong(frame.sender);
                                    let encoded = pong.encode()?;
                                    ws_sender.send(Message::Binary(encoded.into())).await?;
                                }

                                _ => match client_id {
                                    Some(id) => registry.dispatch(id, frame).await,
                                    None => {
                                        log::warn!(
                                            "Frame {:?} from {addr} before join, dropping",
                                            frame.kind
                                        );
                                    }
                                },
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                frame = out_rx.recv() => {
                    match frame {
                        Some(data) => {
                            ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                        }
                        None => break,
                    }
                }
            }
        }

        // Disconnect cleanup: vacate the seat synchronously so membership,
        // voice entry, and outbox are all released before the task ends.
        if let Some(id) = client_id {
            if let Some((room, username)) = registry.leave(id).await {
                log::info!("{username} ({id}) disconnected from room {room}");
            }
        }

        let mut s = stats.write().await;
        s.active_connections -= 1;
        s.active_rooms = registry.room_count().await;

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }
}
