//! Process-wide room registry with explicit lifecycle.
//!
//! Rooms are materialized lazily on first join and torn down, flush timer
//! included, when membership drains to zero. The registry also resolves the
//! many-to-one connection-to-room relation: every inbound frame is routed
//! by connection id, never by trusting the room field of the frame.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use crate::document::{NullSink, SnapshotSink};
use crate::protocol::{MemberInfo, MessageKind, RelayMessage};
use crate::room::{Outbox, Room, RoomEvent};

/// Where a connection currently sits.
#[derive(Debug, Clone)]
struct ClientSeat {
    room: String,
    username: String,
}

/// Registry errors.
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// The room actor went away while a request was in flight.
    RoomClosed,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoomClosed => write!(f, "Room closed"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Maps room keys to live room actors and connections to their seats.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, mpsc::Sender<RoomEvent>>>,
    clients: RwLock<HashMap<Uuid, ClientSeat>>,
    sink: Arc<dyn SnapshotSink>,
    queue_capacity: usize,
    flush_interval: Duration,
}

impl RoomRegistry {
    pub fn new(
        sink: Arc<dyn SnapshotSink>,
        queue_capacity: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
            sink,
            queue_capacity,
            flush_interval,
        }
    }

    /// Registry with no persistence and default sizing.
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(NullSink), 256, Duration::from_secs(2))
    }

    /// Get or create the actor for `key`.
    async fn room(&self, key: &str) -> mpsc::Sender<RoomEvent> {
        // Fast path: read lock.
        {
            let rooms = self.rooms.read().await;
            if let Some(tx) = rooms.get(key) {
                return tx.clone();
            }
        }

        // Slow path: write lock, double-check after acquiring.
        let mut rooms = self.rooms.write().await;
        if let Some(tx) = rooms.get(key) {
            return tx.clone();
        }
        let tx = Room::spawn(
            key,
            self.queue_capacity,
            self.flush_interval,
            self.sink.clone(),
        );
        rooms.insert(key.to_string(), tx.clone());
        log::info!("Room {key} created");
        tx
    }

    /// Replace a stale entry with a freshly spawned actor.
    async fn respawn(&self, key: &str) -> mpsc::Sender<RoomEvent> {
        let mut rooms = self.rooms.write().await;
        let tx = Room::spawn(
            key,
            self.queue_capacity,
            self.flush_interval,
            self.sink.clone(),
        );
        rooms.insert(key.to_string(), tx.clone());
        log::info!("Room {key} respawned");
        tx
    }

    /// Enter a room, creating it lazily. Returns the membership ordered by
    /// join time. Idempotent per connection id.
    pub async fn join(
        &self,
        key: &str,
        client: Uuid,
        username: &str,
        outbox: Outbox,
    ) -> Result<Vec<MemberInfo>, RegistryError> {
        // A connection sits in exactly one room; joining another vacates
        // the current seat first.
        let current = self.clients.read().await.get(&client).map(|s| s.room.clone());
        if current.as_deref().is_some_and(|room| room != key) {
            self.leave(client).await;
        }

        // A looked-up handle can race the actor draining to zero and
        // shutting down; one respawn retry covers that window.
        for attempt in 0..2 {
            let tx = if attempt == 0 {
                self.room(key).await
            } else {
                self.respawn(key).await
            };

            let (reply_tx, reply_rx) = oneshot::channel();
            if tx
                .send(RoomEvent::Join {
                    client,
                    username: username.to_string(),
                    outbox: outbox.clone(),
                    reply: reply_tx,
                })
                .await
                .is_err()
            {
                continue;
            }
            let Ok(members) = reply_rx.await else { continue };

            self.clients.write().await.insert(
                client,
                ClientSeat {
                    room: key.to_string(),
                    username: username.to_string(),
                },
            );
            return Ok(members);
        }
        Err(RegistryError::RoomClosed)
    }

    /// Remove a connection from its room, if it has one, releasing the
    /// room when it empties. Returns the seat that was vacated.
    pub async fn leave(&self, client: Uuid) -> Option<(String, String)> {
        let seat = self.clients.write().await.remove(&client)?;

        let tx = {
            let rooms = self.rooms.read().await;
            match rooms.get(&seat.room) {
                Some(tx) => tx.clone(),
                None => return Some((seat.room, seat.username)),
            }
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if tx
            .send(RoomEvent::Leave {
                client,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return Some((seat.room, seat.username));
        }

        if let Ok(0) = reply_rx.await {
            // The actor shuts itself down on empty; drop our handle too.
            self.rooms.write().await.remove(&seat.room);
            log::info!("Room {} removed (empty)", seat.room);
        }
        Some((seat.room, seat.username))
    }

    /// Route one decoded inbound frame to the sender's room.
    ///
    /// Join frames are handled by [`RoomRegistry::join`]; everything else
    /// lands here. Frames from connections with no seat are dropped with a
    /// warning, as are frames whose payload fails to decode.
    pub async fn dispatch(&self, client: Uuid, msg: RelayMessage) {
        let Some(seat) = self.clients.read().await.get(&client).cloned() else {
            log::warn!("Frame {:?} from {client} with no room, dropping", msg.kind);
            return;
        };
        let tx = {
            let rooms = self.rooms.read().await;
            let Some(tx) = rooms.get(&seat.room) else {
                log::warn!("Room {} gone for {client}", seat.room);
                return;
            };
            tx.clone()
        };

        let event = match msg.kind {
            MessageKind::CodeChange => match msg.code() {
                Ok(p) => RoomEvent::CodeChange {
                    client,
                    code: p.code,
                },
                Err(e) => return log::warn!("Bad code-change from {client}: {e}"),
            },
            MessageKind::SyncCode => match msg.sync_code_payload() {
                Ok(p) => RoomEvent::SyncCode {
                    client,
                    target: p.target,
                    code: p.code,
                },
                Err(e) => return log::warn!("Bad sync-code from {client}: {e}"),
            },
            MessageKind::GetDocument => RoomEvent::GetDocument { client },
            MessageKind::DocChange => RoomEvent::DocChange {
                client,
                op: msg.payload,
            },
            MessageKind::VoiceJoin => {
                let username = msg
                    .user()
                    .map(|p| p.username)
                    .unwrap_or_else(|_| seat.username.clone());
                RoomEvent::VoiceJoin { client, username }
            }
            MessageKind::VoiceLeave => RoomEvent::VoiceLeave { client },
            MessageKind::VoiceOffer => match msg.offer() {
                Ok(p) => RoomEvent::Signal {
                    client,
                    kind: MessageKind::VoiceOffer,
                    target: p.target,
                    payload: msg.payload,
                },
                Err(e) => return log::warn!("Bad offer from {client}: {e}"),
            },
            MessageKind::VoiceAnswer => match msg.answer() {
                Ok(p) => RoomEvent::Signal {
                    client,
                    kind: MessageKind::VoiceAnswer,
                    target: p.target,
                    payload: msg.payload,
                },
                Err(e) => return log::warn!("Bad answer from {client}: {e}"),
            },
            MessageKind::IceCandidate => match msg.candidate() {
                Ok(p) => RoomEvent::Signal {
                    client,
                    kind: MessageKind::IceCandidate,
                    target: p.target,
                    payload: msg.payload,
                },
                Err(e) => return log::warn!("Bad candidate from {client}: {e}"),
            },
            other => {
                log::debug!("Unroutable frame {other:?} from {client}");
                return;
            }
        };

        if tx.send(event).await.is_err() {
            log::warn!("Room {} closed while routing for {client}", seat.room);
        }
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Number of seated connections.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}
