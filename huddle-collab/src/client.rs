//! WebSocket client for the room relay.
//!
//! Provides:
//! - Connection lifecycle (connect, join, disconnect)
//! - Code-buffer broadcast and targeted catch-up
//! - Document operation send/receive
//! - Voice membership and targeted signaling send/receive
//!
//! The client decodes inbound frames into typed [`RelayEvent`]s; applying
//! them to an editor, document view, or voice mesh is the caller's job.

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::document::DocOp;
use crate::protocol::{MemberInfo, MessageKind, ProtocolError, RelayMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the relay client.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// Connection established and join sent
    Connected,
    /// Connection lost
    Disconnected,
    /// Membership snapshot: either our join response or another member joining
    Joined {
        client_id: Uuid,
        username: String,
        members: Vec<MemberInfo>,
    },
    /// A member departed
    MemberLeft { client_id: Uuid, username: String },
    /// Full code buffer from another member
    CodeChanged { code: String },
    /// The relay asks us to push our buffer to a late joiner
    SyncRequested { target: Uuid },
    /// Targeted code catch-up for us
    CodeSynced { code: String },
    /// Document log for a late joiner
    DocumentLoaded {
        ops: Vec<DocOp>,
        members: Vec<MemberInfo>,
    },
    /// One merged document operation from another member
    RemoteDocChange { client_id: Uuid, op: DocOp },
    /// A peer entered the voice conversation
    VoiceUserJoined { peer_id: Uuid, username: String },
    /// A peer departed the voice conversation
    VoiceUserLeft { peer_id: Uuid },
    /// Targeted SDP offer from a peer
    VoiceOffer {
        from: Uuid,
        sdp: String,
        username: String,
    },
    /// Targeted SDP answer from a peer
    VoiceAnswer { from: Uuid, sdp: String },
    /// Targeted ICE candidate from a peer
    VoiceCandidate { from: Uuid, candidate: String },
    /// Heartbeat response
    Pong,
}

/// The relay client.
///
/// One instance per connection; the connection id is generated here and
/// identifies this client for the lifetime of the socket.
pub struct SyncClient {
    client_id: Uuid,
    username: String,
    room: String,
    state: Arc<RwLock<ConnectionState>>,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,
    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<RelayEvent>>,
    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<RelayEvent>,
    server_url: String,
}

impl SyncClient {
    /// Create a new client for one room.
    pub fn new(
        username: impl Into<String>,
        room: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            client_id: Uuid::new_v4(),
            username: username.into(),
            room: room.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.event_rx.take()
    }

    /// Connect to the relay and join the room.
    ///
    /// Spawns background tasks for reading and writing WebSocket frames.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_result = tokio_tungstenite::connect_async(&self.server_url).await;
        let (ws_writer, mut ws_reader) = match ws_result {
            Ok((ws_stream, _)) => StreamExt::split(ws_stream),
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };

        // Writer task: forward the outgoing channel onto the socket.
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        self.outgoing_tx = Some(out_tx);
        let writer = Arc::new(Mutex::new(ws_writer));
        {
            let writer = writer.clone();
            tokio::spawn(async move {
                while let Some(data) = out_rx.recv().await {
                    let mut w = writer.lock().await;
                    if w.send(tokio_tungstenite::tungstenite::Message::Binary(data.into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                // Outgoing channel dropped: say goodbye so the relay runs
                // its disconnect cleanup promptly.
                let mut w = writer.lock().await;
                let _ = w.close().await;
            });
        }

        // First frame: enter the room.
        let join = RelayMessage::join(self.client_id, &self.room, &self.username);
        self.send_frame(&join).await?;

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(RelayEvent::Connected).await;

        // Reader task: decode inbound frames into typed events.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match RelayMessage::decode(&bytes) {
                            Ok(frame) => {
                                if let Some(event) = Self::frame_to_event(frame) {
                                    let _ = event_tx.send(event).await;
                                }
                            }
                            Err(e) => {
                                log::warn!("Undecodable frame from relay: {e}");
                            }
                        }
                    }
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => {
                        break;
                    }
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(RelayEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Map one inbound frame to an event, or None for frames that carry
    /// nothing for the application (or failed payload decode, logged).
    fn frame_to_event(frame: RelayMessage) -> Option<RelayEvent> {
        match frame.kind {
            MessageKind::Joined => {
                let payload = frame.joined_payload().ok()?;
                Some(RelayEvent::Joined {
                    client_id: frame.sender,
                    username: payload.username,
                    members: payload.members,
                })
            }
            MessageKind::MemberLeft => {
                let payload = frame.user().ok()?;
                Some(RelayEvent::MemberLeft {
                    client_id: frame.sender,
                    username: payload.username,
                })
            }
            MessageKind::CodeChange => {
                let payload = frame.code().ok()?;
                Some(RelayEvent::CodeChanged { code: payload.code })
            }
            MessageKind::SyncRequest => {
                let payload = frame.sync_request_payload().ok()?;
                Some(RelayEvent::SyncRequested {
                    target: payload.target,
                })
            }
            MessageKind::SyncCode => {
                let payload = frame.sync_code_payload().ok()?;
                Some(RelayEvent::CodeSynced { code: payload.code })
            }
            MessageKind::DocInit => {
                let payload = frame.doc_init_payload().ok()?;
                let ops = payload
                    .ops
                    .iter()
                    .filter_map(|bytes| match DocOp::decode(bytes) {
                        Ok(op) => Some(op),
                        Err(e) => {
                            log::warn!("Skipping undecodable op in doc init: {e}");
                            None
                        }
                    })
                    .collect();
                Some(RelayEvent::DocumentLoaded {
                    ops,
                    members: payload.members,
                })
            }
            MessageKind::DocBroadcast => match DocOp::decode(&frame.payload) {
                Ok(op) => Some(RelayEvent::RemoteDocChange {
                    client_id: frame.sender,
                    op,
                }),
                Err(e) => {
                    log::warn!("Undecodable remote doc op: {e}");
                    None
                }
            },
            MessageKind::VoiceUserJoined => {
                let payload = frame.user().ok()?;
                Some(RelayEvent::VoiceUserJoined {
                    peer_id: frame.sender,
                    username: payload.username,
                })
            }
            MessageKind::VoiceUserLeft => Some(RelayEvent::VoiceUserLeft {
                peer_id: frame.sender,
            }),
            MessageKind::VoiceOffer => {
                let payload = frame.offer().ok()?;
                Some(RelayEvent::VoiceOffer {
                    from: frame.sender,
                    sdp: payload.sdp,
                    username: payload.username,
                })
            }
            MessageKind::VoiceAnswer => {
                let payload = frame.answer().ok()?;
                Some(RelayEvent::VoiceAnswer {
                    from: frame.sender,
                    sdp: payload.sdp,
                })
            }
            MessageKind::IceCandidate => {
                let payload = frame.candidate().ok()?;
                Some(RelayEvent::VoiceCandidate {
                    from: frame.sender,
                    candidate: payload.candidate,
                })
            }
            MessageKind::Pong => Some(RelayEvent::Pong),
            _ => {
                log::debug!("Unhandled frame kind: {:?}", frame.kind);
                None
            }
        }
    }

    async fn send_frame(&self, msg: &RelayMessage) -> Result<(), ProtocolError> {
        let encoded = msg.encode()?;
        match &self.outgoing_tx {
            Some(tx) => tx
                .send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Broadcast the full code buffer to the rest of the room.
    pub async fn send_code(&self, code: impl Into<String>) -> Result<(), ProtocolError> {
        self.send_frame(&RelayMessage::code_change(
            self.client_id,
            &self.room,
            code,
        ))
        .await
    }

    /// Push the code buffer to one late joiner (answering a sync request).
    pub async fn push_sync_code(
        &self,
        target: Uuid,
        code: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        self.send_frame(&RelayMessage::sync_code(
            self.client_id,
            &self.room,
            target,
            code,
        ))
        .await
    }

    /// Ask the relay for the current document snapshot.
    pub async fn request_document(&self) -> Result<(), ProtocolError> {
        self.send_frame(&RelayMessage::get_document(self.client_id, &self.room))
            .await
    }

    /// Send one document operation for merge and fan-out.
    pub async fn send_doc_op(&self, op: &DocOp) -> Result<(), ProtocolError> {
        let encoded = op
            .encode()
            .map_err(ProtocolError::SerializationError)?;
        self.send_frame(&RelayMessage::doc_change(
            self.client_id,
            &self.room,
            encoded,
        ))
        .await
    }

    /// Enter the voice conversation.
    pub async fn join_voice(&self) -> Result<(), ProtocolError> {
        self.send_frame(&RelayMessage::voice_join(
            self.client_id,
            &self.room,
            &self.username,
        ))
        .await
    }

    /// Exit the voice conversation.
    pub async fn leave_voice(&self) -> Result<(), ProtocolError> {
        self.send_frame(&RelayMessage::voice_leave(self.client_id, &self.room))
            .await
    }

    /// Relay an SDP offer to one peer.
    pub async fn send_offer(
        &self,
        target: Uuid,
        sdp: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        self.send_frame(&RelayMessage::voice_offer(
            self.client_id,
            &self.room,
            target,
            sdp,
            &self.username,
        ))
        .await
    }

    /// Relay an SDP answer to one peer.
    pub async fn send_answer(
        &self,
        target: Uuid,
        sdp: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        self.send_frame(&RelayMessage::voice_answer(
            self.client_id,
            &self.room,
            target,
            sdp,
        ))
        .await
    }

    /// Relay one ICE candidate to one peer.
    pub async fn send_candidate(
        &self,
        target: Uuid,
        candidate: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        self.send_frame(&RelayMessage::ice_candidate(
            self.client_id,
            &self.room,
            target,
            candidate,
        ))
        .await
    }

    /// Send a heartbeat ping.
    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        self.send_frame(&RelayMessage::ping(self.client_id)).await
    }

    /// Drop the connection. The writer task ends once the outgoing channel
    /// closes, which closes the socket; the relay then runs its disconnect
    /// cleanup for this connection.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// This connection's id.
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// This client's display name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The room this client joined.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// The server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
