//! Per-room actor: serialized event processing for one collaboration room.
//!
//! Architecture:
//! ```text
//! Conn A ──┐                       ┌──► outbox A ──► WebSocket A
//!           ├──► RoomEvent queue ──┼──► outbox B ──► WebSocket B
//! Conn B ──┘    (one task/room)    └──► outbox C ──► WebSocket C
//!                     │
//!                     ├── membership (join order)
//!                     ├── advisory code buffer
//!                     ├── Document (op log + snapshot)
//!                     ├── VoiceRoster
//!                     └── flush timer ──► SnapshotSink
//! ```
//!
//! All state mutation for a room goes through its event queue, so events
//! are applied in arrival order with no interleaving; different rooms run
//! on independent tasks. The task ends when membership drains to zero,
//! which also cancels the room's flush timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::document::{DocOp, Document, SnapshotSink};
use crate::protocol::{MemberInfo, MessageKind, RelayMessage};
use crate::voice::VoiceRoster;

/// Encoded frame handed to a connection's writer task.
pub type OutboundFrame = Arc<Vec<u8>>;

/// Sender half of one connection's outbox.
pub type Outbox = mpsc::Sender<OutboundFrame>;

/// Events processed by a room actor, in arrival order.
#[derive(Debug)]
pub enum RoomEvent {
    /// A connection enters the room. Replies with the ordered membership.
    Join {
        client: Uuid,
        username: String,
        outbox: Outbox,
        reply: oneshot::Sender<Vec<MemberInfo>>,
    },
    /// A connection leaves (voluntarily or by disconnect). Replies with the
    /// number of members remaining so the registry can tear the room down.
    Leave {
        client: Uuid,
        reply: oneshot::Sender<usize>,
    },
    /// Full code-buffer broadcast from one member.
    CodeChange { client: Uuid, code: String },
    /// Targeted code catch-up produced by an existing member.
    SyncCode {
        client: Uuid,
        target: Uuid,
        code: String,
    },
    /// A member requests the current document snapshot.
    GetDocument { client: Uuid },
    /// One encoded document operation to merge and fan out.
    DocChange { client: Uuid, op: Vec<u8> },
    /// A member enters the voice-participant subset.
    VoiceJoin { client: Uuid, username: String },
    /// A member exits the voice-participant subset.
    VoiceLeave { client: Uuid },
    /// Targeted voice signaling (offer / answer / ICE candidate); the
    /// payload is forwarded verbatim to the named connection.
    Signal {
        client: Uuid,
        kind: MessageKind,
        target: Uuid,
        payload: Vec<u8>,
    },
}

/// Room state owned by the actor task. Not shared; the event queue is the
/// only way in.
pub struct Room {
    key: String,
    /// Members ordered by join time.
    members: Vec<MemberInfo>,
    outboxes: HashMap<Uuid, Outbox>,
    /// Advisory code buffer: last writer wins, no merge.
    code: String,
    /// None until the first document request or edit for this room.
    document: Option<Document>,
    doc_dirty: bool,
    voice: VoiceRoster,
    sink: Arc<dyn SnapshotSink>,
}

/// Whether the actor loop should keep running after an event.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

impl Room {
    pub fn new(key: impl Into<String>, sink: Arc<dyn SnapshotSink>) -> Self {
        Self {
            key: key.into(),
            members: Vec::new(),
            outboxes: HashMap::new(),
            code: String::new(),
            document: None,
            doc_dirty: false,
            voice: VoiceRoster::new(),
            sink,
        }
    }

    /// Spawn the actor task for a room. Returns the event-queue sender; the
    /// task ends when every sender is dropped or membership reaches zero.
    pub fn spawn(
        key: impl Into<String>,
        queue_capacity: usize,
        flush_interval: Duration,
        sink: Arc<dyn SnapshotSink>,
    ) -> mpsc::Sender<RoomEvent> {
        let key = key.into();
        let (tx, mut rx) = mpsc::channel(queue_capacity);
        tokio::spawn(async move {
            let mut room = Room::new(key.clone(), sink);
            let mut flush = tokio::time::interval(flush_interval);
            // The first tick completes immediately; skip it so an empty
            // room is not flushed at startup.
            flush.tick().await;

            loop {
                tokio::select! {
                    ev = rx.recv() => match ev {
                        Some(ev) => {
                            if room.handle(ev) == Flow::Shutdown {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = flush.tick() => room.flush(),
                }
            }

            // Persist whatever is pending before the timer dies with us.
            room.flush();
            log::info!("Room {key} closed");
        });
        tx
    }

    fn handle(&mut self, ev: RoomEvent) -> Flow {
        match ev {
            RoomEvent::Join {
                client,
                username,
                outbox,
                reply,
            } => self.handle_join(client, username, outbox, reply),
            RoomEvent::Leave { client, reply } => return self.handle_leave(client, reply),
            RoomEvent::CodeChange { client, code } => self.handle_code_change(client, code),
            RoomEvent::SyncCode {
                client,
                target,
                code,
            } => self.send_to(
                target,
                &RelayMessage::sync_code(client, &self.key, target, code),
            ),
            RoomEvent::GetDocument { client } => self.handle_get_document(client),
            RoomEvent::DocChange { client, op } => self.handle_doc_change(client, op),
            RoomEvent::VoiceJoin { client, username } => self.handle_voice_join(client, username),
            RoomEvent::VoiceLeave { client } => self.handle_voice_leave(client),
            RoomEvent::Signal {
                client,
                kind,
                target,
                payload,
            } => self.handle_signal(client, kind, target, payload),
        }
        Flow::Continue
    }

    fn handle_join(
        &mut self,
        client: Uuid,
        username: String,
        outbox: Outbox,
        reply: oneshot::Sender<Vec<MemberInfo>>,
    ) {
        // Idempotent per connection: a repeated join re-returns the current
        // membership and broadcasts nothing.
        if self.members.iter().any(|m| m.client_id == client) {
            let _ = reply.send(self.members.clone());
            return;
        }

        let sync_source = self.members.first().map(|m| m.client_id);

        self.members.push(MemberInfo::new(client, username.clone()));
        self.outboxes.insert(client, outbox);
        let _ = reply.send(self.members.clone());

        let joined = RelayMessage::joined(client, &self.key, self.members.clone(), &username);
        self.broadcast_except(client, &joined);

        // Late-joiner code catch-up: ask the longest-standing member to push
        // its buffer to the new connection. The relay holds no canonical
        // code state, only the advisory last-writer-wins copy.
        if let Some(source) = sync_source {
            self.send_to(source, &RelayMessage::sync_request(client, &self.key, client));
        }

        log::info!(
            "{} ({client}) joined room {} ({} members)",
            username,
            self.key,
            self.members.len()
        );
    }

    fn handle_leave(&mut self, client: Uuid, reply: oneshot::Sender<usize>) -> Flow {
        let Some(idx) = self.members.iter().position(|m| m.client_id == client) else {
            // Not a member: no-op, report current size.
            let _ = reply.send(self.members.len());
            return Flow::Continue;
        };

        let member = self.members.remove(idx);
        self.outboxes.remove(&client);

        // Voice cleanup precedes the membership broadcast so remaining voice
        // participants can drop the peer before renegotiating.
        if self.voice.leave(client).is_some() {
            let left = RelayMessage::voice_user_left(client, &self.key);
            for id in self.voice.others(client) {
                self.send_to(id, &left);
            }
        }

        let departed = RelayMessage::member_left(client, &self.key, &member.username);
        self.broadcast_except(client, &departed);

        log::info!(
            "{} ({client}) left room {} ({} members remain)",
            member.username,
            self.key,
            self.members.len()
        );

        let remaining = self.members.len();
        let _ = reply.send(remaining);
        if remaining == 0 {
            Flow::Shutdown
        } else {
            Flow::Continue
        }
    }

    fn handle_code_change(&mut self, client: Uuid, code: String) {
        // Advisory copy only; the literal text is relayed unmodified and
        // concurrent writers overwrite each other. Empty clears the buffer.
        self.code = code.clone();
        let msg = RelayMessage::code_change(client, &self.key, code);
        self.broadcast_except(client, &msg);
    }

    fn handle_get_document(&mut self, client: Uuid) {
        let doc = self.document.get_or_insert_with(Document::new);
        let init =
            RelayMessage::doc_init(client, &self.key, doc.encoded_ops(), self.members.clone());
        self.send_to(client, &init);
    }

    fn handle_doc_change(&mut self, client: Uuid, op: Vec<u8>) {
        let doc = self.document.get_or_insert_with(Document::new);
        match DocOp::decode(&op) {
            Ok(decoded) => {
                doc.apply(decoded);
                self.doc_dirty = true;
            }
            Err(e) => {
                log::warn!("Undecodable doc op from {client} in room {}: {e}", self.key);
                return;
            }
        }

        let msg = RelayMessage::doc_broadcast(client, &self.key, op);
        self.broadcast_except(client, &msg);
    }

    fn handle_voice_join(&mut self, client: Uuid, username: String) {
        if !self.voice.join(client, &username) {
            return;
        }
        let joined = RelayMessage::voice_user_joined(client, &self.key, &username);
        for id in self.voice.others(client) {
            self.send_to(id, &joined);
        }
        log::info!(
            "{username} ({client}) joined voice in room {} ({} in voice)",
            self.key,
            self.voice.len()
        );
    }

    fn handle_voice_leave(&mut self, client: Uuid) {
        if self.voice.leave(client).is_none() {
            return;
        }
        let left = RelayMessage::voice_user_left(client, &self.key);
        for id in self.voice.others(client) {
            self.send_to(id, &left);
        }
    }

    fn handle_signal(&mut self, client: Uuid, kind: MessageKind, target: Uuid, payload: Vec<u8>) {
        // Races between disconnect and in-flight signaling are expected;
        // an unknown target is dropped silently.
        if !self.outboxes.contains_key(&target) {
            log::debug!("Dropping {kind:?} from {client} to departed {target}");
            return;
        }
        let msg = RelayMessage {
            kind,
            sender: client,
            room: self.key.clone(),
            payload,
        };
        self.send_to(target, &msg);
    }

    /// Hand the current snapshot to the persistence sink, off the actor
    /// task so a slow sink never stalls editing.
    fn flush(&mut self) {
        if !self.doc_dirty {
            return;
        }
        let Some(doc) = &self.document else { return };
        self.doc_dirty = false;

        let key = self.key.clone();
        let snapshot = doc.snapshot();
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.persist(&key, &snapshot).await {
                log::error!("Failed to persist snapshot for room {key}: {e}");
            }
        });
    }

    fn send_to(&self, target: Uuid, msg: &RelayMessage) {
        let Some(outbox) = self.outboxes.get(&target) else {
            log::debug!("No outbox for {target} in room {}", self.key);
            return;
        };
        let encoded = match msg.encode() {
            Ok(bytes) => Arc::new(bytes),
            Err(e) => {
                log::error!("Failed to encode {:?} frame: {e}", msg.kind);
                return;
            }
        };
        match outbox.try_send(encoded) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("Outbox full for {target} in room {}, dropping frame", self.key);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Outbox closed for {target} in room {}", self.key);
            }
        }
    }

    fn broadcast_except(&self, sender: Uuid, msg: &RelayMessage) {
        for member in &self.members {
            if member.client_id != sender {
                self.send_to(member.client_id, msg);
            }
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> &[MemberInfo] {
        &self.members
    }

    pub fn code_snapshot(&self) -> &str {
        &self.code
    }

    pub fn voice_count(&self) -> usize {
        self.voice.len()
    }
}
