//! Binary wire protocol for the room relay.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┐
//! │ kind     │ sender    │ room     │ payload  │
//! │ 1 byte   │ 16 bytes  │ variable │ variable │
//! └──────────┴───────────┴──────────┴──────────┘
//! ```
//!
//! Every frame names the connection it originated from (`sender`) and the
//! room it is scoped to. Targeted frames (sync-code, voice signaling) carry
//! the destination connection inside their payload; the relay forwards the
//! payload bytes verbatim.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message kinds for the relay protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// Client requests to enter a room
    Join = 1,
    /// Membership snapshot plus who joined
    Joined = 2,
    /// A member departed
    MemberLeft = 3,
    /// Full code-buffer broadcast
    CodeChange = 4,
    /// Ask one member to sync its buffer to a late joiner
    SyncRequest = 5,
    /// Targeted code catch-up for one new joiner
    SyncCode = 6,
    /// Request the current document snapshot
    GetDocument = 7,
    /// Document delta log response for a late joiner
    DocInit = 8,
    /// One document operation to merge and fan out
    DocChange = 9,
    /// Fan-out of a merged document operation
    DocBroadcast = 10,
    /// Enter the voice-participant subset
    VoiceJoin = 11,
    /// Voice-membership broadcast: peer entered
    VoiceUserJoined = 12,
    /// Targeted SDP offer relay
    VoiceOffer = 13,
    /// Targeted SDP answer relay
    VoiceAnswer = 14,
    /// Targeted ICE candidate relay
    IceCandidate = 15,
    /// Voice-membership broadcast: peer departed
    VoiceUserLeft = 16,
    /// Exit the voice-participant subset
    VoiceLeave = 17,
    /// Heartbeat ping
    Ping = 18,
    /// Heartbeat pong
    Pong = 19,
}

/// One room member as seen by the relay: connection id plus display name.
///
/// Display names are not unique; the connection id is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberInfo {
    pub client_id: Uuid,
    pub username: String,
}

impl MemberInfo {
    pub fn new(client_id: Uuid, username: impl Into<String>) -> Self {
        Self {
            client_id,
            username: username.into(),
        }
    }
}

/// Payload for Join / VoiceJoin / MemberLeft / VoiceUserJoined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPayload {
    pub username: String,
}

/// Payload for Joined: ordered membership snapshot plus who joined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinedPayload {
    /// Members ordered by join time, newest last.
    pub members: Vec<MemberInfo>,
    /// Display name of the member that just joined.
    pub username: String,
}

/// Payload for CodeChange: the literal buffer, no diffing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodePayload {
    pub code: String,
}

/// Payload for SyncRequest: the relay asks one member to push its buffer
/// to the named late joiner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRequestPayload {
    pub target: Uuid,
}

/// Payload for SyncCode: targeted catch-up for one connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncCodePayload {
    pub target: Uuid,
    pub code: String,
}

/// Payload for DocInit: the ordered operation log (each entry an encoded
/// document operation) plus the current membership. Replaying the log from
/// an empty document materializes the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocInitPayload {
    pub ops: Vec<Vec<u8>>,
    pub members: Vec<MemberInfo>,
}

/// Payload for VoiceOffer: SDP toward one peer, with the caller's name so
/// the receiver can label the participant before media flows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferPayload {
    pub target: Uuid,
    pub sdp: String,
    pub username: String,
}

/// Payload for VoiceAnswer: SDP back toward the offerer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerPayload {
    pub target: Uuid,
    pub sdp: String,
}

/// Payload for IceCandidate: one candidate toward one peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidatePayload {
    pub target: Uuid,
    pub candidate: String,
}

/// Top-level relay frame.
///
/// Serialized with bincode. Payload bytes vary by kind and are opaque to
/// the relay for targeted forwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessage {
    pub kind: MessageKind,
    /// Connection the frame originated from.
    pub sender: Uuid,
    /// Room key the frame is scoped to. Empty for heartbeats.
    pub room: String,
    pub payload: Vec<u8>,
}

fn encode_payload<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).unwrap_or_default()
}

fn decode_payload<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(value)
}

impl RelayMessage {
    /// Client requests to enter a room.
    pub fn join(sender: Uuid, room: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Join,
            sender,
            room: room.into(),
            payload: encode_payload(&UserPayload {
                username: username.into(),
            }),
        }
    }

    /// Membership snapshot broadcast. The envelope sender is the joiner.
    pub fn joined(
        sender: Uuid,
        room: impl Into<String>,
        members: Vec<MemberInfo>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::Joined,
            sender,
            room: room.into(),
            payload: encode_payload(&JoinedPayload {
                members,
                username: username.into(),
            }),
        }
    }

    /// Departure broadcast. The envelope sender is the departed connection.
    pub fn member_left(sender: Uuid, room: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::MemberLeft,
            sender,
            room: room.into(),
            payload: encode_payload(&UserPayload {
                username: username.into(),
            }),
        }
    }

    /// Full-buffer code broadcast. Empty text is valid and clears the buffer.
    pub fn code_change(sender: Uuid, room: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::CodeChange,
            sender,
            room: room.into(),
            payload: encode_payload(&CodePayload { code: code.into() }),
        }
    }

    /// Ask one member to push its buffer to `target`.
    pub fn sync_request(sender: Uuid, room: impl Into<String>, target: Uuid) -> Self {
        Self {
            kind: MessageKind::SyncRequest,
            sender,
            room: room.into(),
            payload: encode_payload(&SyncRequestPayload { target }),
        }
    }

    /// Targeted code catch-up for one new joiner.
    pub fn sync_code(
        sender: Uuid,
        room: impl Into<String>,
        target: Uuid,
        code: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::SyncCode,
            sender,
            room: room.into(),
            payload: encode_payload(&SyncCodePayload {
                target,
                code: code.into(),
            }),
        }
    }

    /// Request the current document snapshot.
    pub fn get_document(sender: Uuid, room: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::GetDocument,
            sender,
            room: room.into(),
            payload: Vec::new(),
        }
    }

    /// Document delta log for a late joiner.
    pub fn doc_init(
        sender: Uuid,
        room: impl Into<String>,
        ops: Vec<Vec<u8>>,
        members: Vec<MemberInfo>,
    ) -> Self {
        Self {
            kind: MessageKind::DocInit,
            sender,
            room: room.into(),
            payload: encode_payload(&DocInitPayload { ops, members }),
        }
    }

    /// One document operation, pre-encoded by the editing widget.
    pub fn doc_change(sender: Uuid, room: impl Into<String>, op: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::DocChange,
            sender,
            room: room.into(),
            payload: op,
        }
    }

    /// Fan-out of a merged document operation, payload verbatim.
    pub fn doc_broadcast(sender: Uuid, room: impl Into<String>, op: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::DocBroadcast,
            sender,
            room: room.into(),
            payload: op,
        }
    }

    /// Enter the voice-participant subset.
    pub fn voice_join(sender: Uuid, room: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::VoiceJoin,
            sender,
            room: room.into(),
            payload: encode_payload(&UserPayload {
                username: username.into(),
            }),
        }
    }

    /// Voice-membership broadcast. The envelope sender is the new voice peer.
    pub fn voice_user_joined(
        sender: Uuid,
        room: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::VoiceUserJoined,
            sender,
            room: room.into(),
            payload: encode_payload(&UserPayload {
                username: username.into(),
            }),
        }
    }

    /// SDP offer toward `target`.
    pub fn voice_offer(
        sender: Uuid,
        room: impl Into<String>,
        target: Uuid,
        sdp: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::VoiceOffer,
            sender,
            room: room.into(),
            payload: encode_payload(&OfferPayload {
                target,
                sdp: sdp.into(),
                username: username.into(),
            }),
        }
    }

    /// SDP answer toward `target`.
    pub fn voice_answer(
        sender: Uuid,
        room: impl Into<String>,
        target: Uuid,
        sdp: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::VoiceAnswer,
            sender,
            room: room.into(),
            payload: encode_payload(&AnswerPayload {
                target,
                sdp: sdp.into(),
            }),
        }
    }

    /// One ICE candidate toward `target`.
    pub fn ice_candidate(
        sender: Uuid,
        room: impl Into<String>,
        target: Uuid,
        candidate: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::IceCandidate,
            sender,
            room: room.into(),
            payload: encode_payload(&CandidatePayload {
                target,
                candidate: candidate.into(),
            }),
        }
    }

    /// Voice-membership broadcast. The envelope sender is the departed peer.
    pub fn voice_user_left(sender: Uuid, room: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::VoiceUserLeft,
            sender,
            room: room.into(),
            payload: Vec::new(),
        }
    }

    /// Exit the voice-participant subset.
    pub fn voice_leave(sender: Uuid, room: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::VoiceLeave,
            sender,
            room: room.into(),
            payload: Vec::new(),
        }
    }

    /// Heartbeat ping.
    pub fn ping(sender: Uuid) -> Self {
        Self {
            kind: MessageKind::Ping,
            sender,
            room: String::new(),
            payload: Vec::new(),
        }
    }

    /// Heartbeat pong.
    pub fn pong(sender: Uuid) -> Self {
        Self {
            kind: MessageKind::Pong,
            sender,
            room: String::new(),
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Parse the display-name payload (Join, VoiceJoin, MemberLeft,
    /// VoiceUserJoined).
    pub fn user(&self) -> Result<UserPayload, ProtocolError> {
        match self.kind {
            MessageKind::Join
            | MessageKind::VoiceJoin
            | MessageKind::MemberLeft
            | MessageKind::VoiceUserJoined => decode_payload(&self.payload),
            _ => Err(ProtocolError::InvalidMessageKind),
        }
    }

    /// Parse the membership-snapshot payload.
    pub fn joined_payload(&self) -> Result<JoinedPayload, ProtocolError> {
        if self.kind != MessageKind::Joined {
            return Err(ProtocolError::InvalidMessageKind);
        }
        decode_payload(&self.payload)
    }

    /// Parse the code-buffer payload.
    pub fn code(&self) -> Result<CodePayload, ProtocolError> {
        if self.kind != MessageKind::CodeChange {
            return Err(ProtocolError::InvalidMessageKind);
        }
        decode_payload(&self.payload)
    }

    /// Parse the sync-request payload.
    pub fn sync_request_payload(&self) -> Result<SyncRequestPayload, ProtocolError> {
        if self.kind != MessageKind::SyncRequest {
            return Err(ProtocolError::InvalidMessageKind);
        }
        decode_payload(&self.payload)
    }

    /// Parse the targeted code catch-up payload.
    pub fn sync_code_payload(&self) -> Result<SyncCodePayload, ProtocolError> {
        if self.kind != MessageKind::SyncCode {
            return Err(ProtocolError::InvalidMessageKind);
        }
        decode_payload(&self.payload)
    }

    /// Parse the document-init payload.
    pub fn doc_init_payload(&self) -> Result<DocInitPayload, ProtocolError> {
        if self.kind != MessageKind::DocInit {
            return Err(ProtocolError::InvalidMessageKind);
        }
        decode_payload(&self.payload)
    }

    /// Parse the offer payload.
    pub fn offer(&self) -> Result<OfferPayload, ProtocolError> {
        if self.kind != MessageKind::VoiceOffer {
            return Err(ProtocolError::InvalidMessageKind);
        }
        decode_payload(&self.payload)
    }

    /// Parse the answer payload.
    pub fn answer(&self) -> Result<AnswerPayload, ProtocolError> {
        if self.kind != MessageKind::VoiceAnswer {
            return Err(ProtocolError::InvalidMessageKind);
        }
        decode_payload(&self.payload)
    }

    /// Parse the ICE candidate payload.
    pub fn candidate(&self) -> Result<CandidatePayload, ProtocolError> {
        if self.kind != MessageKind::IceCandidate {
            return Err(ProtocolError::InvalidMessageKind);
        }
        decode_payload(&self.payload)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageKind,
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageKind => write!(f, "Invalid message kind"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
