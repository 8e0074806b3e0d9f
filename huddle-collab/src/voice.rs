//! Voice-participant bookkeeping for a room.
//!
//! The voice subset is distinct from text-editing membership: a member may
//! sit in the room without joining the conversation. The roster only tracks
//! who is in the voice mesh; SDP and ICE payloads are forwarded verbatim by
//! the room and never inspected here.

use crate::protocol::MemberInfo;
use uuid::Uuid;

/// Voice-participant subset of one room, ordered by voice-join time.
#[derive(Debug, Default)]
pub struct VoiceRoster {
    participants: Vec<MemberInfo>,
}

impl VoiceRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant. Returns false if the connection is already in the
    /// roster (duplicate voice-join is a no-op).
    pub fn join(&mut self, client_id: Uuid, username: impl Into<String>) -> bool {
        if self.contains(client_id) {
            return false;
        }
        self.participants.push(MemberInfo::new(client_id, username));
        true
    }

    /// Remove a participant. Returns the removed entry, or None when the
    /// connection never joined voice (disconnect of a text-only member).
    pub fn leave(&mut self, client_id: Uuid) -> Option<MemberInfo> {
        let idx = self
            .participants
            .iter()
            .position(|p| p.client_id == client_id)?;
        Some(self.participants.remove(idx))
    }

    pub fn contains(&self, client_id: Uuid) -> bool {
        self.participants.iter().any(|p| p.client_id == client_id)
    }

    /// Connection ids of every participant except `excluded`.
    pub fn others(&self, excluded: Uuid) -> Vec<Uuid> {
        self.participants
            .iter()
            .filter(|p| p.client_id != excluded)
            .map(|p| p.client_id)
            .collect()
    }

    pub fn participants(&self) -> &[MemberInfo] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
