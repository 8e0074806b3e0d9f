//! Full-mesh voice coordinator: one state machine per remote peer.
//!
//! For N participants the mesh settles into N·(N−1)/2 live pairs. The
//! glare tie-break is structural: the side that learns of a new peer via
//! `voice-user-joined` initiates the offer toward it; the newly joined
//! side only ever answers. Two peers therefore never race offers for the
//! same pair.
//!
//! ```text
//! voice-user-joined(B)          voice-offer(A)
//!        │ (at A)                     │ (at B)
//!        ▼                            ▼
//! create_offer ──► relay ──► apply_offer ──► create_answer ──► relay
//!        │                            │
//!        ▼                            ▼
//! HaveLocalOffer                   Stable
//!        │         voice-answer(B)
//!        ▼               │ (at A)
//!      Stable ◄──────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use uuid::Uuid;

use huddle_collab::client::{RelayEvent, SyncClient};
use huddle_collab::protocol::ProtocolError;

use crate::agent::MediaAgent;
use crate::link::{CandidateDisposition, LinkState, PeerLink};

/// Outbound signaling path from the mesh back to the relay.
#[async_trait]
pub trait VoiceSignaler: Send + Sync {
    async fn send_offer(&self, target: Uuid, sdp: String) -> Result<(), ProtocolError>;
    async fn send_answer(&self, target: Uuid, sdp: String) -> Result<(), ProtocolError>;
    async fn send_candidate(&self, target: Uuid, candidate: String) -> Result<(), ProtocolError>;
}

#[async_trait]
impl VoiceSignaler for SyncClient {
    async fn send_offer(&self, target: Uuid, sdp: String) -> Result<(), ProtocolError> {
        SyncClient::send_offer(self, target, sdp).await
    }

    async fn send_answer(&self, target: Uuid, sdp: String) -> Result<(), ProtocolError> {
        SyncClient::send_answer(self, target, sdp).await
    }

    async fn send_candidate(&self, target: Uuid, candidate: String) -> Result<(), ProtocolError> {
        SyncClient::send_candidate(self, target, candidate).await
    }
}

/// Manages every peer link for the local voice participant.
pub struct VoiceMesh {
    local_id: Uuid,
    links: HashMap<Uuid, PeerLink>,
    agent: Arc<dyn MediaAgent>,
    signaler: Arc<dyn VoiceSignaler>,
    muted: bool,
}

impl VoiceMesh {
    pub fn new(local_id: Uuid, agent: Arc<dyn MediaAgent>, signaler: Arc<dyn VoiceSignaler>) -> Self {
        Self {
            local_id,
            links: HashMap::new(),
            agent,
            signaler,
            muted: false,
        }
    }

    /// Feed one relay event into the mesh. Non-voice events are ignored.
    pub async fn handle_event(&mut self, event: &RelayEvent) {
        match event {
            RelayEvent::VoiceUserJoined { peer_id, username } => {
                self.on_user_joined(*peer_id, username).await;
            }
            RelayEvent::VoiceOffer {
                from,
                sdp,
                username,
            } => {
                self.on_offer(*from, username, sdp).await;
            }
            RelayEvent::VoiceAnswer { from, sdp } => {
                self.on_answer(*from, sdp).await;
            }
            RelayEvent::VoiceCandidate { from, candidate } => {
                self.on_candidate(*from, candidate).await;
            }
            RelayEvent::VoiceUserLeft { peer_id } => {
                self.on_user_left(*peer_id).await;
            }
            // Losing our own connection releases every link's media.
            RelayEvent::Disconnected => {
                self.leave().await;
            }
            _ => {}
        }
    }

    /// A new peer entered the conversation: we are the initiator.
    pub async fn on_user_joined(&mut self, peer: Uuid, username: &str) {
        if peer == self.local_id {
            return;
        }

        // A lingering negotiated link is stale; renegotiation always starts
        // from a fresh machine. A placeholder in New (early candidates) is
        // kept so its queue survives.
        let needs_fresh = self
            .links
            .get(&peer)
            .map(|l| l.state() != LinkState::New)
            .unwrap_or(true);
        if needs_fresh {
            self.drop_link(peer).await;
            self.links.insert(peer, PeerLink::new(peer, username));
        }

        match self.agent.create_offer(peer).await {
            Ok(sdp) => {
                if let Some(link) = self.links.get_mut(&peer) {
                    link.mark_local_offer();
                }
                if let Err(e) = self.signaler.send_offer(peer, sdp).await {
                    log::warn!("Failed to relay offer to {peer}: {e}");
                }
            }
            Err(e) => {
                log::error!("Failed to create offer for {peer}: {e}");
                self.drop_link(peer).await;
            }
        }
    }

    /// An offer arrived: we are the receiver and only answer.
    pub async fn on_offer(&mut self, from: Uuid, username: &str, sdp: &str) {
        // Reuse a placeholder link created by early candidates; anything
        // further along is stale and gets replaced.
        let needs_fresh = self
            .links
            .get(&from)
            .map(|l| l.state() != LinkState::New)
            .unwrap_or(true);
        if needs_fresh {
            self.drop_link(from).await;
            self.links.insert(from, PeerLink::new(from, username));
        }

        if let Err(e) = self.agent.apply_offer(from, sdp).await {
            log::error!("Failed to apply offer from {from}: {e}");
            self.drop_link(from).await;
            return;
        }

        let link = match self.links.get_mut(&from) {
            Some(l) => l,
            None => return,
        };
        if !link.accept_remote_offer() {
            return;
        }
        let queued = link.drain_candidates();
        self.flush_candidates(from, queued).await;

        match self.agent.create_answer(from).await {
            Ok(answer) => {
                if let Err(e) = self.signaler.send_answer(from, answer).await {
                    log::warn!("Failed to relay answer to {from}: {e}");
                }
                if let Some(link) = self.links.get_mut(&from) {
                    link.mark_answer_sent();
                }
            }
            Err(e) => {
                log::error!("Failed to create answer for {from}: {e}");
                self.drop_link(from).await;
            }
        }
    }

    /// The matching answer arrived for an offer we initiated.
    pub async fn on_answer(&mut self, from: Uuid, sdp: &str) {
        let Some(link) = self.links.get_mut(&from) else {
            log::warn!("Answer from {from} with no link, ignoring");
            return;
        };
        if link.state() != LinkState::HaveLocalOffer {
            log::warn!(
                "Answer from {from} in state {:?}, ignoring",
                link.state()
            );
            return;
        }

        if let Err(e) = self.agent.apply_answer(from, sdp).await {
            log::error!("Failed to apply answer from {from}: {e}");
            return;
        }

        let Some(link) = self.links.get_mut(&from) else { return };
        link.accept_remote_answer();
        let queued = link.drain_candidates();
        self.flush_candidates(from, queued).await;
    }

    /// A candidate arrived, possibly before the description it belongs to.
    pub async fn on_candidate(&mut self, from: Uuid, candidate: &str) {
        // Candidates can beat the offer itself; park them on a placeholder
        // link so nothing is lost.
        let link = self
            .links
            .entry(from)
            .or_insert_with(|| PeerLink::new(from, format!("peer-{}", &from.to_string()[..8])));

        match link.push_candidate(candidate.to_string()) {
            CandidateDisposition::Apply => {
                if let Err(e) = self.agent.add_candidate(from, candidate).await {
                    log::warn!("Failed to add candidate from {from}: {e}");
                }
            }
            CandidateDisposition::Queued => {
                log::debug!(
                    "Queued candidate from {from} ({} pending)",
                    self.links[&from].queued_candidates()
                );
            }
            CandidateDisposition::Rejected => {}
        }
    }

    /// A peer left the conversation (or its connection dropped).
    pub async fn on_user_left(&mut self, peer: Uuid) {
        if let Some(mut link) = self.links.remove(&peer) {
            link.close();
            self.agent.close(peer).await;
            log::info!("Closed voice link to {peer}");
        }
    }

    /// Leave the conversation: tear down every link and its media.
    pub async fn leave(&mut self) {
        let peers: Vec<Uuid> = self.links.keys().copied().collect();
        for peer in peers {
            self.on_user_left(peer).await;
        }
    }

    /// Toggle the local microphone. Mute state never crosses the wire; it
    /// only disables the outgoing tracks.
    pub async fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.agent.set_muted(muted).await;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    async fn flush_candidates(&mut self, peer: Uuid, queued: Vec<String>) {
        for candidate in queued {
            if let Err(e) = self.agent.add_candidate(peer, &candidate).await {
                log::warn!("Failed to add queued candidate from {peer}: {e}");
            }
        }
    }

    async fn drop_link(&mut self, peer: Uuid) {
        if let Some(mut link) = self.links.remove(&peer) {
            link.close();
            self.agent.close(peer).await;
        }
    }

    pub fn local_id(&self) -> Uuid {
        self.local_id
    }

    pub fn link_state(&self, peer: Uuid) -> Option<LinkState> {
        self.links.get(&peer).map(|l| l.state())
    }

    pub fn peer_count(&self) -> usize {
        self.links.len()
    }

    pub fn stable_count(&self) -> usize {
        self.links.values().filter(|l| l.is_stable()).count()
    }

    pub fn peers(&self) -> Vec<Uuid> {
        self.links.keys().copied().collect()
    }
}
