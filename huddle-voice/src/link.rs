//! Per-peer negotiation state machine.
//!
//! One [`PeerLink`] tracks one directed signaling relationship:
//!
//! ```text
//! New ──► HaveLocalOffer ──► Stable ──► Closed
//!   └───► HaveRemoteOffer ──► Stable
//! ```
//!
//! The critical correctness property lives here: ICE candidates that
//! arrive before the remote description is set are queued, never dropped,
//! and handed back for application the moment the description lands.
//! A closed link is never resurrected; renegotiation takes a fresh one.

use uuid::Uuid;

/// Negotiation phase of one peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, no description exchanged yet
    New,
    /// We sent an offer and await the answer
    HaveLocalOffer,
    /// We received an offer and owe an answer
    HaveRemoteOffer,
    /// Both descriptions applied, media can flow
    Stable,
    /// Torn down; a fresh link is required to renegotiate
    Closed,
}

/// What to do with an incoming ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// Remote description is set: apply immediately
    Apply,
    /// Remote description not set yet: held in the queue
    Queued,
    /// Link is closed: candidate dropped
    Rejected,
}

/// One directed signaling relationship toward a remote voice peer.
#[derive(Debug)]
pub struct PeerLink {
    peer_id: Uuid,
    username: String,
    state: LinkState,
    /// Candidates received before the remote description was applied.
    pending_candidates: Vec<String>,
    remote_description_set: bool,
}

impl PeerLink {
    pub fn new(peer_id: Uuid, username: impl Into<String>) -> Self {
        Self {
            peer_id,
            username: username.into(),
            state: LinkState::New,
            pending_candidates: Vec::new(),
            remote_description_set: false,
        }
    }

    /// Record that we created and sent an offer. Valid only from `New`.
    pub fn mark_local_offer(&mut self) -> bool {
        if self.state != LinkState::New {
            log::warn!(
                "Ignoring local offer for {} in state {:?}",
                self.peer_id,
                self.state
            );
            return false;
        }
        self.state = LinkState::HaveLocalOffer;
        true
    }

    /// Record that the remote offer was applied. Valid only from `New`.
    /// Sets the remote description, so queued candidates become flushable.
    pub fn accept_remote_offer(&mut self) -> bool {
        if self.state != LinkState::New {
            log::warn!(
                "Ignoring remote offer for {} in state {:?}",
                self.peer_id,
                self.state
            );
            return false;
        }
        self.state = LinkState::HaveRemoteOffer;
        self.remote_description_set = true;
        true
    }

    /// Record that our answer went out. Valid only from `HaveRemoteOffer`.
    pub fn mark_answer_sent(&mut self) -> bool {
        if self.state != LinkState::HaveRemoteOffer {
            log::warn!(
                "Ignoring answer-sent for {} in state {:?}",
                self.peer_id,
                self.state
            );
            return false;
        }
        self.state = LinkState::Stable;
        true
    }

    /// Record that the matching answer was applied. Valid only from
    /// `HaveLocalOffer`. Sets the remote description.
    pub fn accept_remote_answer(&mut self) -> bool {
        if self.state != LinkState::HaveLocalOffer {
            log::warn!(
                "Ignoring answer for {} in state {:?}",
                self.peer_id,
                self.state
            );
            return false;
        }
        self.state = LinkState::Stable;
        self.remote_description_set = true;
        true
    }

    /// Route one incoming candidate: apply now, queue, or reject.
    pub fn push_candidate(&mut self, candidate: String) -> CandidateDisposition {
        if self.state == LinkState::Closed {
            log::warn!("Dropping candidate for closed link {}", self.peer_id);
            return CandidateDisposition::Rejected;
        }
        if self.remote_description_set {
            return CandidateDisposition::Apply;
        }
        self.pending_candidates.push(candidate);
        CandidateDisposition::Queued
    }

    /// Take every queued candidate for application. Call right after the
    /// remote description is applied.
    pub fn drain_candidates(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_candidates)
    }

    /// Tear the link down. Queued candidates are discarded.
    pub fn close(&mut self) {
        self.state = LinkState::Closed;
        self.pending_candidates.clear();
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_stable(&self) -> bool {
        self.state == LinkState::Stable
    }

    pub fn is_closed(&self) -> bool {
        self.state == LinkState::Closed
    }

    pub fn queued_candidates(&self) -> usize {
        self.pending_candidates.len()
    }
}
