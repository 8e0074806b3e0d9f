//! Media boundary: the WebRTC/audio stack behind the mesh.
//!
//! The mesh drives negotiation but never touches SDP internals, devices,
//! or tracks; those live behind [`MediaAgent`]. Description and candidate
//! application are inherently asynchronous and must not block event
//! processing, hence the async contract.

use async_trait::async_trait;
use uuid::Uuid;

/// Media-layer errors.
///
/// Device errors (microphone permission, missing hardware) are the only
/// voice failures surfaced to the user; negotiation errors are logged and
/// the affected link is abandoned.
#[derive(Debug, Clone)]
pub enum MediaError {
    Device(String),
    Negotiation(String),
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device(e) => write!(f, "Device error: {e}"),
            Self::Negotiation(e) => write!(f, "Negotiation error: {e}"),
        }
    }
}

impl std::error::Error for MediaError {}

/// Black-box media stack driven by the mesh, one session per remote peer.
#[async_trait]
pub trait MediaAgent: Send + Sync {
    /// Create a local offer for `peer` and set it as the local description.
    async fn create_offer(&self, peer: Uuid) -> Result<String, MediaError>;

    /// Apply a remote offer from `peer` as the remote description.
    async fn apply_offer(&self, peer: Uuid, sdp: &str) -> Result<(), MediaError>;

    /// Create an answer for `peer` (after its offer was applied) and set it
    /// as the local description.
    async fn create_answer(&self, peer: Uuid) -> Result<String, MediaError>;

    /// Apply a remote answer from `peer` as the remote description.
    async fn apply_answer(&self, peer: Uuid, sdp: &str) -> Result<(), MediaError>;

    /// Apply one remote ICE candidate for `peer`.
    async fn add_candidate(&self, peer: Uuid, candidate: &str) -> Result<(), MediaError>;

    /// Release every media resource held for `peer`.
    async fn close(&self, peer: Uuid);

    /// Enable or disable the local outgoing audio tracks.
    async fn set_muted(&self, muted: bool);
}
