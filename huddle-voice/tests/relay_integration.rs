//! End-to-end test: two voice meshes negotiating through the real relay.
//!
//! Each participant runs a real WebSocket client; its relay events feed the
//! mesh, and the mesh's outbound signals go back through the client. Only
//! the media stack is scripted.

use async_trait::async_trait;
use huddle_collab::client::{RelayEvent, SyncClient};
use huddle_collab::server::{ServerConfig, SyncServer};
use huddle_voice::agent::{MediaAgent, MediaError};
use huddle_voice::link::LinkState;
use huddle_voice::mesh::VoiceMesh;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration, Instant};
use uuid::Uuid;

#[derive(Default)]
struct ScriptedAgent {
    closed: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl MediaAgent for ScriptedAgent {
    async fn create_offer(&self, peer: Uuid) -> Result<String, MediaError> {
        Ok(format!("offer-for:{peer}"))
    }

    async fn apply_offer(&self, _peer: Uuid, _sdp: &str) -> Result<(), MediaError> {
        Ok(())
    }

    async fn create_answer(&self, peer: Uuid) -> Result<String, MediaError> {
        Ok(format!("answer-for:{peer}"))
    }

    async fn apply_answer(&self, _peer: Uuid, _sdp: &str) -> Result<(), MediaError> {
        Ok(())
    }

    async fn add_candidate(&self, _peer: Uuid, _candidate: &str) -> Result<(), MediaError> {
        Ok(())
    }

    async fn close(&self, peer: Uuid) {
        self.closed.lock().unwrap().push(peer);
    }

    async fn set_muted(&self, _muted: bool) {}
}

async fn start_test_server() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..ServerConfig::default()
    };
    let server = SyncServer::new(config);
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

struct VoicePeer {
    client: Arc<SyncClient>,
    events: mpsc::Receiver<RelayEvent>,
    mesh: VoiceMesh,
    agent: Arc<ScriptedAgent>,
}

async fn voice_peer(name: &str, port: u16) -> VoicePeer {
    let mut client = SyncClient::new(name, "r1", format!("ws://127.0.0.1:{port}"));
    let events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    let client = Arc::new(client);

    let agent = Arc::new(ScriptedAgent::default());
    let mesh = VoiceMesh::new(client.client_id(), agent.clone(), client.clone());
    VoicePeer {
        client,
        events,
        mesh,
        agent,
    }
}

/// Drain any pending relay events into the mesh.
async fn drain_into_mesh(peer: &mut VoicePeer) {
    while let Ok(Some(ev)) = timeout(Duration::from_millis(50), peer.events.recv()).await {
        peer.mesh.handle_event(&ev).await;
    }
}

#[tokio::test]
async fn test_two_peers_stabilize_over_relay() {
    let port = start_test_server().await;

    let mut alice = voice_peer("Alice", port).await;
    alice.client.join_voice().await.unwrap();

    let mut bob = voice_peer("Bob", port).await;
    bob.client.join_voice().await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        drain_into_mesh(&mut alice).await;
        drain_into_mesh(&mut bob).await;
        if alice.mesh.stable_count() == 1 && bob.mesh.stable_count() == 1 {
            break;
        }
    }

    assert_eq!(
        alice.mesh.link_state(bob.client.client_id()),
        Some(LinkState::Stable)
    );
    assert_eq!(
        bob.mesh.link_state(alice.client.client_id()),
        Some(LinkState::Stable)
    );
}

#[tokio::test]
async fn test_voice_leave_tears_down_remote_link() {
    let port = start_test_server().await;

    let mut alice = voice_peer("Alice", port).await;
    alice.client.join_voice().await.unwrap();
    let mut bob = voice_peer("Bob", port).await;
    bob.client.join_voice().await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        drain_into_mesh(&mut alice).await;
        drain_into_mesh(&mut bob).await;
        if alice.mesh.stable_count() == 1 && bob.mesh.stable_count() == 1 {
            break;
        }
    }
    assert_eq!(alice.mesh.stable_count(), 1);

    let bob_id = bob.client.client_id();
    bob.client.leave_voice().await.unwrap();
    bob.mesh.leave().await;

    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        drain_into_mesh(&mut alice).await;
        if alice.mesh.peer_count() == 0 {
            break;
        }
    }

    assert_eq!(alice.mesh.link_state(bob_id), None);
    assert!(alice.agent.closed.lock().unwrap().contains(&bob_id));
}
