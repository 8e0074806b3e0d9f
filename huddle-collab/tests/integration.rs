//! Integration tests for end-to-end room relay behavior.
//!
//! These tests start a real server and connect real clients over loopback,
//! verifying membership, code broadcast, document sync, voice membership,
//! and disconnect cleanup through the full network stack.

use huddle_collab::client::{RelayEvent, SyncClient};
use huddle_collab::document::{DocOp, Document, MemorySink};
use huddle_collab::server::{ServerConfig, SyncServer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port, return the port.
async fn start_test_server() -> u16 {
    start_test_server_with_sink(Arc::new(MemorySink::new()), Duration::from_secs(2)).await
}

/// Start a server with an explicit snapshot sink and flush interval.
async fn start_test_server_with_sink(sink: Arc<MemorySink>, flush_interval: Duration) -> u16 {
    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        outbox_capacity: 64,
        room_queue_capacity: 64,
        flush_interval,
    };
    let server = SyncServer::with_sink(config, sink);
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// Connect a client to the test server, draining the Connected event.
async fn connect_client(
    name: &str,
    room: &str,
    port: u16,
) -> (SyncClient, mpsc::Receiver<RelayEvent>) {
    let mut client = SyncClient::new(name, room, format!("ws://127.0.0.1:{port}"));
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    match timeout(Duration::from_secs(1), events.recv()).await {
        Ok(Some(RelayEvent::Connected)) => {}
        other => panic!("Expected Connected, got {other:?}"),
    }
    (client, events)
}

/// Scan the event stream until `pred` matches, discarding everything else.
async fn recv_until<F>(events: &mut mpsc::Receiver<RelayEvent>, mut pred: F) -> RelayEvent
where
    F: FnMut(&RelayEvent) -> bool,
{
    loop {
        match timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Some(ev)) if pred(&ev) => return ev,
            Ok(Some(_)) => continue,
            other => panic!("Timed out waiting for event, last: {other:?}"),
        }
    }
}

/// Round-trip through the room actor, proving every frame this client
/// sent before has been applied (frames from one connection stay FIFO).
async fn barrier(client: &SyncClient, events: &mut mpsc::Receiver<RelayEvent>) {
    client.request_document().await.unwrap();
    let _ = recv_until(events, |e| matches!(e, RelayEvent::DocumentLoaded { .. })).await;
}

/// Assert no event matching `pred` arrives within a short window.
async fn assert_no_event<F>(events: &mut mpsc::Receiver<RelayEvent>, mut pred: F)
where
    F: FnMut(&RelayEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match timeout(remaining, events.recv()).await {
            Ok(Some(ev)) if pred(&ev) => panic!("Unexpected event: {ev:?}"),
            Ok(Some(_)) => continue,
            _ => return,
        }
    }
}

#[tokio::test]
async fn test_join_returns_membership_snapshot() {
    let port = start_test_server().await;
    let (client, mut events) = connect_client("Alice", "r1", port).await;

    let ev = recv_until(&mut events, |e| matches!(e, RelayEvent::Joined { .. })).await;
    match ev {
        RelayEvent::Joined {
            client_id,
            username,
            members,
        } => {
            assert_eq!(client_id, client.client_id());
            assert_eq!(username, "Alice");
            assert_eq!(members.len(), 1);
            assert_eq!(members[0].client_id, client.client_id());
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_second_join_broadcast_and_join_order() {
    let port = start_test_server().await;
    let (a, mut a_events) = connect_client("Alice", "r1", port).await;
    let _ = recv_until(&mut a_events, |e| matches!(e, RelayEvent::Joined { .. })).await;

    let (b, mut b_events) = connect_client("Bob", "r1", port).await;

    // Alice sees Bob's join with the full two-member snapshot.
    let ev = recv_until(&mut a_events, |e| matches!(e, RelayEvent::Joined { .. })).await;
    match ev {
        RelayEvent::Joined {
            client_id,
            username,
            members,
        } => {
            assert_eq!(client_id, b.client_id());
            assert_eq!(username, "Bob");
            assert_eq!(members.len(), 2);
            // Ordered by join time: Alice first.
            assert_eq!(members[0].client_id, a.client_id());
            assert_eq!(members[1].client_id, b.client_id());
        }
        _ => unreachable!(),
    }

    // Bob gets his own membership snapshot.
    let ev = recv_until(&mut b_events, |e| matches!(e, RelayEvent::Joined { .. })).await;
    match ev {
        RelayEvent::Joined { members, .. } => assert_eq!(members.len(), 2),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_code_change_reaches_others_not_sender() {
    let port = start_test_server().await;
    let (a, mut a_events) = connect_client("Alice", "r1", port).await;
    let (_b, mut b_events) = connect_client("Bob", "r1", port).await;
    let _ = recv_until(&mut b_events, |e| matches!(e, RelayEvent::Joined { .. })).await;

    a.send_code("print(1)").await.unwrap();

    let ev = recv_until(&mut b_events, |e| matches!(e, RelayEvent::CodeChanged { .. })).await;
    match ev {
        RelayEvent::CodeChanged { code } => assert_eq!(code, "print(1)"),
        _ => unreachable!(),
    }
    assert_no_event(&mut a_events, |e| matches!(e, RelayEvent::CodeChanged { .. })).await;
}

#[tokio::test]
async fn test_late_joiner_code_catchup_via_sync_request() {
    let port = start_test_server().await;
    let (a, mut a_events) = connect_client("Alice", "r1", port).await;
    let (b, mut b_events) = connect_client("Bob", "r1", port).await;

    // The relay asks the longest-standing member to sync the newcomer.
    let ev = recv_until(&mut a_events, |e| {
        matches!(e, RelayEvent::SyncRequested { .. })
    })
    .await;
    let target = match ev {
        RelayEvent::SyncRequested { target } => target,
        _ => unreachable!(),
    };
    assert_eq!(target, b.client_id());

    a.push_sync_code(target, "fn main() {}").await.unwrap();

    let ev = recv_until(&mut b_events, |e| matches!(e, RelayEvent::CodeSynced { .. })).await;
    match ev {
        RelayEvent::CodeSynced { code } => assert_eq!(code, "fn main() {}"),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_document_starts_empty_then_converges() {
    let port = start_test_server().await;
    let (a, mut a_events) = connect_client("Alice", "r2", port).await;
    let (b, mut b_events) = connect_client("Bob", "r2", port).await;
    let _ = recv_until(&mut b_events, |e| matches!(e, RelayEvent::Joined { .. })).await;

    // First request for a fresh room: an empty document, not an error.
    a.request_document().await.unwrap();
    let ev = recv_until(&mut a_events, |e| {
        matches!(e, RelayEvent::DocumentLoaded { .. })
    })
    .await;
    match ev {
        RelayEvent::DocumentLoaded { ops, members } => {
            assert!(ops.is_empty());
            assert_eq!(members.len(), 2);
        }
        _ => unreachable!(),
    }

    // One insert fans out to Bob but not back to Alice.
    a.send_doc_op(&DocOp::Insert {
        pos: 0,
        text: "hello".into(),
    })
    .await
    .unwrap();

    let ev = recv_until(&mut b_events, |e| {
        matches!(e, RelayEvent::RemoteDocChange { .. })
    })
    .await;
    match ev {
        RelayEvent::RemoteDocChange { client_id, op } => {
            assert_eq!(client_id, a.client_id());
            assert_eq!(
                op,
                DocOp::Insert {
                    pos: 0,
                    text: "hello".into()
                }
            );
        }
        _ => unreachable!(),
    }
    assert_no_event(&mut a_events, |e| {
        matches!(e, RelayEvent::RemoteDocChange { .. })
    })
    .await;

    // A later snapshot request replays to the same content.
    b.request_document().await.unwrap();
    let ev = recv_until(&mut b_events, |e| {
        matches!(e, RelayEvent::DocumentLoaded { .. })
    })
    .await;
    match ev {
        RelayEvent::DocumentLoaded { ops, .. } => {
            let replayed = Document::replay(ops);
            assert_eq!(replayed.content(), "hello");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_doc_changes_arrive_in_fifo_order() {
    let port = start_test_server().await;
    let (a, _a_events) = connect_client("Alice", "r1", port).await;
    let (_b, mut b_events) = connect_client("Bob", "r1", port).await;
    let _ = recv_until(&mut b_events, |e| matches!(e, RelayEvent::Joined { .. })).await;

    for i in 0..10u8 {
        a.send_doc_op(&DocOp::Insert {
            pos: i as usize,
            text: i.to_string(),
        })
        .await
        .unwrap();
    }

    let mut seen = Vec::new();
    while seen.len() < 10 {
        let ev = recv_until(&mut b_events, |e| {
            matches!(e, RelayEvent::RemoteDocChange { .. })
        })
        .await;
        if let RelayEvent::RemoteDocChange {
            op: DocOp::Insert { text, .. },
            ..
        } = ev
        {
            seen.push(text);
        }
    }
    let expected: Vec<String> = (0..10u8).map(|i| i.to_string()).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_disconnect_broadcasts_member_left_and_voice_left() {
    let port = start_test_server().await;
    let (mut a, mut a_events) = connect_client("Alice", "r1", port).await;
    let (b, mut b_events) = connect_client("Bob", "r1", port).await;

    a.join_voice().await.unwrap();
    barrier(&a, &mut a_events).await;
    b.join_voice().await.unwrap();
    let _ = recv_until(&mut a_events, |e| {
        matches!(e, RelayEvent::VoiceUserJoined { .. })
    })
    .await;

    let a_id = a.client_id();
    a.disconnect().await;

    let ev = recv_until(&mut b_events, |e| {
        matches!(e, RelayEvent::VoiceUserLeft { .. })
    })
    .await;
    match ev {
        RelayEvent::VoiceUserLeft { peer_id } => assert_eq!(peer_id, a_id),
        _ => unreachable!(),
    }
    let ev = recv_until(&mut b_events, |e| matches!(e, RelayEvent::MemberLeft { .. })).await;
    match ev {
        RelayEvent::MemberLeft {
            client_id,
            username,
        } => {
            assert_eq!(client_id, a_id);
            assert_eq!(username, "Alice");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_voice_membership_broadcast_scoped_to_voice() {
    let port = start_test_server().await;
    let (a, mut a_events) = connect_client("Alice", "r1", port).await;
    let (b, _b_events) = connect_client("Bob", "r1", port).await;
    let (_c, mut c_events) = connect_client("Cara", "r1", port).await;

    a.join_voice().await.unwrap();
    barrier(&a, &mut a_events).await;
    b.join_voice().await.unwrap();

    // Alice (already in voice) learns about Bob; Cara never joined voice
    // and hears nothing.
    let ev = recv_until(&mut a_events, |e| {
        matches!(e, RelayEvent::VoiceUserJoined { .. })
    })
    .await;
    match ev {
        RelayEvent::VoiceUserJoined { peer_id, username } => {
            assert_eq!(peer_id, b.client_id());
            assert_eq!(username, "Bob");
        }
        _ => unreachable!(),
    }
    assert_no_event(&mut c_events, |e| {
        matches!(e, RelayEvent::VoiceUserJoined { .. })
    })
    .await;

    // Voice-leave notifies the remaining participant only.
    b.leave_voice().await.unwrap();
    let ev = recv_until(&mut a_events, |e| {
        matches!(e, RelayEvent::VoiceUserLeft { .. })
    })
    .await;
    match ev {
        RelayEvent::VoiceUserLeft { peer_id } => assert_eq!(peer_id, b.client_id()),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_voice_signaling_targets_exactly_one_peer() {
    let port = start_test_server().await;
    let (a, _a_events) = connect_client("Alice", "r1", port).await;
    let (b, mut b_events) = connect_client("Bob", "r1", port).await;
    let (_c, mut c_events) = connect_client("Cara", "r1", port).await;
    let _ = recv_until(&mut b_events, |e| matches!(e, RelayEvent::Joined { .. })).await;

    a.send_offer(b.client_id(), "v=0 offer-sdp").await.unwrap();

    let ev = recv_until(&mut b_events, |e| matches!(e, RelayEvent::VoiceOffer { .. })).await;
    match ev {
        RelayEvent::VoiceOffer {
            from,
            sdp,
            username,
        } => {
            assert_eq!(from, a.client_id());
            assert_eq!(sdp, "v=0 offer-sdp");
            assert_eq!(username, "Alice");
        }
        _ => unreachable!(),
    }
    assert_no_event(&mut c_events, |e| matches!(e, RelayEvent::VoiceOffer { .. })).await;
}

#[tokio::test]
async fn test_signaling_to_departed_peer_does_not_crash_relay() {
    let port = start_test_server().await;
    let (a, mut a_events) = connect_client("Alice", "r1", port).await;

    a.send_candidate(Uuid::new_v4(), "candidate:lost").await.unwrap();

    // The relay drops the frame silently and keeps serving us.
    a.send_ping().await.unwrap();
    let _ = recv_until(&mut a_events, |e| matches!(e, RelayEvent::Pong)).await;
}

#[tokio::test]
async fn test_periodic_flush_hands_snapshot_to_sink() {
    let sink = Arc::new(MemorySink::new());
    let port = start_test_server_with_sink(sink.clone(), Duration::from_millis(100)).await;
    let (a, _a_events) = connect_client("Alice", "r3", port).await;

    a.send_doc_op(&DocOp::Insert {
        pos: 0,
        text: "persist me".into(),
    })
    .await
    .unwrap();

    // Two flush intervals is plenty.
    tokio::time::sleep(Duration::from_millis(350)).await;

    let snapshot = sink.latest("r3").expect("snapshot should be persisted");
    assert_eq!(snapshot.content, "persist me");
    assert_eq!(snapshot.revision, 1);
}

#[tokio::test]
async fn test_rooms_do_not_leak_across_keys() {
    let port = start_test_server().await;
    let (a, _a_events) = connect_client("Alice", "room-a", port).await;
    let (_b, mut b_events) = connect_client("Bob", "room-b", port).await;

    a.send_code("secret").await.unwrap();

    assert_no_event(&mut b_events, |e| matches!(e, RelayEvent::CodeChanged { .. })).await;
}
