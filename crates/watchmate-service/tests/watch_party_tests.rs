//! WebSocket watch-party flows against a real server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::panic)]

use serde_json::json;
use std::time::{Duration, Instant};
use watchmate_service::protocol::ServerEvent;
use watchmate_test_utils::server_harness::TEST_COUNTDOWN_TICK;
use watchmate_test_utils::{TestClient, TestPartyServer};

/// Collect countdown values (with arrival time) until 0.
async fn collect_countdown(
    client: &mut TestClient,
    since: Instant,
) -> Result<Vec<(Duration, u8)>, anyhow::Error> {
    let mut ticks = Vec::new();
    loop {
        if let ServerEvent::Countdown { value } = client.recv_event().await? {
            ticks.push((since.elapsed(), value));
            if value == 0 {
                return Ok(ticks);
            }
        }
    }
}

#[tokio::test]
async fn test_join_reports_membership_and_host() -> Result<(), anyhow::Error> {
    let server = TestPartyServer::spawn().await?;
    let room = server.create_room(false, None).await?;

    let mut alice = TestClient::connect(&server).await?;
    assert!(alice.join(&room.room_code, "Alice", None).await?);

    let mut bob = TestClient::connect(&server).await?;
    assert!(!bob.join(&room.room_code, "Bob", None).await?);

    let event = alice
        .recv_until(|e| matches!(e, ServerEvent::UsersUpdate { members } if members.len() == 2))
        .await?;
    let ServerEvent::UsersUpdate { members } = event else {
        panic!("expected users-update");
    };
    assert_eq!(members[0].display_name, "Alice");
    assert!(members[0].is_host);
    assert_eq!(members[1].display_name, "Bob");
    assert!(!members[1].is_host);

    Ok(())
}

#[tokio::test]
async fn test_join_unknown_room_reports_error() -> Result<(), anyhow::Error> {
    let server = TestPartyServer::spawn().await?;

    let mut client = TestClient::connect(&server).await?;
    client
        .send_json(&json!({
            "type": "join-room",
            "roomCode": "NOPE00",
            "displayName": "Alice",
        }))
        .await?;

    match client.recv_event().await? {
        ServerEvent::Error { code, .. } => assert_eq!(code, "ROOM_NOT_FOUND"),
        other => panic!("expected error, got {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn test_all_ready_countdown_reaches_everyone() -> Result<(), anyhow::Error> {
    let server = TestPartyServer::spawn().await?;
    let room = server.create_room(false, None).await?;

    let mut alice = TestClient::connect(&server).await?;
    alice.join(&room.room_code, "Alice", None).await?;
    let mut bob = TestClient::connect(&server).await?;
    bob.join(&room.room_code, "Bob", None).await?;

    let start = Instant::now();
    alice.send_simple("toggle-ready", &room.room_code).await?;
    bob.send_simple("toggle-ready", &room.room_code).await?;

    for client in [&mut alice, &mut bob] {
        let ticks = collect_countdown(client, start).await?;
        let values: Vec<u8> = ticks.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, [3, 2, 1, 0]);

        // Ticks are spaced by the configured tick (with scheduling slack).
        let span = ticks[3].0 - ticks[0].0;
        assert!(span >= TEST_COUNTDOWN_TICK * 3);
        assert!(span < TEST_COUNTDOWN_TICK * 6, "countdown too slow: {span:?}");

        // Readiness is cleared once the countdown completes.
        client
            .recv_until(|e| {
                matches!(e, ServerEvent::ReadyUpdate { ready_connection_ids, all_ready: false }
                    if ready_connection_ids.is_empty())
            })
            .await?;
    }

    Ok(())
}

#[tokio::test]
async fn test_disconnect_mid_countdown_does_not_abort() -> Result<(), anyhow::Error> {
    let server = TestPartyServer::spawn().await?;
    let room = server.create_room(false, None).await?;

    let mut alice = TestClient::connect(&server).await?;
    alice.join(&room.room_code, "Alice", None).await?;
    let mut bob = TestClient::connect(&server).await?;
    bob.join(&room.room_code, "Bob", None).await?;

    let start = Instant::now();
    alice.send_simple("toggle-ready", &room.room_code).await?;
    bob.send_simple("toggle-ready", &room.room_code).await?;

    alice
        .recv_until(|e| matches!(e, ServerEvent::Countdown { value: 3 }))
        .await?;
    bob.close().await?;

    let ticks = collect_countdown(&mut alice, start).await?;
    let values: Vec<u8> = ticks.iter().map(|(_, v)| *v).collect();
    assert_eq!(values, [2, 1, 0]);

    Ok(())
}

#[tokio::test]
async fn test_host_handoff_on_creator_disconnect() -> Result<(), anyhow::Error> {
    let server = TestPartyServer::spawn().await?;
    let room = server.create_room(false, None).await?;

    let mut creator = TestClient::connect(&server).await?;
    assert!(
        creator
            .join(&room.room_code, "Creator", Some(&room.host_token))
            .await?
    );
    let mut guest = TestClient::connect(&server).await?;
    assert!(!guest.join(&room.room_code, "Guest", None).await?);
    let guest_id = guest.connection_id().unwrap().to_string();

    creator.close().await?;

    let event = guest
        .recv_until(|e| matches!(e, ServerEvent::UsersUpdate { members } if members.len() == 1))
        .await?;
    let ServerEvent::UsersUpdate { members } = event else {
        panic!("expected users-update");
    };
    assert_eq!(members[0].connection_id, guest_id);
    assert!(members[0].is_host);

    assert_eq!(
        guest.recv_event().await?,
        ServerEvent::HostUpdate {
            connection_id: guest_id
        }
    );

    Ok(())
}

#[tokio::test]
async fn test_creator_token_reclaims_host_from_fallback() -> Result<(), anyhow::Error> {
    let server = TestPartyServer::spawn().await?;
    let room = server.create_room(false, None).await?;

    let mut early = TestClient::connect(&server).await?;
    assert!(early.join(&room.room_code, "Early", None).await?);

    let mut creator = TestClient::connect(&server).await?;
    assert!(
        creator
            .join(&room.room_code, "Creator", Some(&room.host_token))
            .await?
    );
    let creator_id = creator.connection_id().unwrap().to_string();

    early
        .recv_until(|e| matches!(e, ServerEvent::HostUpdate { connection_id } if *connection_id == creator_id))
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_chat_order_and_sender_identity() -> Result<(), anyhow::Error> {
    let server = TestPartyServer::spawn().await?;
    let room = server.create_room(false, None).await?;

    let mut alice = TestClient::connect(&server).await?;
    alice.join(&room.room_code, "Alice", None).await?;
    let mut bob = TestClient::connect(&server).await?;
    bob.join(&room.room_code, "Bob", None).await?;

    for text in ["A", "B"] {
        alice
            .send_json(&json!({
                "type": "chat-message",
                "roomCode": room.room_code,
                "text": text,
                "senderName": "Mallory",
            }))
            .await?;
    }

    let mut received = Vec::new();
    while received.len() < 2 {
        if let ServerEvent::ChatMessage {
            sender_name, text, ..
        } = bob.recv_event().await?
        {
            assert_eq!(sender_name, "Alice");
            received.push(text);
        }
    }
    assert_eq!(received, ["A", "B"]);

    Ok(())
}

#[tokio::test]
async fn test_non_host_video_change_is_rejected() -> Result<(), anyhow::Error> {
    let server = TestPartyServer::spawn().await?;
    let room = server.create_room(false, None).await?;

    let mut host = TestClient::connect(&server).await?;
    host.join(&room.room_code, "Host", Some(&room.host_token))
        .await?;
    let mut guest = TestClient::connect(&server).await?;
    guest.join(&room.room_code, "Guest", None).await?;

    // Host sees the guest's arrival; after that the room is quiet.
    host.recv_until(|e| matches!(e, ServerEvent::UsersUpdate { members } if members.len() == 2))
        .await?;
    host.recv_until(|e| matches!(e, ServerEvent::ReadyUpdate { .. }))
        .await?;
    guest
        .recv_until(|e| matches!(e, ServerEvent::ReadyUpdate { .. }))
        .await?;

    guest
        .send_json(&json!({
            "type": "share-video",
            "roomCode": room.room_code,
            "url": "https://example.com/movie",
        }))
        .await?;

    match guest.recv_event().await? {
        ServerEvent::Error { code, .. } => assert_eq!(code, "UNAUTHORIZED"),
        other => panic!("expected error, got {other:?}"),
    }
    host.expect_silence(Duration::from_millis(300)).await?;

    Ok(())
}

#[tokio::test]
async fn test_host_video_share_reaches_late_joiner() -> Result<(), anyhow::Error> {
    let server = TestPartyServer::spawn().await?;
    let room = server.create_room(false, None).await?;

    let mut host = TestClient::connect(&server).await?;
    host.join(&room.room_code, "Host", Some(&room.host_token))
        .await?;
    host.send_json(&json!({
        "type": "share-video",
        "roomCode": room.room_code,
        "url": "https://example.com/movie",
    }))
    .await?;
    host.recv_until(|e| matches!(e, ServerEvent::VideoUpdate { .. }))
        .await?;

    let mut late = TestClient::connect(&server).await?;
    late.join(&room.room_code, "Late", None).await?;
    assert_eq!(
        late.recv_event().await?,
        ServerEvent::VideoUpdate {
            url: Some("https://example.com/movie".to_string())
        }
    );

    Ok(())
}

#[tokio::test]
async fn test_malformed_frames_keep_socket_open() -> Result<(), anyhow::Error> {
    let server = TestPartyServer::spawn().await?;
    let room = server.create_room(false, None).await?;

    let mut client = TestClient::connect(&server).await?;
    client.send_text("{not json".to_string()).await?;
    match client.recv_event().await? {
        ServerEvent::Error { code, .. } => assert_eq!(code, "VALIDATION_ERROR"),
        other => panic!("expected error, got {other:?}"),
    }

    client
        .send_json(&json!({
            "type": "join-room",
            "roomCode": room.room_code,
            "displayName": "   ",
        }))
        .await?;
    match client.recv_event().await? {
        ServerEvent::Error { code, .. } => assert_eq!(code, "VALIDATION_ERROR"),
        other => panic!("expected error, got {other:?}"),
    }

    assert!(client.join(&room.room_code, "Alice", None).await?);

    Ok(())
}

#[tokio::test]
async fn test_last_disconnect_deletes_room() -> Result<(), anyhow::Error> {
    let server = TestPartyServer::spawn().await?;
    let room = server.create_room(false, None).await?;

    let mut alice = TestClient::connect(&server).await?;
    alice.join(&room.room_code, "Alice", None).await?;
    alice.close().await?;

    let url = format!("{}/api/v1/rooms/{}", server.url(), room.room_code);
    let client = reqwest::Client::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = client.get(&url).send().await?.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            break;
        }
        assert!(Instant::now() < deadline, "room was never deleted");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    Ok(())
}
