//! End-to-end tests: a real server on a free port with real clients and raw
//! sockets talking to it.

use chorus_collab::client::{ClientConfig, ConnectionState, RoomClient, RoomEvent};
use chorus_collab::protocol::{FrameKind, Method, WireMessage};
use chorus_collab::registry::SessionRegistry;
use chorus_collab::server::RoomServer;
use chorus_core::{PlayerId, RoomDocument};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type RawSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on a free port; returns its base URL and registry.
async fn start_test_server() -> (String, Arc<SessionRegistry>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let registry = Arc::new(SessionRegistry::in_memory());
    let server = RoomServer::new(registry.clone());
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    (format!("ws://127.0.0.1:{port}"), registry)
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let waited = timeout(Duration::from_secs(3), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

async fn join(url: &str, room: &str, player_id: PlayerId) -> RoomClient {
    let client = RoomClient::connect(ClientConfig {
        server_url: url.to_string(),
        room: room.to_string(),
        player_id,
        ..ClientConfig::default()
    })
    .await
    .unwrap();
    wait_until("handshake", || client.state() == ConnectionState::Open).await;
    client
}

async fn connect_raw(url: &str, room: &str, player_id: PlayerId) -> (RawSocket, PlayerId) {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{url}/{room}?playerId={player_id}"))
        .await
        .unwrap();
    match next_message(&mut ws).await {
        WireMessage::Init { local_id, .. } => (ws, local_id),
        other => panic!("expected Init, got {other:?}"),
    }
}

async fn next_binary(ws: &mut RawSocket) -> Option<Vec<u8>> {
    loop {
        let msg = timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out reading socket");
        match msg {
            Some(Ok(Message::Binary(data))) => return Some(data.to_vec()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn next_message(ws: &mut RawSocket) -> WireMessage {
    let bytes = next_binary(ws).await.expect("socket closed");
    WireMessage::decode(&bytes).unwrap()
}

#[tokio::test]
async fn test_late_joiner_sees_everyone_and_everyone_sees_it() {
    let (url, _registry) = start_test_server().await;
    let b = join(&url, "hall", 2).await;
    let c = join(&url, "hall", 3).await;
    let a = join(&url, "hall", 1).await;

    assert_eq!(a.local_id(), 1);
    wait_until("a to see b and c", || a.player_ids() == vec![2, 3]).await;
    wait_until("b to see a", || b.player_ids().contains(&1)).await;
    wait_until("c to see a", || c.player_ids().contains(&1)).await;
    assert_eq!(b.player_ids(), vec![1, 3]);
    assert_eq!(c.player_ids(), vec![1, 2]);
}

#[tokio::test]
async fn test_existing_players_reannounce_to_newcomers() {
    let (url, _registry) = start_test_server().await;
    let b = join(&url, "hall", 2).await;
    let mut meta = Map::new();
    meta.insert("name".into(), json!("Bob"));
    b.set_metadata(&meta).unwrap();

    let a = join(&url, "hall", 1).await;
    wait_until("bob's name to reach a", || {
        a.player(2)
            .map(|p| p.metadata().get("name") == Some(&json!("Bob")))
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_callbacks_can_query_the_client() {
    let (url, _registry) = start_test_server().await;
    let b = Arc::new(join(&url, "hall", 2).await);

    let found = Arc::new(Mutex::new(Vec::new()));
    let client = Arc::downgrade(&b);
    let sink = found.clone();
    b.subscribe(move |event| {
        if let RoomEvent::Join(id) = event {
            let player = client.upgrade().and_then(|client| client.player(*id));
            sink.lock().unwrap().push(player.map(|p| p.id()));
        }
    });

    let a = join(&url, "hall", 1).await;
    wait_until("b's join callback", || !found.lock().unwrap().is_empty()).await;
    assert_eq!(*found.lock().unwrap(), vec![Some(1)]);

    b.set_pose(chorus_core::Pose::default()).unwrap();
    assert_eq!(b.player_ids(), vec![1]);
    drop(a);
}

#[tokio::test]
async fn test_taken_id_is_reassigned() {
    let (url, _registry) = start_test_server().await;
    let first = join(&url, "hall", 8).await;
    let second = join(&url, "hall", 8).await;
    assert_eq!(first.local_id(), 8);
    assert_ne!(second.local_id(), 8);
    assert_ne!(second.local_id(), 0);
}

#[tokio::test]
async fn test_audio_relay_is_byte_exact() {
    let (url, _registry) = start_test_server().await;
    let (mut sender, _) = connect_raw(&url, "studio", 3).await;
    let (mut b, _) = connect_raw(&url, "studio", 4).await;
    let (mut c, _) = connect_raw(&url, "studio", 5).await;

    let payload: Vec<u8> = (0..32).map(|i| i * 7).collect();
    let audio = WireMessage::Audio {
        id: 3,
        kind: FrameKind::Key,
        timestamp: 0.0,
        duration: 20.0,
        payload,
    };
    let bytes = audio.encode().unwrap();
    sender.send(Message::Binary(bytes.clone().into())).await.unwrap();

    for receiver in [&mut b, &mut c] {
        loop {
            let received = next_binary(receiver).await.expect("socket closed");
            if WireMessage::decode(&received).unwrap().method() == Method::Audio {
                assert_eq!(received, bytes);
                assert_eq!(WireMessage::decode(&received).unwrap(), audio);
                break;
            }
        }
    }
}

#[tokio::test]
async fn test_entity_edits_reach_other_clients_and_server() {
    let (url, registry) = start_test_server().await;
    let a = join(&url, "garden", 1).await;
    let b = join(&url, "garden", 2).await;

    let added = Arc::new(Mutex::new(Vec::new()));
    let seen = added.clone();
    b.subscribe(move |event| {
        if let RoomEvent::EntityAdded(id) = event {
            seen.lock().unwrap().push(id.clone());
        }
    });

    a.document()
        .get_or_create_entity("bench")
        .unwrap()
        .set("color", json!("green"))
        .unwrap();

    wait_until("b to see the bench color", || {
        b.document()
            .entity("bench")
            .and_then(|e| e.get("color"))
            == Some(json!("green"))
    })
    .await;
    assert_eq!(*added.lock().unwrap(), vec!["bench".to_string()]);

    let room = registry.room("garden").await.unwrap();
    assert_eq!(room.document().to_json(), b.document().to_json());
}

#[tokio::test]
async fn test_late_joiner_receives_document_snapshot() {
    let (url, _registry) = start_test_server().await;
    let a = join(&url, "garden", 1).await;
    a.document().get_or_create_entity("well").unwrap();
    sleep(Duration::from_millis(100)).await;

    let b = join(&url, "garden", 2).await;
    assert_eq!(b.document().list_entity_ids(), vec!["well".to_string()]);
}

#[tokio::test]
async fn test_disconnect_removes_player() {
    let (url, _registry) = start_test_server().await;
    let a = join(&url, "hall", 1).await;
    let b = join(&url, "hall", 2).await;
    wait_until("a to see b", || a.player_ids() == vec![2]).await;

    b.close().await.unwrap();
    wait_until("a to drop b", || a.player_ids().is_empty()).await;
}

#[tokio::test]
async fn test_admin_merge_reaches_clients() {
    let (url, registry) = start_test_server().await;
    let a = join(&url, "plaza", 1).await;

    let doc = RoomDocument::new();
    doc.get_or_create_entity("statue").unwrap();
    registry.merge_update("plaza", &doc.encode_snapshot()).await.unwrap();

    wait_until("a to see the statue", || {
        a.document().list_entity_ids() == vec!["statue".to_string()]
    })
    .await;
}

#[tokio::test]
async fn test_deleted_room_closes_members() {
    let (url, registry) = start_test_server().await;
    let a = join(&url, "doomed", 1).await;

    assert!(registry.delete_room("doomed").await.unwrap());
    wait_until("a to close", || a.state() == ConnectionState::Closed).await;
}

#[tokio::test]
async fn test_bad_path_is_rejected() {
    let (url, _registry) = start_test_server().await;
    assert!(tokio_tungstenite::connect_async(format!("{url}/a/b")).await.is_err());
    assert!(tokio_tungstenite::connect_async(format!("{url}/")).await.is_err());
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let (url, registry) = start_test_server().await;
    let (mut ws, _) = connect_raw(&url, "hall", 1).await;

    let mut pose = WireMessage::Pose {
        id: 1,
        pose: Default::default(),
    }
    .encode()
    .unwrap();
    pose.truncate(30);
    ws.send(Message::Binary(pose.into())).await.unwrap();

    assert_eq!(next_binary(&mut ws).await, None);
    let room = registry.room("hall").await.unwrap();
    wait_until_async_empty(&room).await;
}

async fn wait_until_async_empty(room: &chorus_collab::registry::Room) {
    let emptied = timeout(Duration::from_secs(3), async {
        while !room.member_ids().await.is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(emptied.is_ok(), "member was not removed");
}
