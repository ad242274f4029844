//! End-to-end tests over a real listener, driven by tungstenite clients.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use room_relay::{FileRoomStore, MemoryRoomStore, Server, SessionConfig};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn session_config() -> SessionConfig {
    SessionConfig {
        outbound_queue: 32,
        send_timeout_ms: 500,
    }
}

/// Serve on an ephemeral port, returning the websocket base url.
fn start(server: &Server) -> String {
    let (addr, serving) = warp::serve(server.routes()).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(serving);
    format!("ws://{addr}/api/v1/ws")
}

fn memory_server() -> Server {
    Server::new(Arc::new(MemoryRoomStore::new()), session_config())
}

async fn connect(base: &str, room_id: &str) -> Client {
    let (ws, _) = connect_async(format!("{base}/{room_id}")).await.unwrap();
    ws
}

async fn wait_for_members(server: &Server, room_id: &str, count: usize) {
    for _ in 0..400 {
        if server.registry().connection_count(room_id) == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "room {room_id} never reached {count} members (has {})",
        server.registry().connection_count(room_id)
    );
}

async fn next_text(ws: &mut Client) -> String {
    let msg = timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .unwrap();
    msg.into_text().unwrap().as_str().to_owned()
}

async fn assert_silent(ws: &mut Client) {
    assert!(
        timeout(Duration::from_millis(150), ws.next()).await.is_err(),
        "expected no frame"
    );
}

#[tokio::test]
async fn two_editors_share_a_room() {
    let server = memory_server();
    let base = start(&server);
    let room_id = server.create_room().await.unwrap();

    let mut first = connect(&base, &room_id).await;
    wait_for_members(&server, &room_id, 1).await;
    assert_silent(&mut first).await;

    let mut second = connect(&base, &room_id).await;
    wait_for_members(&server, &room_id, 2).await;

    first.send(Message::text("hello")).await.unwrap();
    assert_eq!(next_text(&mut second).await, "hello");
    assert_silent(&mut second).await;
    assert_silent(&mut first).await;

    first.close(None).await.unwrap();
    wait_for_members(&server, &room_id, 1).await;
    assert!(server.registry().contains_room(&room_id));

    second.close(None).await.unwrap();
    wait_for_members(&server, &room_id, 0).await;
    assert!(!server.registry().contains_room(&room_id));

    let room = server.store().get(&room_id).await.unwrap().unwrap();
    assert_eq!(room.content, "hello");
}

#[tokio::test]
async fn unknown_room_is_closed_with_policy_violation() {
    let server = memory_server();
    let base = start(&server);

    let mut ws = connect(&base, "doesnotexist").await;
    let msg = timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    match msg {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Policy);
            assert_eq!(frame.reason.as_str(), "Room does not exist.");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
    assert_eq!(server.registry().room_count(), 0);
    assert!(server.store().get("doesnotexist").await.unwrap().is_none());
}

#[tokio::test]
async fn late_joiner_receives_snapshot() {
    let server = memory_server();
    let base = start(&server);
    let room_id = server.create_room().await.unwrap();

    let mut writer = connect(&base, &room_id).await;
    wait_for_members(&server, &room_id, 1).await;
    writer.send(Message::text("v1")).await.unwrap();
    writer.send(Message::text("v2")).await.unwrap();

    for _ in 0..200 {
        if server.store().get(&room_id).await.unwrap().unwrap().content == "v2" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut reader = connect(&base, &room_id).await;
    assert_eq!(next_text(&mut reader).await, "v2");
    assert_silent(&mut reader).await;
}

#[tokio::test]
async fn fan_out_reaches_every_peer_once() {
    let server = memory_server();
    let base = start(&server);
    let room_id = server.create_room().await.unwrap();

    let mut clients = Vec::new();
    for n in 1..=4 {
        clients.push(connect(&base, &room_id).await);
        wait_for_members(&server, &room_id, n).await;
    }

    clients[0].send(Message::text("doc")).await.unwrap();
    for peer in clients.iter_mut().skip(1) {
        assert_eq!(next_text(peer).await, "doc");
    }
    for client in &mut clients {
        assert_silent(client).await;
    }
}

#[tokio::test]
async fn updates_from_one_client_keep_their_order() {
    let server = memory_server();
    let base = start(&server);
    let room_id = server.create_room().await.unwrap();

    let mut sender = connect(&base, &room_id).await;
    let mut receiver = connect(&base, &room_id).await;
    wait_for_members(&server, &room_id, 2).await;

    for i in 0..20 {
        sender.send(Message::text(format!("rev {i}"))).await.unwrap();
    }
    for i in 0..20 {
        assert_eq!(next_text(&mut receiver).await, format!("rev {i}"));
    }
    assert_eq!(
        server.store().get(&room_id).await.unwrap().unwrap().content,
        "rev 19"
    );
}

#[tokio::test]
async fn rooms_are_isolated() {
    let server = memory_server();
    let base = start(&server);
    let one = server.create_room().await.unwrap();
    let two = server.create_room().await.unwrap();

    let mut a = connect(&base, &one).await;
    let mut b = connect(&base, &two).await;
    wait_for_members(&server, &one, 1).await;
    wait_for_members(&server, &two, 1).await;

    a.send(Message::text("only one")).await.unwrap();
    assert_silent(&mut b).await;
    assert_eq!(server.store().get(&two).await.unwrap().unwrap().content, "");
}

#[tokio::test]
async fn abrupt_disconnect_is_cleaned_up() {
    let server = memory_server();
    let base = start(&server);
    let room_id = server.create_room().await.unwrap();

    let dropped = connect(&base, &room_id).await;
    let mut stays = connect(&base, &room_id).await;
    wait_for_members(&server, &room_id, 2).await;

    drop(dropped);
    wait_for_members(&server, &room_id, 1).await;

    let mut third = connect(&base, &room_id).await;
    wait_for_members(&server, &room_id, 2).await;
    third.send(Message::text("still works")).await.unwrap();
    assert_eq!(next_text(&mut stays).await, "still works");
}

#[tokio::test]
async fn snapshot_survives_restart_with_file_store() {
    let dir = tempfile::tempdir().unwrap();

    let room_id = {
        let store = Arc::new(FileRoomStore::new(dir.path()).await.unwrap());
        let server = Server::new(store, session_config());
        let base = start(&server);
        let room_id = server.create_room().await.unwrap();

        let mut ws = connect(&base, &room_id).await;
        wait_for_members(&server, &room_id, 1).await;
        ws.send(Message::text("persisted")).await.unwrap();
        for _ in 0..200 {
            if server.store().get(&room_id).await.unwrap().unwrap().content == "persisted" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        room_id
    };

    let store = Arc::new(FileRoomStore::new(dir.path()).await.unwrap());
    let server = Server::new(store, session_config());
    let base = start(&server);

    let mut ws = connect(&base, &room_id).await;
    assert_eq!(next_text(&mut ws).await, "persisted");
}
