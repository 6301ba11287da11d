//! End-to-end: a real server on an ephemeral port and two clients playing

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::time::{sleep, Instant};

use pool_netplay::app::AppState;
use pool_netplay::client::{ClientError, MultiplayerClient};
use pool_netplay::config::Config;
use pool_netplay::game::CueState;
use pool_netplay::http::build_router;
use pool_netplay::session::SessionState;
use pool_netplay::ws::protocol::{ErrorCode, GameType};

async fn start_server() -> SocketAddr {
    let state = AppState::new(Config::default());
    let router = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Pump both clients until `done` holds
async fn settle<F>(a: &mut MultiplayerClient, b: &mut MultiplayerClient, what: &str, done: F)
where
    F: Fn(&MultiplayerClient, &MultiplayerClient) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        a.update();
        b.update();
        if done(a, b) {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}

fn cue() -> CueState {
    CueState {
        phi: 92.5,
        theta: 0.0,
        v0: 2.4,
        a: 0.0,
        b: 0.1,
        cue_ball_id: "cue".into(),
    }
}

fn record_errors(client: &mut MultiplayerClient) -> Arc<Mutex<Vec<ErrorCode>>> {
    let codes = Arc::new(Mutex::new(Vec::new()));
    let sink = codes.clone();
    client.on_error(move |e| {
        if let ClientError::Server { code, .. } = e {
            sink.lock().push(*code);
        }
    });
    codes
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_players_create_join_start_and_shoot() {
    let addr = start_server().await;
    let host = addr.ip().to_string();

    let mut alice = MultiplayerClient::new(Handle::current());
    let mut bob = MultiplayerClient::new(Handle::current());
    let bob_errors = record_errors(&mut bob);
    let bob_chat = Arc::new(Mutex::new(Vec::new()));
    let chat_sink = bob_chat.clone();
    bob.on_chat(move |sender, text| chat_sink.lock().push((sender.to_string(), text.to_string())));

    alice.connect(&host, addr.port(), "Alice").unwrap();
    bob.connect(&host, addr.port(), "Bob").unwrap();
    settle(&mut alice, &mut bob, "handshake", |a, b| {
        a.state() == SessionState::Lobby && b.state() == SessionState::Lobby
    })
    .await;
    let alice_id = alice.player_id().unwrap().to_string();
    let bob_id = bob.player_id().unwrap().to_string();
    assert_ne!(alice_id, bob_id);

    // Alice opens a table
    alice.create_room("Friendly", GameType::EightBall).unwrap();
    settle(&mut alice, &mut bob, "room creation", |a, _| a.state() == SessionState::InRoom).await;
    let room = alice.room().unwrap().clone();
    assert_eq!(room.host_id, alice_id);
    assert_eq!(room.max_players, 2);

    // Bob finds it in the lobby listing and joins
    bob.request_room_list().unwrap();
    settle(&mut alice, &mut bob, "room list", |_, b| !b.rooms().is_empty()).await;
    assert_eq!(bob.rooms()[0].room_id, room.room_id);
    bob.join_room(&room.room_id).unwrap();
    settle(&mut alice, &mut bob, "join", |a, b| {
        b.state() == SessionState::InRoom && a.room().is_some_and(|r| r.players.len() == 2)
    })
    .await;

    // Both ready: the server starts the game
    alice.set_ready(true).unwrap();
    settle(&mut alice, &mut bob, "alice ready", |a, _| a.state() == SessionState::ReadyWait).await;
    bob.set_ready(true).unwrap();
    settle(&mut alice, &mut bob, "game start", |a, b| {
        a.state() == SessionState::InGame && b.state() == SessionState::InGame
    })
    .await;
    assert!(alice.is_my_turn());
    assert!(!bob.is_my_turn());

    // Bob shooting out of turn is refused
    bob.execute_shot(cue()).unwrap();
    settle(&mut alice, &mut bob, "out of turn error", |_, _| {
        bob_errors.lock().contains(&ErrorCode::OutOfTurn)
    })
    .await;
    assert_eq!(
        alice.game_view().snapshot().map(|s| s.turn_number),
        Some(1)
    );

    // Alice's shot settles and the turn passes to Bob
    alice.execute_shot(cue()).unwrap();
    settle(&mut alice, &mut bob, "turn change", |a, b| {
        b.is_my_turn() && a.game_view().snapshot().is_some_and(|s| s.turn_number == 2)
    })
    .await;

    alice.send_chat("nice table").unwrap();
    settle(&mut alice, &mut bob, "chat", |_, _| !bob_chat.lock().is_empty()).await;
    assert_eq!(
        bob_chat.lock()[0],
        (alice_id.clone(), "nice table".to_string())
    );

    // Walking away mid-game forfeits to the remaining player
    alice.disconnect();
    assert_eq!(alice.state(), SessionState::Disconnected);
    settle(&mut alice, &mut bob, "forfeit", |_, b| b.state() == SessionState::GameOver).await;
    let final_state = bob.game_view().snapshot().unwrap();
    assert!(final_state.is_game_over);
    assert_eq!(final_state.winner_id.as_deref(), Some(bob_id.as_str()));
}

#[tokio::test]
async fn test_health_endpoint() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("\"status\":\"ok\""));
}
