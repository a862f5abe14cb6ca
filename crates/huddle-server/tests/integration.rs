//! End-to-end tests against a live server using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use huddle_server::{HuddleServer, RelayStats, ServerConfig};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot a test server on an auto-assigned port.
async fn boot_server_with(config: ServerConfig) -> (String, Arc<HuddleServer>) {
    let server = Arc::new(HuddleServer::new(config, None).unwrap());
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("{addr}"), server)
}

async fn boot_server() -> (String, Arc<HuddleServer>) {
    boot_server_with(ServerConfig::default()).await
}

/// Connect and consume the greeting. Returns the socket and its connection id.
async fn connect(addr: &str) -> (WsStream, String) {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let greeting = read_json(&mut ws).await;
    assert_eq!(greeting["type"], "connection.established");
    let id = greeting["data"]["clientId"].as_str().unwrap().to_owned();
    (ws, id)
}

async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Read frames until one of `event_type` arrives.
async fn read_until(ws: &mut WsStream, event_type: &str) -> Value {
    loop {
        let msg = read_json(ws).await;
        if msg["type"] == event_type {
            return msg;
        }
    }
}

async fn send(ws: &mut WsStream, event_type: &str, data: Value) {
    let frame = json!({ "type": event_type, "data": data });
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

/// Send a chat line and wait for its echo. Everything this socket sent
/// earlier has been applied by the relay once this returns.
async fn sync(ws: &mut WsStream, room: &str) {
    send(
        ws,
        "chat-message",
        json!({"interviewId": room, "message": "__sync__", "userName": "sync"}),
    )
    .await;
    let echo = read_until(ws, "chat-message").await;
    assert_eq!(echo["data"]["message"], "__sync__");
}

async fn join(ws: &mut WsStream, room: &str, name: &str) {
    send(
        ws,
        "join-interview",
        json!({"interviewId": room, "userName": name, "role": "candidate"}),
    )
    .await;
    sync(ws, room).await;
}

async fn wait_for_stats(server: &HuddleServer, ready: impl Fn(&RelayStats) -> bool) {
    timeout(TIMEOUT, async {
        loop {
            let stats = server.relay().stats().await.unwrap();
            if ready(&stats) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("relay never reached expected state");
}

// ── Connection ──

#[tokio::test]
async fn greeting_is_first_frame() {
    let (addr, _server) = boot_server().await;
    let (_ws, id) = connect(&addr).await;
    assert!(id.starts_with("conn_"));
}

#[tokio::test]
async fn each_connection_gets_a_distinct_id() {
    let (addr, server) = boot_server().await;
    let (_a, a_id) = connect(&addr).await;
    let (_b, b_id) = connect(&addr).await;
    assert_ne!(a_id, b_id);
    wait_for_stats(&server, |s| s.connections == 2).await;
    assert_eq!(server.relay().connection_count(), 2);
}

#[tokio::test]
async fn malformed_frames_keep_connection_open() {
    let (addr, _server) = boot_server().await;
    let (mut ws, _) = connect(&addr).await;
    ws.send(Message::text("not valid json")).await.unwrap();
    send(&mut ws, "no-such-event", json!({})).await;
    send(&mut ws, "join-interview", json!({})).await;
    join(&mut ws, "R1", "Ada").await;
}

// ── Rooms ──

#[tokio::test]
async fn join_notifies_existing_members_only() {
    let (addr, _server) = boot_server().await;
    let (mut a, _) = connect(&addr).await;
    let (mut b, b_id) = connect(&addr).await;

    join(&mut a, "R1", "Ada").await;
    join(&mut b, "R1", "Bob").await;

    let joined = read_until(&mut a, "user-joined").await;
    assert_eq!(joined["data"]["userId"], b_id);
    assert_eq!(joined["data"]["userName"], "Bob");
    assert_eq!(joined["data"]["role"], "candidate");
}

#[tokio::test]
async fn code_update_excludes_sender() {
    let (addr, _server) = boot_server().await;
    let (mut a, a_id) = connect(&addr).await;
    let (mut b, _) = connect(&addr).await;
    join(&mut a, "R1", "Ada").await;
    join(&mut b, "R1", "Bob").await;

    send(
        &mut b,
        "code-update",
        json!({"interviewId": "R1", "code": "print(1)", "language": "python"}),
    )
    .await;
    let update = read_until(&mut a, "code-update").await;
    assert_eq!(update["data"]["code"], "print(1)");
    assert_eq!(update["data"]["language"], "python");

    // B's next frame is its own chat echo, not the code update
    send(&mut b, "chat-message", json!({"interviewId": "R1", "message": "done"})).await;
    let next = read_json(&mut b).await;
    assert_eq!(next["type"], "chat-message");
    assert_eq!(next["data"]["message"], "done");
    assert_ne!(next["data"]["from"], a_id);
}

#[tokio::test]
async fn chat_reaches_whole_room_including_sender() {
    let (addr, _server) = boot_server().await;
    let (mut a, a_id) = connect(&addr).await;
    let (mut b, _) = connect(&addr).await;
    join(&mut a, "R1", "Ada").await;
    join(&mut b, "R1", "Bob").await;

    send(
        &mut a,
        "chat-message",
        json!({"interviewId": "R1", "message": "hello", "userName": "Ada"}),
    )
    .await;

    for ws in [&mut a, &mut b] {
        let msg = loop {
            let msg = read_until(ws, "chat-message").await;
            if msg["data"]["message"] == "hello" {
                break msg;
            }
        };
        assert_eq!(msg["data"]["from"], a_id);
        assert_eq!(msg["data"]["userName"], "Ada");
        assert!(msg["data"]["timestamp"].is_string());
    }
}

#[tokio::test]
async fn rooms_are_isolated() {
    let (addr, _server) = boot_server().await;
    let (mut a, _) = connect(&addr).await;
    let (mut b, _) = connect(&addr).await;
    join(&mut a, "R1", "Ada").await;
    join(&mut b, "R2", "Bob").await;

    send(&mut a, "question-update", json!({"interviewId": "R1", "question": {"id": 7}})).await;
    sync(&mut a, "R1").await;
    sync(&mut b, "R2").await;

    // nothing from R1 is waiting on B
    let extra = timeout(Duration::from_millis(200), b.next()).await;
    assert!(extra.is_err(), "unexpected frame: {extra:?}");
}

#[tokio::test]
async fn disconnect_emits_user_left() {
    let (addr, _server) = boot_server().await;
    let (mut a, a_id) = connect(&addr).await;
    let (mut b, _) = connect(&addr).await;
    join(&mut a, "R1", "Ada").await;
    join(&mut b, "R1", "Bob").await;

    a.close(None).await.unwrap();

    let left = read_until(&mut b, "user-left").await;
    assert_eq!(left["data"]["userId"], a_id);
}

#[tokio::test]
async fn leave_notifies_room() {
    let (addr, _server) = boot_server().await;
    let (mut a, _) = connect(&addr).await;
    let (mut b, b_id) = connect(&addr).await;
    join(&mut a, "R1", "Ada").await;
    join(&mut b, "R1", "Bob").await;

    send(&mut b, "leave-interview", json!({"interviewId": "R1"})).await;
    let left = read_until(&mut a, "user-left").await;
    assert_eq!(left["data"]["userId"], b_id);
}

// ── Signaling ──

#[tokio::test]
async fn webrtc_offer_is_relayed_to_target() {
    let (addr, _server) = boot_server().await;
    let (mut a, a_id) = connect(&addr).await;
    let (mut b, b_id) = connect(&addr).await;

    send(
        &mut a,
        "webrtc-offer",
        json!({"to": b_id, "offer": {"type": "offer", "sdp": "v=0"}}),
    )
    .await;

    let offer = read_until(&mut b, "webrtc-offer").await;
    assert_eq!(offer["data"]["from"], a_id);
    assert_eq!(offer["data"]["offer"]["sdp"], "v=0");
}

#[tokio::test]
async fn ice_candidate_to_unknown_peer_is_dropped() {
    let (addr, _server) = boot_server().await;
    let (mut a, _) = connect(&addr).await;
    send(
        &mut a,
        "webrtc-ice-candidate",
        json!({"to": "conn_missing", "candidate": {"candidate": "c"}}),
    )
    .await;
    join(&mut a, "R1", "Ada").await;
}

// ── Dashboard ──

#[tokio::test]
async fn dashboard_receives_session_updates_and_alerts() {
    let (addr, server) = boot_server().await;
    let (mut dash, _) = connect(&addr).await;
    let (mut a, _) = connect(&addr).await;

    send(&mut dash, "join-proctor-dashboard", Value::Null).await;
    wait_for_stats(&server, |s| s.dashboard == 1).await;

    join(&mut a, "R1", "Ada").await;
    let update = read_until(&mut dash, "session-update").await;
    assert_eq!(update["data"]["interviewId"], "R1");
    assert_eq!(update["data"]["type"], "user-joined");
    assert_eq!(update["data"]["userName"], "Ada");

    send(
        &mut a,
        "proctoring-event",
        json!({"interviewId": "R1", "event": {"kind": "tab-switch"}}),
    )
    .await;
    let alert = read_until(&mut dash, "proctoring-alert").await;
    assert_eq!(alert["data"]["interviewId"], "R1");
    assert_eq!(alert["data"]["event"]["kind"], "tab-switch");
}

// ── Secondary camera ──

#[tokio::test]
async fn secondary_camera_pairing_flow() {
    let (addr, server) = boot_server().await;
    let (mut primary, _) = connect(&addr).await;
    let (mut interviewer, _) = connect(&addr).await;
    let (mut phone, _) = connect(&addr).await;

    join(&mut primary, "R1", "Ada").await;
    join(&mut interviewer, "R1", "Ivy").await;
    send(
        &mut primary,
        "register-secondary-camera",
        json!({"interviewId": "R1", "code": "123456"}),
    )
    .await;
    wait_for_stats(&server, |s| s.pairings == 1).await;

    send(
        &mut phone,
        "connect-secondary-camera",
        json!({"code": "123456", "status": "connected"}),
    )
    .await;
    let connected = read_until(&mut primary, "secondary-camera-connected").await;
    assert_eq!(connected["data"]["status"], "connected");

    send(
        &mut phone,
        "secondary-snapshot",
        json!({"code": "123456", "snapshot": "data:image/jpeg;base64,AAAA"}),
    )
    .await;
    for ws in [&mut primary, &mut interviewer] {
        let snap = read_until(ws, "secondary-snapshot").await;
        assert_eq!(snap["data"]["snapshot"], "data:image/jpeg;base64,AAAA");
    }
}

#[tokio::test]
async fn primary_disconnect_removes_pairing() {
    let (addr, server) = boot_server().await;
    let (mut primary, _) = connect(&addr).await;
    send(
        &mut primary,
        "register-secondary-camera",
        json!({"interviewId": "R1", "code": 42}),
    )
    .await;
    wait_for_stats(&server, |s| s.pairings == 1).await;

    drop(primary);
    wait_for_stats(&server, |s| s.pairings == 0 && s.connections == 0).await;
}

// ── Limits and liveness ──

#[tokio::test]
async fn upgrade_refused_at_connection_limit() {
    let (addr, _server) = boot_server_with(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    })
    .await;
    let (_first, _) = connect(&addr).await;

    match connect_async(format!("ws://{addr}/ws")).await {
        Err(tungstenite::Error::Http(resp)) => {
            assert_eq!(resp.status(), 503);
        }
        other => panic!("expected 503, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_upgrades_respect_connection_limit() {
    let (addr, server) = boot_server_with(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    })
    .await;

    let url = format!("ws://{addr}/ws");
    let attempts = (0..20).map(|_| connect_async(url.clone()));
    let results = futures::future::join_all(attempts).await;

    let mut accepted = Vec::new();
    for result in results {
        match result {
            Ok((ws, _)) => accepted.push(ws),
            Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status(), 503),
            Err(e) => panic!("unexpected upgrade error: {e}"),
        }
    }
    assert_eq!(accepted.len(), 1);
    assert_eq!(server.relay().connection_count(), 1);

    // the slot frees once the accepted socket goes away
    drop(accepted);
    timeout(TIMEOUT, async {
        while server.relay().connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection slot never released");
    let (_ws, _) = connect(&addr).await;
}

#[tokio::test]
async fn silent_client_is_disconnected() {
    let (addr, server) = boot_server_with(ServerConfig {
        heartbeat_interval: Duration::from_millis(100),
        heartbeat_timeout: Duration::from_millis(300),
        ..ServerConfig::default()
    })
    .await;
    let (mut ws, _) = connect(&addr).await;
    wait_for_stats(&server, |s| s.connections == 1).await;

    // not polling the client means no pongs go back
    tokio::time::sleep(Duration::from_millis(800)).await;
    wait_for_stats(&server, |s| s.connections == 0).await;

    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let (addr, server) = boot_server().await;
    let (mut ws, _) = connect(&addr).await;
    wait_for_stats(&server, |s| s.connections == 1).await;

    server.shutdown().shutdown();

    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

// ── HTTP ──

#[tokio::test]
async fn http_health_and_stats() {
    let (addr, _server) = boot_server().await;
    let (_ws, _) = connect(&addr).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("http://{addr}/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);

    let stats: Value = client
        .get(format!("http://{addr}/api/relay/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["connections"], 1);
}

#[tokio::test]
async fn http_cors_preflight_for_frontend() {
    let (addr, _server) = boot_server().await;
    let resp = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("http://{addr}/api/health"))
        .header("Origin", "http://localhost:5173")
        .header("Access-Control-Request-Method", "GET")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers()["access-control-allow-origin"],
        "http://localhost:5173"
    );
}

#[tokio::test]
async fn http_unknown_route_is_404() {
    let (addr, _server) = boot_server().await;
    let resp = reqwest::get(format!("http://{addr}/api/nope")).await.unwrap();
    assert_eq!(resp.status(), 404);
}
