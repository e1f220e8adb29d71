//! Shard lifecycle against the in-process transport, on tokio's paused clock.

use serde_json::{Value, json};
use shardline_core::ShardIdentity;
use shardline_gateway::{
    ChannelServer, ChannelTransport, EventKind, GatewayCommand, GatewayError, ServerConnection,
    Shard, ShardConfig, ShardDeps, ShardEvent, ShardHandle, ShardState, TransportMessage, Ungated,
};
use shardline_ratelimit::RateLimiter;
use shardline_store::InMemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, timeout};

struct Harness {
    shard: ShardHandle,
    server: ChannelServer,
    events: broadcast::Receiver<ShardEvent>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> ShardConfig {
    ShardConfig::new("secret").with_gateway_url("wss://gateway.test")
}

fn start_with(config: ShardConfig, transport: ChannelTransport, server: ChannelServer) -> Harness {
    init_tracing();
    let (events_tx, events) = broadcast::channel(256);
    let deps = ShardDeps {
        transport: Arc::new(transport),
        limiter: RateLimiter::new(Arc::new(InMemoryStore::new())),
        gate: Arc::new(Ungated),
        events: events_tx,
    };
    let shard = Shard::spawn(ShardIdentity::new(0, 1), Arc::new(config), deps);
    Harness {
        shard,
        server,
        events,
    }
}

fn start() -> Harness {
    let (transport, server) = ChannelTransport::pair();
    start_with(config(), transport, server)
}

async fn accept(server: &mut ChannelServer) -> ServerConnection {
    server.accept().await.expect("transport dropped")
}

async fn hello(conn: &ServerConnection, interval_ms: u64) {
    conn.send_op(10, json!({ "heartbeat_interval": interval_ms }))
        .await
        .unwrap();
}

/// Next client frame with opcode `op`, skipping others
async fn next_op(conn: &mut ServerConnection, op: u64) -> Value {
    loop {
        let frame = conn.recv_frame().await.expect("client closed");
        if frame["op"] == op {
            return frame;
        }
    }
}

/// Next close code sent by the client
async fn next_close(conn: &mut ServerConnection) -> u16 {
    loop {
        match conn.recv().await.expect("client went away") {
            TransportMessage::Close(code) => return code,
            TransportMessage::Text(_) => {}
        }
    }
}

async fn ready(conn: &ServerConnection, seq: u64, session_id: &str) {
    conn.send_dispatch(
        "READY",
        seq,
        json!({
            "session_id": session_id,
            "resume_gateway_url": "wss://resume.test",
        }),
    )
    .await
    .unwrap();
}

/// Connect, identify and reach READY
async fn establish(h: &mut Harness) -> ServerConnection {
    let mut conn = accept(&mut h.server).await;
    hello(&conn, 45_000).await;
    next_op(&mut conn, 2).await;
    ready(&conn, 1, "abc").await;
    let mut status = h.shard.watch();
    status.wait_for(|s| s.session.is_some()).await.unwrap();
    conn
}

#[tokio::test(start_paused = true)]
async fn test_identifies_after_hello() {
    let mut h = start();
    let mut conn = accept(&mut h.server).await;
    assert!(conn.url.starts_with("wss://gateway.test"));
    assert!(conn.url.contains("v=10"));
    assert!(conn.url.contains("encoding=json"));

    hello(&conn, 45_000).await;
    let identify = next_op(&mut conn, 2).await;
    assert_eq!(identify["d"]["token"], "secret");
    assert_eq!(identify["d"]["shard"], json!([0, 1]));

    let status = h.shard.wait_for_state(ShardState::Connected).await;
    assert!(status.session.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_state_changes_are_broadcast() {
    let mut h = start();
    let mut conn = accept(&mut h.server).await;
    hello(&conn, 45_000).await;
    next_op(&mut conn, 2).await;
    h.shard.wait_for_state(ShardState::Connected).await;

    let mut states = Vec::new();
    while let Ok(event) = h.events.try_recv() {
        if let ShardEvent::StateChanged { state, .. } = event {
            states.push(state);
        }
    }
    assert_eq!(
        states,
        [
            ShardState::AwaitingHello,
            ShardState::Identifying,
            ShardState::Connected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_acked_heartbeats_keep_connection() {
    let mut h = start();
    let mut conn = accept(&mut h.server).await;
    hello(&conn, 1_000).await;
    next_op(&mut conn, 2).await;

    for _ in 0..10 {
        next_op(&mut conn, 1).await;
        conn.send_op(11, Value::Null).await.unwrap();
    }

    assert_eq!(h.shard.state(), ShardState::Connected);
    assert!(h.shard.latency().is_some());
    assert!(
        timeout(Duration::from_millis(500), h.server.accept())
            .await
            .is_err()
    );
}

#[tokio::test(start_paused = true)]
async fn test_missed_ack_reconnects_and_resumes() {
    let mut h = start();
    let mut conn = accept(&mut h.server).await;
    hello(&conn, 1_000).await;
    next_op(&mut conn, 2).await;
    ready(&conn, 1, "abc").await;
    conn.send_dispatch("GUILD_CREATE", 2, json!({ "id": "1" }))
        .await
        .unwrap();

    // Never ack: the second tick finds the first beat outstanding
    let beat = next_op(&mut conn, 1).await;
    assert_eq!(beat["d"], 2);
    assert_eq!(next_close(&mut conn).await, 4000);

    let mut second = accept(&mut h.server).await;
    assert!(second.url.starts_with("wss://resume.test"));
    hello(&second, 1_000).await;
    let resume = next_op(&mut second, 6).await;
    assert_eq!(resume["d"]["token"], "secret");
    assert_eq!(resume["d"]["session_id"], "abc");
    assert_eq!(resume["d"]["seq"], 2);

    let status = h.shard.wait_for_state(ShardState::Connected).await;
    assert_eq!(status.session.map(|s| s.last_sequence), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_request_resumes() {
    let mut h = start();
    let mut conn = establish(&mut h).await;

    conn.send_op(7, Value::Null).await.unwrap();
    assert_eq!(next_close(&mut conn).await, 4000);

    let mut second = accept(&mut h.server).await;
    hello(&second, 45_000).await;
    next_op(&mut second, 6).await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_session_identifies_fresh() {
    let mut h = start();
    let mut conn = establish(&mut h).await;

    conn.send_op(9, Value::Bool(false)).await.unwrap();
    assert_eq!(next_close(&mut conn).await, 4000);

    let mut second = accept(&mut h.server).await;
    assert!(second.url.starts_with("wss://gateway.test"));
    hello(&second, 45_000).await;
    let identify = next_op(&mut second, 2).await;
    assert_eq!(identify["d"]["token"], "secret");
    assert!(h.shard.status().session.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_resumable_invalid_session_resumes() {
    let mut h = start();
    let mut conn = establish(&mut h).await;

    conn.send_op(9, Value::Bool(true)).await.unwrap();
    assert_eq!(next_close(&mut conn).await, 4000);

    let mut second = accept(&mut h.server).await;
    hello(&second, 45_000).await;
    let resume = next_op(&mut second, 6).await;
    assert_eq!(resume["d"]["session_id"], "abc");
}

#[tokio::test(start_paused = true)]
async fn test_session_timeout_close_forces_identify() {
    let mut h = start();
    let conn = establish(&mut h).await;

    conn.close(4009).await.unwrap();

    let mut second = accept(&mut h.server).await;
    hello(&second, 45_000).await;
    next_op(&mut second, 2).await;
}

#[tokio::test(start_paused = true)]
async fn test_abnormal_close_keeps_session() {
    let mut h = start();
    let conn = establish(&mut h).await;

    conn.close(4000).await.unwrap();

    let mut second = accept(&mut h.server).await;
    hello(&second, 45_000).await;
    next_op(&mut second, 6).await;
}

#[tokio::test(start_paused = true)]
async fn test_server_requested_heartbeat() {
    let mut h = start();
    let mut conn = establish(&mut h).await;
    conn.send_dispatch("MESSAGE_CREATE", 5, json!({})).await.unwrap();

    conn.send_op(1, Value::Null).await.unwrap();
    let beat = next_op(&mut conn, 1).await;
    assert_eq!(beat["d"], 5);
    assert_eq!(h.shard.state(), ShardState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_dispatches_reach_subscribers() {
    let mut h = start();
    let conn = establish(&mut h).await;
    conn.send_dispatch("MESSAGE_CREATE", 2, json!({ "content": "hi" }))
        .await
        .unwrap();

    loop {
        match h.events.recv().await.unwrap() {
            ShardEvent::Dispatch {
                kind: EventKind::MessageCreate,
                name,
                sequence,
                data,
                shard,
            } => {
                assert_eq!(name, "MESSAGE_CREATE");
                assert_eq!(sequence, Some(2));
                assert_eq!(data["content"], "hi");
                assert_eq!(shard.id, 0);
                break;
            }
            _ => continue,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_commands_wait_for_handshake() {
    let mut h = start();
    h.shard
        .send(GatewayCommand::all_members("42"))
        .await
        .unwrap();

    let mut conn = accept(&mut h.server).await;
    hello(&conn, 45_000).await;

    let first = conn.recv_frame().await.unwrap();
    assert_eq!(first["op"], 2);
    let request = next_op(&mut conn, 8).await;
    assert_eq!(request["d"]["guild_id"], "42");
}

#[tokio::test(start_paused = true)]
async fn test_close_stops_the_shard() {
    let mut h = start();
    let mut conn = establish(&mut h).await;

    h.shard.close().await;
    assert_eq!(h.shard.state(), ShardState::Closed);
    assert_eq!(next_close(&mut conn).await, 1000);

    let result = h.shard.send(GatewayCommand::all_members("1")).await;
    assert!(matches!(result, Err(GatewayError::Closed)));
    assert!(
        timeout(Duration::from_secs(120), h.server.accept())
            .await
            .is_err()
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_failures_back_off() {
    let (transport, server) = ChannelTransport::pair();
    transport.fail_next(3);
    let started = Instant::now();
    let mut h = start_with(config(), transport, server);

    accept(&mut h.server).await;
    // 1s, 2s, then 4s between attempts
    assert!(started.elapsed() >= Duration::from_secs(7));
    assert!(started.elapsed() < Duration::from_secs(8));
    h.shard.wait_for_state(ShardState::AwaitingHello).await;
}
