//! Socket-level behaviour: keepalive, server errors and reconnects
use std::time::Duration;

use serde_json::json;

use pollcast::error::ErrorCode;
use pollcast::ConnectionState;

use crate::harness::{wait_until, BridgeEnvironment, CHANNEL};
use crate::pusher_server::FakePusherServer;

#[tokio::test]
async fn test_server_ping_gets_pong() {
    let server = FakePusherServer::start().await;
    let env = BridgeEnvironment::new(&server).await;
    env.bridge.start().await;
    assert!(env
        .bridge
        .connection()
        .wait_for_state(ConnectionState::Subscribed, Duration::from_secs(5))
        .await);

    server.push("pusher:ping", None, json!({}));

    let server = &server;
    assert!(wait_until(2000, || async move { !server.frames_named("pusher:pong").is_empty() }).await);
    env.cleanup().await;
}

#[tokio::test]
async fn test_idle_connection_pings_the_server() {
    let server = FakePusherServer::with_activity_timeout(1).await;
    let env = BridgeEnvironment::new(&server).await;
    env.bridge.start().await;

    let server = &server;
    assert!(wait_until(3000, || async move { !server.frames_named("pusher:ping").is_empty() }).await);
    // The server answered, so the session stays up
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connections(), 1);
    assert!(env.bridge.state().is_connected());

    env.cleanup().await;
}

#[tokio::test]
async fn test_server_error_is_logged() {
    let server = FakePusherServer::start().await;
    let env = BridgeEnvironment::new(&server).await;
    env.bridge.start().await;
    env.bridge
        .connection()
        .wait_for_state(ConnectionState::Subscribed, Duration::from_secs(5))
        .await;

    server.push("pusher:error", None, json!({ "message": "Over capacity", "code": 4100 }));

    let log = env.bridge.message_log().clone();
    assert!(wait_until(2000, || {
        let log = log.clone();
        async move { log.count(ErrorCode::ProtocolServerError) == 1 }
    })
    .await);
    assert_eq!(env.bridge.state(), ConnectionState::Subscribed);
    env.cleanup().await;
}

#[tokio::test]
async fn test_dropped_socket_reconnects_and_resubscribes() {
    let server = FakePusherServer::start().await;
    let env = BridgeEnvironment::new(&server).await;
    env.bridge.start().await;
    assert!(env
        .bridge
        .connection()
        .wait_for_state(ConnectionState::Subscribed, Duration::from_secs(5))
        .await);

    assert!(server.drop_client());

    let server = &server;
    assert!(wait_until(5000, || async move {
        server.connections() == 2 && server.frames_named("pusher:subscribe").len() == 2
    })
    .await);
    assert!(env
        .bridge
        .connection()
        .wait_for_state(ConnectionState::Subscribed, Duration::from_secs(5))
        .await);

    let subscribes = server.frames_named("pusher:subscribe");
    assert_eq!(subscribes[1]["data"]["channel"], CHANNEL);
    assert_eq!(env.bridge.message_log().count(ErrorCode::TransportClosed), 1);
    assert_eq!(env.bridge.connection().reconnect_attempts(), 0);

    env.cleanup().await;
}

#[tokio::test]
async fn test_unreachable_server_gives_up() {
    let server = FakePusherServer::start().await;
    let env = BridgeEnvironment::new(&server).await;
    drop(server);
    // Port is released once the accept loop is gone
    tokio::time::sleep(Duration::from_millis(50)).await;

    env.bridge.start().await;

    let log = env.bridge.message_log().clone();
    assert!(wait_until(5000, || {
        let log = log.clone();
        async move { log.count(ErrorCode::ReconnectExhausted) == 1 }
    })
    .await);
    assert!(env
        .bridge
        .connection()
        .wait_for_state(ConnectionState::Disconnected, Duration::from_secs(1))
        .await);
    assert_eq!(env.bridge.connection().connect_attempts(), 6);
    assert!(log.take_viewer_request());

    env.cleanup().await;
}
