//! Integration tests against an unreachable broker.
//!
//! No MQTT broker runs in CI; these tests exercise the failure paths the
//! binding must get right without one.

use std::time::Duration;

use tether_core::{ConnectError, ConnectionState, SessionConfig, SessionManager};
use tether_rumqtt::RumqttTransport;

fn unreachable_config() -> SessionConfig {
    // Port 1 is reserved; nothing listens there.
    SessionConfig::new("tcp://127.0.0.1:1").with_keep_alive(Duration::from_secs(5))
}

#[tokio::test]
async fn open_against_unreachable_broker_fails_cleanly() {
    let manager = SessionManager::new(Box::new(RumqttTransport::new()));

    let result = tokio::time::timeout(Duration::from_secs(30), manager.open(unreachable_config()))
        .await
        .expect("open should resolve well before the timeout");

    assert!(matches!(result, Err(ConnectError::Transport(_))));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!manager.is_connected().await);
}

#[tokio::test]
async fn send_and_subscribe_fail_without_a_connection() {
    let manager = SessionManager::new(Box::new(RumqttTransport::new()));

    assert!(!manager.send("metrics/load", b"0.7").await);
    assert!(!manager.subscribe(&["metrics/#"]).await);
}

#[tokio::test]
async fn reconnect_after_failed_open_stays_disconnected() {
    let manager = SessionManager::new(Box::new(RumqttTransport::new()));

    let _ = tokio::time::timeout(Duration::from_secs(30), manager.open(unreachable_config())).await;
    tokio::time::timeout(Duration::from_secs(30), manager.reconnect())
        .await
        .expect("reconnect should resolve well before the timeout");

    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn invalid_endpoint_is_rejected_before_dialing() {
    let manager = SessionManager::new(Box::new(RumqttTransport::new()));

    let result = manager.open(SessionConfig::new("ws://broker:1883")).await;

    assert!(matches!(result, Err(ConnectError::Transport(_))));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn close_without_session_is_a_noop() {
    let manager = SessionManager::new(Box::new(RumqttTransport::new()));

    manager.close().await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
}
