//! Integration tests for the connection layer against the in-process
//! JSON-RPC WebSocket server in `common`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use mempool_ingest::{
    ConnectionConfig, ConnectionError, ManagerConfig, ManagerError, StreamConfig,
    ConnectionManager, TransactionStream, WsConnection,
};
use tokio::time::timeout;

use common::MockRpcServer;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn fast_manager_config() -> ManagerConfig {
    let mut config = ManagerConfig::default();
    config.connection.connect_timeout_secs = 2;
    config.backoff.base_delay_ms = 50;
    config.backoff.max_delay_ms = 500;
    config
}

#[tokio::test]
async fn connect_subscribe_and_receive_notification() {
    let server = MockRpcServer::start().await;
    let conn = WsConnection::new(ConnectionConfig::default());
    conn.connect(server.url()).await.unwrap();
    assert!(conn.is_connected());
    assert!(conn.connection_health().is_healthy);

    let mut rx = conn.subscribe("newPendingTransactions", &[]).await.unwrap();

    // The subscription confirmation races the first broadcast; keep sending
    // until the notification arrives.
    let raw = loop {
        server.broadcast_transaction(MockRpcServer::swap_payload(7));
        match timeout(Duration::from_millis(200), rx.recv()).await {
            Ok(Some(raw)) => break raw,
            Ok(None) => panic!("subscription channel closed unexpectedly"),
            Err(_) => continue,
        }
    };

    let stream = TransactionStream::new(StreamConfig::permissive()).unwrap();
    let tx = stream.process_transaction(&raw).unwrap();
    assert_eq!(tx.hash.as_bytes()[31], 7);
    assert_eq!(tx.chain_id.as_u64(), 8453);

    conn.close().await.unwrap();
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn subscribe_requires_established_connection() {
    let conn = WsConnection::new(ConnectionConfig::default());
    assert!(matches!(
        conn.subscribe("newPendingTransactions", &[]).await,
        Err(ConnectionError::NotEstablished)
    ));
}

#[tokio::test]
async fn close_is_idempotent_and_terminal() {
    let server = MockRpcServer::start().await;
    let conn = WsConnection::new(ConnectionConfig::default());
    conn.connect(server.url()).await.unwrap();

    conn.close().await.unwrap();
    conn.close().await.unwrap();
    assert!(!conn.is_connected());

    // A closed connection is terminal; it must not be redialed.
    assert!(matches!(
        conn.connect(server.url()).await,
        Err(ConnectionError::Closed)
    ));
}

#[tokio::test]
async fn connect_to_unreachable_endpoint_fails_and_records_error() {
    let conn = WsConnection::new(ConnectionConfig {
        connect_timeout_secs: 2,
        ..ConnectionConfig::default()
    });
    let err = conn.connect("ws://127.0.0.1:1").await.unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::Transport(_) | ConnectionError::HandshakeTimeout(_)
    ));

    let health = conn.connection_health();
    assert!(!health.is_healthy);
    assert_eq!(health.error_count, 1);
    assert!(health.last_error.is_some());
}

#[tokio::test]
async fn manager_fails_over_to_lower_priority_endpoint() {
    let server = MockRpcServer::start().await;
    let manager = ConnectionManager::new(fast_manager_config());

    // Priority 1 is unreachable; priority 2 is the live server.
    manager.add_endpoint("ws://127.0.0.1:1", 1).await.unwrap();
    manager.add_endpoint(server.url(), 2).await.unwrap();

    let conn = manager.get_connection().await.unwrap();
    assert!(conn.is_connected());

    let statuses = manager.endpoint_statuses().await;
    assert!(!statuses[0].connected, "unreachable endpoint must not report connected");
    assert!(statuses[0].fail_count >= 1);
    assert!(statuses[1].connected, "live endpoint must be the connection source");

    assert_eq!(manager.healthy_connections().await.len(), 1);
    assert!(Arc::ptr_eq(&manager.healthy_connections().await[0], &conn));

    manager.close().await.unwrap();
}

#[tokio::test]
async fn manager_reuses_already_healthy_connection() {
    let server = MockRpcServer::start().await;
    let manager = ConnectionManager::new(fast_manager_config());
    manager.add_endpoint(server.url(), 1).await.unwrap();

    let first = manager.get_connection().await.unwrap();
    let second = manager.get_connection().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    manager.close().await.unwrap();
}

#[tokio::test]
async fn failure_handling_installs_replacement_connection() {
    let server = MockRpcServer::start().await;
    let manager = ConnectionManager::new(fast_manager_config());
    manager.add_endpoint(server.url(), 1).await.unwrap();

    let conn = manager.get_connection().await.unwrap();
    manager.handle_connection_failure(&conn).await.unwrap();

    // The failed connection is closed and no longer managed.
    assert!(!conn.is_connected());
    assert!(matches!(
        manager.handle_connection_failure(&conn).await,
        Err(ManagerError::ConnectionNotFound)
    ));
    let statuses = manager.endpoint_statuses().await;
    assert_eq!(statuses[0].fail_count, 1);

    // After the backoff window the endpoint is dialed again with a fresh
    // connection object.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let replacement = timeout(RECV_TIMEOUT, manager.get_connection()).await.unwrap().unwrap();
    assert!(!Arc::ptr_eq(&conn, &replacement));
    assert!(replacement.is_connected());

    manager.close().await.unwrap();
}

#[tokio::test]
async fn health_sweep_fails_over_connection_with_stale_ping() {
    let server = MockRpcServer::start().await;
    let mut config = fast_manager_config();
    // Sweep every second; a zero ping-age bound makes any connected
    // endpoint's last ping count as stale on the next sweep.
    config.health.interval_secs = 1;
    config.health.max_ping_age_secs = 0;
    let manager = ConnectionManager::new(config);
    manager.add_endpoint(server.url(), 1).await.unwrap();

    let conn = manager.get_connection().await.unwrap();
    assert!(conn.is_connected());

    // The background sweep, not a manual failure report, must close the
    // stale connection.
    for _ in 0..50 {
        if !conn.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(!conn.is_connected());
    let statuses = manager.endpoint_statuses().await;
    assert!(statuses[0].fail_count >= 1);

    // The endpoint dials a fresh connection object after the backoff window.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let replacement = timeout(RECV_TIMEOUT, manager.get_connection()).await.unwrap().unwrap();
    assert!(!Arc::ptr_eq(&conn, &replacement));
    assert!(replacement.is_connected());

    manager.close().await.unwrap();
}

#[tokio::test]
async fn exhausted_backoff_surfaces_no_healthy_connections() {
    let manager = ConnectionManager::new(fast_manager_config());
    manager.add_endpoint("ws://127.0.0.1:1", 1).await.unwrap();

    // First attempt fails and starts the backoff window.
    assert!(matches!(
        manager.get_connection().await,
        Err(ManagerError::NoHealthyConnections)
    ));
    // Within the backoff window the endpoint is ineligible, so the manager
    // reports exhaustion without redialing.
    assert!(matches!(
        manager.get_connection().await,
        Err(ManagerError::NoHealthyConnections)
    ));
    let statuses = manager.endpoint_statuses().await;
    assert_eq!(statuses[0].fail_count, 1);

    manager.close().await.unwrap();
}
