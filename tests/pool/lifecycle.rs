// ABOUTME: Behavioral tests for manager start/stop, idle cleanup and prewarming

use std::sync::Arc;
use std::time::Duration;

use paysock::socket_pool::{PoolConfig, PoolError, SocketPoolManager, SocketTransport};

use crate::fixtures::{fast_config, MemoryTransport};

fn manager_with(config: PoolConfig, transport: &Arc<MemoryTransport>) -> Arc<SocketPoolManager> {
    Arc::new(
        SocketPoolManager::with_transport(
            config,
            Arc::clone(transport) as Arc<dyn SocketTransport>,
        )
        .expect("valid config"),
    )
}

#[tokio::test]
async fn test_acquire_requires_running_manager() {
    let transport = MemoryTransport::new();
    let manager = manager_with(fast_config(), &transport);

    let err = manager.acquire_connection("payment:abc").await.unwrap_err();
    assert!(matches!(err, PoolError::NotRunning));
    assert_eq!(transport.counters.connects(), 0);
}

#[tokio::test]
async fn test_start_twice_is_rejected_and_restart_works() {
    let transport = MemoryTransport::new();
    let manager = manager_with(fast_config(), &transport);

    manager.start().unwrap();
    assert!(matches!(manager.start(), Err(PoolError::AlreadyRunning)));

    manager.stop().await.unwrap();
    assert!(matches!(manager.stop().await, Err(PoolError::NotRunning)));

    manager.start().unwrap();
    let conn = manager.acquire_connection("payment:abc").await.unwrap();
    drop(conn);
    manager.stop().await.unwrap();
}

#[test]
fn test_invalid_config_is_rejected() {
    let transport = MemoryTransport::new();
    let config = PoolConfig {
        min_connections: 4,
        ..fast_config()
    };

    let result =
        SocketPoolManager::with_transport(config, transport as Arc<dyn SocketTransport>);
    assert!(matches!(result, Err(PoolError::Config(_))));
}

/// Stop fails queued waiters, disconnects idle sockets and later releases
#[tokio::test]
async fn test_stop_tears_down_pools() {
    let transport = MemoryTransport::new();
    let manager = manager_with(fast_config().with_max_size(1), &transport);
    manager.start().unwrap();

    drop(manager.acquire_connection("payment:idle").await.unwrap());
    let held = manager.acquire_connection("payment:busy").await.unwrap();

    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.acquire_connection("payment:busy").await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    manager.stop().await.unwrap();

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::NotRunning));
    assert_eq!(transport.counters.disconnects(), 1, "Idle socket closed on stop");
    assert!(manager.get_pool_metrics().pools.is_empty());

    drop(held);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(transport.counters.disconnects(), 2, "Late release is closed too");
    assert_eq!(manager.get_pool_metrics().active_connections, 0);
}

/// A connection issued before a restart is not parked in the new pool
#[tokio::test]
async fn test_release_across_restart_keeps_pool_bounded() {
    let transport = MemoryTransport::new();
    let manager = manager_with(fast_config().with_max_size(1), &transport);
    manager.start().unwrap();

    let old = manager.acquire_connection("payment:abc").await.unwrap();
    manager.stop().await.unwrap();
    manager.start().unwrap();

    let fresh = manager.acquire_connection("payment:abc").await.unwrap();
    drop(old);
    tokio::time::sleep(Duration::from_millis(30)).await;

    let metrics = manager.get_pool_metrics();
    let pool = metrics.pool("payment:abc").unwrap();
    assert_eq!((pool.active, pool.idle), (1, 0));
    assert_eq!(metrics.active_connections, 1);
    assert_eq!(transport.counters.disconnects(), 1, "Stale connection closed");

    drop(fresh);
    let metrics = manager.get_pool_metrics();
    let pool = metrics.pool("payment:abc").unwrap();
    assert_eq!((pool.active, pool.idle), (0, 1));
    assert_eq!(metrics.active_connections, 0);

    manager.stop().await.unwrap();
}

/// Connections idle past idle_timeout are evicted; fresh ones survive
#[tokio::test]
async fn test_cleanup_evicts_only_stale_idle_connections() {
    let transport = MemoryTransport::new();
    let manager = manager_with(fast_config(), &transport);
    manager.start().unwrap();

    drop(manager.acquire_connection("payment:stale").await.unwrap());
    tokio::time::sleep(Duration::from_millis(150)).await;
    drop(manager.acquire_connection("payment:fresh").await.unwrap());

    assert_eq!(manager.run_cleanup().await, 1);
    assert_eq!(transport.counters.disconnects(), 1);

    let metrics = manager.get_pool_metrics();
    assert!(metrics.last_cleanup.is_some());
    assert_eq!(metrics.pool("payment:stale").unwrap().idle, 0);
    assert_eq!(metrics.pool("payment:fresh").unwrap().idle, 1);

    // The evicted slot is available again
    let replacement = manager.acquire_connection("payment:stale").await.unwrap();
    assert_eq!(transport.counters.connects(), 3);

    drop(replacement);
    manager.stop().await.unwrap();
}

/// Checked-out connections are never evicted, however long they are held
#[tokio::test]
async fn test_cleanup_skips_checked_out_connections() {
    let transport = MemoryTransport::new();
    let manager = manager_with(fast_config(), &transport);
    manager.start().unwrap();

    let held = manager.acquire_connection("payment:abc").await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(manager.run_cleanup().await, 0);
    assert!(held.socket().is_connected());

    drop(held);
    manager.stop().await.unwrap();
}

/// The background cleanup loop runs on cleanup_interval
#[tokio::test]
async fn test_background_cleanup_loop_evicts() {
    let transport = MemoryTransport::new();
    let config = PoolConfig {
        cleanup_interval: Duration::from_millis(50),
        idle_timeout: Duration::from_millis(50),
        ..fast_config()
    };
    let manager = manager_with(config, &transport);
    manager.start().unwrap();

    drop(manager.acquire_connection("payment:abc").await.unwrap());
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(transport.counters.disconnects(), 1);
    assert_eq!(manager.get_pool_metrics().pool("payment:abc").unwrap().idle, 0);

    manager.stop().await.unwrap();
}

/// Prewarm tops a pool up to min_connections idle sockets
#[tokio::test]
async fn test_prewarm_creates_min_connections() {
    let transport = MemoryTransport::new();
    let config = PoolConfig {
        max_size: 3,
        min_connections: 2,
        ..fast_config()
    };
    let manager = manager_with(config, &transport);
    manager.start().unwrap();

    assert_eq!(manager.prewarm("payment:abc").await.unwrap(), 2);
    assert_eq!(manager.prewarm("payment:abc").await.unwrap(), 0);

    let metrics = manager.get_pool_metrics();
    let pool = metrics.pool("payment:abc").unwrap();
    assert_eq!((pool.active, pool.idle), (0, 2));
    assert_eq!(metrics.total_connections, 2);

    let conn = manager.acquire_connection("payment:abc").await.unwrap();
    assert_eq!(transport.counters.connects(), 2, "Prewarmed socket reused");

    drop(conn);
    manager.stop().await.unwrap();
}

/// Metrics snapshots serialize for external reporting
#[tokio::test]
async fn test_metrics_snapshot_serializes() {
    let transport = MemoryTransport::new();
    let manager = manager_with(fast_config(), &transport);
    manager.start().unwrap();

    let conn = manager.acquire_connection("payment:abc").await.unwrap();
    let json = serde_json::to_value(manager.get_pool_metrics()).unwrap();

    assert_eq!(json["total_connections"], 1);
    assert_eq!(json["active_connections"], 1);
    assert_eq!(json["pools"][0]["key"], "payment:abc");
    assert_eq!(json["pools"][0]["active"], 1);
    assert!(json["pools"][0]["metrics"]["created"].is_string());

    drop(conn);
    manager.stop().await.unwrap();
}
