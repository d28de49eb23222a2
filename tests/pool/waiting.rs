// ABOUTME: Behavioral tests for callers queued behind a saturated pool
// Verifies hand-off order, the max_size bound, timeouts and cancellation

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use paysock::socket_pool::{PoolConfig, PoolError, SocketPoolManager, SocketTransport};

use crate::fixtures::{fast_config, MemoryTransport};

fn started_manager(config: PoolConfig, transport: &Arc<MemoryTransport>) -> Arc<SocketPoolManager> {
    let manager = SocketPoolManager::with_transport(
        config,
        Arc::clone(transport) as Arc<dyn SocketTransport>,
    )
    .expect("valid config");
    manager.start().expect("manager starts");
    Arc::new(manager)
}

async fn waiting_count(manager: &SocketPoolManager, key: &str) -> usize {
    // Give spawned acquirers a moment to reach the queue
    tokio::time::sleep(Duration::from_millis(30)).await;
    manager
        .get_pool_metrics()
        .pool(key)
        .map_or(0, |pool| pool.waiting)
}

/// With max_size 2, a third caller waits and receives the first release
#[tokio::test]
async fn test_third_caller_waits_for_release() {
    let transport = MemoryTransport::new();
    let manager = started_manager(fast_config(), &transport);

    let first = manager.acquire_connection("payment:abc").await.unwrap();
    let second = manager.acquire_connection("payment:abc").await.unwrap();
    let released_id = first.id();

    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.acquire_connection("payment:abc").await })
    };
    assert_eq!(waiting_count(&manager, "payment:abc").await, 1);

    manager.release_connection(first);
    let third = waiter.await.unwrap().unwrap();

    assert_eq!(third.id(), released_id);
    assert_eq!(transport.counters.connects(), 2, "No socket beyond max_size");
    let metrics = manager.get_pool_metrics();
    let pool = metrics.pool("payment:abc").unwrap();
    assert_eq!((pool.active, pool.idle, pool.waiting), (2, 0, 0));

    drop((second, third));
    manager.stop().await.unwrap();
}

/// Waiters are served in the order they queued
#[tokio::test]
async fn test_waiters_are_served_first_in_first_out() {
    let transport = MemoryTransport::new();
    let manager = started_manager(fast_config().with_max_size(1), &transport);
    let order = Arc::new(Mutex::new(Vec::new()));

    let held = manager.acquire_connection("payment:abc").await.unwrap();

    let mut waiters = Vec::new();
    for name in ["first", "second", "third"] {
        let manager = Arc::clone(&manager);
        let order = Arc::clone(&order);
        waiters.push(tokio::spawn(async move {
            let conn = manager.acquire_connection("payment:abc").await.unwrap();
            order.lock().push(name);
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(conn);
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    drop(held);
    for waiter in waiters {
        waiter.await.unwrap();
    }

    assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    assert_eq!(transport.counters.connects(), 1);
    manager.stop().await.unwrap();
}

/// Many concurrent callers never push a pool past max_size
#[tokio::test]
async fn test_concurrent_callers_respect_max_size() {
    let transport = MemoryTransport::new();
    transport.set_connect_delay(Duration::from_millis(5));
    let manager = started_manager(fast_config(), &transport);

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let conn = manager.acquire_connection("payment:busy").await?;
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(conn);
                Ok::<_, PoolError>(())
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(transport.counters.connects() <= 2);
    let metrics = manager.get_pool_metrics();
    let pool = metrics.pool("payment:busy").unwrap();
    assert!(pool.active + pool.idle <= 2);
    assert_eq!(pool.waiting, 0);
    assert_eq!(metrics.active_connections, 0);

    manager.stop().await.unwrap();
}

/// A waiter gives up after acquire_timeout and leaves the queue
#[tokio::test]
async fn test_waiter_times_out() {
    let transport = MemoryTransport::new();
    let config = fast_config()
        .with_max_size(1)
        .with_acquire_timeout(Duration::from_millis(100));
    let manager = started_manager(config, &transport);

    let held = manager.acquire_connection("payment:abc").await.unwrap();
    let err = manager.acquire_connection("payment:abc").await.unwrap_err();

    match err {
        PoolError::AcquireTimeout { key, waited } => {
            assert_eq!(key, "payment:abc");
            assert!(waited >= Duration::from_millis(100));
        }
        other => panic!("expected AcquireTimeout, got {other}"),
    }
    assert_eq!(manager.get_pool_metrics().pool("payment:abc").unwrap().waiting, 0);

    drop(held);
    manager.stop().await.unwrap();
}

/// Cancelling a queued acquire returns Cancelled and frees its queue spot
#[tokio::test]
async fn test_cancelled_waiter_leaves_queue() {
    let transport = MemoryTransport::new();
    let manager = started_manager(fast_config().with_max_size(1), &transport);
    let held = manager.acquire_connection("payment:abc").await.unwrap();

    let cancel = CancellationToken::new();
    let waiter = {
        let manager = Arc::clone(&manager);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            manager
                .acquire_connection_with_cancel("payment:abc", &cancel)
                .await
        })
    };
    assert_eq!(waiting_count(&manager, "payment:abc").await, 1);

    cancel.cancel();
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::Cancelled { ref key } if key == "payment:abc"));
    assert_eq!(manager.get_pool_metrics().pool("payment:abc").unwrap().waiting, 0);

    // The released connection goes idle instead of to the cancelled waiter
    let held_id = held.id();
    drop(held);
    let next = manager.acquire_connection("payment:abc").await.unwrap();
    assert_eq!(next.id(), held_id);

    drop(next);
    manager.stop().await.unwrap();
}

/// Dropping a pending acquire future does not strand the next release
#[tokio::test]
async fn test_dropped_acquire_future_does_not_strand_connection() {
    let transport = MemoryTransport::new();
    let manager = started_manager(fast_config().with_max_size(1), &transport);
    let held = manager.acquire_connection("payment:abc").await.unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        manager.acquire_connection("payment:abc"),
    )
    .await;
    assert!(abandoned.is_err(), "Acquire should still be pending");

    drop(held);
    let metrics = manager.get_pool_metrics();
    let pool = metrics.pool("payment:abc").unwrap();
    assert_eq!((pool.active, pool.idle, pool.waiting), (0, 1, 0));

    let again = tokio::time::timeout(
        Duration::from_millis(100),
        manager.acquire_connection("payment:abc"),
    )
    .await
    .expect("idle connection available")
    .unwrap();

    drop(again);
    manager.stop().await.unwrap();
}
