// ABOUTME: Socket pool manager: bounded per-key pools of real-time connections
// ABOUTME: Handles acquire/release, FIFO waiters with timeout and cancellation, idle cleanup and metrics

//! Socket pool manager.
//!
//! The `SocketPoolManager` owns one pool per logical key (a payment session
//! id) and provides:
//! - Acquisition that reuses idle connections, creates new ones up to
//!   `max_size`, or queues the caller
//! - Release back to idle, waking the oldest waiter of that pool
//! - A background cleanup loop evicting idle connections
//! - A background metrics loop logging pool occupancy
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    SocketPoolManager                       │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │  pools: Mutex<HashMap<String, Pool>>                 │  │
//! │  │     - payment:abc -> active {..} idle [..] waiting [..] │
//! │  │     - payment:def -> active {..} idle [..] waiting [..] │
//! │  └──────────────────────────────────────────────────────┘  │
//! │                                                            │
//! │  ┌───────────────┐  ┌────────────────┐  ┌──────────────┐  │
//! │  │SocketTransport│  │ ManagerMetrics │  │  PoolConfig  │  │
//! │  │ (new sockets) │  │ (observability)│  │  (settings)  │  │
//! │  └───────────────┘  └────────────────┘  └──────────────┘  │
//! │                                                            │
//! │  cleanup loop (cleanup_interval)  metrics loop (interval)  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The lock is never held across an `.await`: sockets are created and
//! disconnected outside it, and a reserved "creating" slot keeps the pool
//! within `max_size` while a connect is in flight.
//!
//! # Usage
//!
//! ```ignore
//! use paysock::socket_pool::{PoolConfig, SocketPoolManager, TcpTransport, TransportConfig};
//!
//! let manager = SocketPoolManager::new(
//!     PoolConfig::default(),
//!     TcpTransport::new(TransportConfig::default()),
//! )?;
//! manager.start()?;
//!
//! let mut conn = manager.acquire_connection("payment:abc").await?;
//! conn.emit("status", serde_json::json!({ "state": "pending" })).await?;
//! manager.release_connection(conn);
//!
//! manager.stop().await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::PoolConfig;
use super::connection::{Connection, PooledConnection};
use super::metrics::{ManagerMetrics, MetricsSnapshot, PoolSnapshot};
use super::pool::{Checkout, Grant, Pool};
use super::transport::{Established, SocketTransport, TransportError};

// === Pool Errors ===

/// Errors that can occur during pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    /// Creating a new connection failed
    #[error("Connection creation failed: {0}")]
    Transport(#[from] TransportError),

    /// A queued acquire waited longer than `acquire_timeout`
    #[error("Timed out after {waited:?} waiting for a connection to '{key}'")]
    AcquireTimeout { key: String, waited: Duration },

    /// A queued acquire was cancelled by its caller
    #[error("Acquire for '{key}' was cancelled")]
    Cancelled { key: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Manager is not running when operation requires it
    #[error("Socket pool is not running")]
    NotRunning,

    /// Manager is already running when start is called
    #[error("Socket pool is already running")]
    AlreadyRunning,
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

// === Shared State ===

/// State shared by the manager, its background tasks and checked-out guards
pub(crate) struct Shared {
    config: PoolConfig,
    transport: Arc<dyn SocketTransport>,
    pools: Mutex<HashMap<String, Pool>>,
    metrics: ManagerMetrics,
    /// Only flipped while `pools` is locked
    running: AtomicBool,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Return a released connection to its pool
    pub(crate) fn check_in(&self, conn: Connection) {
        let max_size = self.config.max_size;
        let mut discarded = Vec::new();
        let orphan = {
            let mut pools = self.pools.lock();
            match pools.get_mut(conn.pool_key()) {
                Some(pool) if self.is_running() => {
                    debug!(key = %conn.pool_key(), id = %conn.id(), "Released connection");
                    let orphan = pool.check_in(conn, max_size, &self.metrics).err();
                    discarded = pool.take_discarded();
                    orphan
                }
                Some(pool) => {
                    pool.forget(&conn);
                    Some(conn)
                }
                None => Some(conn),
            }
        };

        // Not parked: the pool is gone or belongs to a later start()
        if let Some(conn) = orphan {
            self.metrics.checked_in();
            debug!(key = %conn.pool_key(), id = %conn.id(), "Pool does not own released connection, disconnecting");
            spawn_disconnect(conn);
        }
        discarded.into_iter().for_each(spawn_disconnect);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let mut pools: Vec<PoolSnapshot> = self.pools.lock().values().map(Pool::snapshot).collect();
        pools.sort_by(|a, b| a.key.cmp(&b.key));
        self.metrics.snapshot(pools)
    }

    fn log_metrics(&self) {
        let snapshot = self.snapshot();
        for pool in &snapshot.pools {
            debug!(
                key = %pool.key,
                active = pool.active,
                idle = pool.idle,
                waiting = pool.waiting,
                created = pool.metrics.total_connections,
                failures = pool.metrics.failures,
                "Pool metrics"
            );
        }
        info!(
            pools = snapshot.pools.len(),
            total_connections = snapshot.total_connections,
            active_connections = snapshot.active_connections,
            failed_connections = snapshot.failed_connections,
            reconnections = snapshot.reconnections,
            "Socket pool metrics"
        );
    }

    async fn cleanup_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let now = Instant::now();
        let evicted: Vec<Connection> = {
            let mut pools = self.pools.lock();
            pools
                .values_mut()
                .flat_map(|pool| pool.evict_idle(idle_timeout, now))
                .collect()
        };
        self.metrics.cleanup_ran(Utc::now());

        let count = evicted.len();
        for conn in evicted {
            debug!(key = %conn.pool_key(), id = %conn.id(), "Disconnecting evicted connection");
            conn.disconnect().await;
        }

        if count > 0 {
            info!(evicted = count, "Idle cleanup evicted connections");
        } else {
            debug!("Idle cleanup found nothing to evict");
        }
        count
    }

    /// Open a socket through the transport, bounded by `connection_timeout`
    async fn establish(&self, key: &str) -> PoolResult<Connection> {
        let timeout = self.config.connection_timeout;
        let Established { socket, attempts } =
            match tokio::time::timeout(timeout, self.transport.connect(key)).await {
                Ok(result) => result?,
                Err(_) => return Err(TransportError::Timeout(timeout).into()),
            };

        if attempts > 1 {
            self.metrics.add_reconnections(u64::from(attempts - 1));
        }
        Ok(Connection::new(key, socket))
    }
}

/// Disconnect off the caller's stack; drops the socket if no runtime is around
fn spawn_disconnect(conn: Connection) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(conn.disconnect());
        }
        Err(_) => drop(conn),
    }
}

// === Slot Reservation ===

/// A reserved creation slot; released again if never committed
struct SlotReservation<'a> {
    shared: &'a Shared,
    key: &'a str,
    armed: bool,
}

impl<'a> SlotReservation<'a> {
    const fn new(shared: &'a Shared, key: &'a str) -> Self {
        Self {
            shared,
            key,
            armed: true,
        }
    }

    /// Record the new connection as checked out. False if the pool is gone.
    fn commit_active(mut self, conn: &Connection) -> bool {
        self.armed = false;
        let mut pools = self.shared.pools.lock();
        match pools.get_mut(self.key) {
            Some(pool) if self.shared.is_running() => {
                pool.commit_active(conn, &self.shared.metrics);
                true
            }
            _ => false,
        }
    }

    /// Park the new connection idle. Hands it back if the pool is gone.
    fn commit_idle(mut self, conn: Connection) -> Result<(), Connection> {
        self.armed = false;
        let mut pools = self.shared.pools.lock();
        match pools.get_mut(self.key) {
            Some(pool) if self.shared.is_running() => {
                pool.commit_idle(conn, self.shared.config.max_size, &self.shared.metrics);
                Ok(())
            }
            _ => Err(conn),
        }
    }

    /// Count a failed creation and free the slot
    fn fail(mut self) {
        self.armed = false;
        let mut pools = self.shared.pools.lock();
        if let Some(pool) = pools.get_mut(self.key) {
            pool.record_failure(&self.shared.metrics);
            pool.release_slot(self.shared.config.max_size, &self.shared.metrics);
        } else {
            self.shared.metrics.connection_failed();
        }
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut pools = self.shared.pools.lock();
        if let Some(pool) = pools.get_mut(self.key) {
            pool.release_slot(self.shared.config.max_size, &self.shared.metrics);
        }
    }
}

// === Wait Ticket ===

/// A queued acquire; leaves the queue when dropped before being served
struct WaitTicket<'a> {
    shared: &'a Shared,
    key: &'a str,
    id: u64,
    rx: oneshot::Receiver<Grant>,
    served: bool,
}

impl WaitTicket<'_> {
    async fn recv(&mut self) -> Result<Grant, oneshot::error::RecvError> {
        let grant = (&mut self.rx).await;
        self.served = true;
        grant
    }
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        if self.served {
            return;
        }
        let mut pools = self.shared.pools.lock();
        if let Some(pool) = pools.get_mut(self.key) {
            pool.abandon_waiter(
                self.id,
                &mut self.rx,
                self.shared.config.max_size,
                &self.shared.metrics,
            );
        }
    }
}

enum Wake {
    Granted(Result<Grant, oneshot::error::RecvError>),
    Cancelled,
    TimedOut,
}

// === Background Tasks ===

struct BackgroundTasks {
    cancel: CancellationToken,
    metrics: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

// === Socket Pool Manager ===

/// Main entry point for pooled real-time connections
///
/// Construct one per process (or per test), share it through `Arc`, and
/// drive it with `start()`/`stop()`.
pub struct SocketPoolManager {
    shared: Arc<Shared>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl std::fmt::Debug for SocketPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketPoolManager")
            .field("config", &self.shared.config)
            .field("pool_count", &self.shared.pools.lock().len())
            .field("running", &self.shared.is_running())
            .finish()
    }
}

impl SocketPoolManager {
    /// Create a new manager
    ///
    /// The manager is created in a stopped state. Call `start()` before
    /// acquiring connections.
    pub fn new(config: PoolConfig, transport: impl SocketTransport) -> PoolResult<Self> {
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a new manager around an already shared transport
    pub fn with_transport(
        config: PoolConfig,
        transport: Arc<dyn SocketTransport>,
    ) -> PoolResult<Self> {
        config.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                transport,
                pools: Mutex::new(HashMap::new()),
                metrics: ManagerMetrics::new(),
                running: AtomicBool::new(false),
            }),
            tasks: Mutex::new(None),
        })
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Whether `start()` has been called without a matching `stop()`
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Start the background metrics and cleanup loops
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> PoolResult<()> {
        {
            let _pools = self.shared.pools.lock();
            if self.shared.running.swap(true, Ordering::SeqCst) {
                return Err(PoolError::AlreadyRunning);
            }
        }

        let cancel = CancellationToken::new();
        let metrics = tokio::spawn(metrics_loop(Arc::clone(&self.shared), cancel.clone()));
        let cleanup = tokio::spawn(cleanup_loop(Arc::clone(&self.shared), cancel.clone()));
        *self.tasks.lock() = Some(BackgroundTasks {
            cancel,
            metrics,
            cleanup,
        });

        info!(
            max_size = self.shared.config.max_size,
            idle_timeout_ms = millis(self.shared.config.idle_timeout),
            "Socket pool started"
        );
        Ok(())
    }

    /// Stop the background loops and tear down all pools
    ///
    /// Queued waiters fail with `NotRunning` and idle connections are
    /// disconnected. Connections still checked out are disconnected when
    /// they are released.
    pub async fn stop(&self) -> PoolResult<()> {
        let drained: Vec<Connection> = {
            let mut pools = self.shared.pools.lock();
            if !self.shared.running.swap(false, Ordering::SeqCst) {
                return Err(PoolError::NotRunning);
            }
            pools.values_mut().flat_map(Pool::drain).collect()
        };

        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.cancel.cancel();
            let _ = tasks.metrics.await;
            let _ = tasks.cleanup.await;
        }

        let count = drained.len();
        for conn in drained {
            conn.disconnect().await;
        }

        self.shared.pools.lock().clear();
        info!(disconnected = count, "Socket pool stopped");
        Ok(())
    }

    /// Acquire a connection for `key`
    ///
    /// Reuses an idle connection, creates a new one while the pool is below
    /// `max_size`, or waits up to `acquire_timeout` for a release.
    pub async fn acquire_connection(&self, key: &str) -> PoolResult<PooledConnection> {
        self.acquire_connection_with_cancel(key, &CancellationToken::new())
            .await
    }

    /// Acquire a connection, giving up early if `cancel` fires while queued
    pub async fn acquire_connection_with_cancel(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> PoolResult<PooledConnection> {
        debug!(key = %key, "Acquiring connection");

        let (checkout, discarded) = {
            let mut pools = self.shared.pools.lock();
            if !self.shared.is_running() {
                return Err(PoolError::NotRunning);
            }
            let pool = pools.entry(key.to_string()).or_insert_with(|| {
                info!(key = %key, "Creating pool");
                Pool::new(key)
            });
            let checkout = pool.checkout(self.shared.config.max_size, &self.shared.metrics);
            (checkout, pool.take_discarded())
        };
        discarded.into_iter().for_each(spawn_disconnect);

        match checkout {
            Checkout::Reuse(conn) => {
                debug!(key = %key, id = %conn.id(), "Reusing idle connection");
                Ok(self.guard(conn))
            }
            Checkout::Create => {
                self.create_connection(key, SlotReservation::new(&self.shared, key))
                    .await
            }
            Checkout::Wait { id, rx } => self.wait_for_connection(key, id, rx, cancel).await,
        }
    }

    /// Return a connection to its pool
    ///
    /// Equivalent to dropping the guard.
    pub fn release_connection(&self, conn: PooledConnection) {
        if !conn.belongs_to(&self.shared) {
            warn!(key = %conn.pool_key(), id = %conn.id(), "Released connection belongs to another manager");
        }
        conn.release();
    }

    /// Snapshot of global counters and every pool's occupancy
    pub fn get_pool_metrics(&self) -> MetricsSnapshot {
        self.shared.snapshot()
    }

    /// Run one idle cleanup sweep now, returning the number evicted
    pub async fn run_cleanup(&self) -> usize {
        self.shared.cleanup_idle().await
    }

    /// Top the pool for `key` up to `min_connections` idle connections
    ///
    /// Returns how many connections were created.
    pub async fn prewarm(&self, key: &str) -> PoolResult<usize> {
        let PoolConfig {
            min_connections,
            max_size,
            ..
        } = self.shared.config;
        let mut created = 0;

        loop {
            let reserved = {
                let mut pools = self.shared.pools.lock();
                if !self.shared.is_running() {
                    return Err(PoolError::NotRunning);
                }
                pools
                    .entry(key.to_string())
                    .or_insert_with(|| Pool::new(key))
                    .reserve_prewarm_slot(min_connections, max_size)
            };
            if !reserved {
                break;
            }

            let slot = SlotReservation::new(&self.shared, key);
            let conn = match self.shared.establish(key).await {
                Ok(conn) => conn,
                Err(e) => {
                    slot.fail();
                    warn!(key = %key, error = %e, "Prewarm connection failed");
                    return Err(e);
                }
            };
            if let Err(conn) = slot.commit_idle(conn) {
                conn.disconnect().await;
                return Err(PoolError::NotRunning);
            }
            created += 1;
        }

        if created > 0 {
            info!(key = %key, created, "Prewarmed pool");
        }
        Ok(created)
    }

    async fn create_connection(
        &self,
        key: &str,
        slot: SlotReservation<'_>,
    ) -> PoolResult<PooledConnection> {
        let conn = match self.shared.establish(key).await {
            Ok(conn) => conn,
            Err(e) => {
                slot.fail();
                warn!(key = %key, error = %e, "Failed to create connection");
                return Err(e);
            }
        };

        if !slot.commit_active(&conn) {
            conn.disconnect().await;
            return Err(PoolError::NotRunning);
        }

        info!(key = %key, id = %conn.id(), "Created new connection");
        Ok(self.guard(conn))
    }

    async fn wait_for_connection(
        &self,
        key: &str,
        id: u64,
        rx: oneshot::Receiver<Grant>,
        cancel: &CancellationToken,
    ) -> PoolResult<PooledConnection> {
        debug!(key = %key, waiter = id, "Pool saturated, queueing request");

        let started = Instant::now();
        let timeout = self.shared.config.acquire_timeout;
        let mut ticket = WaitTicket {
            shared: &self.shared,
            key,
            id,
            rx,
            served: false,
        };

        let wake = tokio::select! {
            biased;
            grant = ticket.recv() => Wake::Granted(grant),
            () = cancel.cancelled() => Wake::Cancelled,
            () = tokio::time::sleep(timeout) => Wake::TimedOut,
        };
        drop(ticket);

        match wake {
            Wake::Granted(Ok(Grant::Reuse(conn))) => {
                debug!(key = %key, id = %conn.id(), waited_ms = millis(started.elapsed()), "Waiter received connection");
                Ok(self.guard(conn))
            }
            Wake::Granted(Ok(Grant::Create)) => {
                self.create_connection(key, SlotReservation::new(&self.shared, key))
                    .await
            }
            Wake::Granted(Err(_)) => Err(PoolError::NotRunning),
            Wake::Cancelled => {
                debug!(key = %key, waiter = id, "Waiter cancelled");
                Err(PoolError::Cancelled {
                    key: key.to_string(),
                })
            }
            Wake::TimedOut => {
                warn!(key = %key, waiter = id, timeout_ms = millis(timeout), "Timed out waiting for connection");
                Err(PoolError::AcquireTimeout {
                    key: key.to_string(),
                    waited: started.elapsed(),
                })
            }
        }
    }

    fn guard(&self, conn: Connection) -> PooledConnection {
        PooledConnection::new(conn, Arc::clone(&self.shared))
    }
}

impl Drop for SocketPoolManager {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.get_mut().take() {
            tasks.cancel.cancel();
        }
    }
}

async fn metrics_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(shared.config.metrics_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => shared.log_metrics(),
        }
    }
}

async fn cleanup_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(shared.config.cleanup_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                shared.cleanup_idle().await;
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
