// ABOUTME: Pooled connection wrapper and the checkout guard handed to callers
//
// A Connection owns one real-time socket and remembers which pool it came
// from. Callers never hold a Connection directly: they get a PooledConnection
// guard that checks the connection back in when released or dropped.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use super::manager::Shared;
use super::transport::{RealtimeSocket, TransportError};

// === Connection ID ===

/// Unique identifier for a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Generate a new unique connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// === Connection State ===

/// Lifecycle state of a pooled connection
///
/// `Active ⇄ Idle → Evicted`. Eviction consumes the connection, so an
/// evicted connection can never be checked out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Checked out to a caller
    Active,
    /// Parked in its pool, available for reuse
    Idle,
    /// Removed from its pool and disconnected
    Evicted,
}

// === Connection ===

/// A real-time socket tagged with its owning pool
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    pool_key: String,
    created_at: Instant,
    last_used: Instant,
    state: ConnectionState,
    socket: Box<dyn RealtimeSocket>,
}

impl Connection {
    pub(crate) fn new(pool_key: &str, socket: Box<dyn RealtimeSocket>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            pool_key: pool_key.to_string(),
            created_at: now,
            last_used: now,
            state: ConnectionState::Active,
            socket,
        }
    }

    /// Connection identifier
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Key of the pool this connection belongs to
    pub fn pool_key(&self) -> &str {
        &self.pool_key
    }

    /// When the underlying socket was established
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the connection was last released to its pool
    pub const fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Current lifecycle state
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Time since the connection was last released
    pub fn idle_duration(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Borrow the underlying socket
    pub fn socket(&self) -> &dyn RealtimeSocket {
        self.socket.as_ref()
    }

    /// Mutably borrow the underlying socket
    pub fn socket_mut(&mut self) -> &mut dyn RealtimeSocket {
        self.socket.as_mut()
    }

    /// Send an event over the underlying socket
    pub async fn emit(
        &mut self,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        self.socket.emit(event, payload).await
    }

    pub(crate) fn mark_active(&mut self) {
        self.state = ConnectionState::Active;
    }

    /// Park the connection and stamp `last_used`
    pub(crate) fn mark_idle(&mut self) {
        self.state = ConnectionState::Idle;
        self.last_used = Instant::now();
    }

    /// Park the connection without touching `last_used`
    pub(crate) fn restore_idle(&mut self) {
        self.state = ConnectionState::Idle;
    }

    pub(crate) fn idle_longer_than(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_used) > timeout
    }

    pub(crate) fn mark_evicted(&mut self) {
        self.state = ConnectionState::Evicted;
    }

    /// Disconnect the socket, consuming the connection
    pub(crate) async fn disconnect(mut self) {
        self.state = ConnectionState::Evicted;
        self.socket.disconnect().await;
    }
}

// === Checkout Guard ===

/// A connection checked out from the pool
///
/// Dereferences to [`Connection`]. The connection goes back to its pool when
/// the guard is passed to `SocketPoolManager::release_connection`, when
/// [`PooledConnection::release`] is called, or when the guard is dropped.
pub struct PooledConnection {
    conn: Option<Connection>,
    shared: Arc<Shared>,
}

impl PooledConnection {
    pub(crate) fn new(conn: Connection, shared: Arc<Shared>) -> Self {
        Self {
            conn: Some(conn),
            shared,
        }
    }

    /// Return the connection to its pool
    pub fn release(self) {
        drop(self);
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("BUG: PooledConnection used after release")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("BUG: PooledConnection used after release")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.check_in(conn);
        }
    }
}
