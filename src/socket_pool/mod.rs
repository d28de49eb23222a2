// ABOUTME: Real-time socket pooling for payment sessions
//
// This module keeps a bounded pool of real-time socket connections per
// logical key (a payment session id), so concurrent payment flows for the
// same session share a handful of sockets instead of opening one each.
//
// Key components:
// - config: pool sizing, timeouts and background intervals
// - connection: pooled connection wrapper and checkout guard
// - pool: per-key bookkeeping (active, idle, FIFO waiters)
// - manager: acquire/release, cleanup and metrics loops
// - metrics: global and per-pool counters, serializable snapshots
// - transport: socket creation seam and the TCP implementation
// - backoff: exponential backoff between connect attempts

pub mod backoff;
pub mod config;
pub mod connection;
pub mod manager;
pub mod metrics;
mod pool;
pub mod transport;

// Re-exports for convenient access
pub use backoff::ExponentialBackoff;
pub use config::{PoolConfig, ReconnectPolicy};
pub use connection::{Connection, ConnectionId, ConnectionState, PooledConnection};
pub use manager::{PoolError, PoolResult, SocketPoolManager};
pub use metrics::{MetricsSnapshot, PoolSnapshot, PoolStats};
pub use transport::{
    Established, RealtimeSocket, SocketTransport, TcpSocket, TcpTransport, TransportConfig,
    TransportError,
};
