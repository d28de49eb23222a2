// ABOUTME: Transport seam for creating real-time sockets, plus the TCP implementation
// ABOUTME: TcpTransport retries with exponential backoff and joins the session room on connect

//! Real-time socket transport.
//!
//! The pool manager never talks to the network directly. It asks a
//! [`SocketTransport`] for a new socket and holds the result as a boxed
//! [`RealtimeSocket`]. Reconnection policy belongs here, not in the manager.
//!
//! # Wire format
//!
//! `TcpTransport` speaks newline-delimited JSON. Right after connecting it
//! sends a join event for the pool key:
//!
//! ```text
//! {"event":"join-payment","data":{"room":"payment:abc"}}\n
//! ```
//!
//! Every later [`RealtimeSocket::emit`] writes one such line.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::backoff::ExponentialBackoff;
use super::config::{duration_millis, ReconnectPolicy};

// === Transport Errors ===

/// Errors raised while creating or using a real-time socket
#[derive(Debug, Error)]
pub enum TransportError {
    /// A connect attempt did not finish in time
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    /// Every allowed connect attempt failed
    #[error("Connect failed after {attempts} attempt(s): {source}")]
    ConnectFailed {
        /// Attempts made, including the first
        attempts: u32,
        /// Error from the last attempt
        #[source]
        source: Box<TransportError>,
    },

    /// I/O error on the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Event payload could not be encoded
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Socket was already disconnected
    #[error("Socket is closed")]
    Closed,
}

// === Socket Traits ===

/// A live real-time socket handle owned by a pooled connection
#[async_trait]
pub trait RealtimeSocket: Send + std::fmt::Debug {
    /// Send a named event with a JSON payload
    async fn emit(&mut self, event: &str, payload: serde_json::Value)
        -> Result<(), TransportError>;

    /// Whether the socket still looks usable
    fn is_connected(&self) -> bool;

    /// Close the socket. Calling it again is a no-op.
    async fn disconnect(&mut self);
}

/// Outcome of a successful connect
#[derive(Debug)]
pub struct Established {
    /// The new socket
    pub socket: Box<dyn RealtimeSocket>,
    /// Connect attempts it took (1 when the first attempt succeeded)
    pub attempts: u32,
}

impl Established {
    /// Wrap a socket that connected on the first attempt
    pub fn first_try(socket: impl RealtimeSocket + 'static) -> Self {
        Self {
            socket: Box::new(socket),
            attempts: 1,
        }
    }
}

/// Creates real-time sockets for a pool key
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SocketTransport: Send + Sync + 'static {
    /// Open a new socket bound to `key`
    async fn connect(&self, key: &str) -> Result<Established, TransportError>;
}

// === TCP Transport ===

/// Settings for `TcpTransport`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Address of the real-time server (host:port)
    pub endpoint: String,

    /// Event sent right after connecting to join the key's room
    pub join_event: String,

    /// Upper bound for a single connect attempt
    #[serde(with = "duration_millis")]
    pub attempt_timeout: Duration,

    /// Retry bounds between attempts
    pub reconnect: ReconnectPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:4000".to_string(),
            join_event: "join-payment".to_string(),
            attempt_timeout: Duration::from_secs(2),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl TransportConfig {
    /// Longest a `TcpTransport::connect` can take: every attempt timing out
    /// plus the backoff sleeps between them
    pub fn connect_budget(&self) -> Duration {
        let attempts = self.reconnect.max_attempts.max(1);
        let mut backoff = ExponentialBackoff::from_policy(&self.reconnect);
        (1..attempts).fold(self.attempt_timeout.saturating_mul(attempts), |total, _| {
            total.saturating_add(backoff.next_delay())
        })
    }
}

/// Transport opening newline-delimited JSON sockets over TCP
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: TransportConfig,
}

impl TcpTransport {
    /// Create a transport for the given settings
    pub const fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Get the transport configuration
    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }

    async fn connect_once(&self, key: &str) -> Result<TcpSocket, TransportError> {
        let stream = tokio::time::timeout(
            self.config.attempt_timeout,
            TcpStream::connect(&self.config.endpoint),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.config.attempt_timeout))??;
        stream.set_nodelay(true)?;

        let mut socket = TcpSocket::new(stream, key);
        socket
            .emit(&self.config.join_event, serde_json::json!({ "room": key }))
            .await?;
        Ok(socket)
    }
}

#[async_trait]
impl SocketTransport for TcpTransport {
    async fn connect(&self, key: &str) -> Result<Established, TransportError> {
        let max_attempts = self.config.reconnect.max_attempts.max(1);
        let mut backoff = ExponentialBackoff::from_policy(&self.config.reconnect);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.connect_once(key).await {
                Ok(socket) => {
                    debug!(key = %key, endpoint = %self.config.endpoint, attempt, "Socket connected");
                    return Ok(Established {
                        socket: Box::new(socket),
                        attempts: attempt,
                    });
                }
                Err(e) if attempt < max_attempts => {
                    let delay = backoff.next_delay();
                    warn!(
                        key = %key,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Connect attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(TransportError::ConnectFailed {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}

/// Socket over a TCP stream
#[derive(Debug)]
pub struct TcpSocket {
    stream: TcpStream,
    room: String,
    connected: bool,
}

impl TcpSocket {
    fn new(stream: TcpStream, room: &str) -> Self {
        Self {
            stream,
            room: room.to_string(),
            connected: true,
        }
    }

    /// Room (pool key) this socket joined
    pub fn room(&self) -> &str {
        &self.room
    }
}

#[async_trait]
impl RealtimeSocket for TcpSocket {
    async fn emit(
        &mut self,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Closed);
        }

        let mut line = serde_json::to_vec(&serde_json::json!({ "event": event, "data": payload }))?;
        line.push(b'\n');

        let written = async {
            self.stream.write_all(&line).await?;
            self.stream.flush().await
        }
        .await;

        if let Err(e) = written {
            if matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::NotConnected
            ) {
                self.connected = false;
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if let Err(e) = self.stream.shutdown().await {
            debug!(room = %self.room, error = %e, "Error shutting down socket");
        }
    }
}
