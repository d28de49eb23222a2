// ABOUTME: Shared test fixtures for socket pool behavioral tests
//
// Provides:
// - MemoryTransport: counts connects, can fail or stall on demand
// - MemorySocket: records emitted events and disconnects
// - fast_config(): pool settings with short timeouts for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use paysock::socket_pool::{
    Established, PoolConfig, RealtimeSocket, SocketTransport, TransportError,
};

/// Counters shared between a transport and the sockets it creates
#[derive(Debug, Default)]
pub struct Counters {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    /// Sockets with a serial below this report themselves dead
    pub severed_before: AtomicUsize,
    pub events: Mutex<Vec<(String, String)>>,
}

impl Counters {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Make every socket created so far look dropped by the server
    pub fn sever_existing(&self) {
        self.severed_before.store(self.connects(), Ordering::SeqCst);
    }
}

/// In-memory socket recording what passes through it
#[derive(Debug)]
pub struct MemorySocket {
    room: String,
    serial: usize,
    connected: bool,
    counters: Arc<Counters>,
}

#[async_trait]
impl RealtimeSocket for MemorySocket {
    async fn emit(
        &mut self,
        event: &str,
        _payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Closed);
        }
        self.counters
            .events
            .lock()
            .push((self.room.clone(), event.to_string()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected && self.serial >= self.counters.severed_before.load(Ordering::SeqCst)
    }

    async fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Transport handing out `MemorySocket`s
#[derive(Debug, Default)]
pub struct MemoryTransport {
    pub counters: Arc<Counters>,
    fail: AtomicBool,
    connect_delay: Mutex<Duration>,
    attempts: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(1),
            ..Self::default()
        })
    }

    /// Make subsequent connects fail (or succeed again)
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Delay every connect by `delay`
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    /// Report this many attempts per successful connect
    pub fn set_attempts(&self, attempts: usize) {
        self.attempts.store(attempts, Ordering::SeqCst);
    }
}

#[async_trait]
impl SocketTransport for MemoryTransport {
    async fn connect(&self, key: &str) -> Result<Established, TransportError> {
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let serial = self.counters.connects.fetch_add(1, Ordering::SeqCst);
        let attempts = u32::try_from(self.attempts.load(Ordering::SeqCst)).unwrap_or(1);
        Ok(Established {
            socket: Box::new(MemorySocket {
                room: key.to_string(),
                serial,
                connected: true,
                counters: Arc::clone(&self.counters),
            }),
            attempts,
        })
    }
}

/// Pool settings with short timeouts and slow background loops
pub fn fast_config() -> PoolConfig {
    PoolConfig {
        max_size: 2,
        min_connections: 1,
        connection_timeout: Duration::from_millis(500),
        acquire_timeout: Duration::from_millis(500),
        idle_timeout: Duration::from_millis(100),
        cleanup_interval: Duration::from_secs(60),
        metrics_interval: Duration::from_secs(60),
    }
}
