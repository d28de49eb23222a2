// ABOUTME: Per-key pool record: active ids, idle connections and the FIFO waiter queue
//
// Everything here is synchronous and runs under the manager's lock. Sockets
// are created and disconnected by the manager outside the lock; the pool only
// does the bookkeeping and hands out grants.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use super::connection::{Connection, ConnectionId};
use super::metrics::{ManagerMetrics, PoolSnapshot, PoolStats};

/// What a queued waiter receives when the pool can serve it
#[derive(Debug)]
pub(crate) enum Grant {
    /// A released connection, already marked active
    Reuse(Connection),
    /// A reserved creation slot; the waiter must create the connection
    Create,
}

/// Outcome of a checkout attempt
#[derive(Debug)]
pub(crate) enum Checkout {
    Reuse(Connection),
    Create,
    Wait {
        id: u64,
        rx: oneshot::Receiver<Grant>,
    },
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    tx: oneshot::Sender<Grant>,
    enqueued_at: Instant,
}

/// Connections and waiters for one logical key
#[derive(Debug)]
pub(crate) struct Pool {
    key: String,
    active: HashSet<ConnectionId>,
    /// Most recently released at the back
    idle: VecDeque<Connection>,
    waiting: VecDeque<Waiter>,
    /// Dead idle connections awaiting `disconnect()` outside the lock
    discarded: Vec<Connection>,
    /// Slots reserved for connections being created
    creating: usize,
    stats: PoolStats,
    next_waiter_id: u64,
}

impl Pool {
    pub(crate) fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            active: HashSet::new(),
            idle: VecDeque::new(),
            waiting: VecDeque::new(),
            discarded: Vec::new(),
            creating: 0,
            stats: PoolStats::new(),
            next_waiter_id: 0,
        }
    }

    /// Connections counted against `max_size`
    pub(crate) fn size(&self) -> usize {
        self.active.len() + self.idle.len() + self.creating
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.idle.len()
    }

    #[cfg(test)]
    pub(crate) fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Reuse an idle connection, reserve a creation slot, or queue a waiter
    pub(crate) fn checkout(&mut self, max_size: usize, metrics: &ManagerMetrics) -> Checkout {
        if let Some(conn) = self.take_live_idle() {
            return Checkout::Reuse(self.activate(conn, metrics));
        }

        // Queued waiters are served before a newcomer gets a slot
        if !self.waiting.is_empty() {
            self.dispatch(max_size, metrics);
        }

        if self.waiting.is_empty() && self.size() < max_size {
            self.creating += 1;
            return Checkout::Create;
        }

        let (tx, rx) = oneshot::channel();
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        self.waiting.push_back(Waiter {
            id,
            tx,
            enqueued_at: Instant::now(),
        });
        Checkout::Wait { id, rx }
    }

    /// Reserve a slot to create an idle connection, up to `min_connections`
    pub(crate) fn reserve_prewarm_slot(&mut self, min_connections: usize, max_size: usize) -> bool {
        if self.idle.len() + self.creating >= min_connections || self.size() >= max_size {
            return false;
        }
        self.creating += 1;
        true
    }

    /// A reserved slot produced a connection that goes straight to the caller
    pub(crate) fn commit_active(&mut self, conn: &Connection, metrics: &ManagerMetrics) {
        self.creating = self.creating.saturating_sub(1);
        self.active.insert(conn.id());
        self.stats.total_connections += 1;
        metrics.connection_created();
        metrics.checked_out();
    }

    /// A reserved slot produced a connection that is parked idle
    pub(crate) fn commit_idle(
        &mut self,
        mut conn: Connection,
        max_size: usize,
        metrics: &ManagerMetrics,
    ) {
        self.creating = self.creating.saturating_sub(1);
        self.stats.total_connections += 1;
        metrics.connection_created();
        conn.mark_idle();
        self.idle.push_back(conn);
        self.dispatch(max_size, metrics);
    }

    pub(crate) fn record_failure(&mut self, metrics: &ManagerMetrics) {
        self.stats.failures += 1;
        metrics.connection_failed();
    }

    /// Give back a reserved slot that never produced a connection
    pub(crate) fn release_slot(&mut self, max_size: usize, metrics: &ManagerMetrics) {
        self.creating = self.creating.saturating_sub(1);
        self.dispatch(max_size, metrics);
    }

    /// Move a released connection from active to idle and serve waiters
    ///
    /// Hands the connection back if this pool never checked it out, e.g. it
    /// was issued before a `stop()`/`start()` cycle.
    pub(crate) fn check_in(
        &mut self,
        mut conn: Connection,
        max_size: usize,
        metrics: &ManagerMetrics,
    ) -> Result<(), Connection> {
        if !self.active.remove(&conn.id()) {
            return Err(conn);
        }
        metrics.checked_in();
        conn.mark_idle();
        self.idle.push_back(conn);
        self.dispatch(max_size, metrics);
        Ok(())
    }

    /// Drop a connection from the active set without parking it
    pub(crate) fn forget(&mut self, conn: &Connection) {
        self.active.remove(&conn.id());
    }

    /// Remove a waiter that gave up, returning anything it was already granted
    pub(crate) fn abandon_waiter(
        &mut self,
        id: u64,
        rx: &mut oneshot::Receiver<Grant>,
        max_size: usize,
        metrics: &ManagerMetrics,
    ) {
        if let Some(pos) = self.waiting.iter().position(|w| w.id == id) {
            self.waiting.remove(pos);
            return;
        }

        // Already dequeued: any grant was sent under this same lock
        rx.close();
        match rx.try_recv() {
            Ok(Grant::Reuse(mut conn)) => {
                debug!(key = %self.key, id = %conn.id(), "Returning connection granted to abandoned waiter");
                if self.active.remove(&conn.id()) {
                    metrics.checked_in();
                }
                conn.restore_idle();
                self.idle.push_back(conn);
                self.dispatch(max_size, metrics);
            }
            Ok(Grant::Create) => self.release_slot(max_size, metrics),
            Err(_) => {}
        }
    }

    /// Serve waiters in FIFO order while idle connections or free slots remain
    fn dispatch(&mut self, max_size: usize, metrics: &ManagerMetrics) {
        while let Some(waiter) = self.waiting.pop_front() {
            if waiter.tx.is_closed() {
                continue;
            }

            if let Some(conn) = self.take_live_idle() {
                let conn = self.activate(conn, metrics);
                let id = conn.id();
                if let Err(Grant::Reuse(mut conn)) = waiter.tx.send(Grant::Reuse(conn)) {
                    self.active.remove(&id);
                    metrics.checked_in();
                    conn.restore_idle();
                    self.idle.push_back(conn);
                    continue;
                }
                debug!(
                    key = %self.key,
                    id = %id,
                    waited_ms = u64::try_from(waiter.enqueued_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Handed released connection to waiter"
                );
                continue;
            }

            if self.size() < max_size {
                self.creating += 1;
                if waiter.tx.send(Grant::Create).is_err() {
                    self.creating -= 1;
                }
                continue;
            }

            self.waiting.push_front(waiter);
            break;
        }
    }

    /// Pop the most recently used idle connection whose socket is still up
    ///
    /// Dead ones are moved to `discarded` for the manager to disconnect.
    fn take_live_idle(&mut self) -> Option<Connection> {
        while let Some(mut conn) = self.idle.pop_back() {
            if conn.socket().is_connected() {
                return Some(conn);
            }
            debug!(key = %self.key, id = %conn.id(), "Evicting dead idle connection");
            conn.mark_evicted();
            self.discarded.push(conn);
        }
        None
    }

    /// Hand over dead connections found since the last call
    pub(crate) fn take_discarded(&mut self) -> Vec<Connection> {
        std::mem::take(&mut self.discarded)
    }

    fn activate(&mut self, mut conn: Connection, metrics: &ManagerMetrics) -> Connection {
        conn.mark_active();
        self.active.insert(conn.id());
        metrics.checked_out();
        conn
    }

    /// Remove idle connections unused for longer than `idle_timeout`
    pub(crate) fn evict_idle(&mut self, idle_timeout: Duration, now: Instant) -> Vec<Connection> {
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .idle
            .drain(..)
            .partition(|conn| conn.idle_longer_than(idle_timeout, now));
        self.idle = kept.into();

        let mut evicted: Vec<Connection> = expired
            .into_iter()
            .map(|mut conn| {
                conn.mark_evicted();
                conn
            })
            .collect();
        evicted.append(&mut self.discarded);
        evicted
    }

    /// Fail all waiters and hand back every idle connection
    pub(crate) fn drain(&mut self) -> Vec<Connection> {
        // Dropping the senders wakes each waiter with a closed channel
        self.waiting.clear();
        let mut drained: Vec<Connection> = self.idle.drain(..).collect();
        drained.append(&mut self.discarded);
        drained
    }

    pub(crate) fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            key: self.key.clone(),
            active: self.active.len(),
            idle: self.idle.len(),
            waiting: self.waiting.len(),
            metrics: self.stats.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_disjoint(&self) -> bool {
        self.idle.iter().all(|conn| !self.active.contains(&conn.id()))
    }
}
