//! Bounded connection pool
//!
//! Connections are opened lazily up to `max_size` and reused afterwards.
//! `acquire` blocks while every connection is leased, up to
//! `checkout_timeout`, and then reports `PoolExhausted`.
//!
//! # Checkout
//!
//! Every checkout runs `SET statement_timeout = ...` with the pool default so
//! that a lease never inherits a per-transaction override left behind by its
//! previous holder.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use isolab_core::sql::set_statement_timeout;
use isolab_core::{Connection, Connector, HarnessError, HarnessResult, LeaseId};

use crate::lease::ConnectionLease;

/// Default pool bound
///
/// Scenarios run at most a handful of transactions plus one assertion lease.
pub const DEFAULT_MAX_SIZE: usize = 8;

/// Pool sizing and timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of open connections
    pub max_size: usize,
    /// How long `acquire` waits for a free connection
    pub checkout_timeout: Duration,
    /// Session statement timeout applied on every checkout (zero disables)
    pub statement_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            checkout_timeout: Duration::from_secs(5),
            statement_timeout: Duration::from_secs(5),
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections currently open (idle + leased)
    pub open: usize,
    /// Connections waiting in the idle list
    pub idle: usize,
    /// Connections currently leased
    pub checked_out: usize,
}

struct PoolState {
    idle: Vec<Box<dyn Connection>>,
    open: usize,
    checked_out: usize,
}

/// Where a checkout gets its connection from
enum Slot {
    Idle(Box<dyn Connection>),
    Fresh,
}

/// A bounded pool of database connections
///
/// Shared as `Arc<ConnectionPool>`; every lease keeps the pool alive until it
/// is released.
pub struct ConnectionPool {
    connector: Box<dyn Connector>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
    next_lease: AtomicU64,
}

impl ConnectionPool {
    /// Create a pool over `connector`
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Config` when `max_size` is zero.
    pub fn new(connector: impl Connector + 'static, config: PoolConfig) -> HarnessResult<Arc<Self>> {
        if config.max_size == 0 {
            return Err(HarnessError::config("pool max_size must be at least 1"));
        }
        debug!(
            target: "isolab::pool",
            target_db = %connector.describe(),
            max_size = config.max_size,
            "Connection pool created"
        );
        Ok(Arc::new(Self {
            connector: Box::new(connector),
            config,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
                checked_out: 0,
            }),
            available: Condvar::new(),
            next_lease: AtomicU64::new(1),
        }))
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Configured bound
    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    /// Connections waiting in the idle list
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Connections currently leased
    pub fn checked_out(&self) -> usize {
        self.state.lock().checked_out
    }

    /// All counters at once
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            open: state.open,
            idle: state.idle.len(),
            checked_out: state.checked_out,
        }
    }

    /// Lease a connection, waiting up to `checkout_timeout`
    ///
    /// # Errors
    ///
    /// - `PoolExhausted` when nothing frees up in time
    /// - `Connect` when a new connection cannot be opened
    /// - statement errors if the session setup statement fails
    pub fn acquire(self: &Arc<Self>) -> HarnessResult<ConnectionLease> {
        let started = Instant::now();
        let deadline = started + self.config.checkout_timeout;

        let slot = {
            let mut state = self.state.lock();
            loop {
                if let Some(conn) = state.idle.pop() {
                    state.checked_out += 1;
                    break Slot::Idle(conn);
                }
                if state.open < self.config.max_size {
                    // Reserve the slot now, connect outside the lock
                    state.open += 1;
                    state.checked_out += 1;
                    break Slot::Fresh;
                }
                let now = Instant::now();
                if now >= deadline {
                    warn!(
                        target: "isolab::pool",
                        max_size = self.config.max_size,
                        waited_ms = now.duration_since(started).as_millis() as u64,
                        "Connection pool exhausted"
                    );
                    return Err(HarnessError::PoolExhausted {
                        waited: now.duration_since(started),
                        max_size: self.config.max_size,
                    });
                }
                self.available.wait_until(&mut state, deadline);
            }
        };

        let conn = match slot {
            Slot::Idle(conn) => conn,
            Slot::Fresh => match self.connector.connect() {
                Ok(conn) => conn,
                Err(e) => {
                    let mut state = self.state.lock();
                    state.open -= 1;
                    state.checked_out -= 1;
                    self.available.notify_one();
                    return Err(e);
                }
            },
        };

        let id = LeaseId::new(self.next_lease.fetch_add(1, Ordering::Relaxed));
        let mut lease = ConnectionLease::new(id, conn, Arc::clone(self));
        debug!(target: "isolab::pool", lease = %id, "Connection leased");

        // On failure the lease is dropped here, which returns the connection
        lease.execute(&set_statement_timeout(self.config.statement_timeout))?;
        Ok(lease)
    }

    /// Return a connection from a lease
    pub(crate) fn checkin(&self, lease: LeaseId, conn: Box<dyn Connection>) {
        let mut state = self.state.lock();
        state.checked_out -= 1;
        if conn.is_broken() {
            state.open -= 1;
            warn!(target: "isolab::pool", lease = %lease, "Discarding broken connection");
        } else {
            state.idle.push(conn);
            debug!(target: "isolab::pool", lease = %lease, "Connection returned");
        }
        self.available.notify_one();
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connector", &self.connector.describe())
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
