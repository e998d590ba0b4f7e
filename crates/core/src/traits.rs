//! Core traits for the database seam
//!
//! This module defines the Connection, Connector and CancelHandle traits that
//! let the pool and the schedulers drive any driver. The PostgreSQL binding
//! lives in `isolab-postgres`; tests plug in scripted doubles.

use std::sync::Arc;

use crate::error::HarnessResult;
use crate::value::RowSet;

/// One physical database session
///
/// A connection is owned by exactly one lease at a time, so implementations
/// only need to be `Send`, not `Sync`.
pub trait Connection: Send {
    /// Execute raw SQL text and return what it produced
    ///
    /// # Errors
    ///
    /// Database-reported failures must be returned as
    /// `HarnessError::statement(sql_state, message)` so the SQLSTATE survives.
    /// Implementations never retry.
    fn execute(&mut self, sql: &str) -> HarnessResult<RowSet>;

    /// True when the session can no longer be used and must not be pooled
    fn is_broken(&self) -> bool {
        false
    }

    /// Out-of-band handle that aborts whatever statement is running
    ///
    /// Returns `None` when the driver cannot cancel.
    fn cancel_handle(&self) -> Option<Arc<dyn CancelHandle>> {
        None
    }
}

/// Cancels the statement currently running on a connection
///
/// Must be callable from a thread other than the one blocked in `execute`.
pub trait CancelHandle: Send + Sync {
    /// Request cancellation; the blocked `execute` then fails with a
    /// query-canceled SQLSTATE
    fn cancel(&self) -> HarnessResult<()>;
}

/// Opens new connections for a pool
pub trait Connector: Send + Sync {
    /// Open a fresh session
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Connect` when the database is unreachable.
    fn connect(&self) -> HarnessResult<Box<dyn Connection>>;

    /// Human-readable target (no credentials), for logs
    fn describe(&self) -> String;
}
