//! Exclusive connection lease and statement execution

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use isolab_core::{CancelHandle, Connection, HarnessError, HarnessResult, LeaseId, RowSet};

use crate::pool::ConnectionPool;

/// Exclusive ownership of one pooled connection
///
/// The connection goes back to the pool exactly once: on the first call to
/// `release`, or on drop if `release` was never called. A released lease
/// refuses to execute anything.
pub struct ConnectionLease {
    id: LeaseId,
    conn: Option<Box<dyn Connection>>,
    pool: Arc<ConnectionPool>,
}

impl ConnectionLease {
    pub(crate) fn new(id: LeaseId, conn: Box<dyn Connection>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            id,
            conn: Some(conn),
            pool,
        }
    }

    /// Lease identity, for logs
    pub fn id(&self) -> LeaseId {
        self.id
    }

    /// True once the connection has gone back to the pool
    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    /// Execute raw SQL on the leased connection
    ///
    /// Database failures come back as `HarnessError::Statement` or
    /// `HarnessError::StatementTimeout` with the reported SQLSTATE. Nothing
    /// is retried: scenarios want to observe failures.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the lease was already released.
    pub fn execute(&mut self, sql: &str) -> HarnessResult<RowSet> {
        let id = self.id;
        let conn = self.conn.as_mut().ok_or_else(|| {
            HarnessError::invalid_state(format!("lease {}", id), "released", "execute on")
        })?;

        let started = Instant::now();
        let result = conn.execute(sql);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(rows) => debug!(
                target: "isolab::sql",
                lease = %id,
                rows = rows.len(),
                rows_affected = rows.rows_affected,
                elapsed_ms,
                sql,
                "Statement executed"
            ),
            Err(e) => debug!(
                target: "isolab::sql",
                lease = %id,
                sql_state = e.sql_state().map(|s| s.code()).unwrap_or("-"),
                elapsed_ms,
                sql,
                error = %e,
                "Statement failed"
            ),
        }
        result
    }

    /// Handle that cancels whatever statement this lease is running
    pub fn cancel_handle(&self) -> Option<Arc<dyn CancelHandle>> {
        self.conn.as_ref().and_then(|c| c.cancel_handle())
    }

    /// Return the connection to the pool
    ///
    /// Idempotent: only the first call returns the connection.
    pub fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(self.id, conn);
        }
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}
