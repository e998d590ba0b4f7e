//! Error types for the isolation lab
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Errors fall into two propagation classes:
//!
//! | Class | Variants | Handling |
//! |-------|----------|----------|
//! | Outcome | `Statement`, `StatementTimeout` | captured into the transaction's outcome |
//! | Fatal | everything else | aborts the whole scenario |
//!
//! A scenario deliberately provokes statement failures, so those are data,
//! not bugs. A fatal error means the harness or the scenario script is wrong.

use crate::sql_state::{FailureKind, SqlState};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for harness operations
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Error types for the isolation lab
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum HarnessError {
    /// No pooled connection became available within the checkout bound
    #[error("connection pool exhausted: nothing available after {waited:?} (max_size {max_size})")]
    PoolExhausted {
        /// How long the caller waited
        waited: Duration,
        /// Configured pool bound
        max_size: usize,
    },

    /// The database rejected a statement
    #[error("statement failed [{sql_state}]: {message}")]
    Statement {
        /// SQLSTATE reported by the database
        sql_state: SqlState,
        /// Database message
        message: String,
    },

    /// A statement exceeded its timeout or was cancelled
    #[error("statement timed out [{sql_state}]: {message}")]
    StatementTimeout {
        /// SQLSTATE reported by the database (57014 or 55P03)
        sql_state: SqlState,
        /// Database message
        message: String,
    },

    /// An object was used in a state that does not allow the action
    #[error("invalid state: cannot {action} {subject} in state {state}")]
    InvalidState {
        /// What was acted on (e.g. "transaction T3")
        subject: String,
        /// The state it was in
        state: String,
        /// What was attempted
        action: String,
    },

    /// A transaction script is malformed
    #[error("script error in {transaction}: {message}")]
    Script {
        /// Label of the offending transaction
        transaction: String,
        /// What went wrong
        message: String,
    },

    /// The connector could not open a connection
    #[error("connect failed: {message}")]
    Connect {
        /// Driver message
        message: String,
    },

    /// Configuration could not be read or is invalid
    #[error("configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// A scheduler wait elapsed
    #[error("timed out after {timeout:?} waiting for {waiting_for}")]
    SchedulerTimeout {
        /// What the scheduler was waiting for
        waiting_for: String,
        /// The bound that elapsed
        timeout: Duration,
    },

    /// A preemptive worker thread panicked
    #[error("worker thread for {transaction} panicked")]
    WorkerPanicked {
        /// Label of the transaction the thread was running
        transaction: String,
    },
}

impl HarnessError {
    /// Build a statement error, routing timeout codes to `StatementTimeout`
    pub fn statement(sql_state: SqlState, message: impl Into<String>) -> Self {
        let message = message.into();
        match FailureKind::from_sql_state(&sql_state) {
            FailureKind::StatementTimeout => HarnessError::StatementTimeout { sql_state, message },
            _ => HarnessError::Statement { sql_state, message },
        }
    }

    /// Build an `InvalidState` error
    pub fn invalid_state(
        subject: impl Into<String>,
        state: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        HarnessError::InvalidState {
            subject: subject.into(),
            state: state.into(),
            action: action.into(),
        }
    }

    /// Build a `Script` error
    pub fn script(transaction: impl Into<String>, message: impl Into<String>) -> Self {
        HarnessError::Script {
            transaction: transaction.into(),
            message: message.into(),
        }
    }

    /// Build a `Config` error
    pub fn config(message: impl Into<String>) -> Self {
        HarnessError::Config {
            message: message.into(),
        }
    }

    /// Outcome kind for errors a transaction captures, `None` for fatal ones
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            HarnessError::Statement { sql_state, .. } => Some(FailureKind::from_sql_state(sql_state)),
            HarnessError::StatementTimeout { .. } => Some(FailureKind::StatementTimeout),
            _ => None,
        }
    }

    /// SQLSTATE carried by statement errors
    pub fn sql_state(&self) -> Option<&SqlState> {
        match self {
            HarnessError::Statement { sql_state, .. }
            | HarnessError::StatementTimeout { sql_state, .. } => Some(sql_state),
            _ => None,
        }
    }

    /// True when the error must abort the scenario instead of being captured
    pub fn is_fatal(&self) -> bool {
        self.failure_kind().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_constructor_routes_timeouts() {
        let err = HarnessError::statement(SqlState::QUERY_CANCELED, "canceling statement");
        assert!(matches!(err, HarnessError::StatementTimeout { .. }));
        assert_eq!(err.failure_kind(), Some(FailureKind::StatementTimeout));

        let err = HarnessError::statement(SqlState::LOCK_NOT_AVAILABLE, "could not obtain lock");
        assert!(matches!(err, HarnessError::StatementTimeout { .. }));
    }

    #[test]
    fn statement_constructor_keeps_other_codes() {
        let err = HarnessError::statement(SqlState::SERIALIZATION_FAILURE, "could not serialize");
        assert!(matches!(err, HarnessError::Statement { .. }));
        assert_eq!(err.failure_kind(), Some(FailureKind::SerializationFailure));
        assert_eq!(err.sql_state(), Some(&SqlState::SERIALIZATION_FAILURE));
        assert!(!err.is_fatal());
    }

    #[test]
    fn harness_errors_are_fatal() {
        let fatal = [
            HarnessError::PoolExhausted {
                waited: Duration::from_millis(10),
                max_size: 2,
            },
            HarnessError::invalid_state("transaction T1", "committed", "step"),
            HarnessError::script("t1", "no binding named capacity"),
            HarnessError::Connect {
                message: "refused".to_string(),
            },
            HarnessError::config("max_size must be at least 1"),
            HarnessError::SchedulerTimeout {
                waiting_for: "checkpoint locked".to_string(),
                timeout: Duration::from_secs(1),
            },
            HarnessError::WorkerPanicked {
                transaction: "t2".to_string(),
            },
        ];
        for err in fatal {
            assert!(err.is_fatal(), "{err} should be fatal");
            assert!(err.sql_state().is_none());
        }
    }

    #[test]
    fn display_names_the_state() {
        let err = HarnessError::invalid_state("transaction T3", "Committed", "step");
        assert_eq!(
            err.to_string(),
            "invalid state: cannot step transaction T3 in state Committed"
        );
    }

    #[test]
    fn display_includes_sql_state() {
        let err = HarnessError::statement(SqlState::DEADLOCK_DETECTED, "deadlock detected");
        let msg = err.to_string();
        assert!(msg.contains("40P01"));
        assert!(msg.contains("deadlock detected"));
    }
}
