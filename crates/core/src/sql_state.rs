//! SQLSTATE codes and failure classification
//!
//! PostgreSQL reports every error with a five character SQLSTATE code. The
//! harness only cares about a handful of them: the ones that mean "the
//! database's concurrency control stepped in". Everything else is lumped into
//! `OtherStatementError`.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// A five character SQLSTATE code as reported by the database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SqlState(Cow<'static, str>);

impl SqlState {
    /// `40001` serialization_failure
    pub const SERIALIZATION_FAILURE: SqlState = SqlState::from_static("40001");
    /// `40P01` deadlock_detected
    pub const DEADLOCK_DETECTED: SqlState = SqlState::from_static("40P01");
    /// `57014` query_canceled (statement_timeout and explicit cancellation)
    pub const QUERY_CANCELED: SqlState = SqlState::from_static("57014");
    /// `55P03` lock_not_available (lock_timeout, NOWAIT)
    pub const LOCK_NOT_AVAILABLE: SqlState = SqlState::from_static("55P03");
    /// `25P02` in_failed_sql_transaction
    pub const IN_FAILED_SQL_TRANSACTION: SqlState = SqlState::from_static("25P02");
    /// `08006` connection_failure
    pub const CONNECTION_FAILURE: SqlState = SqlState::from_static("08006");
    /// `XX000` internal_error, used when the driver gives no code at all
    pub const INTERNAL_ERROR: SqlState = SqlState::from_static("XX000");

    /// Build a state from a compile-time code
    pub const fn from_static(code: &'static str) -> Self {
        SqlState(Cow::Borrowed(code))
    }

    /// Build a state from a code reported at runtime
    pub fn new(code: impl Into<String>) -> Self {
        SqlState(Cow::Owned(code.into()))
    }

    /// The raw five character code
    pub fn code(&self) -> &str {
        &self.0
    }

    /// The two character class (e.g. `40` for transaction rollback)
    pub fn class(&self) -> &str {
        self.0.get(..2).unwrap_or(&self.0)
    }
}

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a scripted transaction ended in `Failed`
///
/// The first four kinds are database outcomes a scenario may legitimately
/// expect. `ScriptError` marks a transaction that was torn down because its
/// own script was broken; scenarios never expect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// SQLSTATE 40001
    SerializationFailure,
    /// SQLSTATE 40P01
    DeadlockDetected,
    /// The statement exceeded its timeout or was cancelled by the harness
    StatementTimeout,
    /// Any other database-reported error
    OtherStatementError,
    /// The script itself was invalid (missing binding, unparsable value)
    ScriptError,
}

impl FailureKind {
    /// Classify a database error code
    pub fn from_sql_state(state: &SqlState) -> Self {
        match state.code() {
            "40001" => FailureKind::SerializationFailure,
            "40P01" => FailureKind::DeadlockDetected,
            "57014" | "55P03" => FailureKind::StatementTimeout,
            _ => FailureKind::OtherStatementError,
        }
    }

    /// Short stable name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::SerializationFailure => "serialization_failure",
            FailureKind::DeadlockDetected => "deadlock_detected",
            FailureKind::StatementTimeout => "statement_timeout",
            FailureKind::OtherStatementError => "other_statement_error",
            FailureKind::ScriptError => "script_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
