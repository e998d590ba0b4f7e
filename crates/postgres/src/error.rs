//! Driver error mapping

use isolab_core::{HarnessError, SqlState};

/// Convert a driver error into the harness taxonomy
///
/// Server-side errors keep their SQLSTATE. Errors without one (I/O, closed
/// connection, protocol) are reported as connection failures when the client
/// is closed and as internal errors otherwise.
pub fn map_error(err: &postgres::Error) -> HarnessError {
    if let Some(db) = err.as_db_error() {
        return HarnessError::statement(SqlState::new(db.code().code()), db.message());
    }
    let sql_state = match err.code() {
        Some(code) => SqlState::new(code.code()),
        None if err.is_closed() => SqlState::CONNECTION_FAILURE,
        None => SqlState::INTERNAL_ERROR,
    };
    HarnessError::statement(sql_state, err.to_string())
}
