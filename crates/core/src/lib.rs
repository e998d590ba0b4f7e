//! Core types and traits for the isolation lab
//!
//! This crate defines the foundational types used by every other crate:
//! - IsolationLevel: the three SQL isolation levels a script can request
//! - TransactionId / LeaseId: identities used in logs and reports
//! - Value / Row / RowSet: what a statement returns
//! - SqlState / FailureKind: classification of database-reported failures
//! - HarnessError: the error taxonomy
//! - Traits: Connection, Connector, CancelHandle (the driver seam)
//! - sql: literal statement text the harness issues on its own
//! - mock: scripted in-memory connections for tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod mock;
pub mod sql;
pub mod sql_state;
pub mod traits;
pub mod types;
pub mod value;

pub use error::{HarnessError, HarnessResult};
pub use sql_state::{FailureKind, SqlState};
pub use traits::{CancelHandle, Connection, Connector};
pub use types::{IsolationLevel, LeaseId, TransactionId};
pub use value::{Row, RowSet, Value};
