//! PostgreSQL binding for the isolation lab
//!
//! Implements the `Connector` / `Connection` / `CancelHandle` seam from
//! `isolab-core` on top of the synchronous `postgres` client. Statements go
//! through the simple-query protocol so scenario text such as
//! `BEGIN; SET TRANSACTION ISOLATION LEVEL REPEATABLE READ;` is sent verbatim.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod connection;
mod connector;
mod error;

pub use connection::PgConnection;
pub use connector::PgConnector;
pub use error::map_error;
