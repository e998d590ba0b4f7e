//! Connection leasing for the isolation lab
//!
//! A scripted transaction needs one physical connection for its whole life,
//! otherwise its BEGIN and COMMIT land on different sessions and the
//! "concurrent" transactions silently share one. This crate provides:
//! - ConnectionPool: a bounded pool that opens connections lazily
//! - ConnectionLease: exclusive ownership of one connection, released exactly
//!   once (explicitly or on drop)
//! - ConnectionLease::execute: the statement executor (never retries)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lease;
pub mod pool;

pub use lease::ConnectionLease;
pub use pool::{ConnectionPool, PoolConfig, PoolStats};
