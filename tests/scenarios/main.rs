//! PostgreSQL-backed scenario suite
//!
//! Every test here needs a database and is skipped unless
//! `ISOLAB_DATABASE_URL` is set:
//!
//! ```bash
//! ISOLAB_DATABASE_URL=postgres://postgres@localhost/isolab cargo test --test scenarios
//! ```
//!
//! Scenarios create their own pallets, so the tests may run in parallel.

#[path = "../common/mod.rs"]
mod common;

mod catalog;
mod fixtures;
