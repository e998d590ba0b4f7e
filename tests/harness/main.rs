//! End-to-end harness suite over scripted connections
//!
//! Runs without a database: drives user-defined scenarios through the
//! public facade and checks reports, cleanup and configuration handling.

#[path = "../common/mod.rs"]
mod common;

mod config_files;
mod custom_scenarios;
