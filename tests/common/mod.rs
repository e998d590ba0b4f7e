//! Shared test utilities for the root integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use isolation_lab::{ConnectionPool, HarnessConfig, PgConnector, PoolConfig, ScenarioRunner};
use isolab_core::mock::MockConnector;

pub const DATABASE_URL_ENV: &str = "ISOLAB_DATABASE_URL";

// ============================================================================
// Logging
// ============================================================================

static LOGGING: OnceLock<()> = OnceLock::new();

/// Route `tracing` output through the test harness (honours `RUST_LOG`).
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Live PostgreSQL
// ============================================================================

static SCHEMA: OnceLock<Result<(), String>> = OnceLock::new();

/// Configuration for live runs, or `None` (with a note) when no database is
/// configured.
pub fn live_config() -> Option<HarnessConfig> {
    init_logging();
    let url = match std::env::var(DATABASE_URL_ENV) {
        Ok(url) if !url.trim().is_empty() => url,
        _ => {
            eprintln!("{} not set; skipping PostgreSQL-backed test", DATABASE_URL_ENV);
            return None;
        }
    };
    let mut config = HarnessConfig::default();
    config.database_url = url;
    Some(config)
}

/// Runner over a fresh pool against the configured database
///
/// The schema is installed once per test binary.
pub fn live_runner() -> Option<ScenarioRunner> {
    let config = live_config()?;
    let connector = PgConnector::from_url(&config.database_url).expect("invalid database URL");
    let pool = ConnectionPool::new(connector, config.pool_config()).expect("pool");
    let runner = ScenarioRunner::new(pool, config);

    let installed = SCHEMA.get_or_init(|| runner.prepare().map_err(|e| e.to_string()));
    if let Err(e) = installed {
        panic!("schema install failed: {}", e);
    }
    Some(runner)
}

// ============================================================================
// Scripted connections
// ============================================================================

/// Pool over a scripted connector with short timeouts
pub fn mock_pool(mock: &MockConnector, max_size: usize) -> Arc<ConnectionPool> {
    init_logging();
    let config = PoolConfig {
        max_size,
        checkout_timeout: Duration::from_millis(200),
        statement_timeout: Duration::ZERO,
    };
    ConnectionPool::new(mock.clone(), config).expect("pool")
}

/// Harness config with waits short enough for scripted runs
pub fn mock_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.pool.statement_timeout_ms = 0;
    config.scheduler.await_timeout_ms = 2_000;
    config.scheduler.lock_settle_ms = 1;
    config
}
