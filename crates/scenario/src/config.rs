//! Harness configuration via `isolab.toml`
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. `ISOLAB_DATABASE_URL` overrides the file's `database_url`;
//! command-line flags override both.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use isolab_core::{HarnessError, HarnessResult};
use isolab_pool::PoolConfig;

/// Config file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "isolab.toml";

/// Environment variable that overrides `database_url`.
pub const DATABASE_URL_ENV: &str = "ISOLAB_DATABASE_URL";

/// Connection pool section (`[pool]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolSettings {
    /// Maximum open connections. Must be at least 1.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// How long `acquire` waits for a free connection.
    #[serde(default = "default_checkout_timeout_ms")]
    pub checkout_timeout_ms: u64,
    /// Session `statement_timeout` set on every lease (0 disables it).
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

fn default_max_size() -> usize {
    isolab_pool::pool::DEFAULT_MAX_SIZE
}

fn default_checkout_timeout_ms() -> u64 {
    5_000
}

fn default_statement_timeout_ms() -> u64 {
    5_000
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            checkout_timeout_ms: default_checkout_timeout_ms(),
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }
}

/// Scheduler section (`[scheduler]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSettings {
    /// Bound on every preemptive wait (checkpoints, settling, joins).
    #[serde(default = "default_await_timeout_ms")]
    pub await_timeout_ms: u64,
    /// Poll interval while waiting for a worker to queue on a lock.
    #[serde(default = "default_lock_settle_ms")]
    pub lock_settle_ms: u64,
    /// How long a preemptive run that aborts early lets in-flight
    /// statements finish before cancelling them.
    #[serde(default = "default_abort_grace_ms")]
    pub abort_grace_ms: u64,
}

fn default_await_timeout_ms() -> u64 {
    10_000
}

fn default_lock_settle_ms() -> u64 {
    50
}

fn default_abort_grace_ms() -> u64 {
    isolab_concurrency::preemptive::DEFAULT_DROP_GRACE.as_millis() as u64
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            await_timeout_ms: default_await_timeout_ms(),
            lock_settle_ms: default_lock_settle_ms(),
            abort_grace_ms: default_abort_grace_ms(),
        }
    }
}

/// Harness configuration loaded from `isolab.toml`.
///
/// # Example
///
/// ```toml
/// database_url = "postgres://postgres@localhost/isolab"
/// log_filter = "warn,isolab=info"
///
/// [pool]
/// max_size = 8
///
/// [scheduler]
/// await_timeout_ms = 10000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessConfig {
    /// PostgreSQL URL or key=value connection string.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Connection pool settings.
    #[serde(default)]
    pub pool: PoolSettings,
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_database_url() -> String {
    "postgres://postgres@localhost/isolab".to_string()
}

fn default_log_filter() -> String {
    "warn,isolab=info".to_string()
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            pool: PoolSettings::default(),
            scheduler: SchedulerSettings::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl HarnessConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Isolation lab configuration
#
# Database the scenarios run against. ISOLAB_DATABASE_URL overrides this,
# and --database-url overrides both.
database_url = "postgres://postgres@localhost/isolab"

# tracing filter used when RUST_LOG is unset
log_filter = "warn,isolab=info"

[pool]
# Maximum open connections (at least 1). Preemptive scenarios hold one
# connection per transaction.
max_size = 8
# How long to wait for a free connection before giving up
checkout_timeout_ms = 5000
# statement_timeout for every leased session (0 = no timeout)
statement_timeout_ms = 5000

[scheduler]
# Upper bound on waits for checkpoints, settling and joins
await_timeout_ms = 10000
# Poll interval while waiting for a transaction to queue on a lock
lock_settle_ms = 50
# Grace before in-flight statements are cancelled when a scenario aborts
abort_grace_ms = 250
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: HarnessConfig = toml::from_str(&content).map_err(|e| {
            HarnessError::config(format!(
                "failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, else defaults, then apply the environment.
    pub fn load(path: Option<&Path>) -> HarnessResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.override_database_url(std::env::var(DATABASE_URL_ENV).ok());
        Ok(config)
    }

    /// Replace `database_url` when `url` is set and non-empty.
    pub fn override_database_url(&mut self, url: Option<String>) {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.database_url = url;
        }
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.pool.max_size == 0 {
            return Err(HarnessError::config("pool.max_size must be at least 1"));
        }
        if self.database_url.trim().is_empty() {
            return Err(HarnessError::config("database_url must not be empty"));
        }
        Ok(())
    }

    /// Pool settings as the pool crate wants them.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.pool.max_size,
            checkout_timeout: Duration::from_millis(self.pool.checkout_timeout_ms),
            statement_timeout: Duration::from_millis(self.pool.statement_timeout_ms),
        }
    }

    /// Bound on preemptive waits.
    pub fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.scheduler.await_timeout_ms)
    }

    /// Lock-wait poll interval.
    pub fn lock_settle(&self) -> Duration {
        Duration::from_millis(self.scheduler.lock_settle_ms)
    }

    /// Grace before cancelling statements of an aborted preemptive run.
    pub fn abort_grace(&self) -> Duration {
        Duration::from_millis(self.scheduler.abort_grace_ms)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> HarnessResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                HarnessError::config(format!(
                    "failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> HarnessResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HarnessError::config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            HarnessError::config(format!(
                "failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
