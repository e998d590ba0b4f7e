//! Opening PostgreSQL sessions

use postgres::config::Host;
use postgres::{Config, NoTls};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use isolab_core::{Connection, Connector, HarnessError, HarnessResult};

use crate::connection::PgConnection;

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens `PgConnection`s for a pool
#[derive(Clone)]
pub struct PgConnector {
    config: Config,
}

impl PgConnector {
    /// Build a connector from a `postgres://` URL or a key=value string
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Config` when the string does not parse.
    pub fn from_url(url: &str) -> HarnessResult<Self> {
        let mut config = Config::from_str(url)
            .map_err(|e| HarnessError::config(format!("invalid database url: {}", e)))?;
        if config.get_connect_timeout().is_none() {
            config.connect_timeout(DEFAULT_CONNECT_TIMEOUT);
        }
        if config.get_application_name().is_none() {
            config.application_name("isolab");
        }
        Ok(Self { config })
    }

    /// Wrap an existing driver config
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }
}

impl Connector for PgConnector {
    fn connect(&self) -> HarnessResult<Box<dyn Connection>> {
        let client = self.config.connect(NoTls).map_err(|e| HarnessError::Connect {
            message: format!("{}: {}", self.describe(), e),
        })?;
        debug!(target: "isolab::pg", target_db = %self.describe(), "Connection opened");
        Ok(Box::new(PgConnection::new(client)))
    }

    fn describe(&self) -> String {
        let user = self.config.get_user().unwrap_or("postgres");
        let host = match self.config.get_hosts().first() {
            Some(Host::Tcp(host)) => host.clone(),
            #[cfg(unix)]
            Some(Host::Unix(path)) => path.display().to_string(),
            None => "localhost".to_string(),
        };
        let port = self.config.get_ports().first().copied().unwrap_or(5432);
        let db = self.config.get_dbname().unwrap_or(user);
        format!("postgres://{}@{}:{}/{}", user, host, port, db)
    }
}
