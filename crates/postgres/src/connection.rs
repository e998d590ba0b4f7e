//! A live PostgreSQL session

use postgres::{CancelToken, Client, NoTls, SimpleQueryMessage};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use isolab_core::{CancelHandle, Connection, HarnessError, HarnessResult, Row, RowSet, Value};

use crate::error::map_error;

/// One PostgreSQL session owned by a pool
pub struct PgConnection {
    client: Client,
}

impl PgConnection {
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Connection for PgConnection {
    fn execute(&mut self, sql: &str) -> HarnessResult<RowSet> {
        let messages = self.client.simple_query(sql).map_err(|e| map_error(&e))?;

        let mut result = RowSet::empty();
        for message in messages {
            match message {
                SimpleQueryMessage::Row(row) => {
                    if result.columns.is_empty() {
                        result.columns = row
                            .columns()
                            .iter()
                            .map(|c| c.name().to_string())
                            .collect();
                    }
                    let values = (0..row.len()).map(|i| Value::from_text(row.get(i))).collect();
                    result.rows.push(Row::new(values));
                }
                SimpleQueryMessage::CommandComplete(n) => result.rows_affected = n,
                _ => {}
            }
        }
        Ok(result)
    }

    fn is_broken(&self) -> bool {
        self.client.is_closed()
    }

    fn cancel_handle(&self) -> Option<Arc<dyn CancelHandle>> {
        Some(Arc::new(PgCancel {
            token: self.client.cancel_token(),
        }))
    }
}

impl fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnection")
            .field("closed", &self.client.is_closed())
            .finish()
    }
}

/// Out-of-band cancel request over a second socket
struct PgCancel {
    token: CancelToken,
}

impl CancelHandle for PgCancel {
    fn cancel(&self) -> HarnessResult<()> {
        self.token.cancel_query(NoTls).map_err(|e| {
            warn!(target: "isolab::pg", error = %e, "Cancel request failed");
            HarnessError::Connect {
                message: format!("cancel request failed: {}", e),
            }
        })
    }
}
