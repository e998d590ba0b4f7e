//! Scripted in-memory connections for tests
//!
//! `MockConnector` hands out connections that record every statement they
//! receive and answer according to rules registered up front. It does not
//! interpret SQL: a rule matches when its pattern is a substring of the
//! statement text. The first matching rule with uses left wins; statements
//! with no matching rule return an empty `RowSet`.
//!
//! Blocking rules model a lock wait: the statement parks until the
//! connection's `CancelHandle` fires (returning `57014`) or until
//! `unblock_all` is called (returning an empty result). `block_until` also
//! lets the wait end when another connection sends a given statement, the
//! way a row lock is released by its holder's COMMIT.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{HarnessError, HarnessResult};
use crate::sql_state::SqlState;
use crate::traits::{CancelHandle, Connection, Connector};
use crate::value::RowSet;

#[derive(Debug, Clone)]
enum Response {
    Rows(RowSet),
    Fail(SqlState, String),
    Block,
    BlockUntil { release: String, rows: RowSet },
    BlockedCount,
    Break,
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    response: Response,
    remaining: Option<usize>,
}

/// One statement received by a mock connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedStatement {
    /// Index of the connection in open order, starting at 0
    pub connection: usize,
    /// Statement text as received
    pub sql: String,
}

#[derive(Debug, Default)]
struct MockState {
    rules: Vec<Rule>,
    log: Vec<LoggedStatement>,
    opened: usize,
    refuse_connect: bool,
    cancelled: HashSet<usize>,
    blocked: HashSet<usize>,
    unblocked: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MockState>,
    changed: Condvar,
}

/// Connector producing scripted connections that share one rule set and log
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    shared: Arc<Shared>,
}

impl MockConnector {
    /// Connector with no rules: every statement succeeds with no rows
    pub fn new() -> Self {
        Self::default()
    }

    fn push_rule(&self, pattern: &str, response: Response, remaining: Option<usize>) -> &Self {
        self.shared.state.lock().rules.push(Rule {
            pattern: pattern.to_string(),
            response,
            remaining,
        });
        self
    }

    /// Answer every statement containing `pattern` with `rows`
    pub fn respond(&self, pattern: &str, rows: RowSet) -> &Self {
        self.push_rule(pattern, Response::Rows(rows), None)
    }

    /// Answer the next statement containing `pattern` with `rows`
    pub fn respond_once(&self, pattern: &str, rows: RowSet) -> &Self {
        self.push_rule(pattern, Response::Rows(rows), Some(1))
    }

    /// Fail every statement containing `pattern`
    pub fn fail(&self, pattern: &str, sql_state: SqlState, message: &str) -> &Self {
        self.push_rule(pattern, Response::Fail(sql_state, message.to_string()), None)
    }

    /// Fail the next statement containing `pattern`
    pub fn fail_once(&self, pattern: &str, sql_state: SqlState, message: &str) -> &Self {
        self.push_rule(
            pattern,
            Response::Fail(sql_state, message.to_string()),
            Some(1),
        )
    }

    /// Park statements containing `pattern` until cancelled or unblocked
    pub fn block(&self, pattern: &str) -> &Self {
        self.push_rule(pattern, Response::Block, None)
    }

    /// Park statements containing `pattern` until another connection sends
    /// a statement containing `release`, then answer with `rows`
    ///
    /// Only statements sent after the parked one count. Cancellation and
    /// `unblock_all` end the wait as for [`block`](Self::block).
    pub fn block_until(&self, pattern: &str, release: &str, rows: RowSet) -> &Self {
        self.push_rule(
            pattern,
            Response::BlockUntil {
                release: release.to_string(),
                rows,
            },
            None,
        )
    }

    /// Answer statements containing `pattern` with the number of statements
    /// currently parked, as a single `count` column
    ///
    /// Stands in for polling `pg_stat_activity` for lock waiters.
    pub fn report_blocked(&self, pattern: &str) -> &Self {
        self.push_rule(pattern, Response::BlockedCount, None)
    }

    /// Fail statements containing `pattern` with a connection failure and
    /// mark the connection broken
    pub fn break_on(&self, pattern: &str) -> &Self {
        self.push_rule(pattern, Response::Break, None)
    }

    /// Make subsequent `connect` calls fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.state.lock().refuse_connect = refuse;
    }

    /// Let every parked statement (now and later) complete
    pub fn unblock_all(&self) {
        let mut state = self.shared.state.lock();
        state.unblocked = true;
        self.shared.changed.notify_all();
    }

    /// Number of statements currently parked on a blocking rule
    pub fn blocked_count(&self) -> usize {
        self.shared.state.lock().blocked.len()
    }

    /// Number of connections opened so far
    pub fn opened(&self) -> usize {
        self.shared.state.lock().opened
    }

    /// Every statement received, in arrival order
    pub fn log(&self) -> Vec<LoggedStatement> {
        self.shared.state.lock().log.clone()
    }

    /// Statement texts received on one connection, in order
    pub fn statements_on(&self, connection: usize) -> Vec<String> {
        self.shared
            .state
            .lock()
            .log
            .iter()
            .filter(|s| s.connection == connection)
            .map(|s| s.sql.clone())
            .collect()
    }

    /// Statement texts received on any connection, in arrival order
    pub fn statements(&self) -> Vec<String> {
        self.shared
            .state
            .lock()
            .log
            .iter()
            .map(|s| s.sql.clone())
            .collect()
    }
}

impl Connector for MockConnector {
    fn connect(&self) -> HarnessResult<Box<dyn Connection>> {
        let mut state = self.shared.state.lock();
        if state.refuse_connect {
            return Err(HarnessError::Connect {
                message: "mock connector refusing connections".to_string(),
            });
        }
        let index = state.opened;
        state.opened += 1;
        Ok(Box::new(MockConnection {
            index,
            shared: Arc::clone(&self.shared),
            broken: false,
        }))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// A connection handed out by `MockConnector`
#[derive(Debug)]
pub struct MockConnection {
    index: usize,
    shared: Arc<Shared>,
    broken: bool,
}

impl MockConnection {
    /// Open order of this connection
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Connection for MockConnection {
    fn execute(&mut self, sql: &str) -> HarnessResult<RowSet> {
        let mut state = self.shared.state.lock();
        state.log.push(LoggedStatement {
            connection: self.index,
            sql: sql.to_string(),
        });
        let sent_at = state.log.len();
        // Statements parked on `block_until` watch the log.
        self.shared.changed.notify_all();

        let response = state
            .rules
            .iter_mut()
            .find(|r| sql.contains(&r.pattern) && r.remaining != Some(0))
            .map(|rule| {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                rule.response.clone()
            });

        match response {
            None => Ok(RowSet::empty()),
            Some(Response::Rows(rows)) => Ok(rows),
            Some(Response::Fail(sql_state, message)) => {
                Err(HarnessError::statement(sql_state, message))
            }
            Some(Response::Break) => {
                self.broken = true;
                Err(HarnessError::statement(
                    SqlState::CONNECTION_FAILURE,
                    "connection closed",
                ))
            }
            Some(Response::Block) => {
                park(&self.shared, &mut state, self.index, None).map(|_| RowSet::empty())
            }
            Some(Response::BlockUntil { release, rows }) => {
                park(&self.shared, &mut state, self.index, Some((release.as_str(), sent_at)))
                    .map(|_| rows)
            }
            Some(Response::BlockedCount) => {
                Ok(RowSet::scalar_of("count", state.blocked.len() as i64))
            }
        }
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    fn cancel_handle(&self) -> Option<Arc<dyn CancelHandle>> {
        Some(Arc::new(MockCancel {
            index: self.index,
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Park `connection` until it is cancelled, unblocked, or `release` shows up
/// in the log at or after the given position from another connection
fn park(
    shared: &Shared,
    state: &mut MutexGuard<'_, MockState>,
    connection: usize,
    release: Option<(&str, usize)>,
) -> HarnessResult<()> {
    state.blocked.insert(connection);
    let result = loop {
        if state.cancelled.remove(&connection) {
            break Err(HarnessError::statement(
                SqlState::QUERY_CANCELED,
                "canceling statement due to user request",
            ));
        }
        if state.unblocked {
            break Ok(());
        }
        if let Some((pattern, from)) = release {
            let released = state.log[from..]
                .iter()
                .any(|s| s.connection != connection && s.sql.contains(pattern));
            if released {
                break Ok(());
            }
        }
        shared.changed.wait(state);
    };
    state.blocked.remove(&connection);
    result
}

struct MockCancel {
    index: usize,
    shared: Arc<Shared>,
}

impl CancelHandle for MockCancel {
    fn cancel(&self) -> HarnessResult<()> {
        let mut state = self.shared.state.lock();
        // Only a parked statement can observe the flag; cancelling an idle
        // connection is a no-op, as with a real server.
        if state.blocked.contains(&self.index) {
            state.cancelled.insert(self.index);
        }
        self.shared.changed.notify_all();
        Ok(())
    }
}
