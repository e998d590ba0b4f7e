//! Transaction scripts
//!
//! A script is an ordered list of [`Step`]s built before any SQL runs. SQL
//! text is either fixed or rendered from values read earlier in the same
//! transaction, and branches pick between two step lists from those values.
//! Nothing here touches a connection; [`TransactionScript::begin`] leases one
//! and hands the steps to a [`ScriptedTransaction`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use isolab_core::{HarnessError, HarnessResult, IsolationLevel, RowSet, Value};
use isolab_pool::ConnectionPool;

use crate::transaction::ScriptedTransaction;

/// Renders SQL text from earlier reads
pub type RenderFn = Box<dyn Fn(&Bindings) -> HarnessResult<String> + Send>;

/// Chooses a branch arm from earlier reads
pub type ConditionFn = Box<dyn Fn(&Bindings) -> HarnessResult<bool> + Send>;

/// SQL text of an execute or read step
pub enum SqlText {
    /// Sent as written
    Static(String),
    /// Produced at execution time from the transaction's bindings
    Rendered(RenderFn),
}

impl SqlText {
    /// Text to send, rendering if needed
    pub fn render(&self, bindings: &Bindings) -> HarnessResult<String> {
        match self {
            SqlText::Static(sql) => Ok(sql.clone()),
            SqlText::Rendered(render) => render(bindings),
        }
    }
}

impl fmt::Debug for SqlText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlText::Static(sql) => write!(f, "{:?}", sql),
            SqlText::Rendered(_) => f.write_str("<rendered>"),
        }
    }
}

/// One unit of a transaction script
pub enum Step {
    /// Run SQL and discard the result
    Execute(SqlText),
    /// Run SQL and keep the rows under a name
    Read {
        /// Name the rows are stored under
        binding: String,
        /// Query text
        sql: SqlText,
    },
    /// Suspend here until the scheduler resumes the transaction
    Checkpoint(String),
    /// Continue with one of two step lists
    Branch {
        /// Evaluated against the bindings when the branch is reached
        condition: ConditionFn,
        /// Taken when the condition holds
        then: Vec<Step>,
        /// Taken otherwise
        otherwise: Vec<Step>,
    },
    /// End the transaction with COMMIT
    Commit,
    /// End the transaction with ROLLBACK
    Rollback,
}

impl Step {
    /// Fixed SQL
    pub fn execute(sql: impl Into<String>) -> Self {
        Step::Execute(SqlText::Static(sql.into()))
    }

    /// SQL rendered from earlier reads
    pub fn execute_with<F>(render: F) -> Self
    where
        F: Fn(&Bindings) -> HarnessResult<String> + Send + 'static,
    {
        Step::Execute(SqlText::Rendered(Box::new(render)))
    }

    /// Query whose rows are bound to `binding`
    pub fn read(binding: impl Into<String>, sql: impl Into<String>) -> Self {
        Step::Read {
            binding: binding.into(),
            sql: SqlText::Static(sql.into()),
        }
    }

    /// Rendered query whose rows are bound to `binding`
    pub fn read_with<F>(binding: impl Into<String>, render: F) -> Self
    where
        F: Fn(&Bindings) -> HarnessResult<String> + Send + 'static,
    {
        Step::Read {
            binding: binding.into(),
            sql: SqlText::Rendered(Box::new(render)),
        }
    }

    /// Named suspension point
    pub fn checkpoint(name: impl Into<String>) -> Self {
        Step::Checkpoint(name.into())
    }

    /// Two-armed branch
    pub fn branch<F>(condition: F, then: Vec<Step>, otherwise: Vec<Step>) -> Self
    where
        F: Fn(&Bindings) -> HarnessResult<bool> + Send + 'static,
    {
        Step::Branch {
            condition: Box::new(condition),
            then,
            otherwise,
        }
    }

    /// Short description for traces and logs
    pub fn describe(&self) -> String {
        match self {
            Step::Execute(SqlText::Static(sql)) => format!("execute {}", sql),
            Step::Execute(SqlText::Rendered(_)) => "execute <rendered>".to_string(),
            Step::Read { binding, .. } => format!("read {}", binding),
            Step::Checkpoint(name) => format!("checkpoint {}", name),
            Step::Branch { .. } => "branch".to_string(),
            Step::Commit => "commit".to_string(),
            Step::Rollback => "rollback".to_string(),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Execute(sql) => f.debug_tuple("Execute").field(sql).finish(),
            Step::Read { binding, sql } => f
                .debug_struct("Read")
                .field("binding", binding)
                .field("sql", sql)
                .finish(),
            Step::Checkpoint(name) => f.debug_tuple("Checkpoint").field(name).finish(),
            Step::Branch {
                then, otherwise, ..
            } => f
                .debug_struct("Branch")
                .field("then", then)
                .field("otherwise", otherwise)
                .finish(),
            Step::Commit => f.write_str("Commit"),
            Step::Rollback => f.write_str("Rollback"),
        }
    }
}

/// Rows read so far by one transaction, by binding name
///
/// Lookups that fail are script errors: a script that reads a binding it
/// never wrote is broken, not unlucky.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Bindings {
    #[serde(skip)]
    owner: String,
    values: BTreeMap<String, RowSet>,
}

impl Bindings {
    /// Empty bindings for the transaction labelled `owner`
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            values: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, name: String, rows: RowSet) {
        self.values.insert(name, rows);
    }

    /// Rows bound to `name`, if any
    pub fn get(&self, name: &str) -> Option<&RowSet> {
        self.values.get(name)
    }

    /// Rows bound to `name`
    pub fn rows(&self, name: &str) -> HarnessResult<&RowSet> {
        self.values
            .get(name)
            .ok_or_else(|| HarnessError::script(&self.owner, format!("no binding named {}", name)))
    }

    /// First column of the first row bound to `name`
    pub fn scalar(&self, name: &str) -> HarnessResult<&Value> {
        self.rows(name)?.scalar().ok_or_else(|| {
            HarnessError::script(&self.owner, format!("binding {} has no rows", name))
        })
    }

    /// Scalar bound to `name` as an integer
    pub fn i64(&self, name: &str) -> HarnessResult<i64> {
        let value = self.scalar(name)?;
        value.as_i64().ok_or_else(|| {
            HarnessError::script(
                &self.owner,
                format!("binding {} is {}, not an integer", name, value),
            )
        })
    }

    /// Integer in `column` of the first row bound to `name`
    pub fn i64_at(&self, name: &str, column: &str) -> HarnessResult<i64> {
        let rows = self.rows(name)?;
        let value = rows.value(0, column).ok_or_else(|| {
            HarnessError::script(
                &self.owner,
                format!("binding {} has no column {} in its first row", name, column),
            )
        })?;
        value.as_i64().ok_or_else(|| {
            HarnessError::script(
                &self.owner,
                format!("{}.{} is {}, not an integer", name, column, value),
            )
        })
    }

    /// Binding names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of bindings
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing has been read
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The underlying map
    pub fn into_map(self) -> BTreeMap<String, RowSet> {
        self.values
    }
}

/// Builder for one scripted transaction
///
/// ```
/// use isolab_concurrency::TransactionScript;
/// use isolab_core::IsolationLevel;
///
/// let script = TransactionScript::new("t1")
///     .isolation(IsolationLevel::RepeatableRead)
///     .read("capacity", "SELECT capacity FROM pallets WHERE id = 1")
///     .checkpoint("read")
///     .execute_with(|b| {
///         Ok(format!("UPDATE pallets SET capacity = {} WHERE id = 1", b.i64("capacity")? - 1))
///     });
/// assert_eq!(script.steps().len(), 3);
/// ```
#[derive(Debug)]
pub struct TransactionScript {
    label: String,
    isolation: IsolationLevel,
    statement_timeout: Option<Duration>,
    steps: Vec<Step>,
}

impl TransactionScript {
    /// Empty script at READ COMMITTED
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            isolation: IsolationLevel::default(),
            statement_timeout: None,
            steps: Vec::new(),
        }
    }

    /// Isolation level set right after BEGIN
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    /// Session statement timeout issued before BEGIN, overriding the pool's
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Append a prebuilt step
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append fixed SQL
    pub fn execute(self, sql: impl Into<String>) -> Self {
        self.step(Step::execute(sql))
    }

    /// Append SQL rendered from earlier reads
    pub fn execute_with<F>(self, render: F) -> Self
    where
        F: Fn(&Bindings) -> HarnessResult<String> + Send + 'static,
    {
        self.step(Step::execute_with(render))
    }

    /// Append a query bound to `binding`
    pub fn read(self, binding: impl Into<String>, sql: impl Into<String>) -> Self {
        self.step(Step::read(binding, sql))
    }

    /// Append a rendered query bound to `binding`
    pub fn read_with<F>(self, binding: impl Into<String>, render: F) -> Self
    where
        F: Fn(&Bindings) -> HarnessResult<String> + Send + 'static,
    {
        self.step(Step::read_with(binding, render))
    }

    /// Append a named suspension point
    pub fn checkpoint(self, name: impl Into<String>) -> Self {
        self.step(Step::checkpoint(name))
    }

    /// Append a two-armed branch
    pub fn branch<F>(self, condition: F, then: Vec<Step>, otherwise: Vec<Step>) -> Self
    where
        F: Fn(&Bindings) -> HarnessResult<bool> + Send + 'static,
    {
        self.step(Step::branch(condition, then, otherwise))
    }

    /// Append a branch with an empty else arm
    pub fn when<F>(self, condition: F, then: Vec<Step>) -> Self
    where
        F: Fn(&Bindings) -> HarnessResult<bool> + Send + 'static,
    {
        self.branch(condition, then, Vec::new())
    }

    /// Append an explicit COMMIT
    pub fn commit(self) -> Self {
        self.step(Step::Commit)
    }

    /// Append an explicit ROLLBACK
    pub fn rollback(self) -> Self {
        self.step(Step::Rollback)
    }

    /// Transaction label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Isolation level
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    /// Per-script statement timeout, if set
    pub fn timeout(&self) -> Option<Duration> {
        self.statement_timeout
    }

    /// Steps in order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub(crate) fn into_parts(self) -> (String, IsolationLevel, Option<Duration>, Vec<Step>) {
        (self.label, self.isolation, self.statement_timeout, self.steps)
    }

    /// Lease a connection and create the transaction
    ///
    /// No SQL is sent yet: BEGIN goes out with the first SQL step.
    ///
    /// # Errors
    ///
    /// Returns `PoolExhausted` or `Connect` if no connection can be leased.
    pub fn begin(self, pool: &Arc<ConnectionPool>) -> HarnessResult<ScriptedTransaction> {
        let lease = pool.acquire()?;
        Ok(ScriptedTransaction::new(self, lease))
    }
}
