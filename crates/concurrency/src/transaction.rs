//! Scripted transactions
//!
//! `ScriptedTransaction` walks a script one step at a time over a leased
//! connection. It owns the lease for its whole life and gives it back as soon
//! as it reaches a terminal state.
//!
//! # State machine
//!
//! ```text
//! NotStarted ──step──▶ Running ──checkpoint──▶ Suspended
//!                        ▲                         │
//!                        └──────────step───────────┘
//! Running ──last step / COMMIT──▶ Committed
//! Running ──ROLLBACK / abandon──▶ RolledBack
//! Running ──statement error─────▶ Failed
//! ```
//!
//! BEGIN and `SET TRANSACTION ISOLATION LEVEL` are sent lazily, right before
//! the first SQL step. A checkpoint never commits. Stepping a transaction
//! with no steps left commits it; one that never sent SQL commits without
//! touching the database.
//!
//! Statement errors are captured, not propagated: the transaction rolls back,
//! releases its lease and records a [`TransactionFailure`]. Script errors
//! (bad bindings, failing render closures, lease misuse) also roll back but
//! are returned to the caller, since they mean the scenario itself is wrong.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use isolab_core::sql;
use isolab_core::{
    CancelHandle, FailureKind, HarnessError, HarnessResult, IsolationLevel, LeaseId, RowSet,
    SqlState, TransactionId,
};
use isolab_pool::ConnectionLease;

use crate::script::{Bindings, SqlText, Step, TransactionScript};

/// A statement failure captured into a transaction's outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionFailure {
    /// Classified failure
    pub kind: FailureKind,
    /// SQLSTATE, when the database reported one
    pub sql_state: Option<SqlState>,
    /// Database or harness message
    pub message: String,
    /// 1-based index of the step that failed
    pub step: usize,
    /// Statement text that failed, if a statement was involved
    pub sql: Option<String>,
}

impl fmt::Display for TransactionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at step {}", self.kind.as_str(), self.step)?;
        if let Some(state) = &self.sql_state {
            write!(f, " [{}]", state)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Where a transaction is in its life
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionState {
    /// Created, no step taken yet
    NotStarted,
    /// Between steps
    Running,
    /// Parked at a checkpoint
    Suspended {
        /// Checkpoint name
        checkpoint: String,
    },
    /// COMMIT succeeded
    Committed,
    /// Rolled back on request or abandoned
    RolledBack,
    /// Rolled back after a failure
    Failed(TransactionFailure),
}

impl TransactionState {
    /// True for Committed, RolledBack and Failed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::RolledBack | TransactionState::Failed(_)
        )
    }

    /// Short state name for errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            TransactionState::NotStarted => "not-started",
            TransactionState::Running => "running",
            TransactionState::Suspended { .. } => "suspended",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled-back",
            TransactionState::Failed(_) => "failed",
        }
    }

    /// The step outcome a finished transaction ended with
    pub fn final_outcome(&self) -> Option<StepOutcome> {
        match self {
            TransactionState::Committed => Some(StepOutcome::Committed),
            TransactionState::RolledBack => Some(StepOutcome::RolledBack),
            TransactionState::Failed(f) => Some(StepOutcome::Failed(f.clone())),
            _ => None,
        }
    }
}

/// What a single step did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The step ran and more steps remain
    Continued,
    /// The step was a checkpoint
    Suspended {
        /// Checkpoint name
        checkpoint: String,
    },
    /// The transaction committed
    Committed,
    /// The transaction rolled back
    RolledBack,
    /// The transaction failed and rolled back
    Failed(TransactionFailure),
}

impl StepOutcome {
    /// True when the transaction is finished
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepOutcome::Committed | StepOutcome::RolledBack | StepOutcome::Failed(_)
        )
    }
}

/// How a transaction ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "failure", rename_all = "snake_case")]
pub enum OutcomeKind {
    /// COMMIT succeeded
    Committed,
    /// Rolled back without a failure
    RolledBack,
    /// Rolled back after a failure
    Failed(TransactionFailure),
}

impl OutcomeKind {
    /// Failure details, if any
    pub fn failure(&self) -> Option<&TransactionFailure> {
        match self {
            OutcomeKind::Failed(f) => Some(f),
            _ => None,
        }
    }

    /// Short name for tables
    pub fn name(&self) -> &'static str {
        match self {
            OutcomeKind::Committed => "committed",
            OutcomeKind::RolledBack => "rolled_back",
            OutcomeKind::Failed(f) => f.kind.as_str(),
        }
    }
}

/// Terminal record of a scripted transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionOutcome {
    /// Transaction identity
    pub id: TransactionId,
    /// Script label
    pub label: String,
    /// Isolation level it ran at
    pub isolation: IsolationLevel,
    /// Steps taken
    pub steps_executed: usize,
    /// How it ended
    pub kind: OutcomeKind,
    /// Rows read, by binding name
    pub bindings: BTreeMap<String, RowSet>,
}

impl TransactionOutcome {
    /// True when the transaction committed
    pub fn committed(&self) -> bool {
        self.kind == OutcomeKind::Committed
    }

    /// Failure details, if it failed
    pub fn failure(&self) -> Option<&TransactionFailure> {
        self.kind.failure()
    }
}

/// A transaction script running over one leased connection
pub struct ScriptedTransaction {
    id: TransactionId,
    label: String,
    isolation: IsolationLevel,
    statement_timeout: Option<Duration>,
    pending: VecDeque<Step>,
    executed: usize,
    lease: ConnectionLease,
    lease_id: LeaseId,
    bindings: Bindings,
    state: TransactionState,
    begun: bool,
    last_sql: Option<String>,
}

impl ScriptedTransaction {
    pub(crate) fn new(script: TransactionScript, lease: ConnectionLease) -> Self {
        let (label, isolation, statement_timeout, steps) = script.into_parts();
        let id = TransactionId::next();
        let lease_id = lease.id();
        debug!(
            target: "isolab::txn",
            txn = %id,
            label = %label,
            lease = %lease_id,
            isolation = %isolation,
            steps = steps.len(),
            "Transaction created"
        );
        Self {
            id,
            bindings: Bindings::new(label.clone()),
            label,
            isolation,
            statement_timeout,
            pending: steps.into(),
            executed: 0,
            lease,
            lease_id,
            state: TransactionState::NotStarted,
            begun: false,
            last_sql: None,
        }
    }

    /// Transaction identity
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Script label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Isolation level
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Current state
    pub fn state(&self) -> &TransactionState {
        &self.state
    }

    /// True once committed, rolled back or failed
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Steps taken so far
    pub fn steps_executed(&self) -> usize {
        self.executed
    }

    /// Steps not yet taken
    pub fn remaining_steps(&self) -> usize {
        self.pending.len()
    }

    /// Rows read so far
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Lease the transaction runs on
    pub fn lease_id(&self) -> LeaseId {
        self.lease_id
    }

    /// True while the leased connection is still held
    pub fn holds_lease(&self) -> bool {
        !self.lease.is_released()
    }

    /// Handle that interrupts the statement currently running, if the
    /// backend supports it
    pub fn cancel_handle(&self) -> Option<Arc<dyn CancelHandle>> {
        self.lease.cancel_handle()
    }

    /// Terminal record, once the transaction has finished
    pub fn outcome(&self) -> Option<TransactionOutcome> {
        let kind = match &self.state {
            TransactionState::Committed => OutcomeKind::Committed,
            TransactionState::RolledBack => OutcomeKind::RolledBack,
            TransactionState::Failed(failure) => OutcomeKind::Failed(failure.clone()),
            _ => return None,
        };
        Some(TransactionOutcome {
            id: self.id,
            label: self.label.clone(),
            isolation: self.isolation,
            steps_executed: self.executed,
            kind,
            bindings: self.bindings.clone().into_map(),
        })
    }

    fn subject(&self) -> String {
        format!("transaction {} ({})", self.label, self.id)
    }

    /// Take the next step
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the transaction already finished, and the
    /// script error if a render closure, branch condition or binding lookup
    /// fails. In the second case the transaction is rolled back and marked
    /// failed before the error is returned.
    pub fn step(&mut self) -> HarnessResult<StepOutcome> {
        if self.state.is_terminal() {
            return Err(HarnessError::invalid_state(
                self.subject(),
                self.state.name(),
                "step",
            ));
        }

        let step = match self.pending.pop_front() {
            Some(step) => step,
            None => return self.commit(),
        };
        self.executed += 1;
        self.state = TransactionState::Running;
        debug!(
            target: "isolab::txn",
            txn = %self.id,
            label = %self.label,
            step = self.executed,
            what = %step.describe(),
            "Step"
        );

        let result = match step {
            Step::Checkpoint(name) => {
                debug!(target: "isolab::txn", txn = %self.id, checkpoint = %name, "Suspended");
                self.state = TransactionState::Suspended {
                    checkpoint: name.clone(),
                };
                return Ok(StepOutcome::Suspended { checkpoint: name });
            }
            Step::Commit => {
                self.discard_trailing("COMMIT");
                return self.commit();
            }
            Step::Rollback => {
                self.discard_trailing("ROLLBACK");
                return self.rollback();
            }
            Step::Execute(text) => self.run(&text).map(|_| ()),
            Step::Read { binding, sql } => self.run(&sql).map(|rows| {
                self.bindings.insert(binding, rows);
            }),
            Step::Branch {
                condition,
                then,
                otherwise,
            } => condition(&self.bindings).map(|taken| {
                let arm = if taken { then } else { otherwise };
                debug!(target: "isolab::txn", txn = %self.id, taken, steps = arm.len(), "Branch");
                for step in arm.into_iter().rev() {
                    self.pending.push_front(step);
                }
            }),
        };

        if let Err(e) = result {
            return self.fail(e);
        }
        if self.pending.is_empty() {
            return self.commit();
        }
        Ok(StepOutcome::Continued)
    }

    /// Roll back and release the connection without running further steps
    ///
    /// No-op on a finished transaction.
    pub fn abandon(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        debug!(
            target: "isolab::txn",
            txn = %self.id,
            label = %self.label,
            state = self.state.name(),
            "Abandoned"
        );
        self.pending.clear();
        self.end(TransactionState::RolledBack);
    }

    fn discard_trailing(&mut self, terminator: &str) {
        if !self.pending.is_empty() {
            warn!(
                target: "isolab::txn",
                txn = %self.id,
                label = %self.label,
                discarded = self.pending.len(),
                "Steps after {} are never run",
                terminator
            );
            self.pending.clear();
        }
    }

    fn run(&mut self, text: &SqlText) -> HarnessResult<RowSet> {
        let sql = text.render(&self.bindings)?;
        self.ensure_begun()?;
        self.send(&sql)
    }

    fn send(&mut self, sql: &str) -> HarnessResult<RowSet> {
        self.last_sql = Some(sql.to_string());
        self.lease.execute(sql)
    }

    fn ensure_begun(&mut self) -> HarnessResult<()> {
        if self.begun {
            return Ok(());
        }
        if let Some(timeout) = self.statement_timeout {
            self.send(&sql::set_statement_timeout(timeout))?;
        }
        self.send(sql::BEGIN)?;
        self.begun = true;
        let set_isolation = self.isolation.set_transaction_sql();
        self.send(&set_isolation)?;
        Ok(())
    }

    fn commit(&mut self) -> HarnessResult<StepOutcome> {
        if self.begun {
            if let Err(e) = self.send(sql::COMMIT) {
                return self.fail(e);
            }
        }
        debug!(target: "isolab::txn", txn = %self.id, label = %self.label, "Committed");
        self.end(TransactionState::Committed);
        Ok(StepOutcome::Committed)
    }

    fn rollback(&mut self) -> HarnessResult<StepOutcome> {
        debug!(target: "isolab::txn", txn = %self.id, label = %self.label, "Rolled back");
        self.end(TransactionState::RolledBack);
        Ok(StepOutcome::RolledBack)
    }

    /// Record a failure, or hand back a script error after rolling back
    fn fail(&mut self, err: HarnessError) -> HarnessResult<StepOutcome> {
        let kind = err.failure_kind();
        let message = match &err {
            HarnessError::Statement { message, .. }
            | HarnessError::StatementTimeout { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let failure = TransactionFailure {
            kind: kind.unwrap_or(FailureKind::ScriptError),
            sql_state: err.sql_state().cloned(),
            message,
            step: self.executed,
            sql: match kind {
                Some(_) => self.last_sql.clone(),
                None => None,
            },
        };
        debug!(
            target: "isolab::txn",
            txn = %self.id,
            label = %self.label,
            failure = %failure,
            "Failed"
        );
        self.pending.clear();
        self.end(TransactionState::Failed(failure.clone()));
        match kind {
            Some(_) => Ok(StepOutcome::Failed(failure)),
            None => Err(err),
        }
    }

    /// Best-effort ROLLBACK when needed, release the lease, enter `state`
    fn end(&mut self, state: TransactionState) {
        let needs_rollback = self.begun && !matches!(state, TransactionState::Committed);
        if needs_rollback && !self.lease.is_released() {
            if let Err(e) = self.lease.execute(sql::ROLLBACK) {
                warn!(
                    target: "isolab::txn",
                    txn = %self.id,
                    label = %self.label,
                    error = %e,
                    "ROLLBACK failed"
                );
            }
        }
        self.lease.release();
        self.state = state;
    }
}

impl Drop for ScriptedTransaction {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl fmt::Debug for ScriptedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTransaction")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("isolation", &self.isolation)
            .field("state", &self.state)
            .field("executed", &self.executed)
            .field("remaining", &self.pending.len())
            .field("lease", &self.lease_id)
            .finish()
    }
}
