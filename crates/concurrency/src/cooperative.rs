//! Single-threaded interleaving
//!
//! The cooperative scheduler owns every registered transaction and advances
//! exactly one of them per call, on the caller's thread. The interleaving is
//! whatever order the caller asks for, so the same calls always produce the
//! same SQL order.
//!
//! A statement that blocks on a database lock blocks the caller too. Use the
//! preemptive scheduler for scenarios where one transaction must wait on
//! another's lock.

use serde::Serialize;
use tracing::debug;

use isolab_core::{HarnessError, HarnessResult, TransactionId};

use crate::transaction::{
    ScriptedTransaction, StepOutcome, TransactionFailure, TransactionOutcome, TransactionState,
};

/// Handle for a transaction registered with a [`CooperativeScheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResumeToken {
    index: usize,
    id: TransactionId,
}

impl ResumeToken {
    pub(crate) fn new(index: usize, id: TransactionId) -> Self {
        Self { index, id }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Transaction this token drives
    pub fn transaction(&self) -> TransactionId {
        self.id
    }
}

/// One step taken under a scheduler
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleEvent {
    /// Position in the trace, starting at 0
    pub seq: usize,
    /// Label of the transaction that stepped
    pub transaction: String,
    /// Its step counter after the step
    pub step: usize,
    /// What happened
    pub outcome: StepOutcome,
}

/// How a wait for a named checkpoint ended
///
/// A database failure before the checkpoint is an outcome the scenario
/// asserts on, so it comes back as a value rather than an error.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointWait {
    /// The transaction is suspended at the checkpoint
    Reached,
    /// The transaction failed and rolled back before getting there
    Failed(TransactionFailure),
}

impl CheckpointWait {
    /// True when the transaction is suspended at the checkpoint
    pub fn is_reached(&self) -> bool {
        matches!(self, CheckpointWait::Reached)
    }

    /// Failure details when the transaction never got there
    pub fn failure(&self) -> Option<&TransactionFailure> {
        match self {
            CheckpointWait::Failed(f) => Some(f),
            CheckpointWait::Reached => None,
        }
    }
}

/// Deterministic single-threaded scheduler
#[derive(Debug, Default)]
pub struct CooperativeScheduler {
    slots: Vec<ScriptedTransaction>,
    trace: Vec<ScheduleEvent>,
}

impl CooperativeScheduler {
    /// Empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a transaction
    pub fn register(&mut self, txn: ScriptedTransaction) -> ResumeToken {
        let token = ResumeToken::new(self.slots.len(), txn.id());
        debug!(target: "isolab::sched", txn = %txn.id(), label = txn.label(), "Registered");
        self.slots.push(txn);
        token
    }

    fn slot(&mut self, token: ResumeToken) -> HarnessResult<&mut ScriptedTransaction> {
        match self.slots.get_mut(token.index) {
            Some(txn) if txn.id() == token.id => Ok(txn),
            _ => Err(HarnessError::invalid_state(
                format!("token for {}", token.id),
                "unregistered",
                "resume",
            )),
        }
    }

    /// Advance one step
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for unknown tokens or finished transactions,
    /// and script errors from the transaction.
    pub fn step(&mut self, token: ResumeToken) -> HarnessResult<StepOutcome> {
        let txn = self.slot(token)?;
        let outcome = txn.step()?;
        let transaction = txn.label().to_string();
        let step = txn.steps_executed();
        self.trace.push(ScheduleEvent {
            seq: self.trace.len(),
            transaction,
            step,
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    /// Step until the transaction suspends or finishes
    ///
    /// A transaction that has already finished returns its final outcome
    /// without stepping.
    pub fn resume(&mut self, token: ResumeToken) -> HarnessResult<StepOutcome> {
        if let Some(outcome) = self.final_outcome(token)? {
            return Ok(outcome);
        }
        loop {
            let outcome = self.step(token)?;
            if outcome != StepOutcome::Continued {
                return Ok(outcome);
            }
        }
    }

    /// Resume until the transaction parks at `checkpoint`
    ///
    /// # Errors
    ///
    /// Returns a script error if the transaction suspends somewhere else, or
    /// commits or rolls back first. A captured failure on the way is returned
    /// as [`CheckpointWait::Failed`].
    pub fn run_to_checkpoint(
        &mut self,
        token: ResumeToken,
        checkpoint: &str,
    ) -> HarnessResult<CheckpointWait> {
        match self.resume(token)? {
            StepOutcome::Suspended { checkpoint: reached } if reached == checkpoint => {
                Ok(CheckpointWait::Reached)
            }
            StepOutcome::Suspended { checkpoint: reached } => Err(HarnessError::script(
                self.label(token),
                format!("suspended at {} before reaching {}", reached, checkpoint),
            )),
            StepOutcome::Failed(failure) => {
                debug!(
                    target: "isolab::sched",
                    label = %self.label(token),
                    checkpoint,
                    failure = %failure,
                    "Failed before checkpoint"
                );
                Ok(CheckpointWait::Failed(failure))
            }
            outcome => Err(HarnessError::script(
                self.label(token),
                format!("finished ({:?}) before reaching {}", outcome, checkpoint),
            )),
        }
    }

    /// Step until the transaction finishes, passing through checkpoints
    ///
    /// A transaction that has already finished returns its final outcome
    /// without stepping.
    pub fn run_to_end(&mut self, token: ResumeToken) -> HarnessResult<StepOutcome> {
        if let Some(outcome) = self.final_outcome(token)? {
            return Ok(outcome);
        }
        loop {
            let outcome = self.step(token)?;
            if outcome.is_terminal() {
                return Ok(outcome);
            }
        }
    }

    fn final_outcome(&self, token: ResumeToken) -> HarnessResult<Option<StepOutcome>> {
        Ok(self.state(token)?.final_outcome())
    }

    /// Current state of a registered transaction
    pub fn state(&self, token: ResumeToken) -> HarnessResult<&TransactionState> {
        match self.slots.get(token.index) {
            Some(txn) if txn.id() == token.id => Ok(txn.state()),
            _ => Err(HarnessError::invalid_state(
                format!("token for {}", token.id),
                "unregistered",
                "inspect",
            )),
        }
    }

    /// Direct access to a registered transaction
    pub fn transaction(&self, token: ResumeToken) -> Option<&ScriptedTransaction> {
        self.slots
            .get(token.index)
            .filter(|txn| txn.id() == token.id)
    }

    fn label(&self, token: ResumeToken) -> String {
        self.transaction(token)
            .map(|txn| txn.label().to_string())
            .unwrap_or_else(|| token.id.to_string())
    }

    /// Every step taken so far, in order
    pub fn trace(&self) -> &[ScheduleEvent] {
        &self.trace
    }

    /// Number of registered transactions
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Outcomes in registration order
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if any transaction has not finished. Dropping
    /// the scheduler then rolls the stragglers back.
    pub fn finish(self) -> HarnessResult<Vec<TransactionOutcome>> {
        let mut outcomes = Vec::with_capacity(self.slots.len());
        for txn in &self.slots {
            match txn.outcome() {
                Some(outcome) => outcomes.push(outcome),
                None => {
                    return Err(HarnessError::invalid_state(
                        format!("transaction {}", txn.label()),
                        txn.state().name(),
                        "finish scheduling with",
                    ))
                }
            }
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::TransactionScript;
    use isolab_core::mock::MockConnector;
    use isolab_core::{FailureKind, SqlState};
    use isolab_pool::{ConnectionPool, PoolConfig};
    use std::sync::Arc;
    use std::time::Duration;

    fn pool(mock: &MockConnector) -> Arc<ConnectionPool> {
        let config = PoolConfig {
            max_size: 4,
            checkout_timeout: Duration::from_millis(50),
            statement_timeout: Duration::ZERO,
        };
        ConnectionPool::new(mock.clone(), config).unwrap()
    }

    #[test]
    fn run_to_checkpoint_then_end() {
        let mock = MockConnector::new();
        let pool = pool(&mock);
        let mut sched = CooperativeScheduler::new();
        let t1 = sched.register(
            TransactionScript::new("t1")
                .execute("SELECT 1")
                .checkpoint("a")
                .execute("SELECT 2")
                .begin(&pool)
                .unwrap(),
        );

        assert!(sched.run_to_checkpoint(t1, "a").unwrap().is_reached());
        assert!(matches!(sched.state(t1).unwrap(), TransactionState::Suspended { .. }));
        assert_eq!(sched.run_to_end(t1).unwrap(), StepOutcome::Committed);

        let outcomes = sched.finish().unwrap();
        assert!(outcomes[0].committed());
    }

    #[test]
    fn wrong_checkpoint_is_a_script_error() {
        let mock = MockConnector::new();
        let pool = pool(&mock);
        let mut sched = CooperativeScheduler::new();
        let t1 = sched.register(
            TransactionScript::new("t1")
                .checkpoint("first")
                .checkpoint("second")
                .begin(&pool)
                .unwrap(),
        );
        assert!(matches!(
            sched.run_to_checkpoint(t1, "second"),
            Err(HarnessError::Script { .. })
        ));
    }

    #[test]
    fn failure_before_the_checkpoint_is_returned() {
        let mock = MockConnector::new();
        mock.fail("UPDATE", SqlState::SERIALIZATION_FAILURE, "could not serialize access");
        let pool = pool(&mock);
        let mut sched = CooperativeScheduler::new();
        let t1 = sched.register(
            TransactionScript::new("t1")
                .execute("UPDATE pallets SET capacity = 0")
                .checkpoint("after")
                .execute("SELECT 1")
                .begin(&pool)
                .unwrap(),
        );

        let wait = sched.run_to_checkpoint(t1, "after").unwrap();
        assert!(!wait.is_reached());
        assert_eq!(wait.failure().unwrap().kind, FailureKind::SerializationFailure);

        // The scenario carries on with the failed transaction.
        assert!(matches!(sched.run_to_end(t1).unwrap(), StepOutcome::Failed(_)));
        assert!(matches!(sched.resume(t1).unwrap(), StepOutcome::Failed(_)));
        assert!(matches!(sched.step(t1), Err(HarnessError::InvalidState { .. })));

        let outcomes = sched.finish().unwrap();
        assert_eq!(outcomes[0].failure().unwrap().step, 1);
        assert_eq!(pool.checked_out(), 0);
    }

    #[test]
    fn finishing_past_the_checkpoint_is_a_script_error() {
        let mock = MockConnector::new();
        let pool = pool(&mock);
        let mut sched = CooperativeScheduler::new();
        let t1 = sched.register(TransactionScript::new("t1").execute("SELECT 1").begin(&pool).unwrap());
        assert!(matches!(
            sched.run_to_checkpoint(t1, "never"),
            Err(HarnessError::Script { .. })
        ));
    }

    #[test]
    fn finish_rejects_unsettled_transactions() {
        let mock = MockConnector::new();
        let pool = pool(&mock);
        let mut sched = CooperativeScheduler::new();
        let t1 = sched.register(
            TransactionScript::new("t1")
                .execute("SELECT 1")
                .checkpoint("held")
                .begin(&pool)
                .unwrap(),
        );
        assert!(sched.run_to_checkpoint(t1, "held").unwrap().is_reached());
        assert!(matches!(sched.finish(), Err(HarnessError::InvalidState { .. })));
        assert_eq!(pool.checked_out(), 0);
    }

    #[test]
    fn stepping_a_finished_transaction_fails() {
        let mock = MockConnector::new();
        let pool = pool(&mock);
        let mut sched = CooperativeScheduler::new();
        let t1 = sched.register(TransactionScript::new("t1").execute("SELECT 1").begin(&pool).unwrap());
        sched.run_to_end(t1).unwrap();
        assert!(matches!(sched.step(t1), Err(HarnessError::InvalidState { .. })));
    }

    #[test]
    fn foreign_tokens_are_rejected() {
        let mock = MockConnector::new();
        let pool = pool(&mock);
        let mut a = CooperativeScheduler::new();
        let mut b = CooperativeScheduler::new();
        a.register(TransactionScript::new("a").begin(&pool).unwrap());
        let foreign = b.register(TransactionScript::new("b").begin(&pool).unwrap());
        assert!(matches!(a.step(foreign), Err(HarnessError::InvalidState { .. })));
    }

    #[test]
    fn trace_records_every_step() {
        let mock = MockConnector::new();
        let pool = pool(&mock);
        let mut sched = CooperativeScheduler::new();
        let t1 = sched.register(
            TransactionScript::new("t1")
                .execute("SELECT 1")
                .checkpoint("x")
                .begin(&pool)
                .unwrap(),
        );
        let t2 = sched.register(TransactionScript::new("t2").execute("SELECT 2").begin(&pool).unwrap());

        assert!(sched.run_to_checkpoint(t1, "x").unwrap().is_reached());
        sched.run_to_end(t2).unwrap();
        sched.run_to_end(t1).unwrap();

        let trace: Vec<_> = sched
            .trace()
            .iter()
            .map(|e| (e.seq, e.transaction.as_str(), e.step))
            .collect();
        assert_eq!(trace, vec![(0, "t1", 1), (1, "t1", 2), (2, "t2", 1), (3, "t1", 2)]);
        assert_eq!(sched.trace()[3].outcome, StepOutcome::Committed);
    }
}
