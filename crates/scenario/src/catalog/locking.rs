//! Lock waits that end in an error

use std::time::Duration;

use isolab_concurrency::TransactionScript;
use isolab_core::{FailureKind, HarnessResult, IsolationLevel};

use crate::assertion::{ExpectedKind, ExpectedOutcome};
use crate::scenario::{Discipline, Scenario, ScenarioContext, ScenarioRun};

/// Reader's statement timeout while the table is locked
const READER_TIMEOUT: Duration = Duration::from_secs(1);

/// A reader queued behind an exclusive table lock times out
pub struct StatementTimeoutOnTableLock;

impl Scenario for StatementTimeoutOnTableLock {
    fn name(&self) -> &'static str {
        "statement-timeout-on-table-lock"
    }

    fn summary(&self) -> &'static str {
        "a count behind an ACCESS EXCLUSIVE lock hits its 1s statement timeout"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Preemptive
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
        let wait = ctx.await_timeout();
        let mut sched = ctx.preemptive();

        let holder = sched.start(ctx.begin(
            TransactionScript::new("holder")
                .execute("LOCK TABLE skus IN ACCESS EXCLUSIVE MODE")
                .checkpoint("locked")
                .rollback(),
        )?)?;
        let locked = sched.await_checkpoint(holder, "locked", wait)?;

        let reader = sched.start(ctx.begin(
            TransactionScript::new("reader")
                .statement_timeout(READER_TIMEOUT)
                .read("skus", "SELECT count(*) FROM skus"),
        )?)?;
        sched.await_settled(reader, wait)?;

        if locked.is_reached() {
            sched.resume(holder)?;
        }
        Ok(ScenarioRun {
            outcomes: sched.await_all(wait)?,
            expected: ExpectedOutcome::new()
                .transaction("holder", ExpectedKind::RolledBack)
                .transaction("reader", ExpectedKind::Failed(FailureKind::StatementTimeout)),
        })
    }
}

/// Two transactions lock two rows in opposite order
pub struct DeadlockDetected;

impl Scenario for DeadlockDetected {
    fn name(&self) -> &'static str {
        "deadlock-detected"
    }

    fn summary(&self) -> &'static str {
        "crossed row locks end with the database aborting exactly one transaction"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Preemptive
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
        let a = ctx.fixtures().create_pallet(5)?;
        let b = ctx.fixtures().create_pallet(5)?;
        let wait = ctx.await_timeout();
        let touch = |pallet: i64| {
            format!(
                "UPDATE pallets SET capacity = capacity - 1 WHERE id = {}",
                pallet
            )
        };
        let crossed = |label: &str, first: i64, second: i64| {
            TransactionScript::new(label)
                .execute(touch(first))
                .checkpoint("first-locked")
                .execute(touch(second))
        };

        let mut sched = ctx.preemptive();
        let t1 = sched.start(ctx.begin(crossed("t1", a, b))?)?;
        let t2 = sched.start(ctx.begin(crossed("t2", b, a))?)?;
        let t1_locked = sched.await_checkpoint(t1, "first-locked", wait)?;
        let t2_locked = sched.await_checkpoint(t2, "first-locked", wait)?;

        // Without both first locks there is nothing to cross; await_all
        // releases whichever one is parked.
        if t1_locked.is_reached() && t2_locked.is_reached() {
            sched.resume(t1)?;
            ctx.settle_locks(1)?;
            sched.resume(t2)?;
        }

        // The database picks the victim.
        Ok(ScenarioRun {
            outcomes: sched.await_all(wait)?,
            expected: ExpectedOutcome::new()
                .transaction("t1", ExpectedKind::Settled)
                .transaction("t2", ExpectedKind::Settled)
                .failures(FailureKind::DeadlockDetected, 1),
        })
    }
}
