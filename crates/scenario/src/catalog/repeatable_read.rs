//! Snapshot behaviour under repeatable read

use isolab_concurrency::{CooperativeScheduler, TransactionScript};
use isolab_core::{FailureKind, HarnessResult, IsolationLevel};

use crate::assertion::{ExpectedKind, ExpectedOutcome, RowExpectation};
use crate::fixtures::{capacity_sql, item_count_sql};
use crate::scenario::{Discipline, Scenario, ScenarioContext, ScenarioRun};

use super::{count_around_insert, write_skew, COUNT_ITEMS};

/// The snapshot hides a row committed after the first read
pub struct StableCount;

impl Scenario for StableCount {
    fn name(&self) -> &'static str {
        "repeatable-read-stable-count"
    }

    fn summary(&self) -> &'static str {
        "an item count taken twice stays the same despite a concurrent insert"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Cooperative
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::RepeatableRead
    }

    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
        let (outcomes, pallet) = count_around_insert(ctx, self.isolation())?;
        let counted = COUNT_ITEMS as i64;
        Ok(ScenarioRun {
            outcomes,
            expected: ExpectedOutcome::new()
                .transaction("counter", ExpectedKind::Committed)
                .transaction("loader", ExpectedKind::Committed)
                .read("counter", "first", counted)
                .read("counter", "second", counted)
                .row(RowExpectation::scalar(
                    format!("items on pallet {}", pallet),
                    item_count_sql(pallet),
                    counted + 1,
                )),
        })
    }
}

/// Writing a row changed since the snapshot fails with 40001
pub struct RepeatableReadSerializationFailure;

impl Scenario for RepeatableReadSerializationFailure {
    fn name(&self) -> &'static str {
        "repeatable-read-serialization-failure"
    }

    fn summary(&self) -> &'static str {
        "updating a row another transaction changed after the snapshot is rejected"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Cooperative
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::RepeatableRead
    }

    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
        let pallet = ctx.fixtures().create_pallet(1)?;
        let increment = format!(
            "UPDATE pallets SET capacity = capacity + 1 WHERE id = {}",
            pallet
        );

        let mut sched = CooperativeScheduler::new();
        let snapshot = sched.register(
            ctx.begin(
                TransactionScript::new("snapshot")
                    .isolation(IsolationLevel::RepeatableRead)
                    .read("capacity", capacity_sql(pallet))
                    .checkpoint("snapshot-taken")
                    .execute(increment.clone()),
            )?,
        );
        let concurrent = sched.register(
            ctx.begin(
                TransactionScript::new("concurrent")
                    .isolation(IsolationLevel::RepeatableRead)
                    .execute(increment),
            )?,
        );

        sched.run_to_checkpoint(snapshot, "snapshot-taken")?;
        sched.run_to_end(concurrent)?;
        sched.run_to_end(snapshot)?;

        Ok(ScenarioRun {
            outcomes: sched.finish()?,
            expected: ExpectedOutcome::new()
                .transaction(
                    "snapshot",
                    ExpectedKind::Failed(FailureKind::SerializationFailure),
                )
                .transaction("concurrent", ExpectedKind::Committed)
                .read("snapshot", "capacity", 1)
                .row(RowExpectation::pallet_capacity(pallet, 2)),
        })
    }
}

/// Disjoint writes after a shared check both commit under snapshot isolation
pub struct WriteSkew;

impl Scenario for WriteSkew {
    fn name(&self) -> &'static str {
        "repeatable-read-write-skew"
    }

    fn summary(&self) -> &'static str {
        "both transactions see a combined capacity of 2 and each takes one; both commit"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Cooperative
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::RepeatableRead
    }

    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
        let (outcomes, total_sql) = write_skew(ctx, self.isolation())?;
        Ok(ScenarioRun {
            outcomes,
            expected: ExpectedOutcome::new()
                .transaction("left", ExpectedKind::Committed)
                .transaction("right", ExpectedKind::Committed)
                .read("left", "total", 2)
                .read("right", "total", 2)
                .row(RowExpectation::scalar("combined capacity", total_sql, 0)),
        })
    }
}
