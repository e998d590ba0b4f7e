//! Anomalies read committed allows, and the locking that fixes them

use isolab_concurrency::{Bindings, CooperativeScheduler, Step, TransactionOutcome, TransactionScript};
use isolab_core::{HarnessResult, IsolationLevel};

use crate::assertion::{ExpectedKind, ExpectedOutcome, RowExpectation};
use crate::fixtures::capacity_sql;
use crate::scenario::{Discipline, Scenario, ScenarioContext, ScenarioRun};

use super::count_around_insert;

/// Script that reads a pallet's capacity, parks, then writes `read + delta`
fn read_then_write(label: &str, pallet: i64, delta: i64) -> TransactionScript {
    TransactionScript::new(label)
        .read("capacity", capacity_sql(pallet))
        .checkpoint("read")
        .execute_with(move |b| {
            Ok(format!(
                "UPDATE pallets SET capacity = {} WHERE id = {}",
                b.i64("capacity")? + delta,
                pallet
            ))
        })
}

/// Run two `read_then_write` transactions: both read, then each writes in turn
fn both_read_then_write(
    ctx: &ScenarioContext,
    pallet: i64,
    delta: i64,
) -> HarnessResult<Vec<TransactionOutcome>> {
    let mut sched = CooperativeScheduler::new();
    let t1 = sched.register(ctx.begin(read_then_write("t1", pallet, delta))?);
    let t2 = sched.register(ctx.begin(read_then_write("t2", pallet, delta))?);

    sched.run_to_checkpoint(t1, "read")?;
    sched.run_to_checkpoint(t2, "read")?;
    sched.run_to_end(t1)?;
    sched.run_to_end(t2)?;
    sched.finish()
}

/// Two decrements from a capacity of 1 leave 0: one update is lost
pub struct LostUpdate;

impl Scenario for LostUpdate {
    fn name(&self) -> &'static str {
        "read-committed-lost-update"
    }

    fn summary(&self) -> &'static str {
        "both transactions read capacity 1 and write 0; one decrement is lost"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Cooperative
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
        let pallet = ctx.fixtures().create_pallet(1)?;
        let outcomes = both_read_then_write(ctx, pallet, -1)?;
        Ok(ScenarioRun {
            outcomes,
            expected: ExpectedOutcome::new()
                .transaction("t1", ExpectedKind::Committed)
                .transaction("t2", ExpectedKind::Committed)
                .read("t1", "capacity", 1)
                .read("t2", "capacity", 1)
                .row(RowExpectation::pallet_capacity(pallet, 0)),
        })
    }
}

/// A capacity check followed by a relative decrement overfills the pallet
pub struct Overfill;

impl Scenario for Overfill {
    fn name(&self) -> &'static str {
        "read-committed-overfill"
    }

    fn summary(&self) -> &'static str {
        "both transactions see free capacity and decrement; capacity ends at -1"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Cooperative
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
        let pallet = ctx.fixtures().create_pallet(1)?;
        let load = |label: &str| {
            TransactionScript::new(label)
                .read("capacity", capacity_sql(pallet))
                .checkpoint("checked")
                .when(
                    |b| Ok(b.i64("capacity")? > 0),
                    vec![Step::execute(format!(
                        "UPDATE pallets SET capacity = capacity - 1 WHERE id = {}",
                        pallet
                    ))],
                )
        };

        let mut sched = CooperativeScheduler::new();
        let t1 = sched.register(ctx.begin(load("t1"))?);
        let t2 = sched.register(ctx.begin(load("t2"))?);
        sched.run_to_checkpoint(t1, "checked")?;
        sched.run_to_checkpoint(t2, "checked")?;
        sched.run_to_end(t1)?;
        sched.run_to_end(t2)?;

        Ok(ScenarioRun {
            outcomes: sched.finish()?,
            expected: ExpectedOutcome::new()
                .transaction("t1", ExpectedKind::Committed)
                .transaction("t2", ExpectedKind::Committed)
                .row(RowExpectation::pallet_capacity(pallet, -1)),
        })
    }
}

/// Two top-ups of 20 from an empty pallet leave 20 instead of 40
pub struct LostTopUp;

impl Scenario for LostTopUp {
    fn name(&self) -> &'static str {
        "read-committed-lost-top-up"
    }

    fn summary(&self) -> &'static str {
        "both transactions add 20 to the capacity they read; the total is 20, not 40"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Cooperative
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
        let pallet = ctx.fixtures().create_pallet(0)?;
        let outcomes = both_read_then_write(ctx, pallet, 20)?;
        Ok(ScenarioRun {
            outcomes,
            expected: ExpectedOutcome::new()
                .transaction("t1", ExpectedKind::Committed)
                .transaction("t2", ExpectedKind::Committed)
                .read("t2", "capacity", 0)
                .row(RowExpectation::pallet_capacity(pallet, 20)),
        })
    }
}

/// A relative update waits for the row lock and applies on top of the
/// committed value
pub struct BlockedWriter;

impl Scenario for BlockedWriter {
    fn name(&self) -> &'static str {
        "read-committed-blocked-writer"
    }

    fn summary(&self) -> &'static str {
        "a relative update blocks on the holder's row lock and adds to its committed value"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Preemptive
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
        let pallet = ctx.fixtures().create_pallet(0)?;
        let wait = ctx.await_timeout();
        let mut sched = ctx.preemptive();

        let holder = sched.start(ctx.begin(
            TransactionScript::new("holder")
                .read("capacity", capacity_sql(pallet))
                .execute_with(move |b| {
                    Ok(format!(
                        "UPDATE pallets SET capacity = {} WHERE id = {}",
                        b.i64("capacity")? + 20,
                        pallet
                    ))
                })
                .checkpoint("holding"),
        )?)?;
        let holding = sched.await_checkpoint(holder, "holding", wait)?;

        sched.start(ctx.begin(TransactionScript::new("writer").execute(format!(
            "UPDATE pallets SET capacity = capacity + 20 WHERE id = {}",
            pallet
        )))?)?;
        if holding.is_reached() {
            ctx.settle_locks(1)?;
            sched.resume(holder)?;
        }
        Ok(ScenarioRun {
            outcomes: sched.await_all(wait)?,
            expected: ExpectedOutcome::new()
                .transaction("holder", ExpectedKind::Committed)
                .transaction("writer", ExpectedKind::Committed)
                .row(RowExpectation::pallet_capacity(pallet, 40)),
        })
    }
}

/// `SELECT ... FOR UPDATE` makes the second reader wait and see the first
/// writer's result
pub struct SelectForUpdate;

impl Scenario for SelectForUpdate {
    fn name(&self) -> &'static str {
        "read-committed-select-for-update"
    }

    fn summary(&self) -> &'static str {
        "locking reads serialize the check-then-decrement; capacity ends at 0"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Preemptive
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
        let pallet = ctx.fixtures().create_pallet(1)?;
        let wait = ctx.await_timeout();
        let locked_read = format!("{} FOR UPDATE", capacity_sql(pallet));
        let take = |b: &Bindings| -> HarnessResult<bool> {
            Ok(b.i64("capacity")? > 0)
        };
        let decrement = move || {
            vec![Step::execute_with(move |b| {
                Ok(format!(
                    "UPDATE pallets SET capacity = {} WHERE id = {}",
                    b.i64("capacity")? - 1,
                    pallet
                ))
            })]
        };

        let mut sched = ctx.preemptive();
        let first = sched.start(ctx.begin(
            TransactionScript::new("t1")
                .read("capacity", locked_read.clone())
                .checkpoint("locked")
                .when(take, decrement()),
        )?)?;
        let locked = sched.await_checkpoint(first, "locked", wait)?;

        sched.start(ctx.begin(
            TransactionScript::new("t2")
                .read("capacity", locked_read)
                .when(take, decrement()),
        )?)?;
        if locked.is_reached() {
            ctx.settle_locks(1)?;
            sched.resume(first)?;
        }
        Ok(ScenarioRun {
            outcomes: sched.await_all(wait)?,
            expected: ExpectedOutcome::new()
                .transaction("t1", ExpectedKind::Committed)
                .transaction("t2", ExpectedKind::Committed)
                .read("t1", "capacity", 1)
                .read("t2", "capacity", 0)
                .row(RowExpectation::pallet_capacity(pallet, 0)),
        })
    }
}

/// Counting twice in one transaction sees a row committed in between
pub struct NonRepeatableCount;

impl Scenario for NonRepeatableCount {
    fn name(&self) -> &'static str {
        "read-committed-non-repeatable-count"
    }

    fn summary(&self) -> &'static str {
        "an item count taken twice changes after a concurrent insert commits"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Cooperative
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
        let (outcomes, _) = count_around_insert(ctx, self.isolation())?;
        let counted = super::COUNT_ITEMS as i64;
        Ok(ScenarioRun {
            outcomes,
            expected: ExpectedOutcome::new()
                .transaction("counter", ExpectedKind::Committed)
                .transaction("loader", ExpectedKind::Committed)
                .read("counter", "first", counted)
                .read("counter", "second", counted + 1),
        })
    }
}
