//! Built-in scenarios
//!
//! Each scenario reproduces one isolation phenomenon on the warehouse
//! schema. Names are stable and used on the command line.

mod locking;
mod read_committed;
mod repeatable_read;
mod serializable;

pub use locking::{DeadlockDetected, StatementTimeoutOnTableLock};
pub use read_committed::{
    BlockedWriter, LostTopUp, LostUpdate, NonRepeatableCount, Overfill, SelectForUpdate,
};
pub use repeatable_read::{RepeatableReadSerializationFailure, StableCount, WriteSkew};
pub use serializable::SerializablePreventsWriteSkew;

use isolab_concurrency::{CooperativeScheduler, Step, TransactionOutcome, TransactionScript};
use isolab_core::{HarnessResult, IsolationLevel};

use crate::fixtures::item_count_sql;
use crate::scenario::{Scenario, ScenarioContext};

/// Every built-in scenario, in presentation order
pub fn catalog() -> Vec<Box<dyn Scenario>> {
    vec![
        Box::new(LostUpdate),
        Box::new(Overfill),
        Box::new(LostTopUp),
        Box::new(BlockedWriter),
        Box::new(SelectForUpdate),
        Box::new(NonRepeatableCount),
        Box::new(StableCount),
        Box::new(RepeatableReadSerializationFailure),
        Box::new(WriteSkew),
        Box::new(SerializablePreventsWriteSkew),
        Box::new(StatementTimeoutOnTableLock),
        Box::new(DeadlockDetected),
    ]
}

/// Look a scenario up by name
pub fn find(name: &str) -> Option<Box<dyn Scenario>> {
    catalog().into_iter().find(|s| s.name() == name)
}

/// Items stacked on each counted pallet
const COUNT_ITEMS: usize = 9;

/// Count a pallet's items twice around a concurrent insert
///
/// Returns the outcomes (`counter` first) and the pallet id.
fn count_around_insert(
    ctx: &ScenarioContext,
    isolation: IsolationLevel,
) -> HarnessResult<(Vec<TransactionOutcome>, i64)> {
    let pallet = ctx.fixtures().create_pallet(10)?;
    ctx.fixtures().add_items(pallet, COUNT_ITEMS)?;

    let mut sched = CooperativeScheduler::new();
    let counter = sched.register(
        ctx.begin(
            TransactionScript::new("counter")
                .isolation(isolation)
                .read("first", item_count_sql(pallet))
                .checkpoint("counted")
                .read("second", item_count_sql(pallet)),
        )?,
    );
    let loader = sched.register(
        ctx.begin(
            TransactionScript::new("loader")
                .isolation(isolation)
                .execute(format!(
                    "INSERT INTO items (name, pallet_id, code) VALUES ('late', {}, 'late0001')",
                    pallet
                )),
        )?,
    );

    sched.run_to_checkpoint(counter, "counted")?;
    sched.run_to_end(loader)?;
    sched.run_to_end(counter)?;
    Ok((sched.finish()?, pallet))
}

/// Two pallets whose combined capacity must stay positive
///
/// Both transactions check the total, then each takes one unit from a
/// different pallet. Returns the outcomes (`left` first) and the sum query.
fn write_skew(
    ctx: &ScenarioContext,
    isolation: IsolationLevel,
) -> HarnessResult<(Vec<TransactionOutcome>, String)> {
    let a = ctx.fixtures().create_pallet(1)?;
    let b = ctx.fixtures().create_pallet(1)?;
    let total_sql = format!(
        "SELECT sum(capacity) AS total FROM pallets WHERE id IN ({}, {})",
        a, b
    );

    let take_from = |label: &str, pallet: i64| {
        TransactionScript::new(label)
            .isolation(isolation)
            .read("total", total_sql.clone())
            .checkpoint("checked")
            .when(
                |seen| Ok(seen.i64("total")? >= 2),
                vec![Step::execute(format!(
                    "UPDATE pallets SET capacity = capacity - 1 WHERE id = {}",
                    pallet
                ))],
            )
    };

    let mut sched = CooperativeScheduler::new();
    let left = sched.register(ctx.begin(take_from("left", a))?);
    let right = sched.register(ctx.begin(take_from("right", b))?);

    sched.run_to_checkpoint(left, "checked")?;
    sched.run_to_checkpoint(right, "checked")?;
    sched.run_to_end(left)?;
    sched.run_to_end(right)?;
    Ok((sched.finish()?, total_sql))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique_and_findable() {
        let all = catalog();
        assert_eq!(all.len(), 12);
        let names: HashSet<_> = all.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), all.len());
        for scenario in &all {
            assert_eq!(find(scenario.name()).map(|s| s.name()), Some(scenario.name()));
            assert!(!scenario.summary().is_empty());
        }
        assert!(find("no-such-scenario").is_none());
    }

    #[test]
    fn names_are_kebab_case() {
        for scenario in catalog() {
            assert!(scenario
                .name()
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '-'));
        }
    }
}
