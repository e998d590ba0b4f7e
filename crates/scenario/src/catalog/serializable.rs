//! Serializable snapshot isolation

use isolab_core::{FailureKind, HarnessResult, IsolationLevel};

use crate::assertion::{ExpectedKind, ExpectedOutcome, RowExpectation};
use crate::scenario::{Discipline, Scenario, ScenarioContext, ScenarioRun};

use super::write_skew;

/// The write-skew interleaving is rejected for the second writer
pub struct SerializablePreventsWriteSkew;

impl Scenario for SerializablePreventsWriteSkew {
    fn name(&self) -> &'static str {
        "serializable-prevents-write-skew"
    }

    fn summary(&self) -> &'static str {
        "the write-skew interleaving under serializable fails the second writer"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Cooperative
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }

    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
        let (outcomes, total_sql) = write_skew(ctx, self.isolation())?;
        Ok(ScenarioRun {
            outcomes,
            expected: ExpectedOutcome::new()
                .transaction("left", ExpectedKind::Committed)
                .transaction(
                    "right",
                    ExpectedKind::Failed(FailureKind::SerializationFailure),
                )
                .row(RowExpectation::scalar("combined capacity", total_sql, 1)),
        })
    }
}
