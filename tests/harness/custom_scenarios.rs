//! Scenarios defined outside the catalog run like built-in ones.

use std::sync::Arc;

use isolab_core::mock::MockConnector;
use isolation_lab::{
    CooperativeScheduler, Discipline, ExpectedKind, ExpectedOutcome, FailureKind, HarnessResult,
    IsolationLevel, RowExpectation, RowSet, Scenario, ScenarioContext,
    ScenarioRun, ScenarioRunner, SqlState, TransactionScript, Verdict,
};

use crate::common::{mock_config, mock_pool};

/// Reserve a SKU code twice; the second insert violates a unique index.
struct DuplicateSku;

impl Scenario for DuplicateSku {
    fn name(&self) -> &'static str {
        "duplicate-sku"
    }

    fn summary(&self) -> &'static str {
        "the second insert of the same code is rejected"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Cooperative
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
        let insert = "INSERT INTO skus (code, name) VALUES ('ab12cd34', 'crate')";
        let mut sched = CooperativeScheduler::new();
        let first = sched.register(ctx.begin(TransactionScript::new("first").execute(insert))?);
        let second = sched.register(ctx.begin(TransactionScript::new("second").execute(insert))?);
        sched.run_to_end(first)?;
        sched.run_to_end(second)?;
        Ok(ScenarioRun {
            outcomes: sched.finish()?,
            expected: ExpectedOutcome::new()
                .transaction("first", ExpectedKind::Committed)
                .transaction("second", ExpectedKind::Failed(FailureKind::OtherStatementError))
                .row(RowExpectation::scalar(
                    "sku count",
                    "SELECT count(*) FROM skus WHERE code = 'ab12cd34'",
                    1,
                )),
        })
    }
}

/// Two preemptive writers, resumed in reverse start order.
struct ReverseResume;

impl Scenario for ReverseResume {
    fn name(&self) -> &'static str {
        "reverse-resume"
    }

    fn summary(&self) -> &'static str {
        "the second transaction to park is the first to finish"
    }

    fn discipline(&self) -> Discipline {
        Discipline::Preemptive
    }

    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::RepeatableRead
    }

    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
        let wait = ctx.await_timeout();
        let script = |label: &str, capacity: i64| {
            TransactionScript::new(label)
                .isolation(self.isolation())
                .checkpoint("ready")
                .execute(format!("UPDATE pallets SET capacity = {} WHERE id = 1", capacity))
        };
        let mut sched = ctx.preemptive();
        let early = sched.start(ctx.begin(script("early", 1))?)?;
        let late = sched.start(ctx.begin(script("late", 2))?)?;
        sched.await_checkpoint(early, "ready", wait)?;
        sched.await_checkpoint(late, "ready", wait)?;

        sched.resume(late)?;
        sched.await_settled(late, wait)?;
        sched.resume(early)?;

        Ok(ScenarioRun {
            outcomes: sched.await_all(wait)?,
            expected: ExpectedOutcome::new()
                .transaction("early", ExpectedKind::Committed)
                .transaction("late", ExpectedKind::Committed)
                .row(RowExpectation::pallet_capacity(1, 1)),
        })
    }
}

fn runner(mock: &MockConnector) -> (ScenarioRunner, Arc<isolation_lab::ConnectionPool>) {
    let pool = mock_pool(mock, 4);
    (ScenarioRunner::new(Arc::clone(&pool), mock_config()), pool)
}

#[test]
fn constraint_violation_is_captured_as_other_statement_error() {
    let mock = MockConnector::new();
    mock.respond_once("INSERT INTO skus", RowSet::empty().with_rows_affected(1));
    mock.fail(
        "INSERT INTO skus",
        SqlState::new("23505"),
        "duplicate key value violates unique constraint",
    );
    mock.respond("count(*)", RowSet::scalar_of("count", 1));
    let (runner, pool) = runner(&mock);

    let report = runner.run(&DuplicateSku);

    assert!(report.passed(), "{:?}", report.verdict);
    let failure = report.transactions[1].failure().unwrap();
    assert_eq!(failure.sql_state.as_ref().map(|s| s.code()), Some("23505"));
    assert_eq!(pool.checked_out(), 0);
}

#[test]
fn reverse_resume_orders_the_writes() {
    let mock = MockConnector::new();
    mock.respond("SELECT capacity", RowSet::scalar_of("capacity", 1));
    let (runner, _) = runner(&mock);

    let report = runner.run(&ReverseResume);

    assert!(report.passed(), "{:?}", report.verdict);
    let updates: Vec<_> = mock
        .statements()
        .into_iter()
        .filter(|s| s.starts_with("UPDATE"))
        .collect();
    assert_eq!(
        updates,
        vec![
            "UPDATE pallets SET capacity = 2 WHERE id = 1",
            "UPDATE pallets SET capacity = 1 WHERE id = 1",
        ]
    );
}

#[test]
fn wrong_prediction_shows_up_in_json_report() {
    let mock = MockConnector::new();
    mock.respond("SELECT capacity", RowSet::scalar_of("capacity", 2));
    let (runner, _) = runner(&mock);

    let report = runner.run(&ReverseResume);

    let diff = match &report.verdict {
        Verdict::Failed { diff } => diff.clone(),
        other => panic!("expected failure, got {other:?}"),
    };
    assert_eq!(diff.len(), 1);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["scenario"], "reverse-resume");
    assert_eq!(json["isolation"], serde_json::to_value(IsolationLevel::RepeatableRead).unwrap());
    assert_eq!(json["verdict"]["diff"]["mismatches"][0]["kind"], "row");
    assert_eq!(json["rows"][0]["value"], serde_json::to_value(report.rows[0].value.clone()).unwrap());
}

#[test]
fn pool_exhaustion_aborts_without_leaking() {
    let mock = MockConnector::new();
    let pool = mock_pool(&mock, 1);
    let runner = ScenarioRunner::new(Arc::clone(&pool), mock_config());

    let report = runner.run(&ReverseResume);

    assert!(matches!(
        report.verdict,
        Verdict::Aborted {
            error: isolation_lab::HarnessError::PoolExhausted { max_size: 1, .. }
        }
    ));
    assert_eq!(pool.checked_out(), 0);
}
