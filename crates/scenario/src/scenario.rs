//! Scenario trait and runner
//!
//! A scenario sets up its own rows, drives a handful of scripted transactions
//! through one of the schedulers, and hands back the outcomes together with
//! what it predicts. The runner checks the prediction and turns the result
//! into a [`ScenarioReport`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use isolab_concurrency::{
    PreemptiveScheduler, ScriptedTransaction, TransactionOutcome, TransactionScript,
};
use isolab_core::{HarnessError, HarnessResult, IsolationLevel};
use isolab_pool::ConnectionPool;

use crate::assertion::{assert_outcome, ExpectedOutcome, ObservedRow, OutcomeDiff};
use crate::config::HarnessConfig;
use crate::fixtures::Fixtures;

/// How a scenario's transactions are interleaved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
    /// One thread; statements go out in the order the scenario steps them
    Cooperative,
    /// One thread per transaction; checkpoints park the thread
    Preemptive,
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discipline::Cooperative => f.write_str("cooperative"),
            Discipline::Preemptive => f.write_str("preemptive"),
        }
    }
}

/// What a scenario hands back to the runner
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    /// Every transaction's terminal record, in start order
    pub outcomes: Vec<TransactionOutcome>,
    /// What the scenario predicts
    pub expected: ExpectedOutcome,
}

/// A reproducible isolation phenomenon
pub trait Scenario: Send + Sync {
    /// Stable kebab-case name used on the command line
    fn name(&self) -> &'static str;

    /// One-line description
    fn summary(&self) -> &'static str;

    /// Scheduler the scenario uses
    fn discipline(&self) -> Discipline;

    /// Isolation level the scenario's transactions run at
    fn isolation(&self) -> IsolationLevel;

    /// Set up, interleave and settle every transaction
    ///
    /// Statement failures belong in the outcomes; an `Err` aborts the
    /// scenario.
    fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun>;
}

/// Everything a scenario may use while it runs
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    pool: Arc<ConnectionPool>,
    config: HarnessConfig,
    fixtures: Fixtures,
}

impl ScenarioContext {
    /// Context over `pool`
    pub fn new(pool: Arc<ConnectionPool>, config: HarnessConfig) -> Self {
        Self {
            fixtures: Fixtures::new(Arc::clone(&pool)),
            pool,
            config,
        }
    }

    /// The shared pool
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Harness configuration
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Setup and inspection helpers
    pub fn fixtures(&self) -> &Fixtures {
        &self.fixtures
    }

    /// Lease a connection for `script`
    pub fn begin(&self, script: TransactionScript) -> HarnessResult<ScriptedTransaction> {
        script.begin(&self.pool)
    }

    /// Preemptive scheduler that, if dropped on an early return, gives
    /// running statements the configured grace before cancelling them
    pub fn preemptive(&self) -> PreemptiveScheduler {
        PreemptiveScheduler::new().with_drop_grace(self.config.abort_grace())
    }

    /// Bound on preemptive waits
    pub fn await_timeout(&self) -> Duration {
        self.config.await_timeout()
    }

    /// Wait until `waiters` sessions are queued on a lock
    pub fn settle_locks(&self, waiters: i64) -> HarnessResult<()> {
        self.fixtures
            .await_lock_waiters(waiters, self.config.lock_settle(), self.config.await_timeout())
    }
}

/// Result of one scenario
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Every expectation held
    Passed,
    /// The scenario ran but something differed
    Failed {
        /// What differed
        diff: OutcomeDiff,
    },
    /// The scenario could not run to completion
    Aborted {
        /// Fatal error
        error: HarnessError,
    },
}

impl Verdict {
    /// True for `Passed`
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }

    /// Short name for tables
    pub fn name(&self) -> &'static str {
        match self {
            Verdict::Passed => "passed",
            Verdict::Failed { .. } => "failed",
            Verdict::Aborted { .. } => "aborted",
        }
    }
}

/// Serializable record of one scenario run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    /// Unique id of this run
    pub run_id: Uuid,
    /// Scenario name
    pub scenario: String,
    /// Scenario summary
    pub summary: String,
    /// Scheduler used
    pub discipline: Discipline,
    /// Isolation level
    pub isolation: IsolationLevel,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub elapsed_ms: u64,
    /// Outcome
    pub verdict: Verdict,
    /// Transaction outcomes (empty when aborted)
    pub transactions: Vec<TransactionOutcome>,
    /// Committed values re-read after the run
    pub rows: Vec<ObservedRow>,
}

impl ScenarioReport {
    /// True when the scenario passed
    pub fn passed(&self) -> bool {
        self.verdict.passed()
    }
}

/// Runs scenarios against one pool
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    ctx: ScenarioContext,
}

impl ScenarioRunner {
    /// Runner over `pool`
    pub fn new(pool: Arc<ConnectionPool>, config: HarnessConfig) -> Self {
        Self {
            ctx: ScenarioContext::new(pool, config),
        }
    }

    /// Context handed to scenarios
    pub fn context(&self) -> &ScenarioContext {
        &self.ctx
    }

    /// Create the schema
    pub fn prepare(&self) -> HarnessResult<()> {
        self.ctx.fixtures.install_schema()
    }

    /// Run one scenario and check its prediction
    pub fn run(&self, scenario: &dyn Scenario) -> ScenarioReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(
            target: "isolab::scenario",
            scenario = scenario.name(),
            run = %run_id,
            discipline = %scenario.discipline(),
            isolation = %scenario.isolation(),
            "Scenario started"
        );

        let checked = scenario.run(&self.ctx).and_then(|run| {
            assert_outcome(&self.ctx.pool, &run.outcomes, &run.expected)
        });

        let (verdict, transactions, rows) = match checked {
            Ok(outcome) => {
                let (transactions, rows, diff) = outcome.into_parts();
                let verdict = if diff.is_empty() {
                    Verdict::Passed
                } else {
                    Verdict::Failed { diff }
                };
                (verdict, transactions, rows)
            }
            Err(error) => (Verdict::Aborted { error }, Vec::new(), Vec::new()),
        };

        let elapsed_ms = clock.elapsed().as_millis() as u64;
        match &verdict {
            Verdict::Passed => info!(
                target: "isolab::scenario",
                scenario = scenario.name(),
                elapsed_ms,
                "Scenario passed"
            ),
            Verdict::Failed { diff } => warn!(
                target: "isolab::scenario",
                scenario = scenario.name(),
                mismatches = diff.len(),
                "Scenario failed"
            ),
            Verdict::Aborted { error } => warn!(
                target: "isolab::scenario",
                scenario = scenario.name(),
                error = %error,
                "Scenario aborted"
            ),
        }

        ScenarioReport {
            run_id,
            scenario: scenario.name().to_string(),
            summary: scenario.summary().to_string(),
            discipline: scenario.discipline(),
            isolation: scenario.isolation(),
            started_at,
            elapsed_ms,
            verdict,
            transactions,
            rows,
        }
    }

    /// Run every scenario in order
    pub fn run_all(&self, scenarios: &[Box<dyn Scenario>]) -> Vec<ScenarioReport> {
        scenarios.iter().map(|s| self.run(s.as_ref())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::{ExpectedKind, RowExpectation};
    use isolab_concurrency::CooperativeScheduler;
    use isolab_core::mock::MockConnector;
    use isolab_core::RowSet;
    use isolab_pool::PoolConfig;

    struct SingleUpdate {
        expect_capacity: i64,
    }

    impl Scenario for SingleUpdate {
        fn name(&self) -> &'static str {
            "single-update"
        }

        fn summary(&self) -> &'static str {
            "one transaction sets a capacity"
        }

        fn discipline(&self) -> Discipline {
            Discipline::Cooperative
        }

        fn isolation(&self) -> IsolationLevel {
            IsolationLevel::ReadCommitted
        }

        fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
            let mut sched = CooperativeScheduler::new();
            let t1 = sched.register(
                ctx.begin(
                    TransactionScript::new("t1")
                        .execute("UPDATE pallets SET capacity = 3 WHERE id = 1"),
                )?,
            );
            sched.run_to_end(t1)?;
            Ok(ScenarioRun {
                outcomes: sched.finish()?,
                expected: ExpectedOutcome::new()
                    .transaction("t1", ExpectedKind::Committed)
                    .row(RowExpectation::scalar(
                        "pallet 1 capacity",
                        "SELECT capacity FROM pallets WHERE id = 1",
                        self.expect_capacity,
                    )),
            })
        }
    }

    struct Broken;

    impl Scenario for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn summary(&self) -> &'static str {
            "reads a binding that was never bound"
        }

        fn discipline(&self) -> Discipline {
            Discipline::Cooperative
        }

        fn isolation(&self) -> IsolationLevel {
            IsolationLevel::ReadCommitted
        }

        fn run(&self, ctx: &ScenarioContext) -> HarnessResult<ScenarioRun> {
            let mut sched = CooperativeScheduler::new();
            let t1 = sched.register(ctx.begin(
                TransactionScript::new("t1").execute_with(|b| Ok(format!("SELECT {}", b.i64("nope")?))),
            )?);
            sched.run_to_end(t1)?;
            Ok(ScenarioRun {
                outcomes: sched.finish()?,
                expected: ExpectedOutcome::new(),
            })
        }
    }

    fn runner(mock: &MockConnector) -> ScenarioRunner {
        let pool = ConnectionPool::new(mock.clone(), PoolConfig::default()).unwrap();
        ScenarioRunner::new(pool, HarnessConfig::default())
    }

    #[test]
    fn matching_prediction_passes() {
        let mock = MockConnector::new();
        mock.respond("SELECT capacity", RowSet::scalar_of("capacity", 3));
        let report = runner(&mock).run(&SingleUpdate { expect_capacity: 3 });

        assert!(report.passed(), "{:?}", report.verdict);
        assert_eq!(report.scenario, "single-update");
        assert_eq!(report.transactions.len(), 1);
        assert_eq!(report.rows.len(), 1);
    }

    #[test]
    fn wrong_prediction_fails_with_diff() {
        let mock = MockConnector::new();
        mock.respond("SELECT capacity", RowSet::scalar_of("capacity", 3));
        let report = runner(&mock).run(&SingleUpdate { expect_capacity: 4 });

        match &report.verdict {
            Verdict::Failed { diff } => {
                assert_eq!(diff.len(), 1);
                assert_eq!(diff.mismatches[0].expected, "4");
                assert_eq!(diff.mismatches[0].actual, "3");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn script_error_aborts() {
        let mock = MockConnector::new();
        let runner = runner(&mock);
        let report = runner.run(&Broken);

        assert!(matches!(
            report.verdict,
            Verdict::Aborted { error: HarnessError::Script { .. } }
        ));
        assert!(report.transactions.is_empty());
        assert_eq!(runner.context().pool().checked_out(), 0);
    }

    #[test]
    fn run_all_keeps_order() {
        let mock = MockConnector::new();
        mock.respond("SELECT capacity", RowSet::scalar_of("capacity", 3));
        let scenarios: Vec<Box<dyn Scenario>> =
            vec![Box::new(SingleUpdate { expect_capacity: 3 }), Box::new(Broken)];
        let reports = runner(&mock).run_all(&scenarios);

        let verdicts: Vec<_> = reports.iter().map(|r| r.verdict.name()).collect();
        assert_eq!(verdicts, vec!["passed", "aborted"]);
        assert_ne!(reports[0].run_id, reports[1].run_id);
    }

    #[test]
    fn report_serializes_for_json_output() {
        let mock = MockConnector::new();
        mock.respond("SELECT capacity", RowSet::scalar_of("capacity", 3));
        let report = runner(&mock).run(&SingleUpdate { expect_capacity: 3 });

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["scenario"], "single-update");
        assert_eq!(json["discipline"], "cooperative");
        assert_eq!(json["verdict"]["verdict"], "passed");
        assert_eq!(json["transactions"][0]["label"], "t1");
    }

    #[test]
    fn prepare_installs_schema() {
        let mock = MockConnector::new();
        runner(&mock).prepare().unwrap();
        assert!(mock
            .statements()
            .iter()
            .any(|s| s.contains("CREATE TABLE IF NOT EXISTS pallets")));
    }
}
