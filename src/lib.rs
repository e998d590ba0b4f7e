//! Isolation Lab - deterministic reproduction of transaction-isolation
//! anomalies against PostgreSQL
//!
//! Scripted transactions run over leased connections, interleaved either
//! cooperatively on one thread or preemptively on one thread each, and their
//! outcomes are checked against what a scenario predicts.
//!
//! # Quick Start
//!
//! ```ignore
//! use isolation_lab::{ConnectionPool, CooperativeScheduler, PgConnector, PoolConfig,
//!     TransactionScript};
//!
//! let pool = ConnectionPool::new(PgConnector::from_url(url)?, PoolConfig::default())?;
//! let mut sched = CooperativeScheduler::new();
//! let t1 = sched.register(
//!     TransactionScript::new("t1")
//!         .read("capacity", "SELECT capacity FROM pallets WHERE id = 1")
//!         .checkpoint("read")
//!         .execute_with(|b| Ok(format!(
//!             "UPDATE pallets SET capacity = {} WHERE id = 1", b.i64("capacity")? - 1)))
//!         .begin(&pool)?,
//! );
//! sched.run_to_checkpoint(t1, "read")?;
//! ```
//!
//! # Architecture
//!
//! | Crate | Role |
//! |-------|------|
//! | `isolab-core` | values, errors, SQLSTATE classification, the driver seam |
//! | `isolab-pool` | bounded pool and exclusive leases |
//! | `isolab-postgres` | the PostgreSQL driver binding |
//! | `isolab-concurrency` | scripts, scripted transactions, both schedulers |
//! | `isolab-scenario` | configuration, fixtures, assertions, the catalog |

pub use isolab_concurrency::{
    Bindings, CheckpointWait, CooperativeScheduler, OutcomeKind, PreemptiveScheduler, ResumeToken,
    ScheduleEvent, ScriptedTransaction, Step, StepOutcome, TransactionFailure,
    TransactionOutcome, TransactionScript, TransactionState,
};
pub use isolab_core::{
    FailureKind, HarnessError, HarnessResult, IsolationLevel, RowSet, SqlState, Value,
};
pub use isolab_pool::{ConnectionLease, ConnectionPool, PoolConfig};
pub use isolab_postgres::PgConnector;
pub use isolab_scenario::{
    assert_outcome, catalog, find, Discipline, ExpectedKind, ExpectedOutcome, Fixtures,
    HarnessConfig, OutcomeDiff, RowExpectation, Scenario, ScenarioContext, ScenarioReport,
    ScenarioRun, ScenarioRunner, Verdict,
};
