//! Scenarios for the isolation lab
//!
//! This crate turns the transaction machinery into reproducible experiments:
//! - HarnessConfig: `isolab.toml` loading with environment overrides
//! - Fixtures: the warehouse schema, seed data and lock-wait polling
//! - assert_outcome: expected versus actual, as a structured diff
//! - Scenario / ScenarioRunner: the experiment trait and its runner
//! - catalog: the built-in scenarios

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assertion;
pub mod catalog;
pub mod config;
pub mod fixtures;
pub mod scenario;

pub use assertion::{
    assert_outcome, ExpectedKind, ExpectedOutcome, FailureCount, Mismatch, MismatchKind,
    ObservedRow, OutcomeDiff, ReadExpectation, RowExpectation, ScenarioOutcome,
};
pub use catalog::{catalog, find};
pub use config::HarnessConfig;
pub use fixtures::Fixtures;
pub use scenario::{
    Discipline, Scenario, ScenarioContext, ScenarioReport, ScenarioRun, ScenarioRunner, Verdict,
};
