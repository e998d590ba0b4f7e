//! Comparing what happened with what a scenario predicts
//!
//! An [`ExpectedOutcome`] lists per-transaction end states, values a
//! transaction must have read, committed row values to re-read after all
//! transactions settled, and aggregate failure counts. [`assert_outcome`]
//! checks all of them and returns every mismatch, not just the first.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use isolab_concurrency::{OutcomeKind, TransactionOutcome};
use isolab_core::{FailureKind, HarnessResult, Value};
use isolab_pool::ConnectionPool;

use crate::fixtures::capacity_sql;

/// Predicted end state of one transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "expect", content = "kind", rename_all = "snake_case")]
pub enum ExpectedKind {
    /// COMMIT succeeded
    Committed,
    /// Rolled back without a failure
    RolledBack,
    /// Failed with exactly this kind
    Failed(FailureKind),
    /// Failed with any kind
    AnyFailure,
    /// Finished in any way
    Settled,
}

impl ExpectedKind {
    /// True when `actual` satisfies this expectation
    pub fn matches(&self, actual: &OutcomeKind) -> bool {
        match (self, actual) {
            (ExpectedKind::Settled, _) => true,
            (ExpectedKind::Committed, OutcomeKind::Committed) => true,
            (ExpectedKind::RolledBack, OutcomeKind::RolledBack) => true,
            (ExpectedKind::AnyFailure, OutcomeKind::Failed(_)) => true,
            (ExpectedKind::Failed(kind), OutcomeKind::Failed(f)) => f.kind == *kind,
            _ => false,
        }
    }
}

impl fmt::Display for ExpectedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedKind::Committed => f.write_str("committed"),
            ExpectedKind::RolledBack => f.write_str("rolled_back"),
            ExpectedKind::Failed(kind) => f.write_str(kind.as_str()),
            ExpectedKind::AnyFailure => f.write_str("any failure"),
            ExpectedKind::Settled => f.write_str("settled"),
        }
    }
}

/// A value a transaction must have read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadExpectation {
    /// Transaction label
    pub transaction: String,
    /// Binding name
    pub binding: String,
    /// Expected scalar (first column of the first row)
    pub value: Value,
}

/// A committed value to re-read once every transaction has settled
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowExpectation {
    /// Human label, e.g. "pallet 12 capacity"
    pub description: String,
    /// Query returning one scalar
    pub sql: String,
    /// Expected value
    pub value: Value,
}

impl RowExpectation {
    /// Expect `sql` to return `value`
    pub fn scalar(
        description: impl Into<String>,
        sql: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            description: description.into(),
            sql: sql.into(),
            value: value.into(),
        }
    }

    /// Expect a pallet's committed capacity
    pub fn pallet_capacity(pallet: i64, capacity: i64) -> Self {
        Self::scalar(
            format!("pallet {} capacity", pallet),
            capacity_sql(pallet),
            capacity,
        )
    }
}

/// Number of transactions expected to fail with a kind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureCount {
    /// Failure kind
    pub kind: FailureKind,
    /// Expected number of transactions failing with it
    pub count: usize,
}

/// Everything a scenario predicts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpectedOutcome {
    /// End state per transaction label
    pub transactions: Vec<(String, ExpectedKind)>,
    /// Values read
    pub reads: Vec<ReadExpectation>,
    /// Committed values
    pub rows: Vec<RowExpectation>,
    /// Aggregate failure counts
    pub failure_counts: Vec<FailureCount>,
}

impl ExpectedOutcome {
    /// Nothing expected yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect the transaction labelled `label` to end as `kind`
    pub fn transaction(mut self, label: impl Into<String>, kind: ExpectedKind) -> Self {
        self.transactions.push((label.into(), kind));
        self
    }

    /// Expect `label` to have read `value` into `binding`
    pub fn read(
        mut self,
        label: impl Into<String>,
        binding: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.reads.push(ReadExpectation {
            transaction: label.into(),
            binding: binding.into(),
            value: value.into(),
        });
        self
    }

    /// Expect a committed value
    pub fn row(mut self, row: RowExpectation) -> Self {
        self.rows.push(row);
        self
    }

    /// Expect exactly `count` transactions to fail with `kind`
    pub fn failures(mut self, kind: FailureKind, count: usize) -> Self {
        self.failure_counts.push(FailureCount { kind, count });
        self
    }
}

/// What a mismatch is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// A transaction's end state
    Outcome,
    /// A value a transaction read
    Read,
    /// A committed row value
    Row,
    /// An aggregate failure count
    FailureCount,
}

impl MismatchKind {
    fn as_str(&self) -> &'static str {
        match self {
            MismatchKind::Outcome => "outcome",
            MismatchKind::Read => "read",
            MismatchKind::Row => "row",
            MismatchKind::FailureCount => "failures",
        }
    }
}

/// One expected-versus-actual difference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    /// What was compared
    pub kind: MismatchKind,
    /// Transaction label, row description or failure kind
    pub subject: String,
    /// Step the transaction stopped at, when relevant
    pub step: Option<usize>,
    /// Expected, rendered
    pub expected: String,
    /// Actual, rendered
    pub actual: String,
}

/// Every mismatch of one scenario run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutcomeDiff {
    /// Mismatches in check order
    pub mismatches: Vec<Mismatch>,
}

impl OutcomeDiff {
    /// True when everything matched
    pub fn is_empty(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Number of mismatches
    pub fn len(&self) -> usize {
        self.mismatches.len()
    }

    /// Iterate mismatches
    pub fn iter(&self) -> impl Iterator<Item = &Mismatch> {
        self.mismatches.iter()
    }

    fn push(
        &mut self,
        kind: MismatchKind,
        subject: impl Into<String>,
        step: Option<usize>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) {
        self.mismatches.push(Mismatch {
            kind,
            subject: subject.into(),
            step,
            expected: expected.into(),
            actual: actual.into(),
        });
    }
}

impl fmt::Display for OutcomeDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(no mismatches)");
        }
        let header = ["KIND", "SUBJECT", "STEP", "EXPECTED", "ACTUAL"];
        let rows: Vec<[String; 5]> = self
            .mismatches
            .iter()
            .map(|m| {
                [
                    m.kind.as_str().to_string(),
                    m.subject.clone(),
                    m.step.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
                    m.expected.clone(),
                    m.actual.clone(),
                ]
            })
            .collect();

        let mut widths = header.map(str::len);
        for row in &rows {
            for (w, cell) in widths.iter_mut().zip(row.iter()) {
                *w = (*w).max(cell.len());
            }
        }

        let line = |cells: [&str; 5]| -> String {
            cells
                .iter()
                .zip(widths.iter())
                .map(|(cell, w)| format!("{:<width$}", cell, width = *w))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        writeln!(f, "{}", line(header))?;
        for (i, row) in rows.iter().enumerate() {
            let cells = [
                row[0].as_str(),
                row[1].as_str(),
                row[2].as_str(),
                row[3].as_str(),
                row[4].as_str(),
            ];
            if i + 1 == rows.len() {
                write!(f, "{}", line(cells))?;
            } else {
                writeln!(f, "{}", line(cells))?;
            }
        }
        Ok(())
    }
}

/// A committed value as re-read after the run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservedRow {
    /// Row description
    pub description: String,
    /// Query that was run
    pub sql: String,
    /// Scalar it returned
    pub value: Option<Value>,
}

/// Result of checking a run against its expectation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioOutcome {
    /// Transaction outcomes as given
    pub transactions: Vec<TransactionOutcome>,
    /// Committed values re-read after the run
    pub rows: Vec<ObservedRow>,
    diff: OutcomeDiff,
}

impl ScenarioOutcome {
    /// Mismatches found
    pub fn diff(&self) -> &OutcomeDiff {
        &self.diff
    }

    /// True when nothing mismatched
    pub fn passed(&self) -> bool {
        self.diff.is_empty()
    }

    /// Split into parts
    pub fn into_parts(self) -> (Vec<TransactionOutcome>, Vec<ObservedRow>, OutcomeDiff) {
        (self.transactions, self.rows, self.diff)
    }
}

fn describe_actual(outcome: &TransactionOutcome) -> String {
    match &outcome.kind {
        OutcomeKind::Failed(f) => match &f.sql_state {
            Some(state) => format!("{} [{}]", f.kind.as_str(), state),
            None => f.kind.as_str().to_string(),
        },
        other => other.name().to_string(),
    }
}

fn stopped_at(outcome: &TransactionOutcome) -> usize {
    outcome
        .failure()
        .map(|f| f.step)
        .unwrap_or(outcome.steps_executed)
}

fn render(value: Option<&Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "<none>".to_string(),
    }
}

/// Compare settled transactions and committed data with `expected`
///
/// Committed rows are re-read through a fresh lease outside any explicit
/// transaction, so they see exactly what was committed.
///
/// # Errors
///
/// Fails when no lease is available or a row query errors; mismatches are
/// not errors.
pub fn assert_outcome(
    pool: &Arc<ConnectionPool>,
    transactions: &[TransactionOutcome],
    expected: &ExpectedOutcome,
) -> HarnessResult<ScenarioOutcome> {
    let mut diff = OutcomeDiff::default();
    let by_label = |label: &str| transactions.iter().find(|t| t.label == label);

    for (label, kind) in &expected.transactions {
        match by_label(label) {
            Some(outcome) if kind.matches(&outcome.kind) => {}
            Some(outcome) => diff.push(
                MismatchKind::Outcome,
                label.as_str(),
                Some(stopped_at(outcome)),
                kind.to_string(),
                describe_actual(outcome),
            ),
            None => diff.push(
                MismatchKind::Outcome,
                label.as_str(),
                None,
                kind.to_string(),
                "<not run>",
            ),
        }
    }

    for read in &expected.reads {
        let subject = format!("{}.{}", read.transaction, read.binding);
        let actual = by_label(&read.transaction)
            .and_then(|t| t.bindings.get(&read.binding))
            .and_then(|rows| rows.scalar());
        if actual != Some(&read.value) {
            diff.push(
                MismatchKind::Read,
                subject,
                by_label(&read.transaction).map(stopped_at),
                read.value.to_string(),
                render(actual),
            );
        }
    }

    let mut rows = Vec::with_capacity(expected.rows.len());
    if !expected.rows.is_empty() {
        let mut lease = pool.acquire()?;
        for row in &expected.rows {
            let result = lease.execute(&row.sql)?;
            let value = result.scalar().cloned();
            if value.as_ref() != Some(&row.value) {
                diff.push(
                    MismatchKind::Row,
                    row.description.as_str(),
                    None,
                    row.value.to_string(),
                    render(value.as_ref()),
                );
            }
            rows.push(ObservedRow {
                description: row.description.clone(),
                sql: row.sql.clone(),
                value,
            });
        }
    }

    for expected_count in &expected.failure_counts {
        let actual = transactions
            .iter()
            .filter(|t| t.failure().map(|f| f.kind) == Some(expected_count.kind))
            .count();
        if actual != expected_count.count {
            diff.push(
                MismatchKind::FailureCount,
                expected_count.kind.as_str(),
                None,
                expected_count.count.to_string(),
                actual.to_string(),
            );
        }
    }

    Ok(ScenarioOutcome {
        transactions: transactions.to_vec(),
        rows,
        diff,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolab_concurrency::TransactionFailure;
    use isolab_core::mock::MockConnector;
    use isolab_core::{IsolationLevel, RowSet, SqlState, TransactionId};
    use isolab_pool::PoolConfig;
    use std::collections::BTreeMap;

    fn pool(mock: &MockConnector) -> Arc<ConnectionPool> {
        ConnectionPool::new(mock.clone(), PoolConfig::default()).unwrap()
    }

    fn outcome(label: &str, kind: OutcomeKind) -> TransactionOutcome {
        let mut bindings = BTreeMap::new();
        bindings.insert("capacity".to_string(), RowSet::scalar_of("capacity", 1));
        TransactionOutcome {
            id: TransactionId::next(),
            label: label.to_string(),
            isolation: IsolationLevel::ReadCommitted,
            steps_executed: 4,
            kind,
            bindings,
        }
    }

    fn serialization_failure() -> OutcomeKind {
        OutcomeKind::Failed(TransactionFailure {
            kind: FailureKind::SerializationFailure,
            sql_state: Some(SqlState::SERIALIZATION_FAILURE),
            message: "could not serialize access".to_string(),
            step: 3,
            sql: Some("UPDATE pallets SET capacity = 0".to_string()),
        })
    }

    #[test]
    fn matching_outcome_has_empty_diff() {
        let mock = MockConnector::new();
        mock.respond("SELECT capacity", RowSet::scalar_of("capacity", 0));
        let outcomes = vec![
            outcome("t1", OutcomeKind::Committed),
            outcome("t2", serialization_failure()),
        ];
        let expected = ExpectedOutcome::new()
            .transaction("t1", ExpectedKind::Committed)
            .transaction("t2", ExpectedKind::Failed(FailureKind::SerializationFailure))
            .read("t1", "capacity", 1)
            .row(RowExpectation::scalar("pallet capacity", "SELECT capacity FROM pallets", 0))
            .failures(FailureKind::SerializationFailure, 1);

        let result = assert_outcome(&pool(&mock), &outcomes, &expected).unwrap();
        assert!(result.passed(), "{}", result.diff());
        assert_eq!(result.rows[0].value, Some(Value::Int(0)));
    }

    #[test]
    fn every_mismatch_is_reported() {
        let mock = MockConnector::new();
        mock.respond("SELECT capacity", RowSet::scalar_of("capacity", -1));
        let outcomes = vec![outcome("t1", serialization_failure())];
        let expected = ExpectedOutcome::new()
            .transaction("t1", ExpectedKind::Committed)
            .transaction("t9", ExpectedKind::Settled)
            .read("t1", "capacity", 5)
            .row(RowExpectation::scalar("pallet capacity", "SELECT capacity FROM pallets", 0))
            .failures(FailureKind::DeadlockDetected, 1);

        let result = assert_outcome(&pool(&mock), &outcomes, &expected).unwrap();
        let kinds: Vec<_> = result.diff().iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MismatchKind::Outcome,
                MismatchKind::Outcome,
                MismatchKind::Read,
                MismatchKind::Row,
                MismatchKind::FailureCount,
            ]
        );

        let first = &result.diff().mismatches[0];
        assert_eq!(first.subject, "t1");
        assert_eq!(first.step, Some(3));
        assert_eq!(first.expected, "committed");
        assert_eq!(first.actual, "serialization_failure [40001]");
        assert_eq!(result.diff().mismatches[1].actual, "<not run>");
        assert_eq!(result.diff().mismatches[3].actual, "-1");
    }

    #[test]
    fn expected_kind_matching() {
        let failed = serialization_failure();
        assert!(ExpectedKind::Settled.matches(&OutcomeKind::RolledBack));
        assert!(ExpectedKind::AnyFailure.matches(&failed));
        assert!(ExpectedKind::Failed(FailureKind::SerializationFailure).matches(&failed));
        assert!(!ExpectedKind::Failed(FailureKind::DeadlockDetected).matches(&failed));
        assert!(!ExpectedKind::Committed.matches(&failed));
        assert!(!ExpectedKind::AnyFailure.matches(&OutcomeKind::Committed));
    }

    #[test]
    fn no_row_expectations_means_no_lease() {
        let mock = MockConnector::new();
        let expected = ExpectedOutcome::new().transaction("t1", ExpectedKind::Committed);
        assert_outcome(&pool(&mock), &[outcome("t1", OutcomeKind::Committed)], &expected).unwrap();
        assert_eq!(mock.opened(), 0);
    }

    #[test]
    fn diff_renders_as_a_table() {
        let mut diff = OutcomeDiff::default();
        diff.push(MismatchKind::Row, "pallet 1 capacity", None, "0", "-1");
        diff.push(MismatchKind::Outcome, "t2", Some(3), "committed", "deadlock_detected [40P01]");
        let rendered = diff.to_string();
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("KIND"));
        assert!(lines[1].contains("pallet 1 capacity"));
        assert!(lines[2].contains("deadlock_detected [40P01]"));
        let step_col = lines[0].find("STEP").unwrap();
        assert_eq!(&lines[2][step_col..step_col + 1], "3");
    }

    #[test]
    fn diff_serializes() {
        let mut diff = OutcomeDiff::default();
        diff.push(MismatchKind::FailureCount, "deadlock_detected", None, "1", "0");
        let json = serde_json::to_value(&diff).unwrap();
        assert_eq!(json["mismatches"][0]["kind"], "failure_count");
        assert_eq!(json["mismatches"][0]["step"], serde_json::Value::Null);
    }
}
