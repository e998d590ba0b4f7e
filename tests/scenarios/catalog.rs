//! Each built-in scenario reproduces its phenomenon on a real server.

use isolation_lab::{find, FailureKind, ScenarioReport, Verdict};

use crate::common::live_runner;

fn run(name: &str) -> Option<ScenarioReport> {
    let runner = live_runner()?;
    let scenario = find(name).unwrap_or_else(|| panic!("no scenario {name}"));
    Some(runner.run(scenario.as_ref()))
}

fn assert_passed(report: &ScenarioReport) {
    match &report.verdict {
        Verdict::Passed => {}
        Verdict::Failed { diff } => panic!("{} failed:\n{}", report.scenario, diff),
        Verdict::Aborted { error } => panic!("{} aborted: {}", report.scenario, error),
    }
}

macro_rules! scenario_test {
    ($test:ident, $name:literal) => {
        #[test]
        fn $test() {
            if let Some(report) = run($name) {
                assert_passed(&report);
            }
        }
    };
}

scenario_test!(read_committed_lost_update, "read-committed-lost-update");
scenario_test!(read_committed_overfill, "read-committed-overfill");
scenario_test!(read_committed_lost_top_up, "read-committed-lost-top-up");
scenario_test!(read_committed_blocked_writer, "read-committed-blocked-writer");
scenario_test!(read_committed_select_for_update, "read-committed-select-for-update");
scenario_test!(read_committed_non_repeatable_count, "read-committed-non-repeatable-count");
scenario_test!(repeatable_read_stable_count, "repeatable-read-stable-count");
scenario_test!(repeatable_read_write_skew, "repeatable-read-write-skew");
scenario_test!(serializable_prevents_write_skew, "serializable-prevents-write-skew");

#[test]
fn repeatable_read_conflict_carries_sqlstate() {
    let Some(report) = run("repeatable-read-serialization-failure") else {
        return;
    };
    assert_passed(&report);
    let failure = report.transactions[0].failure().expect("snapshot should fail");
    assert_eq!(failure.kind, FailureKind::SerializationFailure);
    assert_eq!(failure.sql_state.as_ref().map(|s| s.code()), Some("40001"));
    assert!(failure.sql.as_deref().unwrap_or("").starts_with("UPDATE pallets"));
}

#[test]
fn table_lock_wait_times_out_within_bound() {
    let Some(report) = run("statement-timeout-on-table-lock") else {
        return;
    };
    assert_passed(&report);
    let failure = report.transactions[1].failure().expect("reader should time out");
    assert_eq!(failure.sql_state.as_ref().map(|s| s.code()), Some("57014"));
    assert!(report.elapsed_ms < 10_000);
}

#[test]
fn deadlock_has_exactly_one_victim() {
    let Some(report) = run("deadlock-detected") else {
        return;
    };
    assert_passed(&report);
    let committed = report.transactions.iter().filter(|t| t.committed()).count();
    assert_eq!(committed, 1);
}

#[test]
fn whole_catalog_passes_in_one_runner() {
    let Some(runner) = live_runner() else {
        return;
    };
    let reports = runner.run_all(&isolation_lab::catalog());
    let failed: Vec<_> = reports
        .iter()
        .filter(|r| !r.passed())
        .map(|r| format!("{}: {:?}", r.scenario, r.verdict))
        .collect();
    assert!(failed.is_empty(), "{:#?}", failed);
    assert_eq!(runner.context().pool().checked_out(), 0);
}
