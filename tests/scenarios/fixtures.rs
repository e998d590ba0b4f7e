//! Schema and seed helpers against a real server.

use crate::common::live_runner;

#[test]
fn schema_install_is_idempotent() {
    let Some(runner) = live_runner() else {
        return;
    };
    runner.prepare().unwrap();
    runner.prepare().unwrap();
}

#[test]
fn seed_reproduces_the_warehouse_layout() {
    let Some(runner) = live_runner() else {
        return;
    };
    let fixtures = runner.context().fixtures();
    let pallets = fixtures.seed(3, 10, 9).unwrap();

    assert_eq!(pallets.len(), 3);
    for pallet in pallets {
        assert_eq!(fixtures.pallet_capacity(pallet).unwrap(), 10);
        assert_eq!(fixtures.item_count(pallet).unwrap(), 9);
    }
}

#[test]
fn lock_waiters_time_out_when_nobody_waits() {
    let Some(runner) = live_runner() else {
        return;
    };
    // Other tests may be waiting on locks right now; ask for more waiters
    // than they could ever produce.
    let result = runner.context().fixtures().await_lock_waiters(
        1_000,
        std::time::Duration::from_millis(10),
        std::time::Duration::from_millis(100),
    );
    assert!(matches!(
        result,
        Err(isolation_lab::HarnessError::SchedulerTimeout { .. })
    ));
}
