//! Domain schema and seed data
//!
//! Scenarios work on a small warehouse model: pallets with a remaining
//! `capacity`, items stacked on pallets, and a catalogue of SKUs. Every
//! scenario creates its own pallets, so scenarios never share rows.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use isolab_core::{HarnessError, HarnessResult, RowSet};
use isolab_pool::ConnectionPool;

/// Schema, created idempotently.
pub const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS pallets (id BIGSERIAL PRIMARY KEY, capacity INTEGER);
CREATE TABLE IF NOT EXISTS items (id BIGSERIAL PRIMARY KEY, name VARCHAR, pallet_id BIGINT, code VARCHAR);
CREATE TABLE IF NOT EXISTS skus (id BIGSERIAL PRIMARY KEY, code VARCHAR, name VARCHAR);";

/// `SELECT` of one pallet's capacity.
pub fn capacity_sql(pallet: i64) -> String {
    format!("SELECT capacity FROM pallets WHERE id = {}", pallet)
}

/// `SELECT count(*)` of the items on one pallet.
pub fn item_count_sql(pallet: i64) -> String {
    format!("SELECT count(*) AS items FROM items WHERE pallet_id = {}", pallet)
}

/// Setup and inspection helpers outside any scripted transaction
#[derive(Debug, Clone)]
pub struct Fixtures {
    pool: Arc<ConnectionPool>,
}

impl Fixtures {
    /// Helpers over `pool`
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    fn run(&self, sql: &str) -> HarnessResult<RowSet> {
        let mut lease = self.pool.acquire()?;
        lease.execute(sql)
    }

    fn scalar_i64(&self, sql: &str) -> HarnessResult<i64> {
        let rows = self.run(sql)?;
        rows.scalar()
            .and_then(|v| v.as_i64())
            .ok_or_else(|| HarnessError::script("fixtures", format!("no integer from: {}", sql)))
    }

    /// Create the tables if they do not exist
    pub fn install_schema(&self) -> HarnessResult<()> {
        self.run(SCHEMA)?;
        debug!(target: "isolab::fixtures", "Schema installed");
        Ok(())
    }

    /// Insert a pallet and return its id
    pub fn create_pallet(&self, capacity: i64) -> HarnessResult<i64> {
        let id = self.scalar_i64(&format!(
            "INSERT INTO pallets (capacity) VALUES ({}) RETURNING id",
            capacity
        ))?;
        debug!(target: "isolab::fixtures", pallet = id, capacity, "Pallet created");
        Ok(id)
    }

    /// Stack `count` items with random 8-character codes on a pallet
    pub fn add_items(&self, pallet: i64, count: usize) -> HarnessResult<()> {
        if count == 0 {
            return Ok(());
        }
        self.run(&format!(
            "INSERT INTO items (name, pallet_id, code) \
             SELECT 'item', {}, substr(md5(random()::text), 1, 8) FROM generate_series(1, {})",
            pallet, count
        ))?;
        Ok(())
    }

    /// Create `pallets` pallets of `capacity`, each holding `items_per_pallet`
    /// items, and return their ids
    ///
    /// `seed(100, 10, 9)` reproduces the classic warehouse data set.
    pub fn seed(
        &self,
        pallets: usize,
        capacity: i64,
        items_per_pallet: usize,
    ) -> HarnessResult<Vec<i64>> {
        let mut ids = Vec::with_capacity(pallets);
        for _ in 0..pallets {
            let id = self.create_pallet(capacity)?;
            self.add_items(id, items_per_pallet)?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Committed capacity of a pallet
    pub fn pallet_capacity(&self, pallet: i64) -> HarnessResult<i64> {
        self.scalar_i64(&capacity_sql(pallet))
    }

    /// Committed number of items on a pallet
    pub fn item_count(&self, pallet: i64) -> HarnessResult<i64> {
        self.scalar_i64(&item_count_sql(pallet))
    }

    /// Wait until at least `count` sessions are queued on a lock
    ///
    /// Polls `pg_stat_activity` every `poll` until `timeout` elapses. Lets a
    /// preemptive scenario release a lock only once the waiter is actually
    /// waiting on it.
    pub fn await_lock_waiters(
        &self,
        count: i64,
        poll: Duration,
        timeout: Duration,
    ) -> HarnessResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let waiting = self.scalar_i64(
                "SELECT count(*) FROM pg_stat_activity \
                 WHERE wait_event_type = 'Lock' AND datname = current_database()",
            )?;
            if waiting >= count {
                debug!(target: "isolab::fixtures", waiting, "Lock waiters present");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(HarnessError::SchedulerTimeout {
                    waiting_for: format!("{} session(s) to wait on a lock", count),
                    timeout,
                });
            }
            thread::sleep(poll);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolab_core::mock::MockConnector;
    use isolab_pool::PoolConfig;

    fn fixtures(mock: &MockConnector) -> Fixtures {
        let pool = ConnectionPool::new(mock.clone(), PoolConfig::default()).unwrap();
        Fixtures::new(pool)
    }

    #[test]
    fn seed_creates_pallets_with_items() {
        let mock = MockConnector::new();
        mock.respond("INSERT INTO pallets", RowSet::scalar_of("id", 7));
        let fixtures = fixtures(&mock);

        let ids = fixtures.seed(3, 10, 9).unwrap();
        assert_eq!(ids, vec![7, 7, 7]);

        let sent = mock.statements();
        let pallets = sent
            .iter()
            .filter(|s| s.starts_with("INSERT INTO pallets (capacity) VALUES (10)"))
            .count();
        let items = sent
            .iter()
            .filter(|s| s.contains("generate_series(1, 9)"))
            .count();
        assert_eq!((pallets, items), (3, 3));
    }

    #[test]
    fn schema_is_idempotent_text() {
        assert_eq!(SCHEMA.matches("IF NOT EXISTS").count(), 3);
        let mock = MockConnector::new();
        fixtures(&mock).install_schema().unwrap();
        assert!(mock.statements().iter().any(|s| s == SCHEMA));
    }

    #[test]
    fn missing_scalar_is_a_script_error() {
        let mock = MockConnector::new();
        let fixtures = fixtures(&mock);
        assert!(matches!(
            fixtures.pallet_capacity(1),
            Err(HarnessError::Script { .. })
        ));
    }

    #[test]
    fn lock_waiters_poll_until_present() {
        let mock = MockConnector::new();
        mock.respond_once("pg_stat_activity", RowSet::scalar_of("count", 0));
        mock.respond("pg_stat_activity", RowSet::scalar_of("count", 1));
        let fixtures = fixtures(&mock);

        fixtures
            .await_lock_waiters(1, Duration::from_millis(1), Duration::from_secs(1))
            .unwrap();
        let polls = mock
            .statements()
            .iter()
            .filter(|s| s.contains("pg_stat_activity"))
            .count();
        assert_eq!(polls, 2);
    }

    #[test]
    fn lock_waiters_time_out() {
        let mock = MockConnector::new();
        mock.respond("pg_stat_activity", RowSet::scalar_of("count", 0));
        let fixtures = fixtures(&mock);
        assert!(matches!(
            fixtures.await_lock_waiters(1, Duration::from_millis(1), Duration::from_millis(20)),
            Err(HarnessError::SchedulerTimeout { .. })
        ));
    }
}
