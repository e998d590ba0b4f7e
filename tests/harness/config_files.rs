//! Configuration files feed the runner.

use std::time::Duration;

use isolation_lab::HarnessConfig;
use tempfile::TempDir;

#[test]
fn config_file_drives_pool_and_scheduler() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("isolab.toml");
    std::fs::write(
        &path,
        r#"
database_url = "postgres://lab@db.internal/isolab"

[pool]
max_size = 3
statement_timeout_ms = 1500

[scheduler]
await_timeout_ms = 750
"#,
    )
    .unwrap();

    let config = HarnessConfig::from_file(&path).unwrap();
    let pool = config.pool_config();
    assert_eq!(pool.max_size, 3);
    assert_eq!(pool.statement_timeout, Duration::from_millis(1500));
    assert_eq!(config.await_timeout(), Duration::from_millis(750));
    assert_eq!(config.lock_settle(), Duration::from_millis(50));
}

#[test]
fn written_default_loads_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("isolab.toml");
    HarnessConfig::write_default_if_missing(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("[scheduler]"));
    assert_eq!(HarnessConfig::from_file(&path).unwrap(), HarnessConfig::default());
}
