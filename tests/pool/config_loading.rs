// ABOUTME: Behavioral tests for configuration loading and defaults
// Verifies default pool constants, TOML parsing of durations and validation

use std::time::Duration;
use tempfile::TempDir;

use paysock::config::AppConfig;
use paysock::socket_pool::{PoolConfig, ReconnectPolicy};

/// Defaults match the documented pool constants
#[test]
fn test_default_pool_constants() {
    let pool = PoolConfig::default();
    assert_eq!(pool.max_size, 5);
    assert_eq!(pool.min_connections, 2);
    assert_eq!(pool.connection_timeout, Duration::from_millis(10_000));
    assert_eq!(pool.idle_timeout, Duration::from_millis(30_000));
    assert_eq!(pool.cleanup_interval, Duration::from_millis(60_000));

    let reconnect = ReconnectPolicy::default();
    assert_eq!(reconnect.max_attempts, 3);
    assert_eq!(reconnect.base_delay, Duration::from_millis(1000));
    assert_eq!(reconnect.max_delay, Duration::from_millis(5000));
}

/// Durations are written and read as milliseconds
#[test]
fn test_toml_durations_are_milliseconds() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[pool]
max_size = 3
idle_timeout = 2500

[transport]
endpoint = "payments.internal:4000"
attempt_timeout = 1000

[transport.reconnect]
max_attempts = 5
base_delay = 200
max_delay = 800

[logging]
stderr = true
"#,
    )
    .unwrap();

    let config = AppConfig::load(Some(&path)).unwrap();
    assert_eq!(config.pool.max_size, 3);
    assert_eq!(config.pool.idle_timeout, Duration::from_millis(2500));
    assert_eq!(config.pool.acquire_timeout, PoolConfig::default().acquire_timeout);
    assert_eq!(config.transport.reconnect.max_attempts, 5);
    assert_eq!(config.transport.reconnect.base_delay, Duration::from_millis(200));
    assert!(config.logging.stderr);

    let rendered = toml::to_string_pretty(&config).unwrap();
    assert!(rendered.contains("idle_timeout = 2500"));
}

/// Reconnect bounds are validated on load
#[test]
fn test_inverted_reconnect_delays_are_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[transport.reconnect]\nbase_delay = 9000\nmax_delay = 100\n",
    )
    .unwrap();

    let err = AppConfig::load(Some(&path)).unwrap_err();
    assert!(format!("{err:#}").contains("base_delay"));
}

/// Malformed TOML names the offending file
#[test]
fn test_malformed_file_reports_path() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "[pool\nmax_size = ").unwrap();

    let err = AppConfig::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("broken.toml"));
}
