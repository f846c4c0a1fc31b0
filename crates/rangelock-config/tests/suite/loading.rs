use rangelock_config::{ConfigError, RangelockConfig};
use rangelock_manager::{EscalationMode, LockManager, LockManagerOptions};
use std::time::Duration;

#[test]
fn empty_file_yields_defaults() {
    let config = RangelockConfig::load_from_str("").expect("empty config");
    assert_eq!(config, RangelockConfig::default());
    assert_eq!(config.manager_options(), LockManagerOptions::default());
}

#[test]
fn overrides_map_onto_manager_options() {
    let config = RangelockConfig::load_from_str(
        r#"
[logging]
level = "debug"
json = true

[locktree]
lock_wait_time_ms = 250
escalation = "inline"
escalation_wait_ms = 20
"#,
    )
    .expect("config should parse");

    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);

    let options = config.manager_options();
    assert_eq!(options.lock_wait_time, Duration::from_millis(250));
    assert_eq!(options.escalation, EscalationMode::Inline);
    assert_eq!(options.escalation_wait, Duration::from_millis(20));

    let manager = LockManager::new(options);
    assert_eq!(manager.escalation_mode(), EscalationMode::Inline);
    assert_eq!(manager.lock_wait_time(), Duration::from_millis(250));
}

#[test]
fn zero_values_are_rejected() {
    let err = RangelockConfig::load_from_str("[locktree]\nescalation_wait_ms = 0\n")
        .expect_err("zero wait must fail");
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "locktree.escalation_wait_ms",
            ..
        }
    ));

    let err = RangelockConfig::load_from_str("[locktree]\nmax_lock_memory = 0\n")
        .expect_err("zero ceiling must fail");
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "locktree.max_lock_memory",
            ..
        }
    ));
}

#[test]
fn parse_errors_do_not_echo_config_values() {
    let err = RangelockConfig::load_from_str("[locktree]\nescalation = \"s3cr3t-mode\"\n")
        .expect_err("unknown mode must fail");
    let message = err.to_string();
    assert!(!message.contains("s3cr3t-mode"), "{message}");
}

#[test]
fn unknown_keys_are_rejected() {
    let err = RangelockConfig::load_from_str("[locktree]\nmax_locks = 3\n")
        .expect_err("unknown key must fail");
    assert!(matches!(err, ConfigError::Toml(_)));
}

#[test]
fn loads_from_a_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("rangelock.toml");
    std::fs::write(&path, "[locktree]\nmax_lock_memory = \"1MiB\"\n").expect("write config");

    let config = RangelockConfig::load_from_path(&path).expect("config should load");
    assert_eq!(config.manager_options().max_lock_memory, 1024 * 1024);
}

#[test]
fn missing_file_reports_the_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.toml");

    let err = RangelockConfig::load_from_path(&path).expect_err("missing file");
    match err {
        ConfigError::Io { path: reported, .. } => assert_eq!(reported, path.display().to_string()),
        other => panic!("unexpected error: {other}"),
    }
}
