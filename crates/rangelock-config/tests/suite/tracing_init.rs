use rangelock_config::{init_tracing, LoggingConfig};

#[test]
fn init_tracing_is_idempotent_and_writes_the_log_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("rangelock.log");
    let config = LoggingConfig {
        level: "rangelock.config=info".to_owned(),
        stderr: false,
        file: Some(path.clone()),
        ..LoggingConfig::default()
    };

    init_tracing(&config);
    init_tracing(&config);
    tracing::info!(target: "rangelock.config", "tracing initialized");

    let contents = std::fs::read_to_string(&path).expect("log file");
    assert!(contents.contains("tracing initialized"), "{contents}");
}
