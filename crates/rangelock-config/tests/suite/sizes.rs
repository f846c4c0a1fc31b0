use rangelock_config::{ByteSize, RangelockConfig};

#[test]
fn max_lock_memory_accepts_human_friendly_sizes() {
    let config = RangelockConfig::load_from_str(
        r#"
[locktree]
max_lock_memory = "512MiB"
"#,
    )
    .expect("config should parse");

    assert_eq!(config.locktree.max_lock_memory, Some(ByteSize(512 * 1024 * 1024)));
    assert_eq!(config.manager_options().max_lock_memory, 512 * 1024 * 1024);
}

#[test]
fn max_lock_memory_accepts_raw_byte_counts() {
    let config = RangelockConfig::load_from_str("[locktree]\nmax_lock_memory = 4096\n")
        .expect("config should parse");
    assert_eq!(config.manager_options().max_lock_memory, 4096);
}

#[test]
fn unknown_size_suffix_is_rejected() {
    let err = RangelockConfig::load_from_str("[locktree]\nmax_lock_memory = \"12 parsecs\"\n")
        .expect_err("bad size must fail");
    assert!(err.to_string().starts_with("failed to parse toml config"), "{err}");
}
