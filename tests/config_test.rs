use draftsmith::config::{Config, Tuning};

#[test]
fn tuning_defaults_are_sane() {
    let tuning = Tuning::default();
    assert!(tuning.heartbeat_max_idle_secs > 0);
    assert!(tuning.observer_queue_capacity > 0);
    assert!(tuning.default_max_tokens > 0);
    assert!(tuning.default_max_cost_usd > 0.0);
    assert!(tuning.heartbeat_max_idle().as_secs() == tuning.heartbeat_max_idle_secs);
}

#[test]
fn tuning_file_overrides_merge_with_defaults() {
    let path = std::env::temp_dir().join("draftsmith-tuning-test.toml");
    std::fs::write(&path, "heartbeat_max_idle_secs = 42\n").unwrap();

    let tuning = Tuning::from_file(&path).unwrap();
    assert_eq!(tuning.heartbeat_max_idle_secs, 42);
    // Unspecified fields keep their defaults
    assert_eq!(
        tuning.observer_queue_capacity,
        Tuning::default().observer_queue_capacity
    );

    std::fs::remove_file(&path).ok();
}

#[test]
fn tuning_rejects_a_bad_file() {
    let path = std::env::temp_dir().join("draftsmith-tuning-bad.toml");
    std::fs::write(&path, "heartbeat_max_idle_secs = \"soon\"\n").unwrap();
    assert!(Tuning::from_file(&path).is_err());
    std::fs::remove_file(&path).ok();
}

#[test]
fn config_from_env_requires_the_api_key() {
    // Run both halves in one test; env vars are process-global.
    unsafe {
        std::env::remove_var("ANTHROPIC_API_KEY");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::set_var("ANTHROPIC_API_KEY", "sk-test-key");
    }
    let config = Config::from_env().unwrap();
    assert!(!config.log_level.is_empty());
    assert!(!config.bind_addr.is_empty());

    unsafe {
        std::env::remove_var("ANTHROPIC_API_KEY");
    }
}
