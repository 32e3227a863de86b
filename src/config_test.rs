use super::*;

const ENV_KEYS: &[&str] = &[
    "AGENT_BRIDGE_URL",
    "AGENT_BRIDGE_HOST",
    "AGENT_BRIDGE_PORT",
    "AGENT_BRIDGE_TOKEN",
    "AGENT_BRIDGE_TIMEOUT_SECS",
    "AGENT_BRIDGE_LONG_TIMEOUT_SECS",
    "AGENT_BRIDGE_CONNECT_TIMEOUT_SECS",
    "AGENT_BRIDGE_LONG_RUNNING",
];

/// # Safety
/// Only `from_env_reads_overrides_and_defaults` touches these variables.
unsafe fn clear_bridge_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

// =============================================================================
// TimeoutPolicy
// =============================================================================

#[test]
fn default_policy_routes_installs_to_long_tier() {
    let policy = TimeoutPolicy::default();
    assert!(policy.is_long_running("install_dependency"));
    assert!(policy.is_long_running("run_pipeline"));
    assert!(!policy.is_long_running("get_app_version"));
    assert_eq!(policy.timeout_for("run_pipeline", None), Duration::from_secs(180));
    assert_eq!(policy.timeout_for("get_app_version", None), Duration::from_secs(30));
}

#[test]
fn override_beats_both_tiers() {
    let policy = TimeoutPolicy::default();
    let over = Duration::from_millis(50);
    assert_eq!(policy.timeout_for("run_pipeline", Some(over)), over);
    assert_eq!(policy.timeout_for("ping", Some(over)), over);
}

#[test]
fn custom_long_running_set_replaces_default() {
    let policy = TimeoutPolicy::new(Duration::from_secs(1), Duration::from_secs(9))
        .with_long_running(["slow_op"]);
    assert!(policy.is_long_running("slow_op"));
    assert!(!policy.is_long_running("run_pipeline"));
    assert_eq!(policy.timeout_for("slow_op", None), Duration::from_secs(9));
    assert_eq!(policy.timeout_for("run_pipeline", None), Duration::from_secs(1));
}

#[test]
fn classifier_closure_decides_tier() {
    let policy = TimeoutPolicy::default().with_classifier(|cmd| cmd.starts_with("install_"));
    assert!(policy.is_long_running("install_x"));
    assert!(!policy.is_long_running("run_pipeline"));
    assert!(format!("{policy:?}").contains("<custom>"));
}

// =============================================================================
// parsing helpers
// =============================================================================

#[test]
fn parse_secs_accepts_fractions_and_rejects_garbage() {
    assert_eq!(parse_secs("0.05"), Some(Duration::from_millis(50)));
    assert_eq!(parse_secs(" 2 "), Some(Duration::from_secs(2)));
    assert_eq!(parse_secs("-1"), None);
    assert_eq!(parse_secs("NaN"), None);
    assert_eq!(parse_secs("soon"), None);
}

#[test]
fn parse_command_list_trims_and_drops_empty() {
    assert_eq!(
        parse_command_list(" a, b ,,c "),
        vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
    );
}

#[test]
fn builder_methods_set_fields() {
    let config = ClientConfig::new("ws://bridge:1")
        .with_token("t")
        .with_connect_timeout(Duration::from_secs(2));
    assert_eq!(config.url, "ws://bridge:1");
    assert_eq!(config.token.as_deref(), Some("t"));
    assert_eq!(config.connect_timeout, Duration::from_secs(2));
    assert_eq!(ClientConfig::default().url, "ws://127.0.0.1:3333");
}

// =============================================================================
// from_env
// =============================================================================

#[test]
fn from_env_reads_overrides_and_defaults() {
    unsafe { clear_bridge_env() };

    let config = ClientConfig::from_env();
    assert_eq!(config.url, "ws://127.0.0.1:3333");
    assert_eq!(config.token, None);
    assert_eq!(config.timeouts.short, Duration::from_secs(30));
    assert_eq!(config.timeouts.long, Duration::from_secs(180));
    assert_eq!(config.connect_timeout, Duration::from_secs(10));
    assert!(config.timeouts.is_long_running("sync_messages"));

    unsafe {
        std::env::set_var("AGENT_BRIDGE_HOST", "10.0.0.2");
        std::env::set_var("AGENT_BRIDGE_PORT", "4444");
        std::env::set_var("AGENT_BRIDGE_TOKEN", "");
        std::env::set_var("AGENT_BRIDGE_TIMEOUT_SECS", "1.5");
        std::env::set_var("AGENT_BRIDGE_LONG_TIMEOUT_SECS", "not-a-number");
        std::env::set_var("AGENT_BRIDGE_LONG_RUNNING", "slow_op, other_op");
    }
    let config = ClientConfig::from_env();
    assert_eq!(config.url, "ws://10.0.0.2:4444");
    assert_eq!(config.token, None);
    assert_eq!(config.timeouts.short, Duration::from_millis(1500));
    assert_eq!(config.timeouts.long, Duration::from_secs(180));
    assert!(config.timeouts.is_long_running("other_op"));
    assert!(!config.timeouts.is_long_running("sync_messages"));

    unsafe {
        std::env::set_var("AGENT_BRIDGE_URL", "wss://bridge.example/ws");
        std::env::set_var("AGENT_BRIDGE_TOKEN", "secret");
    }
    let config = ClientConfig::from_env();
    assert_eq!(config.url, "wss://bridge.example/ws");
    assert_eq!(config.token.as_deref(), Some("secret"));

    unsafe { clear_bridge_env() };
}
