use ov_domain::config::Config;

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn default_supervisor_timeout_matches_spec() {
    let config = Config::default();
    assert_eq!(config.supervisor.default_timeout_secs, 120);
}

#[test]
fn default_worker_settings_match_spec() {
    let config = Config::default();
    assert_eq!(config.worker.dispatch_tick_ms, 1000);
    assert_eq!(config.worker.max_concurrency, 5);
}

#[test]
fn explicit_host_override_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 3210
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
}
