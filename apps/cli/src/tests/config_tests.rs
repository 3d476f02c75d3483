use super::*;

use std::collections::HashMap;

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/session.db"),
        "sqlite://./data/session.db"
    );
}

#[test]
fn keeps_memory_and_full_urls() {
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(
        normalize_database_url("sqlite:///var/lib/renteazy/session.db"),
        "sqlite:///var/lib/renteazy/session.db"
    );
}

#[test]
fn blank_database_url_falls_back_to_default() {
    assert_eq!(normalize_database_url("  "), Settings::default().database_url);
}

#[test]
fn missing_config_file_yields_defaults() {
    let temp_root = tempfile::tempdir().expect("tempdir");

    let loaded = load_settings(&temp_root.path().join("absent.toml")).expect("load");
    // Only environment variables can differ from the defaults here.
    let mut expected = Settings::default();
    apply_env_overrides(&mut expected, |key| std::env::var(key).ok());
    assert_eq!(loaded, expected);
}

#[test]
fn file_values_override_defaults() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let path = temp_root.path().join("renteazy.toml");
    std::fs::write(
        &path,
        "api_base_url = \"https://api.renteazy.test\"\nrequest_timeout_seconds = 30\n",
    )
    .expect("write config");

    let raw = std::fs::read_to_string(&path).expect("read");
    let file_cfg: FileSettings = toml::from_str(&raw).expect("parse");
    let mut settings = Settings::default();
    apply_file_settings(&mut settings, file_cfg);

    assert_eq!(settings.api_base_url, "https://api.renteazy.test");
    assert_eq!(settings.request_timeout_seconds, 30);
    assert_eq!(settings.database_url, Settings::default().database_url);
}

#[test]
fn malformed_config_file_is_an_error() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let path = temp_root.path().join("renteazy.toml");
    std::fs::write(&path, "request_timeout_seconds = \"soon\"").expect("write config");

    assert!(load_settings(&path).is_err());
}

#[test]
fn prefixed_env_vars_win_over_plain_ones() {
    let env = HashMap::from([
        ("API_BASE_URL", "http://plain"),
        ("APP__API_BASE_URL", "http://prefixed"),
        ("DATABASE_URL", "./plain.db"),
        ("APP__REQUEST_TIMEOUT_SECONDS", "not-a-number"),
    ]);
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings, |key| env.get(key).map(|v| v.to_string()));

    assert_eq!(settings.api_base_url, "http://prefixed");
    assert_eq!(settings.database_url, "./plain.db");
    assert_eq!(settings.request_timeout_seconds, 15);
}

#[test]
fn timeout_is_never_zero() {
    let settings = Settings {
        request_timeout_seconds: 0,
        ..Settings::default()
    };
    assert_eq!(settings.request_timeout(), Duration::from_secs(1));
}
