use super::*;

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn defaults_point_at_local_backend() {
    let settings = resolve_settings(None, no_env, CliOverrides::default()).expect("settings");
    assert_eq!(settings.server_url.as_str(), "http://127.0.0.1:3000/");
    assert_eq!(settings.poll_interval, Duration::from_millis(3000));
    assert_eq!(settings.http_timeout, Duration::from_secs(10));
}

#[test]
fn layers_apply_in_order() {
    let file = r#"
server_url = "http://file.example:3000"
poll_ms = "5000"
http_timeout_ms = "2000"
"#;
    let env = |key: &str| match key {
        "DISPATCH_SERVER_URL" => Some("http://env.example:3000".to_string()),
        "DISPATCH_POLL_MS" => Some("4000".to_string()),
        _ => None,
    };
    let cli = CliOverrides {
        poll_ms: Some(1000),
        ..CliOverrides::default()
    };

    let settings = resolve_settings(Some(file), env, cli).expect("settings");
    assert_eq!(settings.server_url.host_str(), Some("env.example"));
    assert_eq!(settings.poll_interval, Duration::from_millis(1000));
    assert_eq!(settings.http_timeout, Duration::from_millis(2000));
}

#[test]
fn invalid_values_are_reported() {
    let cli = CliOverrides {
        server_url: Some("not a url".into()),
        ..CliOverrides::default()
    };
    let err = resolve_settings(None, no_env, cli).expect_err("bad url");
    assert!(err.to_string().contains("invalid server url"), "{err:#}");

    let cli = CliOverrides {
        server_url: Some("ftp://relief.example".into()),
        ..CliOverrides::default()
    };
    assert!(resolve_settings(None, no_env, cli).is_err());

    let cli = CliOverrides {
        poll_ms: Some(0),
        ..CliOverrides::default()
    };
    assert!(resolve_settings(None, no_env, cli).is_err());

    let env = |key: &str| (key == "DISPATCH_HTTP_TIMEOUT_MS").then(|| "soon".to_string());
    assert!(resolve_settings(None, env, CliOverrides::default()).is_err());
}

#[test]
fn missing_config_file_falls_back_to_defaults() {
    let path = std::env::temp_dir().join("dispatch-config-that-does-not-exist.toml");
    let settings = load_settings(&path, CliOverrides::default()).expect("settings");
    assert_eq!(settings.poll_interval, Duration::from_millis(3000));
}
