use super::*;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_match_the_reference_deployment() {
    let settings = Settings::default();
    assert_eq!(settings.server_bind, "127.0.0.1:3000");
    assert_eq!(settings.data_file, PathBuf::from("emergencyData.json"));
    assert_eq!(settings.emergency_ttl(), TimeDelta::minutes(5));
    assert_eq!(settings.cleanup_interval(), Duration::from_secs(60));
}

#[test]
fn file_values_override_defaults() {
    let mut settings = Settings::default();
    apply_file_overrides(
        &mut settings,
        r#"
bind_addr = "0.0.0.0:8080"
data_file = "/var/lib/relief/data.json"
emergency_ttl_seconds = "120"
cleanup_interval_seconds = "not-a-number"
"#,
    );
    assert_eq!(settings.server_bind, "0.0.0.0:8080");
    assert_eq!(settings.data_file, PathBuf::from("/var/lib/relief/data.json"));
    assert_eq!(settings.emergency_ttl_seconds, 120);
    assert_eq!(settings.cleanup_interval_seconds, 60);
}

#[test]
fn malformed_file_is_ignored() {
    let mut settings = Settings::default();
    apply_file_overrides(&mut settings, "bind_addr = [1, 2");
    assert_eq!(settings, Settings::default());
}

#[test]
fn prefixed_env_wins_over_plain_env() {
    let mut settings = Settings::default();
    apply_env_overrides(
        &mut settings,
        env_from(&[
            ("SERVER_BIND", "127.0.0.1:4000"),
            ("APP__BIND_ADDR", "127.0.0.1:5000"),
            ("DATA_FILE", "plain.json"),
            ("APP__EMERGENCY_TTL_SECONDS", "30"),
            ("APP__CLEANUP_INTERVAL_SECONDS", "5"),
        ]),
    );
    assert_eq!(settings.server_bind, "127.0.0.1:5000");
    assert_eq!(settings.data_file, PathBuf::from("plain.json"));
    assert_eq!(settings.emergency_ttl(), TimeDelta::seconds(30));
    assert_eq!(settings.cleanup_interval(), Duration::from_secs(5));
}

#[test]
fn zero_durations_are_clamped() {
    let settings = Settings {
        emergency_ttl_seconds: 0,
        cleanup_interval_seconds: 0,
        ..Settings::default()
    };
    assert_eq!(settings.emergency_ttl(), TimeDelta::seconds(1));
    assert_eq!(settings.cleanup_interval(), Duration::from_secs(1));
}

#[test]
fn mail_settings_come_from_file_and_env() {
    let mut settings = Settings::default();
    assert!(settings.smtp_username.is_none());
    apply_file_overrides(
        &mut settings,
        r#"
public_url = "https://relief.example.org"
smtp_host = "mail.example.org"
smtp_port = "587"
"#,
    );
    apply_env_overrides(
        &mut settings,
        env_from(&[
            ("GMAIL_APP_EMAIL", "alerts@example.org"),
            ("GMAIL_APP_PASSWORD", "app-password"),
            ("APP__SMTP_PORT", "not-a-port"),
        ]),
    );
    assert_eq!(settings.public_url, "https://relief.example.org");
    assert_eq!(settings.smtp_host, "mail.example.org");
    assert_eq!(settings.smtp_port, 587);
    assert_eq!(settings.smtp_username.as_deref(), Some("alerts@example.org"));
    assert_eq!(settings.smtp_password.as_deref(), Some("app-password"));
}
