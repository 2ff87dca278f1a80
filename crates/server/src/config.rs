use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use chrono::TimeDelta;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub server_bind: String,
    pub data_file: PathBuf,
    pub emergency_ttl_seconds: i64,
    pub cleanup_interval_seconds: u64,
    /// Base of the tracking link sent in alert emails.
    pub public_url: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3000".into(),
            data_file: PathBuf::from("emergencyData.json"),
            emergency_ttl_seconds: 300,
            cleanup_interval_seconds: 60,
            public_url: "http://127.0.0.1:3000".into(),
            smtp_host: "smtp.gmail.com".into(),
            smtp_port: 465,
            smtp_username: None,
            smtp_password: None,
        }
    }
}

impl Settings {
    pub fn emergency_ttl(&self) -> TimeDelta {
        TimeDelta::try_seconds(self.emergency_ttl_seconds.max(1))
            .unwrap_or_else(|| TimeDelta::minutes(5))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds.max(1))
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();
    if let Ok(raw) = fs::read_to_string("server.toml") {
        apply_file_overrides(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

/// `server.toml` is a flat table of string values.
pub fn apply_file_overrides(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) else {
        return;
    };
    if let Some(v) = file_cfg.get("bind_addr") {
        settings.server_bind = v.clone();
    }
    if let Some(v) = file_cfg.get("data_file") {
        settings.data_file = PathBuf::from(v);
    }
    if let Some(parsed) = file_cfg
        .get("emergency_ttl_seconds")
        .and_then(|v| v.parse().ok())
    {
        settings.emergency_ttl_seconds = parsed;
    }
    if let Some(parsed) = file_cfg
        .get("cleanup_interval_seconds")
        .and_then(|v| v.parse().ok())
    {
        settings.cleanup_interval_seconds = parsed;
    }
    if let Some(v) = file_cfg.get("public_url") {
        settings.public_url = v.clone();
    }
    if let Some(v) = file_cfg.get("smtp_host") {
        settings.smtp_host = v.clone();
    }
    if let Some(parsed) = file_cfg.get("smtp_port").and_then(|v| v.parse().ok()) {
        settings.smtp_port = parsed;
    }
    if let Some(v) = file_cfg.get("smtp_username") {
        settings.smtp_username = Some(v.clone());
    }
}

pub fn apply_env_overrides(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = var("DATA_FILE") {
        settings.data_file = PathBuf::from(v);
    }
    if let Some(v) = var("APP__DATA_FILE") {
        settings.data_file = PathBuf::from(v);
    }

    if let Some(v) = var("APP__EMERGENCY_TTL_SECONDS") {
        if let Ok(parsed) = v.parse::<i64>() {
            settings.emergency_ttl_seconds = parsed;
        }
    }
    if let Some(v) = var("APP__CLEANUP_INTERVAL_SECONDS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.cleanup_interval_seconds = parsed;
        }
    }

    if let Some(v) = var("APP__PUBLIC_URL") {
        settings.public_url = v;
    }
    if let Some(v) = var("APP__SMTP_HOST") {
        settings.smtp_host = v;
    }
    if let Some(v) = var("APP__SMTP_PORT") {
        if let Ok(parsed) = v.parse::<u16>() {
            settings.smtp_port = parsed;
        }
    }
    // Gmail app-password credentials
    if let Some(v) = var("GMAIL_APP_EMAIL") {
        settings.smtp_username = Some(v);
    }
    if let Some(v) = var("GMAIL_APP_PASSWORD") {
        settings.smtp_password = Some(v);
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
