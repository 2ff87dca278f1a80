use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{bail, Context};
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: Url,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
}

/// Values given on the command line, applied last.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub server_url: Option<String>,
    pub poll_ms: Option<u64>,
    pub http_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
struct RawSettings {
    server_url: Option<String>,
    poll_ms: Option<u64>,
    http_timeout_ms: Option<u64>,
}

impl RawSettings {
    fn merge_file(&mut self, raw: &str) -> anyhow::Result<()> {
        let file_cfg: HashMap<String, String> =
            toml::from_str(raw).context("dispatch config must be a flat table of strings")?;
        if let Some(v) = file_cfg.get("server_url") {
            self.server_url = Some(v.clone());
        }
        if let Some(v) = file_cfg.get("poll_ms") {
            self.poll_ms = Some(v.parse().with_context(|| format!("invalid poll_ms '{v}'"))?);
        }
        if let Some(v) = file_cfg.get("http_timeout_ms") {
            self.http_timeout_ms = Some(
                v.parse()
                    .with_context(|| format!("invalid http_timeout_ms '{v}'"))?,
            );
        }
        Ok(())
    }

    fn merge_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = var("DISPATCH_SERVER_URL") {
            self.server_url = Some(v);
        }
        if let Some(v) = var("DISPATCH_POLL_MS") {
            self.poll_ms = Some(
                v.parse()
                    .with_context(|| format!("invalid DISPATCH_POLL_MS '{v}'"))?,
            );
        }
        if let Some(v) = var("DISPATCH_HTTP_TIMEOUT_MS") {
            self.http_timeout_ms = Some(
                v.parse()
                    .with_context(|| format!("invalid DISPATCH_HTTP_TIMEOUT_MS '{v}'"))?,
            );
        }
        Ok(())
    }

    fn merge_cli(&mut self, cli: CliOverrides) {
        if cli.server_url.is_some() {
            self.server_url = cli.server_url;
        }
        if cli.poll_ms.is_some() {
            self.poll_ms = cli.poll_ms;
        }
        if cli.http_timeout_ms.is_some() {
            self.http_timeout_ms = cli.http_timeout_ms;
        }
    }

    fn finish(self) -> anyhow::Result<Settings> {
        let raw_url = self.server_url.as_deref().unwrap_or(DEFAULT_SERVER_URL);
        let server_url =
            Url::parse(raw_url).with_context(|| format!("invalid server url '{raw_url}'"))?;
        if !matches!(server_url.scheme(), "http" | "https") {
            bail!("server url must be http or https, got '{raw_url}'");
        }

        let poll_ms = self.poll_ms.unwrap_or(3_000);
        if poll_ms == 0 {
            bail!("poll interval must be greater than zero");
        }
        let http_timeout_ms = self.http_timeout_ms.unwrap_or(10_000);
        if http_timeout_ms == 0 {
            bail!("http timeout must be greater than zero");
        }

        Ok(Settings {
            server_url,
            poll_interval: Duration::from_millis(poll_ms),
            http_timeout: Duration::from_millis(http_timeout_ms),
        })
    }
}

/// Defaults, then the config file, then `DISPATCH_*` env vars, then flags.
pub fn resolve_settings(
    file: Option<&str>,
    var: impl Fn(&str) -> Option<String>,
    cli: CliOverrides,
) -> anyhow::Result<Settings> {
    let mut raw = RawSettings::default();
    if let Some(file) = file {
        raw.merge_file(file)?;
    }
    raw.merge_env(var)?;
    raw.merge_cli(cli);
    raw.finish()
}

pub fn load_settings(config_path: &Path, cli: CliOverrides) -> anyhow::Result<Settings> {
    let file = match fs::read_to_string(config_path) {
        Ok(raw) => Some(raw),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", config_path.display()))
        }
    };
    resolve_settings(file.as_deref(), |key| std::env::var(key).ok(), cli)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
