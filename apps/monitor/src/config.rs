use std::{fs, io::ErrorKind, path::Path, time::Duration};

use anyhow::Context;
use client_core::{BackoffPolicy, SessionConfig};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: String,
    pub request_timeout_secs: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_max_attempts: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:2000".into(),
            request_timeout_secs: 10,
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 5000,
            reconnect_max_attempts: None,
        }
    }
}

impl Settings {
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.server_url.clone());
        config.request_timeout = Duration::from_secs(self.request_timeout_secs.max(1));
        config.backoff = BackoffPolicy {
            initial: Duration::from_millis(self.reconnect_initial_ms),
            max: Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_initial_ms)),
            max_attempts: self.reconnect_max_attempts,
            ..BackoffPolicy::default()
        };
        config
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    request_timeout_secs: Option<u64>,
    reconnect_initial_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
    reconnect_max_attempts: Option<u32>,
}

/// Defaults, then `path` if it exists, then the environment.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

fn load_settings_with(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("invalid config file {}", path.display()))?;
            if let Some(v) = file_cfg.server_url {
                settings.server_url = v;
            }
            if let Some(v) = file_cfg.request_timeout_secs {
                settings.request_timeout_secs = v;
            }
            if let Some(v) = file_cfg.reconnect_initial_ms {
                settings.reconnect_initial_ms = v;
            }
            if let Some(v) = file_cfg.reconnect_max_ms {
                settings.reconnect_max_ms = v;
            }
            if file_cfg.reconnect_max_attempts.is_some() {
                settings.reconnect_max_attempts = file_cfg.reconnect_max_attempts;
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    }

    if let Some(v) = env("CUE_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        settings.request_timeout_secs = parse_env("APP__REQUEST_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = env("APP__RECONNECT_INITIAL_MS") {
        settings.reconnect_initial_ms = parse_env("APP__RECONNECT_INITIAL_MS", &v)?;
    }
    if let Some(v) = env("APP__RECONNECT_MAX_MS") {
        settings.reconnect_max_ms = parse_env("APP__RECONNECT_MAX_MS", &v)?;
    }
    if let Some(v) = env("APP__RECONNECT_MAX_ATTEMPTS") {
        settings.reconnect_max_attempts = Some(parse_env("APP__RECONNECT_MAX_ATTEMPTS", &v)?);
    }

    Ok(settings)
}

fn parse_env<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{key} has invalid value '{raw}'"))
}
