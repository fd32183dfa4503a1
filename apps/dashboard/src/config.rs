use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use client_core::{
    controller::{DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL},
    PollPolicy,
};
use serde::Deserialize;

pub const DEFAULT_SETTINGS_FILE: &str = "dashboard.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base_url: String,
    pub poll_interval_ms: u64,
    /// `None` polls until the gateway reports a terminal status.
    pub max_poll_attempts: Option<u32>,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            max_poll_attempts: Some(DEFAULT_MAX_POLL_ATTEMPTS),
            request_timeout_secs: 30,
        }
    }
}

impl Settings {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_poll_attempts,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    poll_interval_ms: Option<u64>,
    max_poll_attempts: Option<u32>,
    request_timeout_secs: Option<u64>,
}

/// Defaults, then the settings file (if present), then the environment.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        apply_file_settings(&mut settings, &raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?;
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file_settings(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;

    if let Some(v) = file_cfg.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg.poll_interval_ms {
        settings.poll_interval_ms = nonzero("poll_interval_ms", v)?;
    }
    if let Some(v) = file_cfg.max_poll_attempts {
        settings.max_poll_attempts = attempts_limit(v);
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = nonzero("request_timeout_secs", v)?;
    }
    Ok(())
}

fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("OCR_API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = lookup("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = lookup("APP__POLL_INTERVAL_MS") {
        if let Some(parsed) = parse_nonzero(&v) {
            settings.poll_interval_ms = parsed;
        }
    }

    if let Some(v) = lookup("APP__MAX_POLL_ATTEMPTS") {
        if let Ok(parsed) = v.trim().parse::<u32>() {
            settings.max_poll_attempts = attempts_limit(parsed);
        }
    }

    if let Some(v) = lookup("APP__REQUEST_TIMEOUT_SECS") {
        if let Some(parsed) = parse_nonzero(&v) {
            settings.request_timeout_secs = parsed;
        }
    }
}

/// Intervals and timeouts must be positive.
fn nonzero(key: &str, value: u64) -> anyhow::Result<u64> {
    if value == 0 {
        anyhow::bail!("{key} must be greater than zero");
    }
    Ok(value)
}

fn parse_nonzero(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}

/// Zero means unbounded.
fn attempts_limit(value: u32) -> Option<u32> {
    (value > 0).then_some(value)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
