use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use convergence::RunConfig;
use panorama::PanoramaConfig;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "version-match.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub api_key: Option<String>,
    pub accept_invalid_certs: bool,
    pub log_level: String,
    /// Abort the whole run on the first failed firewall upgrade.
    pub stop_on_error: bool,
    pub dry_run: bool,
    pub request_timeout_secs: u64,
    pub job_poll_interval_secs: u64,
    pub job_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hostname: "10.0.0.1".into(),
            port: 443,
            username: "admin".into(),
            password: "admin".into(),
            api_key: None,
            accept_invalid_certs: false,
            log_level: "info".into(),
            stop_on_error: true,
            dry_run: false,
            request_timeout_secs: 60,
            job_poll_interval_secs: 10,
            job_timeout_secs: 3600,
        }
    }
}

impl Settings {
    pub fn panorama_config(&self) -> PanoramaConfig {
        PanoramaConfig {
            hostname: self.hostname.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            api_key: self.api_key.clone(),
            accept_invalid_certs: self.accept_invalid_certs,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            job_poll_interval: Duration::from_secs(self.job_poll_interval_secs),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
        }
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            stop_on_error: self.stop_on_error,
            dry_run: self.dry_run,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            bail!(
                "invalid log level '{}', expected one of: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            );
        }
        if self.hostname.trim().is_empty() {
            bail!("hostname must not be empty");
        }
        if self.api_key.is_none() && self.username.is_empty() {
            bail!("either api_key or username must be set");
        }
        for (name, secs) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("job_poll_interval_secs", self.job_poll_interval_secs),
            ("job_timeout_secs", self.job_timeout_secs),
        ] {
            if secs == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        Ok(())
    }
}

/// Defaults, then the TOML file, then environment variables.
///
/// An explicitly named file must exist; the default file is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = match config_file(path) {
        Some(path) => read_settings_file(&path)?,
        None => Settings::default(),
    };
    apply_env(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn config_file(path: Option<&Path>) -> Option<PathBuf> {
    match path {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        }
    }
}

fn read_settings_file(path: &Path) -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    let mut settings: Settings = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
    settings.log_level = settings.log_level.to_ascii_lowercase();
    Ok(settings)
}

fn apply_env(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("PANORAMA_HOSTNAME") {
        settings.hostname = v;
    }
    if let Some(v) = env("PANORAMA_PORT") {
        if let Ok(parsed) = v.parse::<u16>() {
            settings.port = parsed;
        }
    }
    if let Some(v) = env("PANORAMA_USERNAME") {
        settings.username = v;
    }
    if let Some(v) = env("PANORAMA_PASSWORD") {
        settings.password = v;
    }
    if let Some(v) = env("PANORAMA_API_KEY") {
        settings.api_key = Some(v);
    }
    if let Some(v) = env("PANORAMA_ACCEPT_INVALID_CERTS") {
        if let Some(parsed) = parse_bool(&v) {
            settings.accept_invalid_certs = parsed;
        }
    }

    if let Some(v) = env("VERSION_MATCH_LOG_LEVEL") {
        settings.log_level = v.to_ascii_lowercase();
    }
    if let Some(v) = env("VERSION_MATCH_STOP_ON_ERROR") {
        if let Some(parsed) = parse_bool(&v) {
            settings.stop_on_error = parsed;
        }
    }
    if let Some(v) = env("VERSION_MATCH_DRY_RUN") {
        if let Some(parsed) = parse_bool(&v) {
            settings.dry_run = parsed;
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
