use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use client_core::{ApiBase, ReconnectPolicy, SessionOptions};
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "dashboard.toml";
const CONFIG_DIR_NAME: &str = "invoice_dashboard";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base: String,
    pub user: String,
    pub action_timeout_secs: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    pub dedup_window: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8000/api/v1".into(),
            user: client_core::DEFAULT_ACTOR.into(),
            action_timeout_secs: 15,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            dedup_window: 5,
        }
    }
}

/// Keys accepted in `dashboard.toml`; anything left out keeps its default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    api_base: Option<String>,
    user: Option<String>,
    action_timeout_secs: Option<u64>,
    reconnect_initial_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
    dedup_window: Option<usize>,
}

/// Overrides given on the command line, applied last.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub api_base: Option<String>,
    pub user: Option<String>,
    pub action_timeout_secs: Option<u64>,
}

impl Settings {
    pub fn api_base(&self) -> anyhow::Result<ApiBase> {
        ApiBase::parse(&self.api_base)
            .with_context(|| format!("invalid api_base '{}'", self.api_base))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            user: self.user.clone(),
            action_timeout: Duration::from_secs(self.action_timeout_secs.max(1)),
            reconnect: ReconnectPolicy {
                initial: Duration::from_millis(self.reconnect_initial_ms.max(1)),
                max: Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_initial_ms)),
            },
            dedup_window: self.dedup_window.max(1),
        }
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(v) = file.api_base {
            self.api_base = v;
        }
        if let Some(v) = file.user {
            self.user = v;
        }
        if let Some(v) = file.action_timeout_secs {
            self.action_timeout_secs = v;
        }
        if let Some(v) = file.reconnect_initial_ms {
            self.reconnect_initial_ms = v;
        }
        if let Some(v) = file.reconnect_max_ms {
            self.reconnect_max_ms = v;
        }
        if let Some(v) = file.dedup_window {
            self.dedup_window = v;
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("DASHBOARD_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = var("APP__API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = var("APP__USER") {
            self.user = v;
        }
        if let Some(v) = var("APP__ACTION_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.action_timeout_secs = v;
        }
        if let Some(v) = var("APP__RECONNECT_INITIAL_MS").and_then(|v| v.parse().ok()) {
            self.reconnect_initial_ms = v;
        }
        if let Some(v) = var("APP__RECONNECT_MAX_MS").and_then(|v| v.parse().ok()) {
            self.reconnect_max_ms = v;
        }
        if let Some(v) = var("APP__DEDUP_WINDOW").and_then(|v| v.parse().ok()) {
            self.dedup_window = v;
        }
    }

    fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(v) = &cli.api_base {
            self.api_base = v.clone();
        }
        if let Some(v) = &cli.user {
            self.user = v.clone();
        }
        if let Some(v) = cli.action_timeout_secs {
            self.action_timeout_secs = v;
        }
    }
}

/// Defaults, then the config file, then `APP__*` environment variables, then CLI flags.
pub fn load_settings(explicit: Option<&Path>, cli: &CliOverrides) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match explicit {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?;
            settings.apply_file(parse_file(&raw, path)?);
        }
        None => {
            if let Some(path) = default_config_paths().into_iter().find(|path| path.is_file()) {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file '{}'", path.display()))?;
                settings.apply_file(parse_file(&raw, &path)?);
                tracing::debug!(path = %path.display(), "config: loaded settings file");
            }
        }
    }

    settings.apply_env(|key| std::env::var(key).ok());
    settings.apply_cli(cli);
    Ok(settings)
}

fn parse_file(raw: &str, path: &Path) -> anyhow::Result<FileSettings> {
    toml::from_str(raw).with_context(|| format!("invalid config file '{}'", path.display()))
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    paths
}
