//! Supervisor configuration.
//!
//! Precedence, lowest to highest: built-in defaults, the TOML config file,
//! `GLM_*` environment variables. A missing config file is normal; a
//! malformed one is a validation error.

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

use crate::errors::GlmError;

pub const DEFAULT_BASE_URL: &str = "https://api.z.ai/api/anthropic";
pub const DEFAULT_OPUS_MODEL: &str = "glm-4.7";
pub const DEFAULT_SONNET_MODEL: &str = "glm-4.7";
pub const DEFAULT_HAIKU_MODEL: &str = "glm-4.5-air";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Opaque API credential handed to the child.
    pub auth_token: String,
    /// API routing base URL.
    pub base_url: String,
    pub opus_model: String,
    pub sonnet_model: String,
    pub haiku_model: String,
    /// Slot cap; 0 means unbounded.
    pub max_parallel: u32,
    /// Default child timeout in seconds.
    pub timeout_seconds: u64,
    pub permission_mode: String,
    /// Request timeout handed to the child, in milliseconds.
    pub api_timeout_ms: u64,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            auth_token: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            opus_model: DEFAULT_OPUS_MODEL.to_string(),
            sonnet_model: DEFAULT_SONNET_MODEL.to_string(),
            haiku_model: DEFAULT_HAIKU_MODEL.to_string(),
            max_parallel: 3,
            timeout_seconds: 900,
            permission_mode: "acceptEdits".to_string(),
            api_timeout_ms: 300_000,
            debug: false,
        }
    }
}

impl Config {
    /// Resolve the three model slots, with an optional caller override
    /// applied to all of them at once.
    pub fn models(&self, model_override: Option<&str>) -> (String, String, String) {
        match model_override {
            Some(m) => (m.to_string(), m.to_string(), m.to_string()),
            None => (
                self.opus_model.clone(),
                self.sonnet_model.clone(),
                self.haiku_model.clone(),
            ),
        }
    }

    /// The `model.txt` line recorded for a job.
    pub fn model_line(&self, model_override: Option<&str>) -> String {
        let (opus, sonnet, haiku) = self.models(model_override);
        format!("opus={opus} sonnet={sonnet} haiku={haiku}")
    }
}

/// `$XDG_CONFIG_HOME/glm/config.toml`, falling back to `~/.config/glm/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Some(PathBuf::from(xdg).join("glm").join("config.toml"));
        }
    }
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".config").join("glm").join("config.toml"))
}

/// Load configuration: defaults, then the config file, then env overrides.
pub fn load() -> Result<Config> {
    let mut cfg = match config_path() {
        Some(path) if path.is_file() => {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str(&raw).map_err(|e| {
                GlmError::validation(format!("malformed config file {}: {e}", path.display()))
                    .with_suggestion("Fix the TOML or remove the file to use defaults")
            })?
        }
        _ => Config::default(),
    };
    apply_env(&mut cfg)?;
    debug!(max_parallel = cfg.max_parallel, timeout = cfg.timeout_seconds, "configuration loaded");
    Ok(cfg)
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_string(name) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            GlmError::validation(format!("{name} must be a non-negative integer, got {raw:?}"))
                .into()
        }),
        None => Ok(None),
    }
}

fn apply_env(cfg: &mut Config) -> Result<()> {
    if let Some(v) = env_string("GLM_AUTH_TOKEN") {
        cfg.auth_token = v;
    }
    if let Some(v) = env_string("GLM_BASE_URL") {
        cfg.base_url = v;
    }
    if let Some(v) = env_string("GLM_OPUS_MODEL") {
        cfg.opus_model = v;
    }
    if let Some(v) = env_string("GLM_SONNET_MODEL") {
        cfg.sonnet_model = v;
    }
    if let Some(v) = env_string("GLM_HAIKU_MODEL") {
        cfg.haiku_model = v;
    }
    if let Some(v) = env_number::<u32>("GLM_MAX_PARALLEL")? {
        cfg.max_parallel = v;
    }
    if let Some(v) = env_number::<u64>("GLM_TIMEOUT_SECONDS")? {
        cfg.timeout_seconds = v;
    }
    if let Some(v) = env_string("GLM_PERMISSION_MODE") {
        cfg.permission_mode = v;
    }
    if let Some(v) = env_number::<u64>("GLM_API_TIMEOUT_MS")? {
        cfg.api_timeout_ms = v;
    }
    if let Some(v) = env_string("GLM_DEBUG") {
        cfg.debug = v == "1" || v.eq_ignore_ascii_case("true");
    }
    Ok(())
}
