use crate::error::{ProxyError, Result};
use crate::providers::ProviderPreset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Key in a provider's `models` table used when the requested model has no
/// explicit mapping.
pub const DEFAULT_MODEL_KEY: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub default_provider: String,
    #[serde(default)]
    pub server: ServerConfig,
    pub providers: HashMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// When set, replaces whatever `max_tokens` the client asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Claude-side model name -> backend model name.
    #[serde(default)]
    pub models: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_tokens: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl BridgeConfig {
    /// Parse a config file. Callers run [`BridgeConfig::validate`] once any
    /// command-line overrides are applied.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(ProxyError::config(format!(
            "No config file found. Searched: {}",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(ProxyError::config("At least one [providers.<name>] table is required"));
        }
        if !self.providers.contains_key(&self.default_provider) {
            return Err(ProxyError::config(format!(
                "default_provider '{}' is not defined under [providers]",
                self.default_provider
            )));
        }
        Ok(())
    }

    /// Resolve a provider by name, or the default provider when `name` is `None`.
    pub fn provider<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a ProviderConfig)> {
        let name = name.unwrap_or(self.default_provider.as_str());
        self.providers
            .get(name)
            .map(|p| (name, p))
            .ok_or_else(|| ProxyError::unknown_provider(name))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl ProviderConfig {
    /// Exact mapping first, then the `default` entry, then the name unchanged.
    pub fn map_model(&self, requested: &str) -> String {
        self.models
            .get(requested)
            .or_else(|| self.models.get(DEFAULT_MODEL_KEY))
            .cloned()
            .unwrap_or_else(|| requested.to_string())
    }

    /// Claude-side model names this provider advertises, `default` included.
    pub fn advertised_models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn effective_base_url(&self, name: &str) -> Result<String> {
        if let Some(ref url) = self.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }

        ProviderPreset::from_name(name)
            .map(|preset| preset.base_url.to_string())
            .ok_or_else(|| {
                ProxyError::config(format!(
                    "Provider '{}' has no base_url and is not a built-in preset",
                    name
                ))
            })
    }

    pub fn resolve_api_key(&self, name: &str) -> Result<String> {
        if let Some(ref key) = self.api_key {
            return Ok(key.clone());
        }

        let var = self
            .api_key_env
            .as_deref()
            .or_else(|| ProviderPreset::from_name(name).map(|p| p.api_key_env))
            .ok_or_else(|| {
                ProxyError::config(format!(
                    "Provider '{}' needs either api_key or api_key_env",
                    name
                ))
            })?;

        std::env::var(var).map_err(|_| {
            ProxyError::config(format!(
                "Environment variable '{}' not set for provider '{}'",
                var, name
            ))
        })
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("claude-bridge.toml")];

    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("claude-bridge")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("claude-bridge").join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(home.join(".config").join("claude-bridge").join("config.toml"));
        }
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".claude-bridge.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
