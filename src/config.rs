//! Host configuration loading and validation.
//!
//! Reads `mcp-host.yaml` and resolves environment variables. The resulting
//! `HostConfig` is built once at startup and read-only afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::mcp_client::registry::TOOL_SEPARATOR;

// ─── Constants ───────────────────────────────────────────────────────────────

/// File name searched for when `MCP_HOST_CONFIG` is not set.
pub const CONFIG_FILE_NAME: &str = "mcp-host.yaml";

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "MCP_HOST_CONFIG";

const DEFAULT_MODEL: &str = "gpt-4.1";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_INIT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_TOOL_ROUNDS: u32 = 16;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Errors raised while locating, reading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Launch parameters for one tool provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderConfig {
    /// Unique key; also the prefix of every tool this provider exposes.
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the child process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Limit for the initialize handshake plus tool listing.
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
    /// Optional limit for each `tools/call`. Unlimited when absent.
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
}

fn default_init_timeout_secs() -> u64 {
    DEFAULT_INIT_TIMEOUT_SECS
}

impl ProviderConfig {
    pub fn new(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
            cwd: None,
            init_timeout_secs: DEFAULT_INIT_TIMEOUT_SECS,
            call_timeout_secs: None,
        }
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

/// Top-level host configuration (mirrors `mcp-host.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// Model identifier sent with every request.
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL of the Responses API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Consecutive tool rounds allowed within one user turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Providers in launch order.
    pub providers: Vec<ProviderConfig>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_max_tool_rounds() -> u32 {
    DEFAULT_MAX_TOOL_ROUNDS
}

impl HostConfig {
    /// Built-in configuration used when no config file exists.
    pub fn builtin() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            providers: vec![ProviderConfig::new("fetch", "uvx", &["mcp-server-fetch"])],
        }
    }

    /// Check the invariants the rest of the host relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "model must not be empty".into(),
            });
        }
        if self.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid {
                reason: "max_tool_rounds must be at least 1".into(),
            });
        }
        if self.providers.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "at least one provider must be configured".into(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            validate_provider_name(&provider.name)?;
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::Invalid {
                    reason: format!("duplicate provider name '{}'", provider.name),
                });
            }
            if provider.command.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    reason: format!("provider '{}' has an empty command", provider.name),
                });
            }
            if provider.init_timeout_secs == 0 {
                return Err(ConfigError::Invalid {
                    reason: format!("provider '{}' has a zero init timeout", provider.name),
                });
            }
        }
        Ok(())
    }
}

/// Provider names become tool-name prefixes, so they must be non-empty,
/// separator-free, and limited to characters the model accepts in function
/// names.
fn validate_provider_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Invalid {
            reason: "provider name must not be empty".into(),
        });
    }
    if name.contains(TOOL_SEPARATOR) {
        return Err(ConfigError::Invalid {
            reason: format!("provider name '{name}' contains the reserved separator '{TOOL_SEPARATOR}'"),
        });
    }
    if name.ends_with('_') {
        return Err(ConfigError::Invalid {
            reason: format!("provider name '{name}' must not end with '_'"),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConfigError::Invalid {
            reason: format!("provider name '{name}' may only contain [A-Za-z0-9_-]"),
        });
    }
    Ok(())
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// `MCP_HOST_CONFIG` wins when set (and must exist); otherwise searches
/// upward from `start` for `mcp-host.yaml`.
pub fn find_config_path(start: &Path) -> Result<Option<PathBuf>, ConfigError> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(expand_tilde(&explicit));
        if !path.exists() {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                reason: format!("file named by {CONFIG_ENV_VAR} does not exist"),
            });
        }
        return Ok(Some(path));
    }
    Ok(search_upward(start))
}

/// Walk upward from `start` looking for `mcp-host.yaml`.
fn search_upward(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Load, interpolate, parse and validate a config file.
pub fn load_host_config(path: &Path) -> Result<HostConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_host_config(&raw)
}

/// Parse config text (after `${VAR}` interpolation) and validate it.
pub fn parse_host_config(raw: &str) -> Result<HostConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);

    let config: HostConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;

    config.validate()?;
    Ok(config)
}

/// Find and load the config, falling back to the built-in default.
pub fn load_or_builtin(start: &Path) -> Result<HostConfig, ConfigError> {
    match find_config_path(start)? {
        Some(path) => {
            let config = load_host_config(&path)?;
            tracing::info!(
                path = %path.display(),
                providers = config.providers.len(),
                model = %config.model,
                "loaded host config"
            );
            Ok(config)
        }
        None => {
            tracing::warn!(
                file = CONFIG_FILE_NAME,
                "no config file found, using built-in provider set"
            );
            Ok(HostConfig::builtin())
        }
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
