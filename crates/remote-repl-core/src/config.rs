//! Connection settings for REPL sessions.
//!
//! Settings are layered: defaults, then the JSON config file, then the
//! environment, then whatever the caller sets explicitly.

use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{ApiToken, MachineName, MachineSelector, TokenError};

/// Default service endpoint.
pub const DEFAULT_SERVER_URL: &str = "wss://api.forevervm.com";

/// Environment variable holding the API token.
pub const TOKEN_ENV: &str = "REMOTE_REPL_TOKEN";
/// Environment variable overriding the server URL.
pub const API_BASE_ENV: &str = "REMOTE_REPL_API_BASE";
/// Environment variable naming the machine to attach to.
pub const MACHINE_ENV: &str = "REMOTE_REPL_MACHINE";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No API token configured (set {TOKEN_ENV} or log in)")]
    MissingToken,
    #[error("Invalid token: {0}")]
    Token(#[from] TokenError),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Could not determine the config directory")]
    NoConfigDir,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Connection settings for one REPL session.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Bearer credential. Required before connecting.
    pub token: Option<ApiToken>,
    /// Service base URL (`http(s)` or `ws(s)`).
    pub server_url: Url,
    /// Machine to attach to; `None` asks the server for a new one.
    pub machine: Option<MachineName>,
    /// Timeout hint sent with every instruction unless overridden.
    pub default_timeout: Option<Duration>,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            token: None,
            server_url: default_server_url(),
            machine: None,
            default_timeout: None,
        }
    }
}

fn default_server_url() -> Url {
    Url::parse(DEFAULT_SERVER_URL)
        .unwrap_or_else(|e| unreachable!("default server URL is invalid: {e}"))
}

impl ReplConfig {
    /// Create a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from the config file and the process environment.
    ///
    /// # Errors
    /// Returns error if the config file or an environment value is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_file(&ConfigManager::new()?.load()?);
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Set the token.
    #[must_use]
    pub fn with_token(mut self, token: ApiToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Set the server URL.
    #[must_use]
    pub fn with_server_url(mut self, url: Url) -> Self {
        self.server_url = url;
        self
    }

    /// Attach to an existing machine.
    #[must_use]
    pub fn with_machine(mut self, machine: impl Into<MachineName>) -> Self {
        self.machine = Some(machine.into());
        self
    }

    /// Set the default instruction timeout hint.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Overlay values from a config file.
    pub fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(token) = &file.token {
            self.token = Some(token.clone());
        }
        if let Some(url) = &file.server_url {
            self.server_url = url.clone();
        }
    }

    /// Overlay values from environment lookups.
    ///
    /// # Errors
    /// Returns error if a present variable does not parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = present(TOKEN_ENV) {
            self.token = Some(ApiToken::from_str(&token)?);
        }
        if let Some(url) = present(API_BASE_ENV) {
            self.server_url = Url::parse(url.trim())?;
        }
        if let Some(machine) = present(MACHINE_ENV) {
            self.machine = Some(MachineName::new(machine.trim()));
        }
        Ok(())
    }

    /// The token, or an error if none is configured.
    ///
    /// # Errors
    /// Returns `MissingToken` if no token is set.
    pub fn require_token(&self) -> Result<&ApiToken, ConfigError> {
        self.token.as_ref().ok_or(ConfigError::MissingToken)
    }

    /// WebSocket URL of the REPL endpoint for a machine.
    ///
    /// # Errors
    /// Returns error if the base URL has an unsupported scheme.
    pub fn repl_url(&self, machine: &MachineSelector) -> Result<Url, ConfigError> {
        let mut url = self.server_url.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::UnsupportedScheme(scheme.to_string()))?;

        let path = format!("/v1/machine/{}/repl", machine.path_segment());
        Ok(url.join(&path)?)
    }
}

/// On-disk config file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ApiToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<Url>,
}

/// Reads and writes the JSON config file.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager for the default location (`<config dir>/remote-repl/config.json`).
    ///
    /// # Errors
    /// Returns error if the platform has no config directory.
    pub fn new() -> Result<Self, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::with_path(dir.join("remote-repl").join("config.json")))
    }

    /// Manager for an explicit path.
    #[must_use]
    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    /// Path of the config file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Load the file; a missing file yields an empty config.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<ConfigFile, ConfigError> {
        if !self.config_path.exists() {
            tracing::debug!(path = %self.config_path.display(), "No config file");
            return Ok(ConfigFile::default());
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write the file, creating parent directories.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn save(&self, file: &ConfigFile) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut raw = serde_json::to_string_pretty(file)?;
        raw.push('\n');
        std::fs::write(&self.config_path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_repl_url_maps_schemes() {
        let config = ReplConfig::new().with_server_url(Url::parse("https://example.com").unwrap());
        let url = config.repl_url(&MachineSelector::New).unwrap();
        assert_eq!(url.as_str(), "wss://example.com/v1/machine/new/repl");

        let config = ReplConfig::new().with_server_url(Url::parse("http://127.0.0.1:8080").unwrap());
        let url = config
            .repl_url(&MachineSelector::Named(MachineName::new("m1")))
            .unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8080/v1/machine/m1/repl");
    }

    #[test]
    fn test_repl_url_rejects_other_schemes() {
        let config = ReplConfig::new().with_server_url(Url::parse("ftp://example.com").unwrap());
        assert!(matches!(
            config.repl_url(&MachineSelector::New),
            Err(ConfigError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ReplConfig::new();
        config
            .apply_env(env_of(&[
                (TOKEN_ENV, "id.secret"),
                (API_BASE_ENV, "http://localhost:3000"),
                (MACHINE_ENV, "warm-machine"),
            ]))
            .unwrap();
        assert_eq!(config.require_token().unwrap().id(), "id");
        assert_eq!(config.server_url.as_str(), "http://localhost:3000/");
        assert_eq!(config.machine, Some(MachineName::new("warm-machine")));
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let mut config = ReplConfig::new();
        config.apply_env(env_of(&[(TOKEN_ENV, "  ")])).unwrap();
        assert!(matches!(config.require_token(), Err(ConfigError::MissingToken)));
        assert_eq!(config.server_url.as_str(), "wss://api.forevervm.com/");
    }

    #[test]
    fn test_invalid_env_token() {
        let mut config = ReplConfig::new();
        let err = config.apply_env(env_of(&[(TOKEN_ENV, "garbage")])).unwrap_err();
        assert!(matches!(err, ConfigError::Token(TokenError::InvalidFormat)));
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("nested").join("config.json"));

        assert_eq!(manager.load().unwrap(), ConfigFile::default());

        let file = ConfigFile {
            token: Some("id.secret".parse().unwrap()),
            server_url: Some(Url::parse("https://repl.example").unwrap()),
        };
        manager.save(&file).unwrap();
        assert_eq!(manager.load().unwrap(), file);

        let mut config = ReplConfig::new();
        config.apply_file(&file);
        assert_eq!(config.server_url.as_str(), "https://repl.example/");
        assert!(config.token.is_some());
    }
}
