//! Configuration loading from chatbot.toml.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use mcp::ServerConfig;
use serde::Deserialize;

/// Default config file, read from the working directory when present.
pub const CONFIG_FILE: &str = "chatbot.toml";

/// Environment variable holding the model credential.
pub const API_KEY_VAR: &str = "GOOGLE_API_KEY";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Model endpoint settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Tool server launch settings.
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Gemini model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// API base URL, overridable for proxies and tests.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Optional system instruction sent with every request.
    pub system: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            base_url: default_base_url(),
            system: None,
        }
    }
}

/// How to launch the MCP tool server.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_command")]
    pub command: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Extra environment for the child. The parent environment is inherited.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            env: HashMap::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    runtime::DEFAULT_MODEL.to_string()
}

fn default_base_url() -> String {
    runtime::DEFAULT_BASE_URL.to_string()
}

fn default_command() -> String {
    "uv".to_string()
}

fn default_args() -> Vec<String> {
    vec!["run".to_string(), "research_server.py".to_string()]
}

fn default_timeout_secs() -> u64 {
    mcp::DEFAULT_TIMEOUT.as_secs()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise `chatbot.toml` if it exists,
    /// otherwise the defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(CONFIG_FILE).exists() => Self::load(CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.command.trim().is_empty() {
            return Err(ConfigError::Invalid("server.command must not be empty".into()));
        }
        if self.server.timeout_secs == 0 {
            return Err(ConfigError::Invalid("server.timeout_secs must be positive".into()));
        }
        if self.model.name.trim().is_empty() {
            return Err(ConfigError::Invalid("model.name must not be empty".into()));
        }
        Ok(())
    }

    /// Launch parameters for the tool server.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(&self.server.command, self.server.args.clone())
            .with_env(self.server.env.clone())
            .with_timeout(Duration::from_secs(self.server.timeout_secs))
    }
}

/// Read the model credential from the environment.
pub fn api_key() -> Result<String, ConfigError> {
    api_key_from(std::env::var(API_KEY_VAR).ok())
}

fn api_key_from(value: Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(ConfigError::MissingApiKey),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("GOOGLE_API_KEY is not set")]
    MissingApiKey,
}
