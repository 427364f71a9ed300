//! Configuration loading from sqlchat.toml and the environment.

use runtime::{DEFAULT_MAX_TOKENS, FollowUp};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_CONFIG_FILE: &str = "sqlchat.toml";

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PATH: &str = "/mcp/";
const DEFAULT_SERVER_PORT: u16 = 8000;
const DEFAULT_CLIENT_PORT: u16 = 8001;
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
}

/// Where `sqlchat serve` listens and which database it exposes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub database: PathBuf,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("./chinook.db"),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
            path: DEFAULT_PATH.to_string(),
        }
    }
}

/// Where `sqlchat chat` finds the tool host, and how it runs turns.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub follow_up: FollowUp,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_CLIENT_PORT,
            path: DEFAULT_PATH.to_string(),
            follow_up: FollowUp::default(),
        }
    }
}

impl ClientConfig {
    /// URL of the MCP endpoint.
    pub fn endpoint(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("http://{}:{}{path}", self.host, self.port)
    }
}

/// LLM provider selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Anthropic,
}

impl Provider {
    /// Environment variable holding this provider's API key.
    pub fn api_key_var(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => DEFAULT_OPENAI_MODEL,
            Self::Anthropic => DEFAULT_ANTHROPIC_MODEL,
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(format!("unknown provider '{other}' (expected openai or anthropic)")),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Language model configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: Provider,

    /// Model identifier; the provider's default when unset.
    pub name: Option<String>,

    /// API key for the selected provider.
    pub api_key: Option<String>,

    /// Override for the provider's API base URL.
    pub base_url: Option<String>,

    pub max_tokens: u32,

    /// Replaces the built-in system instruction.
    pub system_prompt: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            name: None,
            api_key: None,
            base_url: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: None,
        }
    }
}

impl ModelConfig {
    pub fn model_name(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for log files, created on start-up.
    pub dir: PathBuf,
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load the explicit file, or `sqlchat.toml` if present, then apply the
    /// process environment.
    pub fn from_env(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::load(DEFAULT_CONFIG_FILE)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Override fields from environment variables looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(database) = lookup("DATABASE_PATH") {
            self.server.database = PathBuf::from(database);
        }
        if let Some(host) = lookup("MCP_HOST") {
            self.server.host = host.clone();
            self.client.host = host;
        }
        if let Some(port) = lookup("MCP_PORT") {
            let port: u16 = parse_var("MCP_PORT", &port)?;
            self.server.port = port;
            self.client.port = port;
        }
        if let Some(path) = lookup("MCP_PATH") {
            self.server.path = path.clone();
            self.client.path = path;
        }
        if let Some(provider) = lookup("SQLCHAT_PROVIDER") {
            self.model.provider = parse_var("SQLCHAT_PROVIDER", &provider)?;
        }
        if let Some(name) = lookup("SQLCHAT_MODEL") {
            self.model.name = Some(name);
        }
        if let Some(key) = lookup(self.model.provider.api_key_var()) {
            self.model.api_key = Some(key);
        }
        if self.model.provider == Provider::OpenAi
            && let Some(url) = lookup("OPENAI_BASE_URL")
        {
            self.model.base_url = Some(url);
        }
        if let Some(follow_up) = lookup("SQLCHAT_FOLLOW_UP") {
            self.client.follow_up = parse_var("SQLCHAT_FOLLOW_UP", &follow_up)?;
        }
        if let Some(dir) = lookup("SQLCHAT_LOG_DIR") {
            self.logging.dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// The API key for the selected provider.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.model
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey {
                provider: self.model.provider,
                var: self.model.provider.api_key_var(),
            })
    }
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid {var}='{value}': {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("no API key for provider {provider}: set {var} or model.api_key")]
    MissingApiKey {
        provider: Provider,
        var: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.database, PathBuf::from("./chinook.db"));
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.client.endpoint(), "http://localhost:8001/mcp/");
        assert_eq!(config.model.model_name(), "gpt-4o-mini");
        assert_eq!(config.model.max_tokens, 8000);
        assert_eq!(config.client.follow_up, FollowUp::PerCall);
        assert_eq!(config.logging.dir, PathBuf::from("logs"));
    }

    #[test]
    fn parses_partial_toml() {
        let config = Config::parse(
            r#"
            [server]
            database = "/data/music.db"
            port = 9000

            [client]
            follow_up = "after_batch"

            [model]
            provider = "anthropic"
            max_tokens = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.server.database, PathBuf::from("/data/music.db"));
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.client.follow_up, FollowUp::AfterBatch);
        assert_eq!(config.model.provider, Provider::Anthropic);
        assert_eq!(config.model.model_name(), "claude-sonnet-4-20250514");
        assert_eq!(config.model.max_tokens, 1024);
    }

    #[test]
    fn rejects_bad_toml() {
        let err = Config::parse("[model]\nprovider = \"gemini\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = Config::parse("[server]\nport = 9000").unwrap();
        config
            .apply_env(env(&[
                ("DATABASE_PATH", "./other.db"),
                ("MCP_HOST", "0.0.0.0"),
                ("MCP_PORT", "8100"),
                ("MCP_PATH", "/tools/"),
                ("SQLCHAT_MODEL", "gpt-4o"),
                ("OPENAI_API_KEY", "sk-test"),
                ("OPENAI_BASE_URL", "http://localhost:11434/v1"),
                ("SQLCHAT_FOLLOW_UP", "after_batch"),
                ("SQLCHAT_LOG_DIR", "/tmp/sqlchat-logs"),
            ]))
            .unwrap();

        assert_eq!(config.server.database, PathBuf::from("./other.db"));
        assert_eq!(config.server.port, 8100);
        assert_eq!(config.client.endpoint(), "http://0.0.0.0:8100/tools/");
        assert_eq!(config.model.model_name(), "gpt-4o");
        assert_eq!(config.api_key().unwrap(), "sk-test");
        assert_eq!(config.model.base_url.as_deref(), Some("http://localhost:11434/v1"));
        assert_eq!(config.client.follow_up, FollowUp::AfterBatch);
        assert_eq!(config.logging.dir, PathBuf::from("/tmp/sqlchat-logs"));
    }

    #[test]
    fn api_key_follows_selected_provider() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("SQLCHAT_PROVIDER", "anthropic"),
                ("OPENAI_API_KEY", "sk-openai"),
                ("OPENAI_BASE_URL", "http://ignored"),
            ]))
            .unwrap();

        let err = config.api_key().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingApiKey {
                provider: Provider::Anthropic,
                var: "ANTHROPIC_API_KEY"
            }
        ));
        assert!(config.model.base_url.is_none());

        config
            .apply_env(env(&[("ANTHROPIC_API_KEY", "sk-ant")]))
            .unwrap();
        assert_eq!(config.api_key().unwrap(), "sk-ant");
    }

    #[test]
    fn invalid_env_values_are_errors() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("MCP_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "MCP_PORT", .. }));

        let err = config
            .apply_env(env(&[("SQLCHAT_FOLLOW_UP", "sometimes")]))
            .unwrap_err();
        assert!(err.to_string().contains("SQLCHAT_FOLLOW_UP"));
    }

    #[test]
    fn endpoint_adds_leading_slash() {
        let client = ClientConfig {
            path: "mcp".into(),
            ..ClientConfig::default()
        };
        assert_eq!(client.endpoint(), "http://localhost:8001/mcp");
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.logging.level, "debug");

        let missing = Config::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io(_)));
    }
}
