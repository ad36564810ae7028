//! Configuration loading from society.toml and mcpServers JSON files.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use runtime::{
    AnthropicAuth, AnthropicClient, CollisionPolicy, ConnectionOptions, FailurePolicy,
    ProviderConfig, RetryPolicy, SessionConfig,
};
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub connections: ConnectionSettings,

    /// Tool providers, connected in this order.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Model provider configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider name (currently only "anthropic" supported).
    pub provider: String,

    /// Model to use for both agents.
    pub model: String,

    pub max_tokens: u32,

    pub temperature: f32,

    /// Standard Anthropic API key (sk-ant-api01-...).
    /// Mutually exclusive with oauth_token.
    pub api_key: Option<String>,

    /// OAuth access token.
    /// Mutually exclusive with api_key.
    pub oauth_token: Option<String>,

    /// Alternative Messages API endpoint.
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            temperature: 0.0,
            api_key: None,
            oauth_token: None,
            base_url: None,
        }
    }
}

/// Conversation limits.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub max_rounds: usize,
    pub tool_call_budget: usize,
    pub max_degraded_turns: usize,
    pub specify: bool,
    pub word_limit: usize,
    /// Attempts per model call, including the first.
    pub model_attempts: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            max_rounds: session.max_rounds,
            tool_call_budget: session.tool_call_budget,
            max_degraded_turns: session.max_degraded_turns,
            specify: false,
            word_limit: session.word_limit,
            model_attempts: session.retry.max_attempts,
        }
    }
}

/// Provider connection behavior.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub failure_policy: FailurePolicy,
    pub collision_policy: CollisionPolicy,
    pub connect_timeout_secs: u64,
    pub close_timeout_secs: u64,
    pub connect_attempts: u32,
    pub request_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let options = ConnectionOptions::default();
        Self {
            failure_policy: options.failure_policy,
            collision_policy: options.collision_policy,
            connect_timeout_secs: options.connect_timeout.as_secs(),
            close_timeout_secs: options.close_timeout.as_secs(),
            connect_attempts: options.retry.max_attempts,
            request_timeout_secs: options.request_timeout.as_secs(),
            shutdown_grace_secs: options.shutdown_grace.as_secs(),
        }
    }
}

/// `{"mcpServers": {"<name>": {...}}}`, the format most provider docs ship.
#[derive(Debug, Deserialize)]
struct McpServersFile {
    #[serde(rename = "mcpServers")]
    mcp_servers: BTreeMap<String, McpServerEntry>,
}

#[derive(Debug, Deserialize)]
struct McpServerEntry {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load `path` if it exists, else fall back to the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.model.provider != "anthropic" {
            return Err(ConfigError::UnsupportedProvider(self.model.provider.clone()));
        }
        if self.session.max_rounds == 0 {
            return Err(ConfigError::Invalid("session.max_rounds must be at least 1".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::DuplicateProvider(provider.name.clone()));
            }
        }
        Ok(())
    }

    /// Append the providers declared in an mcpServers JSON file.
    pub fn add_mcp_servers(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        self.add_mcp_servers_json(&content)
    }

    pub fn add_mcp_servers_json(&mut self, json: &str) -> Result<(), ConfigError> {
        let file: McpServersFile =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        for (name, entry) in file.mcp_servers {
            self.providers.push(ProviderConfig {
                name,
                command: entry.command,
                args: entry.args,
                env: entry.env,
                cwd: entry.cwd,
            });
        }
        self.validate()
    }

    /// Build the authentication from config, falling back to the
    /// `ANTHROPIC_API_KEY` environment variable.
    pub fn auth(&self) -> Result<AnthropicAuth, ConfigError> {
        match (&self.model.api_key, &self.model.oauth_token) {
            (Some(key), None) => Ok(AnthropicAuth::ApiKey(key.clone())),
            (None, Some(token)) => Ok(AnthropicAuth::OauthToken(token.clone())),
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousAuth),
            (None, None) => std::env::var("ANTHROPIC_API_KEY")
                .map(AnthropicAuth::ApiKey)
                .map_err(|_| ConfigError::MissingAuth),
        }
    }

    pub fn model_client(&self) -> Result<AnthropicClient, ConfigError> {
        let mut builder =
            AnthropicClient::builder(self.auth()?, &self.model.model).max_tokens(self.model.max_tokens);
        if let Some(base_url) = &self.model.base_url {
            builder = builder.base_url(base_url);
        }
        Ok(builder.build())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_rounds: self.session.max_rounds,
            tool_call_budget: self.session.tool_call_budget,
            max_degraded_turns: self.session.max_degraded_turns,
            word_limit: self.session.word_limit,
            temperature: self.model.temperature,
            retry: RetryPolicy::default().with_max_attempts(self.session.model_attempts),
            ..SessionConfig::default()
        }
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        let settings = &self.connections;
        ConnectionOptions {
            failure_policy: settings.failure_policy,
            collision_policy: settings.collision_policy,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            close_timeout: Duration::from_secs(settings.close_timeout_secs),
            retry: RetryPolicy::default().with_max_attempts(settings.connect_attempts),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            shutdown_grace: Duration::from_secs(settings.shutdown_grace_secs),
        }
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

    #[error("unsupported model provider '{0}', only 'anthropic' is available")]
    UnsupportedProvider(String),

    #[error("tool provider '{0}' is declared more than once")]
    DuplicateProvider(String),

    #[error(
        "authentication not configured: set model.api_key, model.oauth_token or ANTHROPIC_API_KEY"
    )]
    MissingAuth,

    #[error("ambiguous authentication: set either model.api_key OR model.oauth_token, not both")]
    AmbiguousAuth,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.model.model, "claude-sonnet-4-20250514");
        assert_eq!(config.session.max_rounds, 15);
        assert_eq!(config.session.tool_call_budget, 20);
        assert_eq!(config.connections.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.connections.collision_policy, CollisionPolicy::Reject);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn full_file_parses() {
        let config = Config::parse(
            r#"
            [model]
            model = "claude-haiku"
            temperature = 0.2
            api_key = "sk-test"

            [session]
            max_rounds = 4
            specify = true

            [connections]
            failure_policy = "degrade"
            collision_policy = "namespace"
            connect_timeout_secs = 10
            shutdown_grace_secs = 1

            [[providers]]
            name = "fs"
            command = "npx"
            args = ["-y", "@modelcontextprotocol/server-filesystem", "."]

            [[providers]]
            name = "fetch"
            command = "uvx"
            args = ["mcp-server-fetch"]
            env = { RUST_LOG = "warn" }
            "#,
        )
        .unwrap();

        assert_eq!(config.session.max_rounds, 4);
        assert!(config.session.specify);
        let names: Vec<_> = config.providers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["fs", "fetch"]);
        assert_eq!(config.providers[1].env["RUST_LOG"], "warn");

        let options = config.connection_options();
        assert_eq!(options.failure_policy, FailurePolicy::Degrade);
        assert_eq!(options.collision_policy, CollisionPolicy::Namespace);
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert_eq!(options.shutdown_grace, Duration::from_secs(1));
        assert_eq!(options.request_timeout, Duration::from_secs(30));

        let session = config.session_config();
        assert_eq!(session.max_rounds, 4);
        assert_eq!(session.temperature, 0.2);
        assert!(matches!(config.auth().unwrap(), AnthropicAuth::ApiKey(_)));
    }

    #[test]
    fn mcp_servers_json_adds_providers() {
        let mut config = Config::default();
        config
            .add_mcp_servers_json(
                r#"{
                    "mcpServers": {
                        "filesystem": {"command": "npx", "args": ["-y", "server-filesystem"]},
                        "browser": {"command": "npx", "args": ["@playwright/mcp"], "env": {"HEADLESS": "1"}}
                    }
                }"#,
            )
            .unwrap();

        let names: Vec<_> = config.providers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["browser", "filesystem"]);
        assert_eq!(config.providers[0].env["HEADLESS"], "1");
    }

    #[test]
    fn duplicate_provider_names_are_rejected() {
        let err = Config::parse(
            r#"
            [[providers]]
            name = "fs"
            command = "a"

            [[providers]]
            name = "fs"
            command = "b"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProvider(name) if name == "fs"));
    }

    #[test]
    fn both_auth_methods_are_ambiguous() {
        let config = Config::parse(
            r#"
            [model]
            api_key = "a"
            oauth_token = "b"
            "#,
        )
        .unwrap();
        assert!(matches!(config.auth(), Err(ConfigError::AmbiguousAuth)));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = Config::parse("[model]\nprovider = \"openai\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedProvider(_)));
    }
}
