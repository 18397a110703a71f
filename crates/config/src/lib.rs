//! Configuration loading, validation, and management for Ponder.
//!
//! Loads configuration from `~/.ponder/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.ponder/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Agent loop configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Session store configuration
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Document retrieval service used by the search tool
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("gateway", &self.gateway)
            .field("agent", &self.agent)
            .field("sessions", &self.sessions)
            .field("retrieval", &self.retrieval)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// When a turn writes to session history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Write the user message and final answer together, only on success.
    /// Aborted turns leave history untouched.
    #[default]
    OnSuccess,
    /// Write the user message before generation starts; the final answer
    /// follows on success.
    UserFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Fixed instruction text sent as the first message of every prompt
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Marker that opens a reasoning segment in model output
    #[serde(default = "default_reasoning_start")]
    pub reasoning_start: String,

    /// Marker that closes a reasoning segment in model output
    #[serde(default = "default_reasoning_end")]
    pub reasoning_end: String,

    /// Ceiling on messages in the working prompt of one turn
    #[serde(default = "default_max_prompt_messages")]
    pub max_prompt_messages: usize,

    /// Capacity of the per-turn output channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    #[serde(default)]
    pub commit_policy: CommitPolicy,
}

fn default_system_prompt() -> String {
    "You are a careful research assistant with access to a document search tool.\n\
     \n\
     Think step by step before answering and enclose your thinking in \
     <thinking></thinking> tags. If a question needs facts you do not have, call \
     `search_documents`, possibly several times with different queries. Use any \
     relevant information the tool returns and cite the `Source:` URLs as markdown \
     links. If one or two plausible searches return nothing, stop searching and say so.\n\
     \n\
     Give the final answer outside the thinking tags."
        .into()
}
fn default_reasoning_start() -> String {
    "<thinking>".into()
}
fn default_reasoning_end() -> String {
    "</thinking>".into()
}
fn default_max_prompt_messages() -> usize {
    30
}
fn default_event_buffer() -> usize {
    64
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            reasoning_start: default_reasoning_start(),
            reasoning_end: default_reasoning_end(),
            max_prompt_messages: default_max_prompt_messages(),
            event_buffer: default_event_buffer(),
            commit_policy: CommitPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of live sessions before least-recently-used eviction
    #[serde(default = "default_session_capacity")]
    pub capacity: u64,

    /// Idle time after which a session is dropped
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

fn default_session_capacity() -> u64 {
    10_000
}
fn default_idle_ttl_secs() -> u64 {
    3600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: default_session_capacity(),
            idle_ttl_secs: default_idle_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Search endpoint of the document store (POST, JSON)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Default number of hits requested per search
    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

fn default_top_k() -> u32 {
    4
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            url: None,
            top_k: default_top_k(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ponder/config.toml).
    ///
    /// Also checks environment variables:
    /// - `PONDER_API_KEY` (highest priority), `OPENROUTER_API_KEY`, `OPENAI_API_KEY`
    /// - `PONDER_PROVIDER`, `PONDER_MODEL`
    /// - `PONDER_RETRIEVAL_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("PONDER_API_KEY")
                .or_else(|| lookup("OPENROUTER_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(provider) = lookup("PONDER_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("PONDER_MODEL") {
            self.default_model = model;
        }
        if let Some(url) = lookup("PONDER_RETRIEVAL_URL") {
            self.retrieval.url = Some(url);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ponder")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let (start, end) = (&self.agent.reasoning_start, &self.agent.reasoning_end);
        if start.is_empty() || end.is_empty() {
            return Err(ConfigError::ValidationError(
                "agent.reasoning_start and agent.reasoning_end must not be empty".into(),
            ));
        }
        if start.contains(end.as_str()) || end.contains(start.as_str()) {
            return Err(ConfigError::ValidationError(
                "agent reasoning markers must differ and neither may contain the other".into(),
            ));
        }

        // System + user + one assistant/tool exchange
        if self.agent.max_prompt_messages < 3 {
            return Err(ConfigError::ValidationError(
                "agent.max_prompt_messages must be at least 3".into(),
            ));
        }

        if self.agent.event_buffer == 0 {
            return Err(ConfigError::ValidationError("agent.event_buffer must be > 0".into()));
        }

        if self.sessions.capacity == 0 {
            return Err(ConfigError::ValidationError("sessions.capacity must be > 0".into()));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            gateway: GatewayConfig::default(),
            agent: AgentConfig::default(),
            sessions: SessionConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
