use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub slack: SlackConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub reactions: ReactionsConfig,
    #[serde(default)]
    pub emojis: HashMap<String, EmojiConfig>,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    pub bot_token: String,
    /// When set, every inbound request must carry a valid `X-Slack-Signature`.
    #[serde(default)]
    pub signing_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReactionsConfig {
    /// Explicit trigger set. Falls back to the keys of `[emojis]` when absent.
    #[serde(default)]
    pub trigger_emojis: Option<Vec<String>>,
    #[serde(default = "default_fallback_label")]
    pub fallback_label: String,
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for ReactionsConfig {
    fn default() -> Self {
        Self {
            trigger_emojis: None,
            fallback_label: default_fallback_label(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl ReactionsConfig {
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Per-emoji behaviour: the backend tag and the confirmation text.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EmojiConfig {
    pub label: String,
    /// Confirmation template; `{url}` and `{label}` are substituted.
    #[serde(default = "default_emoji_message")]
    pub message: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            max_results: default_max_results(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Linkding(LinkdingConfig),
    Wallabag(WallabagConfig),
}

impl std::fmt::Display for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendConfig::Linkding(c) => write!(f, "linkding ({})", c.base_url),
            BackendConfig::Wallabag(c) => write!(f, "wallabag ({})", c.base_url),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LinkdingConfig {
    pub base_url: String,
    pub api_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WallabagConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_rate_limit() -> u32 {
    20
}

fn default_fallback_label() -> String {
    "slack-import".to_string()
}

fn default_dedup_ttl_secs() -> u64 {
    60
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_emoji_message() -> String {
    "Saved with label '{label}'".to_string()
}

fn default_max_age_days() -> i64 {
    365
}

fn default_max_results() -> usize {
    50
}

/// Strip the `:name:` wrapping Slack uses when an emoji is typed as text.
pub fn normalize_emoji(name: &str) -> String {
    name.trim().trim_matches(':').to_string()
}

impl Config {
    /// Emojis that start the save workflow.
    pub fn trigger_emojis(&self) -> Vec<String> {
        match &self.reactions.trigger_emojis {
            Some(list) => list.iter().map(|e| normalize_emoji(e)).collect(),
            None => self.emojis.keys().cloned().collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).context("Failed to parse config file")?;

        config.emojis = config
            .emojis
            .into_iter()
            .map(|(name, emoji)| (normalize_emoji(&name), emoji))
            .collect();

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.reactions.dedup_ttl_secs == 0 {
            anyhow::bail!("reactions.dedup_ttl_secs must be greater than zero");
        }
        if self.reactions.call_timeout_secs == 0 {
            anyhow::bail!("reactions.call_timeout_secs must be greater than zero");
        }
        if self.server.rate_limit_per_minute == 0 {
            anyhow::bail!("server.rate_limit_per_minute must be greater than zero");
        }
        if self.emojis.keys().any(|name| name.is_empty()) {
            anyhow::bail!("emoji names in [emojis] must not be empty");
        }
        if let Some(list) = &self.reactions.trigger_emojis {
            if list.iter().any(|e| normalize_emoji(e).is_empty()) {
                anyhow::bail!("reactions.trigger_emojis must not contain empty names");
            }
        }
        Ok(())
    }
}
