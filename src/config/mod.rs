use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::directory::ChannelType;

/// A reference to a secret value.
///
/// Supports two YAML forms:
///   - Plain string:   `token: $SLACK_TOKEN` or a literal token
///   - Pointer object: `token: { key: "SLACK_TOKEN", source: "env" }`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SecretRef {
    /// Literal value or `$VAR` env-var reference.
    Plain(String),
    /// Structured pointer: key + source ("env", "keyring").
    Pointer { key: String, source: String },
}

/// Top-level configuration loaded from `config.yaml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub unreads: UnreadsConfig,
}

/// Workspace connection settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SlackConfig {
    /// API token – plain string, env-var ref, or secret pointer.
    /// `SLACK_TOKEN` in the environment takes precedence.
    #[serde(default)]
    pub token: Option<SecretRef>,
    /// Override for the Web API base URL (e.g. a proxy).
    #[serde(default)]
    pub base_url: Option<String>,
    /// OS keyring service name for `source: keyring` pointers.
    #[serde(default)]
    pub keyring_service: Option<String>,
}

/// On-disk directory cache.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Directory holding `users_cache.json` and `channels_cache.json`.
    /// Defaults to `<home>/cache`; relative paths resolve against home.
    #[serde(default)]
    pub dir: Option<String>,
    /// Snapshots older than this are refreshed.  `0` disables age-based
    /// staleness so only an explicit refresh re-fetches.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_age_secs: default_max_age_secs(),
        }
    }
}

fn default_max_age_secs() -> u64 {
    24 * 60 * 60
}

impl CacheConfig {
    pub fn max_age(&self) -> Option<Duration> {
        (self.max_age_secs > 0).then(|| Duration::from_secs(self.max_age_secs))
    }

    pub fn resolved_dir(&self) -> PathBuf {
        let home = crate::slackwire_home();
        match &self.dir {
            Some(d) if Path::new(d).is_relative() => home.join(d),
            Some(d) => PathBuf::from(d),
            None => home.join("cache"),
        }
    }
}

/// What the directory refresh enumerates.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryConfig {
    #[serde(default = "default_channel_types")]
    pub channel_types: Vec<ChannelType>,
    /// Items requested per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            channel_types: default_channel_types(),
            page_size: default_page_size(),
        }
    }
}

fn default_channel_types() -> Vec<ChannelType> {
    ChannelType::ALL.to_vec()
}

fn default_page_size() -> usize {
    200
}

/// Backoff for transient remote errors.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Unread aggregation limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UnreadsConfig {
    /// Concurrent history fetches.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_history_timeout_secs")]
    pub history_timeout_secs: u64,
    /// Default for `max_channels` when the caller omits it.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,
    /// Default for `max_messages_per_channel` when the caller omits it.
    #[serde(default = "default_max_messages_per_channel")]
    pub max_messages_per_channel: usize,
}

impl Default for UnreadsConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            history_timeout_secs: default_history_timeout_secs(),
            max_channels: default_max_channels(),
            max_messages_per_channel: default_max_messages_per_channel(),
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}

fn default_history_timeout_secs() -> u64 {
    15
}

fn default_max_channels() -> usize {
    50
}

fn default_max_messages_per_channel() -> usize {
    10
}

impl Config {
    /// Read and parse a YAML configuration file.
    pub async fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_yaml(&contents)
    }

    /// Load `path`, or fall back to defaults when it does not exist.
    ///
    /// Only a missing file is tolerated; unreadable or invalid files are
    /// still errors.
    pub async fn load_or_default(path: &Path) -> anyhow::Result<Config> {
        match tokio::fs::try_exists(path).await {
            Ok(true) => Self::load(path).await,
            _ => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Config::default())
            }
        }
    }

    pub fn from_yaml(contents: &str) -> anyhow::Result<Config> {
        let config: Config =
            serde_yaml_ng::from_str(contents).context("failed to parse config YAML")?;
        config.validate()?;

        tracing::debug!(
            channel_types = config.directory.channel_types.len(),
            max_age_secs = config.cache.max_age_secs,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Validate semantic constraints that serde cannot enforce.
    fn validate(&self) -> anyhow::Result<()> {
        if self.directory.channel_types.is_empty() {
            anyhow::bail!("config: directory.channel_types must not be empty");
        }
        let mut seen = std::collections::HashSet::new();
        for kind in &self.directory.channel_types {
            if !seen.insert(kind) {
                anyhow::bail!("config: duplicate channel type '{kind}'");
            }
        }
        if self.directory.page_size == 0 {
            anyhow::bail!("config: directory.page_size must be at least 1");
        }
        if self.unreads.max_concurrency == 0 {
            anyhow::bail!("config: unreads.max_concurrency must be at least 1 (0 would stall history fetches)");
        }
        if self.unreads.max_messages_per_channel == 0 {
            anyhow::bail!("config: unreads.max_messages_per_channel must be at least 1");
        }
        if self.unreads.history_timeout_secs == 0 {
            anyhow::bail!("config: unreads.history_timeout_secs must be at least 1");
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            anyhow::bail!("config: retry.max_delay_ms is smaller than retry.base_delay_ms");
        }
        if let Some(url) = &self.slack.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("config: slack.base_url must be an http(s) URL, got '{url}'");
            }
        }
        Ok(())
    }

    /// Serialize and write the configuration back to a YAML file.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_yaml_ng::to_string(self).context("serialize config YAML")?;
        tokio::fs::write(path, &contents)
            .await
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}
