//! Agent configuration.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Agent configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Connection URI of the local bus
    #[serde(default = "default_local_bus_uri")]
    pub local_bus_uri: String,

    /// Topic names relayed in both directions
    #[serde(default)]
    pub topics: Vec<String>,

    /// Ack deadline handed to cloud subscriptions, in seconds
    #[serde(default = "default_ack_deadline_secs")]
    pub ack_deadline_secs: u64,

    /// Cloud bus configuration
    #[serde(default)]
    pub cloud: CloudConfig,
}

/// Cloud bus configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    /// Project topics and subscriptions are provisioned under
    #[serde(default)]
    pub project_id: String,

    /// File holding a bearer token, read once at startup
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    /// Base URL of the Pub/Sub API (point at the emulator in development)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_local_bus_uri() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_ack_deadline_secs() -> u64 {
    10
}

fn default_endpoint() -> String {
    "https://pubsub.googleapis.com".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            local_bus_uri: default_local_bus_uri(),
            topics: Vec::new(),
            ack_deadline_secs: default_ack_deadline_secs(),
            cloud: CloudConfig::default(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            credentials_file: None,
            endpoint: default_endpoint(),
        }
    }
}

impl AgentConfig {
    /// Load configuration, optionally from a TOML file, then apply
    /// environment overrides and validate.
    ///
    /// # Environment Variables
    ///
    /// - `CAUSEWAY_LOCAL_BUS_URI`: Redis connection URI
    /// - `CAUSEWAY_TOPICS`: comma-separated topic names
    /// - `CAUSEWAY_ACK_DEADLINE_SECS`: cloud subscription ack deadline
    /// - `CAUSEWAY_PROJECT_ID`: cloud project identifier
    /// - `CAUSEWAY_CREDENTIALS_FILE`: bearer token file path
    /// - `CAUSEWAY_ENDPOINT`: Pub/Sub API base URL
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, an override
    /// has an invalid value, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Ack deadline as a duration.
    #[must_use]
    pub fn ack_deadline(&self) -> Duration {
        Duration::from_secs(self.ack_deadline_secs)
    }

    /// Read the bearer token from the credentials file, if one is
    /// configured. The token is trimmed of surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read.
    pub fn bearer_token(&self) -> Result<Option<String>> {
        match &self.cloud.credentials_file {
            Some(path) => {
                let token = std::fs::read_to_string(path).with_context(|| {
                    format!("Failed to read credentials file {}", path.display())
                })?;
                Ok(Some(token.trim().to_string()))
            }
            None => Ok(None),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = var("CAUSEWAY_LOCAL_BUS_URI") {
            self.local_bus_uri = uri;
        }

        if let Some(topics) = var("CAUSEWAY_TOPICS") {
            self.topics = parse_topic_list(&topics);
        }

        if let Some(secs) = var("CAUSEWAY_ACK_DEADLINE_SECS") {
            self.ack_deadline_secs = secs.parse().context("Invalid CAUSEWAY_ACK_DEADLINE_SECS")?;
        }

        if let Some(project) = var("CAUSEWAY_PROJECT_ID") {
            self.cloud.project_id = project;
        }

        if let Some(path) = var("CAUSEWAY_CREDENTIALS_FILE") {
            self.cloud.credentials_file = Some(PathBuf::from(path));
        }

        if let Some(endpoint) = var("CAUSEWAY_ENDPOINT") {
            self.cloud.endpoint = endpoint;
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let uri = Url::parse(&self.local_bus_uri)
            .with_context(|| format!("Invalid local_bus_uri {}", self.local_bus_uri))?;
        if uri.scheme() != "redis" && uri.scheme() != "rediss" {
            bail!(
                "local_bus_uri must be a redis:// or rediss:// URI, got scheme {}",
                uri.scheme()
            );
        }

        if self.topics.is_empty() {
            bail!("No topics configured (set topics or CAUSEWAY_TOPICS)");
        }

        if self.cloud.project_id.is_empty() {
            bail!("No cloud project configured (set cloud.project_id or CAUSEWAY_PROJECT_ID)");
        }

        Ok(())
    }
}

fn parse_topic_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|topic| !topic.is_empty())
        .map(ToString::to_string)
        .collect()
}
