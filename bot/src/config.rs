use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::engine::rest::DEFAULT_API_BASE;
use crate::engine::scheduler::DEFAULT_FLUSH_INTERVAL;

/// Top-level bot configuration, loaded from inviteroles.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BotConfig {
    pub database: DatabaseSection,
    pub discord: DiscordSection,
    pub persistence: PersistenceSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:inviteroles.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DiscordSection {
    pub token: String,
    pub api_base: String,
    pub request_timeout_secs: u64,
}

impl Default for DiscordSection {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: DEFAULT_API_BASE.into(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    pub flush_interval_secs: u64,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL.as_secs(),
        }
    }
}

impl BotConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            Self::parse(&contents).with_context(|| format!("failed to parse config file {path}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = var("DISCORD_TOKEN") {
            self.discord.token = v;
        }
        if let Some(v) = var("DISCORD_API_BASE") {
            self.discord.api_base = v;
        }
        if let Some(v) = var("REQUEST_TIMEOUT_SECS")
            && let Ok(secs) = v.parse()
        {
            self.discord.request_timeout_secs = secs;
        }
        if let Some(v) = var("FLUSH_INTERVAL_SECS")
            && let Ok(secs) = v.parse()
        {
            self.persistence.flush_interval_secs = secs;
        }
    }

    /// A zero interval would make the ticker panic; clamp to one second.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.persistence.flush_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.discord.request_timeout_secs.max(1))
    }
}
