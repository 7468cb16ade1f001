//! Configuration management for Tabmate
//!
//! This module handles loading, parsing, and validating configuration for
//! the bot connection, the optional content-relay webhook, and the session
//! retention policy.

use crate::error::{Result, TabmateError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for Tabmate
///
/// Secrets (API keys, long-lived credentials) never appear here in
/// plaintext form at rest; they are routed through the encrypted secret
/// store before touching the persistence substrate.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Bot connection configuration
    #[serde(default)]
    pub bot: BotConfig,

    /// Content-relay webhook configuration
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Session retention policy
    #[serde(default)]
    pub retention: RetentionPolicy,
}

/// Bot connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Whether the bot connection may be used at all.
    ///
    /// A disabled configuration must never be used to attempt network
    /// calls; the gateway enforces this.
    #[serde(default)]
    pub enabled: bool,

    /// Opaque connection identifier assigned by the backend vendor
    #[serde(default)]
    pub connection_id: String,

    /// Base URL for the backend API
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    "https://api.tabmate.dev".to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            connection_id: String::new(),
            api_base: default_api_base(),
        }
    }
}

/// Content-relay webhook configuration
///
/// When enabled, extracted page content is forwarded to `target_url`.
/// The API key, when present, is stored encrypted and attached as a
/// request header at delivery time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookConfig {
    /// Whether the relay may be used at all
    #[serde(default)]
    pub enabled: bool,

    /// Destination URL for relayed content
    #[serde(default)]
    pub target_url: String,

    /// Optional API key sent with each delivery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Session retention policy
///
/// Applied on demand by `SessionRepository::cleanup`, not on a timer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Maximum number of sessions kept; oldest-by-activity beyond this
    /// rank are deleted
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Maximum messages retained per surviving session
    #[serde(default = "default_max_messages")]
    pub max_messages_per_session: usize,

    /// Sessions whose last activity is older than this many days are
    /// deleted regardless of rank
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
}

fn default_max_sessions() -> usize {
    100
}

fn default_max_messages() -> usize {
    200
}

fn default_max_age_days() -> i64 {
    30
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_messages_per_session: default_max_messages(),
            max_age_days: default_max_age_days(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(TabmateError::Io)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(TabmateError::Yaml)?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Enabled sections must be well-formed; disabled sections are left
    /// alone so a half-filled draft can still be saved.
    ///
    /// # Errors
    ///
    /// Returns `TabmateError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.bot.enabled {
            if self.bot.connection_id.trim().is_empty() {
                return Err(
                    TabmateError::Config("bot.connection_id must not be empty".to_string()).into(),
                );
            }
            url::Url::parse(&self.bot.api_base).map_err(|e| {
                TabmateError::Config(format!("bot.api_base is not a valid URL: {}", e))
            })?;
        }

        if self.webhook.enabled {
            url::Url::parse(&self.webhook.target_url).map_err(|e| {
                TabmateError::Config(format!("webhook.target_url is not a valid URL: {}", e))
            })?;
        }

        if self.retention.max_sessions == 0 {
            return Err(
                TabmateError::Config("retention.max_sessions must be at least 1".to_string())
                    .into(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_retention_policy() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.max_sessions, 100);
        assert_eq!(policy.max_messages_per_session, 200);
        assert_eq!(policy.max_age_days, 30);
    }

    #[test]
    fn test_enabled_bot_requires_connection_id() {
        let config = Config {
            bot: BotConfig {
                enabled: true,
                connection_id: "".to_string(),
                api_base: default_api_base(),
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("connection_id"));
    }

    #[test]
    fn test_enabled_bot_requires_valid_api_base() {
        let config = Config {
            bot: BotConfig {
                enabled: true,
                connection_id: "conn-1".to_string(),
                api_base: "not a url".to_string(),
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_webhook_requires_valid_target() {
        let config = Config {
            webhook: WebhookConfig {
                enabled: true,
                target_url: "garbage".to_string(),
                api_key: None,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_sections_are_not_validated() {
        let config = Config {
            bot: BotConfig {
                enabled: false,
                connection_id: "".to_string(),
                api_base: "".to_string(),
            },
            webhook: WebhookConfig {
                enabled: false,
                target_url: "not a url".to_string(),
                api_key: None,
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_max_sessions_rejected() {
        let config = Config {
            retention: RetentionPolicy {
                max_sessions: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_yaml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "bot:\n  enabled: true\n  connection_id: conn-42\nretention:\n  max_sessions: 5\n",
        )
        .expect("write config");

        let config = Config::load(&path).expect("load config");
        assert!(config.bot.enabled);
        assert_eq!(config.bot.connection_id, "conn-42");
        assert_eq!(config.retention.max_sessions, 5);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.retention.max_age_days, 30);
        assert!(!config.webhook.enabled);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = Config {
            bot: BotConfig {
                enabled: true,
                connection_id: "c".to_string(),
                api_base: "https://example.test".to_string(),
            },
            webhook: WebhookConfig {
                enabled: true,
                target_url: "https://hook.example.test/in".to_string(),
                api_key: Some("k".to_string()),
            },
            retention: RetentionPolicy::default(),
        };
        let yaml = serde_yaml::to_string(&config).expect("serialize");
        let parsed: Config = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(parsed.bot.connection_id, "c");
        assert_eq!(parsed.webhook.api_key.as_deref(), Some("k"));
    }
}
