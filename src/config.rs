//! Process configuration read from `CAMPAIGN_*` environment variables

use crate::agent::campaign::{CampaignConfig, ClaimMode, DEFAULT_ADMIN_PASSPHRASE};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got '{value}'")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub port: u16,
    /// Base URL the chat platform uses to reach `/downloaded/`
    pub public_url: String,
    pub image_dir: PathBuf,
    /// Transport endpoint for outbound messages; unset means log only
    pub outbound_url: Option<String>,
    /// Upper bound on one outbound delivery
    pub publish_timeout: Duration,
    pub campaign: CampaignConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
        let data_dir = PathBuf::from(home).join(".campaign-bot");

        let port = match lookup("CAMPAIGN_PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: "CAMPAIGN_PORT",
                expected: "a port number",
                value,
            })?,
            None => DEFAULT_PORT,
        };

        let claim_mode = match lookup("CAMPAIGN_CLAIM_MODE") {
            Some(value) => value.parse::<ClaimMode>().map_err(|_| ConfigError::Invalid {
                key: "CAMPAIGN_CLAIM_MODE",
                expected: "'atomic' or 'racy'",
                value,
            })?,
            None => ClaimMode::default(),
        };

        let fetch_timeout_secs = positive_secs(
            &lookup,
            "CAMPAIGN_FETCH_TIMEOUT_SECS",
            DEFAULT_FETCH_TIMEOUT_SECS,
        )?;
        let publish_timeout_secs = positive_secs(
            &lookup,
            "CAMPAIGN_PUBLISH_TIMEOUT_SECS",
            DEFAULT_PUBLISH_TIMEOUT_SECS,
        )?;

        Ok(Self {
            db_path: lookup("CAMPAIGN_DB_PATH")
                .map_or_else(|| data_dir.join("campaign.db"), PathBuf::from),
            port,
            public_url: lookup("CAMPAIGN_PUBLIC_URL")
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            image_dir: lookup("CAMPAIGN_IMAGE_DIR")
                .map_or_else(|| data_dir.join("downloaded"), PathBuf::from),
            outbound_url: lookup("CAMPAIGN_OUTBOUND_URL").filter(|url| !url.is_empty()),
            publish_timeout: Duration::from_secs(publish_timeout_secs),
            campaign: CampaignConfig {
                admin_passphrase: lookup("CAMPAIGN_ADMIN_CODE")
                    .unwrap_or_else(|| DEFAULT_ADMIN_PASSPHRASE.to_string()),
                claim_mode,
                fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            },
        })
    }
}

fn positive_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ConfigError::Invalid {
            key,
            expected: "a positive number of seconds",
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("HOME", "/home/bot")]).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.db_path, PathBuf::from("/home/bot/.campaign-bot/campaign.db"));
        assert_eq!(config.image_dir, PathBuf::from("/home/bot/.campaign-bot/downloaded"));
        assert_eq!(config.public_url, "http://localhost:8000");
        assert_eq!(config.outbound_url, None);
        assert_eq!(config.campaign.claim_mode, ClaimMode::Atomic);
        assert_eq!(config.campaign.admin_passphrase, DEFAULT_ADMIN_PASSPHRASE);
        assert_eq!(config.campaign.fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.publish_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("CAMPAIGN_PORT", "9090"),
            ("CAMPAIGN_DB_PATH", "/data/bot.db"),
            ("CAMPAIGN_PUBLIC_URL", "https://bot.example.com"),
            ("CAMPAIGN_OUTBOUND_URL", "https://chat.example.com/push"),
            ("CAMPAIGN_CLAIM_MODE", "racy"),
            ("CAMPAIGN_FETCH_TIMEOUT_SECS", "3"),
            ("CAMPAIGN_PUBLISH_TIMEOUT_SECS", "4"),
            ("CAMPAIGN_ADMIN_CODE", "letmein"),
        ])
        .unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.db_path, PathBuf::from("/data/bot.db"));
        assert_eq!(config.public_url, "https://bot.example.com");
        assert_eq!(
            config.outbound_url.as_deref(),
            Some("https://chat.example.com/push")
        );
        assert_eq!(config.campaign.claim_mode, ClaimMode::Racy);
        assert_eq!(config.campaign.fetch_timeout, Duration::from_secs(3));
        assert_eq!(config.publish_timeout, Duration::from_secs(4));
        assert_eq!(config.campaign.admin_passphrase, "letmein");
    }

    #[test]
    fn test_invalid_values() {
        let err = config_from(&[("CAMPAIGN_CLAIM_MODE", "eventually")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "CAMPAIGN_CLAIM_MODE",
                expected: "'atomic' or 'racy'",
                value: "eventually".to_string(),
            }
        );

        assert!(config_from(&[("CAMPAIGN_PORT", "eighty")]).is_err());
        assert!(config_from(&[("CAMPAIGN_FETCH_TIMEOUT_SECS", "0")]).is_err());
        assert_eq!(
            config_from(&[("CAMPAIGN_PUBLISH_TIMEOUT_SECS", "-1")]).unwrap_err(),
            ConfigError::Invalid {
                key: "CAMPAIGN_PUBLISH_TIMEOUT_SECS",
                expected: "a positive number of seconds",
                value: "-1".to_string(),
            }
        );
    }

    #[test]
    fn test_empty_outbound_url_means_log_only() {
        let config = config_from(&[("CAMPAIGN_OUTBOUND_URL", "")]).unwrap();
        assert_eq!(config.outbound_url, None);
    }
}
