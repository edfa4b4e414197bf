use serde::{Deserialize, Serialize};
use url::Url;

use crate::message::EmailAccount;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub accounts: Vec<EmailAccount>,
    pub index: IndexConfig,
    pub classifier: ClassifierConfig,
    pub notifications: NotificationConfig,
    pub sync: SyncConfig,
    pub product: ProductConfig,
    pub context: ContextConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub url: String,
    pub index: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            url: "http://localhost:9200".to_string(),
            index: "emails".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_string(),
        }
    }
}

/// Empty URL means the sink is unconfigured; the notifier logs and no-ops.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub slack_webhook_url: String,
    pub webhook_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Trailing window for the historical backfill, in days.
    pub backfill_days: i64,
    /// Fixed delay before a reconnect attempt. Retries are unbounded and
    /// the delay never grows.
    pub reconnect_delay_secs: u64,
    /// Interval between keepalive NOOPs while listening.
    pub keepalive_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            backfill_days: 30,
            reconnect_delay_secs: 30,
            keepalive_interval_secs: 300,
        }
    }
}

/// Outreach context fed to the suggested-reply generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductConfig {
    pub name: String,
    pub outreach_agenda: String,
    pub meeting_link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub path: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            path: "./data/context_db.json".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Sanity checks for `--test-config`. Accounts may be empty (the
    /// daemon runs with a warning), but whatever is present must be sound.
    pub fn validate(&self) -> anyhow::Result<()> {
        Url::parse(&self.index.url)
            .map_err(|e| anyhow::anyhow!("invalid index url '{}': {e}", self.index.url))?;
        if self.index.index.is_empty() {
            anyhow::bail!("index name must not be empty");
        }
        for account in &self.accounts {
            if account.id.is_empty() || account.host.is_empty() || account.user.is_empty() {
                anyhow::bail!("account '{}' is missing id, host or user", account.id);
            }
            if account.port == 0 {
                anyhow::bail!("account '{}' has port 0", account.id);
            }
        }
        for (name, value) in [
            ("slack_webhook_url", &self.notifications.slack_webhook_url),
            ("webhook_url", &self.notifications.webhook_url),
        ] {
            if !value.is_empty() {
                Url::parse(value).map_err(|e| anyhow::anyhow!("invalid {name} '{value}': {e}"))?;
            }
        }
        if self.sync.backfill_days < 1 {
            anyhow::bail!("backfill_days must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.backfill_days, 30);
        assert_eq!(config.sync.reconnect_delay_secs, 30);
        assert_eq!(config.sync.keepalive_interval_secs, 300);
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = Config::default();
        config.accounts.push(EmailAccount {
            id: "account1".to_string(),
            host: "imap.example.com".to_string(),
            port: 993,
            user: "user@example.com".to_string(),
            password: "secret".to_string(),
            secure: true,
        });
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.accounts.len(), 1);
        assert_eq!(back.accounts[0].host, "imap.example.com");
        assert_eq!(back.index.index, "emails");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "sync:\n  backfill_days: 7\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.sync.backfill_days, 7);
        assert_eq!(config.sync.reconnect_delay_secs, 30);
        assert_eq!(config.index.url, "http://localhost:9200");
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        let mut config = Config::default();
        config.index.url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.notifications.webhook_url = "::broken::".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = Config::default();
        config.accounts.push(EmailAccount {
            id: "a".to_string(),
            host: "h".to_string(),
            port: 0,
            user: "u".to_string(),
            password: "p".to_string(),
            secure: true,
        });
        assert!(config.validate().is_err());
    }
}
