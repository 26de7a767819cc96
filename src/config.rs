use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub home: HomeConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    /// Fallback token used when the webhook URL carries no `token` parameter.
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HomeConfig {
    #[serde(default = "default_home_base_url")]
    pub base_url: String,
    /// Upper bound for every outbound call, Telegram included.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_typing_delay_ms")]
    pub typing_delay_ms: u64,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_webhook_path() -> String {
    "/api/telegram-webhook".to_string()
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_home_base_url() -> String {
    "https://sezukuu.vercel.app".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_typing_delay_ms() -> u64 {
    600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            webhook_path: default_webhook_path(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_url: default_telegram_api_url(),
        }
    }
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self {
            base_url: default_home_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            typing_delay_ms: default_typing_delay_ms(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)?
        } else {
            info!(
                "No config file at {}, using defaults",
                path.display()
            );
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Override file values with `TELEGRAM_BOT_TOKEN` and `HOME_BASE_URL`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|t| !t.is_empty()) {
            self.telegram.bot_token = Some(token);
        }
        if let Some(url) = lookup("HOME_BASE_URL").filter(|u| !u.is_empty()) {
            self.home.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.home.base_url)
            .with_context(|| format!("Invalid home.base_url: {}", self.home.base_url))?;
        reqwest::Url::parse(&self.telegram.api_url)
            .with_context(|| format!("Invalid telegram.api_url: {}", self.telegram.api_url))?;
        if !self.server.webhook_path.starts_with('/') {
            anyhow::bail!(
                "server.webhook_path must start with '/': {}",
                self.server.webhook_path
            );
        }
        Ok(())
    }

    /// Fallback bot token, ignoring an empty string in the config file.
    pub fn fallback_token(&self) -> Option<&str> {
        self.telegram
            .bot_token
            .as_deref()
            .filter(|t| !t.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.home.timeout_secs)
    }

    pub fn typing_delay(&self) -> Duration {
        Duration::from_millis(self.relay.typing_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.webhook_path, "/api/telegram-webhook");
        assert_eq!(config.telegram.api_url, "https://api.telegram.org");
        assert_eq!(config.home.base_url, "https://sezukuu.vercel.app");
        assert_eq!(config.typing_delay(), Duration::from_millis(600));
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert!(config.fallback_token().is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
[telegram]
bot_token = "123:ABC"

[relay]
typing_delay_ms = 0
"#,
        )
        .unwrap();
        assert_eq!(config.fallback_token(), Some("123:ABC"));
        assert_eq!(config.telegram.api_url, "https://api.telegram.org");
        assert_eq!(config.typing_delay(), Duration::ZERO);
    }

    #[test]
    fn test_empty_token_is_no_token() {
        let config = Config::parse("[telegram]\nbot_token = \"\"\n").unwrap();
        assert!(config.fallback_token().is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::parse(
            "[home]\nbase_url = \"https://file.example\"\n",
        )
        .unwrap();
        config.apply_env(|key| match key {
            "TELEGRAM_BOT_TOKEN" => Some("env-token".to_string()),
            "HOME_BASE_URL" => Some("https://env.example".to_string()),
            _ => None,
        });
        assert_eq!(config.fallback_token(), Some("env-token"));
        assert_eq!(config.home.base_url, "https://env.example");
    }

    #[test]
    fn test_empty_env_does_not_override() {
        let mut config = Config::parse("[telegram]\nbot_token = \"file-token\"\n").unwrap();
        config.apply_env(|_| Some(String::new()));
        assert_eq!(config.fallback_token(), Some("file-token"));
        assert_eq!(config.home.base_url, "https://sezukuu.vercel.app");
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        let mut config = Config::default();
        config.home.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.webhook_path = "hook".to_string();
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/tg-relay/config.toml")).unwrap();
        assert_eq!(config.server.port, 3000);
    }
}
