use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Deserialize;

use crate::{TRONSCAN_API_BASE, USDT_CONTRACT};

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Top-level application config deserialized from `config.toml`.
///
/// Every section is optional; Slack secrets normally come from the
/// environment (see [`AppConfig::apply_env`]).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub tronscan: TronscanConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

/// Slack credentials and access control.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`), used for the Web API.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// App-level token (`xapp-...`), used for Socket Mode.
    #[serde(default)]
    pub app_token: Option<String>,
    /// Channel the bot reports to and listens in.
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Slack user IDs allowed to run commands.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

impl SlackConfig {
    pub fn is_allowed(&self, user_id: &str) -> bool {
        self.allowed_users.iter().any(|u| u == user_id)
    }
}

/// Balance API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TronscanConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_contract")]
    pub usdt_contract: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    TRONSCAN_API_BASE.to_string()
}

fn default_contract() -> String {
    USDT_CONTRACT.to_string()
}

fn default_timeout() -> u64 {
    10
}

impl Default for TronscanConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            usdt_contract: default_contract(),
            timeout_secs: default_timeout(),
        }
    }
}

impl TronscanConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// File locations.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_wallets_file")]
    pub wallets_file: PathBuf,
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
    #[serde(default = "default_chart_file")]
    pub chart_file: PathBuf,
}

fn default_wallets_file() -> PathBuf {
    PathBuf::from("wallets.json")
}

fn default_history_file() -> PathBuf {
    PathBuf::from("wallet_balances.csv")
}

fn default_chart_file() -> PathBuf {
    PathBuf::from("wallet_trend.svg")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            wallets_file: default_wallets_file(),
            history_file: default_history_file(),
            chart_file: default_chart_file(),
        }
    }
}

/// Report formatting settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Hours east of UTC used for every displayed and logged timestamp.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,
    /// Number of history rows plotted in the trend chart.
    #[serde(default = "default_chart_records")]
    pub chart_records: usize,
}

fn default_utc_offset() -> i32 {
    7
}

fn default_chart_records() -> usize {
    13
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset(),
            chart_records: default_chart_records(),
        }
    }
}

impl ReportConfig {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    /// Current time in the configured offset.
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset())
    }

    /// Zone label used in messages, e.g. `GMT+7`.
    pub fn zone_label(&self) -> String {
        if self.utc_offset_hours >= 0 {
            format!("GMT+{}", self.utc_offset_hours)
        } else {
            format!("GMT{}", self.utc_offset_hours)
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise start from defaults; then
    /// overlay the environment.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay Slack settings from environment variables.
    ///
    /// `SLACK_BOT_TOKEN`, `SLACK_APP_TOKEN`, `SLACK_CHANNEL_ID` and
    /// `ALLOWED_SLACK_USERS` (comma-separated) win over the file.
    pub fn apply_env<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("SLACK_BOT_TOKEN") {
            self.slack.bot_token = Some(v);
        }
        if let Some(v) = non_empty("SLACK_APP_TOKEN") {
            self.slack.app_token = Some(v);
        }
        if let Some(v) = non_empty("SLACK_CHANNEL_ID") {
            self.slack.channel_id = Some(v);
        }
        if let Some(v) = non_empty("ALLOWED_SLACK_USERS") {
            self.slack.allowed_users = v
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
        }
    }
}
