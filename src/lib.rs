pub mod address;
pub mod api;
pub mod chart;
pub mod commands;
pub mod config;
pub mod history;
pub mod listener;
pub mod registry;
pub mod reporter;
pub mod slack;
pub mod types;

/// Tronscan public API base URL (no auth required)
pub const TRONSCAN_API_BASE: &str = "https://apilist.tronscanapi.com";

/// USDT TRC20 token contract on TRON mainnet
pub const USDT_CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

/// USDT TRC20 has 6 decimal places (1,000,000 sun per USDT)
pub const USDT_DECIMALS: u32 = 6;

/// Slack Web API base URL
pub const SLACK_API_BASE: &str = "https://slack.com/api";
