use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use usdt_wallet_bot::api::TronscanClient;
use usdt_wallet_bot::config::{AppConfig, CONFIG_PATH};
use usdt_wallet_bot::listener::{self, CommandBot};
use usdt_wallet_bot::registry::WalletRegistry;
use usdt_wallet_bot::slack::SlackClient;

#[derive(Parser)]
#[command(name = "wallet-listener", about = "Slack command listener for the wallet registry")]
struct Args {
    /// Path to the config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = AppConfig::load_or_default(&args.config)?;

    let bot_token = config
        .slack
        .bot_token
        .as_deref()
        .context("SLACK_BOT_TOKEN is not set")?;
    let app_token = config
        .slack
        .app_token
        .as_deref()
        .context("SLACK_APP_TOKEN is not set")?;
    let channel_id = config
        .slack
        .channel_id
        .clone()
        .context("SLACK_CHANNEL_ID is not set")?;
    if config.slack.allowed_users.is_empty() {
        warn!("No allowed users configured; every command will be denied");
    }

    let client = SlackClient::new(bot_token)?;
    let identity = client.auth_test().await.context("Slack bot authentication failed")?;
    info!("Authenticated as {} ({})", identity.user, identity.user_id);

    let source = TronscanClient::new(
        &config.tronscan.api_base,
        &config.tronscan.usdt_contract,
        config.tronscan.timeout(),
    )?;
    let registry = WalletRegistry::new(&config.storage.wallets_file);
    let bot = CommandBot::new(
        &config.slack,
        &config.report,
        &registry,
        &source,
        channel_id.as_str(),
        Some(identity.user_id),
    );

    info!(
        "Listening in {channel_id} ({} wallets registered). Press Ctrl+C to stop.",
        registry.load().len()
    );
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        result = listener::run(&bot, &client, app_token) => {
            result?;
        }
    }
    Ok(())
}
