use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use usdt_wallet_bot::api::TronscanClient;
use usdt_wallet_bot::config::{AppConfig, CONFIG_PATH};
use usdt_wallet_bot::registry::WalletRegistry;
use usdt_wallet_bot::reporter::{self, ChatTarget};
use usdt_wallet_bot::slack::SlackClient;

#[derive(Parser)]
#[command(
    name = "balance-report",
    about = "Fetch USDT balances, log history, render the trend chart and post to Slack"
)]
struct Args {
    /// Path to the config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Skip Slack posting even if credentials are configured
    #[arg(long)]
    no_post: bool,
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
    let zone = config.report.zone_label();
    info!(
        "--- Run started: {} {zone} ---",
        config.report.now().format("%Y-%m-%d %H:%M:%S")
    );

    let source = TronscanClient::new(
        &config.tronscan.api_base,
        &config.tronscan.usdt_contract,
        config.tronscan.timeout(),
    )?;
    let registry = WalletRegistry::new(&config.storage.wallets_file);

    let slack = match (&config.slack.bot_token, &config.slack.channel_id) {
        (Some(token), Some(_)) if !args.no_post => match SlackClient::new(token) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("Cannot create Slack client: {e:#}");
                None
            }
        },
        _ => None,
    };
    let target = match (&slack, &config.slack.channel_id) {
        (Some(client), Some(channel)) => Some(ChatTarget {
            client,
            channel: channel.as_str(),
        }),
        _ => None,
    };

    let outcome = reporter::run_report(&config, &registry, &source, target).await;
    if let Some(summary) = &outcome.summary {
        println!("{summary}");
    }
    if let Some(rotated) = &outcome.rotated_history {
        info!("Previous history kept at {}", rotated.display());
    }

    info!(
        "--- Run finished: {} {zone} (posted: {}, chart uploaded: {}) ---",
        config.report.now().format("%Y-%m-%d %H:%M:%S"),
        outcome.posted,
        outcome.uploaded
    );
    Ok(())
}
