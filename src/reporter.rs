use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use tracing::{info, warn};

use crate::api::{self, BalanceSource};
use crate::chart;
use crate::config::AppConfig;
use crate::history::HistoryLog;
use crate::registry::WalletRegistry;
use crate::slack::ChatClient;
use crate::types::{BalanceReading, format_amount, total_of};

pub const CHART_TITLE: &str = "Wallet Balance Trend";
pub const CHART_COMMENT: &str = "📊 Wallet Balance Trend";

/// Where the report is delivered.
#[derive(Clone, Copy)]
pub struct ChatTarget<'a> {
    pub client: &'a dyn ChatClient,
    pub channel: &'a str,
}

/// What one scheduled run managed to do.
#[derive(Debug, Default)]
pub struct ReportOutcome {
    pub readings: Vec<BalanceReading>,
    pub summary: Option<String>,
    pub rotated_history: Option<PathBuf>,
    pub chart: Option<PathBuf>,
    pub posted: bool,
    pub uploaded: bool,
}

/// Build the channel summary for one run.
///
/// The total covers successful readings only.
pub fn format_summary(
    readings: &[BalanceReading],
    as_of: DateTime<FixedOffset>,
    zone_label: &str,
) -> String {
    let mut lines = vec![
        "*💵 USDT TRC20 Wallet Balances* 💵".to_string(),
        format!("_As of {} {zone_label}_", as_of.format("%Y-%m-%d %H:%M")),
        String::new(),
    ];
    for reading in readings {
        lines.push(match reading.amount {
            Some(a) => format!("• `{}`: *{} USDT*", reading.wallet_key, format_amount(a)),
            None => format!("• `{}`: ❌ Unable to fetch", reading.wallet_key),
        });
    }
    let (total, _) = total_of(readings);
    lines.push(String::new());
    lines.push(format!("➕ *Total*: *{} USDT*", format_amount(total)));
    lines.join("\n")
}

/// One scheduled run: fetch → history → chart → post → upload.
///
/// Each step's failure is logged and the run carries on with what it has.
/// `chat` is `None` when Slack is not configured or posting is disabled.
pub async fn run_report(
    config: &AppConfig,
    registry: &WalletRegistry,
    source: &dyn BalanceSource,
    chat: Option<ChatTarget<'_>>,
) -> ReportOutcome {
    let mut outcome = ReportOutcome::default();
    let now = config.report.now();
    let zone = config.report.zone_label();

    let wallets = registry.load();
    if wallets.is_empty() {
        warn!("No wallets found in {}", registry.path().display());
        return outcome;
    }
    info!("Loaded {} wallets", wallets.len());

    let readings = api::fetch_all(source, &wallets, now).await;
    let (total, failed) = total_of(&readings);
    info!(
        "Fetched {} balances, total {} USDT, {failed} failed",
        readings.len(),
        format_amount(total)
    );

    let history = HistoryLog::new(&config.storage.history_file);
    match history.append(&readings) {
        Ok(rotated) => outcome.rotated_history = rotated,
        Err(e) => warn!("Error logging balances to CSV: {e:#}"),
    }

    outcome.chart = chart::plot_wallet_trends(
        &history,
        &config.storage.chart_file,
        config.report.chart_records,
        &zone,
    );

    let summary = format_summary(&readings, now, &zone);
    outcome.readings = readings;

    match chat {
        Some(target) => {
            match target.client.post_message(target.channel, &summary).await {
                Ok(()) => {
                    info!("Text report sent to Slack");
                    outcome.posted = true;
                }
                Err(e) => warn!("Slack error sending report: {e:#}"),
            }
            if let Some(chart_path) = &outcome.chart {
                match target
                    .client
                    .upload_file(target.channel, chart_path, CHART_TITLE, CHART_COMMENT)
                    .await
                {
                    Ok(()) => {
                        info!("Chart image uploaded to Slack");
                        outcome.uploaded = true;
                    }
                    Err(e) => warn!("Slack error uploading chart: {e:#}"),
                }
            }
        }
        None => info!("Slack credentials not configured. Skipping Slack reporting"),
    }

    outcome.summary = Some(summary);
    outcome
}
