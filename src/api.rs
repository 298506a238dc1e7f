use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{BalanceReading, WalletMap};
use crate::{TRONSCAN_API_BASE, USDT_CONTRACT, USDT_DECIMALS};

/// Why a balance lookup failed. Only ever logged; users see "unable to fetch".
#[derive(Debug, Error)]
#[error("balance lookup failed: {0}")]
pub struct LookupFailure(pub String);

/// Source of USDT balances for TRON addresses.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn usdt_balance(&self, address: &str) -> Result<Decimal, LookupFailure>;
}

/// `GET /api/account/tokens` response body (only the fields we read).
#[derive(Debug, Deserialize)]
struct TokensResponse {
    #[serde(default)]
    data: Vec<TokenHolding>,
}

#[derive(Debug, Deserialize)]
struct TokenHolding {
    #[serde(rename = "tokenId", default)]
    token_id: String,
    #[serde(default)]
    balance: Option<serde_json::Value>,
}

/// Extract the balance of `contract` from a Tronscan token-list body and
/// convert it from sun to whole tokens.
pub fn parse_usdt_balance(body: &[u8], contract: &str) -> Result<Decimal, LookupFailure> {
    let resp: TokensResponse = serde_json::from_slice(body)
        .map_err(|e| LookupFailure(format!("malformed response: {e}")))?;

    if resp.data.is_empty() {
        return Err(LookupFailure("no token data".to_string()));
    }

    let holding = resp
        .data
        .iter()
        .find(|t| t.token_id == contract)
        .ok_or_else(|| LookupFailure(format!("token {contract} not present")))?;

    // Tronscan sends the raw balance as a string; tolerate a bare number too.
    let raw = match &holding.balance {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => return Err(LookupFailure("missing balance field".to_string())),
    };
    let sun: Decimal = raw
        .parse()
        .map_err(|e| LookupFailure(format!("invalid balance {raw:?}: {e}")))?;

    Ok(sun / Decimal::from(10u64.pow(USDT_DECIMALS)))
}

/// Tronscan-backed balance lookup. One request per call, no retries.
#[derive(Debug, Clone)]
pub struct TronscanClient {
    http: reqwest::Client,
    base_url: String,
    contract: String,
}

impl TronscanClient {
    pub fn new(base_url: &str, contract: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            contract: contract.to_string(),
        })
    }

    /// Client against the public Tronscan API with a 10s timeout.
    pub fn mainnet() -> anyhow::Result<Self> {
        Self::new(TRONSCAN_API_BASE, USDT_CONTRACT, Duration::from_secs(10))
    }

    pub fn tokens_url(&self) -> String {
        format!("{}/api/account/tokens", self.base_url)
    }

    /// Fetch the raw response body for `address`.
    pub async fn fetch_tokens(&self, address: &str) -> Result<Vec<u8>, LookupFailure> {
        let resp = self
            .http
            .get(self.tokens_url())
            .query(&[("address", address)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LookupFailure("request timed out".to_string())
                } else {
                    LookupFailure(format!("request error: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LookupFailure(format!("HTTP {status}")));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| LookupFailure(format!("failed to read body: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl BalanceSource for TronscanClient {
    async fn usdt_balance(&self, address: &str) -> Result<Decimal, LookupFailure> {
        let body = self.fetch_tokens(address).await?;
        let balance = parse_usdt_balance(&body, &self.contract)?;
        debug!("Balance for {address}: {balance}");
        Ok(balance)
    }
}

/// Look up `address`, logging and collapsing any failure to `None`.
pub async fn lookup(source: &dyn BalanceSource, address: &str) -> Option<Decimal> {
    match source.usdt_balance(address).await {
        Ok(amount) => Some(amount),
        Err(e) => {
            warn!("Error fetching balance for {address}: {e}");
            None
        }
    }
}

/// Fetch balances for every wallet, one at a time, in registry order.
pub async fn fetch_all(
    source: &dyn BalanceSource,
    wallets: &WalletMap,
    now: DateTime<FixedOffset>,
) -> Vec<BalanceReading> {
    let mut readings = Vec::with_capacity(wallets.len());
    for (key, record) in wallets {
        let amount = lookup(source, &record.address).await;
        readings.push(BalanceReading {
            wallet_key: key.clone(),
            amount,
            timestamp: now,
        });
    }
    debug!(
        "Fetched {} balances ({} failed)",
        readings.len(),
        readings.iter().filter(|r| !r.is_ok()).count()
    );
    readings
}
