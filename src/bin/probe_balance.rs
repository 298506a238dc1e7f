//! Probe: Tronscan account tokens endpoint
//!
//! Hits GET https://apilist.tronscanapi.com/api/account/tokens?address=<addr> and shows:
//! - Response latency and size
//! - The USDT token entry, if any
//! - The parsed balance
//!
//! Usage: probe_balance <TRC20 address>

use std::time::Instant;

use anyhow::{Result, bail};
use serde_json::Value;
use usdt_wallet_bot::api::{TronscanClient, parse_usdt_balance};
use usdt_wallet_bot::{USDT_CONTRACT, address};

#[tokio::main]
async fn main() -> Result<()> {
    let Some(addr) = std::env::args().nth(1) else {
        bail!("usage: probe_balance <TRC20 address>");
    };

    println!("=== Probe: Tronscan USDT balance ===");
    println!("Address: {addr}");
    println!("Valid format: {}", address::is_valid(&addr));
    println!();

    let client = TronscanClient::mainnet()?;

    println!("--- 1. Raw response ---");
    let start = Instant::now();
    let body = match client.fetch_tokens(&addr).await {
        Ok(body) => body,
        Err(e) => {
            println!("Request failed: {e}");
            return Ok(());
        }
    };
    println!("Latency: {:?}", start.elapsed());
    println!("Bytes: {}", body.len());

    let json: Value = serde_json::from_slice(&body)?;
    match json.get("data").and_then(Value::as_array) {
        Some(tokens) => {
            println!("Token count: {}", tokens.len());
            for token in tokens {
                let id = token.get("tokenId").and_then(Value::as_str).unwrap_or("?");
                let abbr = token.get("tokenAbbr").and_then(Value::as_str).unwrap_or("?");
                println!("  - {abbr} ({id})");
            }
            if let Some(usdt) = tokens
                .iter()
                .find(|t| t.get("tokenId").and_then(Value::as_str) == Some(USDT_CONTRACT))
            {
                println!("\nUSDT entry:");
                println!("{}", serde_json::to_string_pretty(usdt)?);
            }
        }
        None => {
            println!("Response has no data array:");
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    println!();

    println!("--- 2. Parsed ---");
    match parse_usdt_balance(&body, USDT_CONTRACT) {
        Ok(balance) => println!("USDT balance: {balance}"),
        Err(e) => println!("Lookup failure: {e}"),
    }

    Ok(())
}
