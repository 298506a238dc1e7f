use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{info, warn};

use crate::address::{self, shorten};
use crate::api::{self, BalanceSource};
use crate::types::{WalletMap, WalletRecord, format_amount};

/// Reasons a registry command can fail. `Display` is the user-facing text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    #[error("Invalid TRC20 address format: {0}\n(Must start with 'T' and be 34 characters)")]
    InvalidAddress(String),

    #[error("Wallet '{0}' already exists")]
    DuplicateKey(String),

    #[error("Address already used by '{existing_key}'")]
    DuplicateAddress { existing_key: String },

    #[error("Unable to fetch balance for address (invalid or API error)")]
    LookupFailed,

    #[error("Wallet '{0}' not found")]
    NotFound(String),

    #[error("No wallets configured\n\nUse `!add \"company\" \"wallet\" \"address\"` to add wallets")]
    Empty,

    #[error("Failed to save changes to file")]
    Persistence,

    #[error("Wallet file {0} could not be read; fix it before changing wallets")]
    Unreadable(String),
}

impl RegistryError {
    /// Message as posted to chat.
    pub fn user_message(&self) -> String {
        format!("❌ {self}")
    }
}

/// Wallet store backed by a single JSON file.
///
/// The file is read fully on every operation and rewritten fully on every
/// mutation; there is no locking, so concurrent writers are not supported.
#[derive(Debug, Clone)]
pub struct WalletRegistry {
    path: PathBuf,
}

impl WalletRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the store. A missing or unreadable file yields an empty map.
    pub fn load(&self) -> WalletMap {
        self.try_load().unwrap_or_default()
    }

    /// Read the store, distinguishing "no file yet" from "file is unusable".
    ///
    /// Mutations go through this so an unparsable store is never overwritten.
    pub fn try_load(&self) -> Result<WalletMap, RegistryError> {
        let unreadable = || RegistryError::Unreadable(self.path.display().to_string());
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Wallet file {} not found", self.path.display());
                return Ok(WalletMap::new());
            }
            Err(e) => {
                warn!("Error loading wallets from {}: {e}", self.path.display());
                return Err(unreadable());
            }
        };
        serde_json::from_str(&contents).map_err(|e| {
            warn!("Error parsing wallet JSON {}: {e}", self.path.display());
            unreadable()
        })
    }

    /// Write the store via a temp file and rename, so a failed write never
    /// truncates the previous contents.
    pub fn save(&self, wallets: &WalletMap) -> Result<()> {
        let json = serde_json::to_string_pretty(wallets).context("failed to serialize wallets")?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| {
            format!("failed to replace {} with {}", self.path.display(), tmp.display())
        })?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "wallets.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Register a new wallet after validation and a live balance smoke test.
    pub async fn add(
        &self,
        source: &dyn BalanceSource,
        company: &str,
        wallet_name: &str,
        address: &str,
    ) -> Result<String, RegistryError> {
        let company = non_empty(company, "Company")?;
        let wallet_name = non_empty(wallet_name, "Wallet name")?;
        let address = non_empty(address, "Address")?;

        if !address::is_valid(address) {
            return Err(RegistryError::InvalidAddress(address.to_string()));
        }

        // The wallet name is the key; it is expected to carry the company prefix.
        let key = wallet_name;
        let mut wallets = self.try_load()?;

        if wallets.contains_key(key) {
            return Err(RegistryError::DuplicateKey(key.to_string()));
        }
        if let Some(existing_key) = find_by_address(&wallets, address) {
            return Err(RegistryError::DuplicateAddress {
                existing_key: existing_key.to_string(),
            });
        }

        let balance = api::lookup(source, address)
            .await
            .ok_or(RegistryError::LookupFailed)?;

        wallets.insert(
            key.to_string(),
            WalletRecord {
                company: company.to_string(),
                wallet: wallet_name.to_string(),
                address: address.to_string(),
            },
        );

        if let Err(e) = self.save(&wallets) {
            warn!("Error saving wallets after adding {key}: {e:#}");
            return Err(RegistryError::Persistence);
        }
        info!("Added wallet {key} ({company}) {address}");

        Ok(format!(
            "✅ **Wallet Added Successfully**\n\n\
             📋 **Details:**\n\
             • Company: {company}\n\
             • Wallet: {wallet_name}\n\
             • Address: {}\n\
             • Current Balance: {} USDT\n\n\
             📊 **Total Wallets:** {}",
            shorten(address),
            format_amount(balance),
            wallets.len()
        ))
    }

    /// Remove a wallet. The final balance lookup is best-effort.
    pub async fn remove(
        &self,
        source: &dyn BalanceSource,
        key: &str,
    ) -> Result<String, RegistryError> {
        let key = non_empty(key, "Wallet key")?;
        let mut wallets = self.try_load()?;

        let Some((index, _, record)) = wallets.shift_remove_full(key) else {
            return Err(RegistryError::NotFound(key.to_string()));
        };

        let balance_text = match api::lookup(source, &record.address).await {
            Some(balance) => format!("{} USDT", format_amount(balance)),
            None => "Unable to fetch".to_string(),
        };

        if let Err(e) = self.save(&wallets) {
            warn!("Error saving wallets after removing {key}: {e:#}");
            wallets.shift_insert(index, key.to_string(), record);
            return Err(RegistryError::Persistence);
        }
        info!("Removed wallet {key} {}", record.address);

        Ok(format!(
            "✅ **Wallet Removed Successfully**\n\n\
             📋 **Removed:**\n\
             • Wallet: {key}\n\
             • Address: {}\n\
             • Final Balance: {balance_text}\n\n\
             📊 **Remaining Wallets:** {}",
            shorten(&record.address),
            wallets.len()
        ))
    }

    /// Render all wallets grouped by company, in first-seen company order.
    pub fn list(&self) -> Result<String, RegistryError> {
        let wallets = self.load();
        if wallets.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<(&String, &WalletRecord)>> = HashMap::new();
        for (key, record) in &wallets {
            let company = record.company.as_str();
            if !groups.contains_key(company) {
                order.push(company);
            }
            groups.entry(company).or_default().push((key, record));
        }

        let mut lines = Vec::new();
        for company in order {
            lines.push(format!("**{company}:**"));
            for (key, record) in &groups[company] {
                lines.push(format!("• **{key}**: {}", record.address));
            }
            lines.push(String::new());
        }
        lines.push(format!("**Total Wallets:** {}", wallets.len()));

        Ok(lines.join("\n"))
    }
}

/// Key of the wallet registered under `address`, if any.
pub fn find_by_address<'a>(wallets: &'a WalletMap, address: &str) -> Option<&'a str> {
    wallets
        .iter()
        .find(|(_, record)| record.address == address)
        .map(|(key, _)| key.as_str())
}

fn non_empty<'a>(value: &'a str, field: &'static str) -> Result<&'a str, RegistryError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(RegistryError::EmptyField(field))
    } else {
        Ok(trimmed)
    }
}
