use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::info;

use crate::address::{self, shorten};
use crate::api::{self, BalanceSource};
use crate::config::ReportConfig;
use crate::registry::{self, WalletRegistry};
use crate::types::{WalletMap, format_amount};

/// Double-quote delimited argument; no escaping.
static QUOTED_ARG: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]*)""#).unwrap());

const ADD_USAGE: &str = "**Usage:** `!add \"company\" \"wallet_name\" \"address\"`\n\
     **Example:** `!add \"KZP\" \"KZP WDB2\" \"TEhmKXCPgX64yjQ3t9skuSyUQBxwaWY4KS\"`";

const REMOVE_USAGE: &str = "**Usage:** `!remove \"wallet_name\"`\n\
     **Example:** `!remove \"KZP WDB2\"`";

const CHECK_USAGE: &str = "**Usage:**\n\
     • `!check` - Check all wallets\n\
     • `!check \"wallet_name\"` - Check by wallet name\n\
     • `!check \"TRC20_address\"` - Check by address\n\
     • `!check \"wallet1\" \"TRC20_address\"` - Mix names and addresses\n\n\
     **Examples:**\n\
     • `!check \"KZP 96G1\"`\n\
     • `!check \"TNZkbytSMdaRJ79CYzv8BGK6LWNmQxcuM8\"`\n\
     • `!check \"KZP 96G1\" \"TARvAP993BSFBuQhjc8oG4gviskNDRtB7Z\"`";

pub const HELP_TEXT: &str = "**Wallet Management:**\n\
     • `!add \"company\" \"wallet\" \"address\"` - Add new wallet\n\
     • `!remove \"wallet_name\"` - Remove wallet\n\
     • `!list` - List all wallets\n\
     • `!check` - Check all wallet balances\n\
     • `!check \"wallet_name\"` - Check specific wallet balance\n\
     • `!check \"wallet1\" \"wallet2\"` - Check multiple specific wallets\n\n\
     **Examples:**\n\
     `!add \"KZP\" \"WDB2\" \"TEhmKXCPgX64yjQ3t9skuSyUQBxwaWY4KS\"`\n\
     `!remove \"KZP WDB2\"`\n\
     `!list`\n\
     `!check`\n\
     `!check \"KZP 96G1\"`\n\
     `!check \"KZP 96G1\" \"KZP WDB2\"`\n\n\
     **Notes:**\n\
     • All arguments must be in quotes\n\
     • TRC20 addresses start with 'T' (34 characters)\n\
     • Balance reports sent via scheduled messages";

/// The fixed command vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Add,
    Remove,
    Check,
    List,
    Help,
}

impl CommandKind {
    /// Match a command token, with or without the leading `!`, ignoring case.
    pub fn from_token(token: &str) -> Option<Self> {
        let name = token.strip_prefix('!').unwrap_or(token).to_ascii_lowercase();
        match name.as_str() {
            "add" => Some(Self::Add),
            "remove" => Some(Self::Remove),
            "check" => Some(Self::Check),
            "list" => Some(Self::List),
            "help" => Some(Self::Help),
            _ => None,
        }
    }

    /// Response header shown above the command's output.
    pub fn title(self) -> &'static str {
        match self {
            Self::Add => "Add Wallet Result",
            Self::Remove => "Remove Wallet Result",
            Self::Check => "Wallet Balance Check",
            Self::List => "Wallet List",
            Self::Help => "Help - Available Commands",
        }
    }

    /// Whether the command changes the registry.
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Add | Self::Remove)
    }
}

/// Split `!cmd rest of text` into (`cmd`, `rest of text`).
///
/// Returns `None` unless the text starts with `!` followed by a token.
pub fn split_command(text: &str) -> Option<(&str, &str)> {
    let body = text.trim().strip_prefix('!')?;
    let (token, rest) = body.split_once(' ').unwrap_or((body, ""));
    if token.is_empty() {
        return None;
    }
    Some((token, rest.trim()))
}

/// All `"..."` substrings of `text`, untrimmed.
pub fn quoted_args(text: &str) -> Vec<&str> {
    QUOTED_ARG
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Stateless request/response command handler.
pub struct CommandRouter<'a> {
    registry: &'a WalletRegistry,
    source: &'a dyn BalanceSource,
    report: &'a ReportConfig,
}

impl<'a> CommandRouter<'a> {
    pub fn new(
        registry: &'a WalletRegistry,
        source: &'a dyn BalanceSource,
        report: &'a ReportConfig,
    ) -> Self {
        Self {
            registry,
            source,
            report,
        }
    }

    /// Route one command token plus its argument text to a response.
    pub async fn dispatch(&self, token: &str, args: &str) -> String {
        info!("Command: {token}, Text: '{args}'");
        match CommandKind::from_token(token) {
            Some(CommandKind::Add) => self.handle_add(args).await,
            Some(CommandKind::Remove) => self.handle_remove(args).await,
            Some(CommandKind::Check) => self.handle_check(args).await,
            Some(CommandKind::List) => self.handle_list(),
            Some(CommandKind::Help) => HELP_TEXT.to_string(),
            None => format!(
                "❌ Unknown command: !{}\n\nUse `!help` for available commands.",
                token.trim_start_matches('!')
            ),
        }
    }

    async fn handle_add(&self, args: &str) -> String {
        let (company, wallet, address) = match parse_add_args(args) {
            Ok(parsed) => parsed,
            Err(err) => return format!("{err}\n\n{ADD_USAGE}"),
        };
        match self.registry.add(self.source, company, wallet, address).await {
            Ok(msg) => msg,
            Err(e) => e.user_message(),
        }
    }

    async fn handle_remove(&self, args: &str) -> String {
        let key = match parse_remove_args(args) {
            Ok(key) => key,
            Err(err) => return err,
        };
        match self.registry.remove(self.source, key).await {
            Ok(msg) => msg,
            Err(e) => e.user_message(),
        }
    }

    fn handle_list(&self) -> String {
        match self.registry.list() {
            Ok(msg) => msg,
            Err(e) => e.user_message(),
        }
    }

    async fn handle_check(&self, args: &str) -> String {
        let wallets = self.registry.load();

        // display name → address, deduplicated, in request order
        if wallets.is_empty() {
            return "❌ No wallets configured".to_string();
        }

        let targets: IndexMap<String, String> = if args.trim().is_empty() {
            wallets
                .iter()
                .map(|(key, record)| (key.clone(), record.address.clone()))
                .collect()
        } else {
            let inputs = quoted_args(args);
            if inputs.is_empty() {
                return format!(
                    "❌ Invalid format. Use quotes around wallet names or addresses.\n\n{CHECK_USAGE}"
                );
            }

            match resolve_check_targets(&wallets, &inputs) {
                Ok(resolved) => resolved,
                Err(not_found) => {
                    let available: Vec<&str> =
                        wallets.keys().take(5).map(String::as_str).collect();
                    let more = if wallets.len() > 5 { "..." } else { "" };
                    return format!(
                        "❌ Wallet name(s) not found: {}\n\n\
                         **Available wallet names:**\n{}{more}\n\n\
                         Use `!list` to see all wallets or provide TRC20 addresses directly.",
                        not_found.join(", "),
                        available.join(", "),
                    );
                }
            }
        };

        let mut results: Vec<(String, Option<Decimal>)> = Vec::with_capacity(targets.len());
        for (display, address) in targets {
            let amount = api::lookup(self.source, &address).await;
            results.push((display, amount));
        }

        self.format_check(&results)
    }

    fn format_check(&self, results: &[(String, Option<Decimal>)]) -> String {
        let successful = results.iter().filter(|(_, a)| a.is_some()).count();
        if successful == 0 {
            return "❌ Unable to fetch any wallet balances. Please check your network connection."
                .to_string();
        }

        let lines: Vec<String> = results
            .iter()
            .map(|(display, amount)| match amount {
                Some(a) => format!("• `{display}`: **{} USDT**", format_amount(*a)),
                None => format!("• `{display}`: ❌ Unable to fetch balance"),
            })
            .collect();

        let time_line = format!(
            "⏰ **Time:** {} {}",
            self.report.now().format("%Y-%m-%d %H:%M"),
            self.report.zone_label()
        );
        let mut message = format!("{time_line}\n\n{}", lines.join("\n"));

        if results.len() > 1 {
            let total: Decimal = results.iter().filter_map(|(_, a)| *a).sum();
            message.push_str(&format!("\n\n📊 **Total:** {} USDT", format_amount(total)));
            let failed = results.len() - successful;
            if failed > 0 {
                message.push_str(&format!(
                    "\n⚠️ **Note:** {failed} wallet(s) failed to fetch"
                ));
            }
        }

        message
    }
}

/// Map each `check` input to a display name and address, in request order.
///
/// Valid addresses are accepted whether registered or not; anything else must
/// be a wallet key. Unknown keys are returned together as the error.
pub fn resolve_check_targets<'a>(
    wallets: &WalletMap,
    inputs: &[&'a str],
) -> Result<IndexMap<String, String>, Vec<&'a str>> {
    let mut targets = IndexMap::new();
    let mut not_found = Vec::new();
    for input in inputs {
        let input = input.trim();
        if address::is_valid(input) {
            let display = match registry::find_by_address(wallets, input) {
                Some(key) => key.to_string(),
                None => format!("External: {}", shorten(input)),
            };
            targets.insert(display, input.to_string());
        } else if let Some(record) = wallets.get(input) {
            targets.insert(input.to_string(), record.address.clone());
        } else {
            not_found.push(input);
        }
    }
    if not_found.is_empty() {
        Ok(targets)
    } else {
        Err(not_found)
    }
}

/// Parse `"company" "wallet" "address"`, trimming each field.
fn parse_add_args(args: &str) -> Result<(&str, &str, &str), String> {
    if args.trim().is_empty() {
        return Err("❌ Missing arguments".to_string());
    }
    let matches = quoted_args(args);
    let &[company, wallet, address] = matches.as_slice() else {
        return Err(format!(
            "❌ Expected 3 quoted arguments, found {}",
            matches.len()
        ));
    };
    let (company, wallet, address) = (company.trim(), wallet.trim(), address.trim());
    if company.is_empty() {
        return Err("❌ Company cannot be empty".to_string());
    }
    if wallet.is_empty() {
        return Err("❌ Wallet name cannot be empty".to_string());
    }
    if address.is_empty() {
        return Err("❌ Address cannot be empty".to_string());
    }
    Ok((company, wallet, address))
}

/// Parse `"wallet_name"`; errors already include the usage hint.
fn parse_remove_args(args: &str) -> Result<&str, String> {
    if args.trim().is_empty() {
        return Err(format!("❌ Missing wallet name\n\n{REMOVE_USAGE}"));
    }
    let matches = quoted_args(args);
    let &[key] = matches.as_slice() else {
        return Err(format!(
            "❌ Expected 1 quoted argument, found {}\n\n{REMOVE_USAGE}",
            matches.len()
        ));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("❌ Wallet name cannot be empty\n\n{REMOVE_USAGE}"));
    }
    Ok(key)
}
