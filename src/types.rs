use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One monitored wallet as persisted in `wallets.json`.
///
/// The registry key (the JSON object key) is the wallet label, so `wallet`
/// normally repeats it. Hand-edited entries may omit `company` or `wallet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    #[serde(default = "default_company")]
    pub company: String,
    #[serde(default)]
    pub wallet: String,
    pub address: String,
}

fn default_company() -> String {
    "Unknown".to_string()
}

/// Registry contents keyed by wallet key, in insertion order.
pub type WalletMap = IndexMap<String, WalletRecord>;

/// A single balance observation for one wallet.
///
/// `amount` is `None` when the lookup failed; a zero balance is `Some(0)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceReading {
    pub wallet_key: String,
    pub amount: Option<Decimal>,
    pub timestamp: DateTime<FixedOffset>,
}

impl BalanceReading {
    pub fn is_ok(&self) -> bool {
        self.amount.is_some()
    }
}

/// Sum of the successful readings and the number of failed ones.
pub fn total_of(readings: &[BalanceReading]) -> (Decimal, usize) {
    let total = readings.iter().filter_map(|r| r.amount).sum();
    let failed = readings.iter().filter(|r| !r.is_ok()).count();
    (total, failed)
}

/// Format a token amount with thousands separators and two decimals,
/// e.g. `1234567.891` → `1,234,567.89`.
pub fn format_amount(amount: Decimal) -> String {
    let rounded = amount.round_dp(2);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let fixed = format!("{:.2}", rounded.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if negative {
        format!("-{grouped}.{frac_part}")
    } else {
        format!("{grouped}.{frac_part}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn reading(key: &str, amount: Option<Decimal>) -> BalanceReading {
        BalanceReading {
            wallet_key: key.to_string(),
            amount,
            timestamp: Utc::now().fixed_offset(),
        }
    }

    #[test]
    fn format_small_and_large() {
        assert_eq!(format_amount(dec!(0)), "0.00");
        assert_eq!(format_amount(dec!(5.5)), "5.50");
        assert_eq!(format_amount(dec!(999.999)), "1,000.00");
        assert_eq!(format_amount(dec!(1234567.891)), "1,234,567.89");
        assert_eq!(format_amount(dec!(100000)), "100,000.00");
    }

    #[test]
    fn format_negative() {
        assert_eq!(format_amount(dec!(-1234.5)), "-1,234.50");
        assert_eq!(format_amount(dec!(-0.001)), "0.00");
    }

    #[test]
    fn total_skips_failures() {
        let readings = vec![
            reading("a", Some(dec!(10.5))),
            reading("b", None),
            reading("c", Some(dec!(0))),
        ];
        let (total, failed) = total_of(&readings);
        assert_eq!(total, dec!(10.5));
        assert_eq!(failed, 1);
    }

    #[test]
    fn wallet_record_json_shape() {
        let rec = WalletRecord {
            company: "KZP".to_string(),
            wallet: "KZP PH 1".to_string(),
            address: "THB5JtMUtvmZ94HdCqqL34SzSfJavF58Ga".to_string(),
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["company"], "KZP");
        assert_eq!(json["wallet"], "KZP PH 1");
        assert_eq!(json["address"], "THB5JtMUtvmZ94HdCqqL34SzSfJavF58Ga");
    }

    #[test]
    fn wallet_record_optional_fields() {
        let rec: WalletRecord =
            serde_json::from_str(r#"{"address": "THB5JtMUtvmZ94HdCqqL34SzSfJavF58Ga"}"#).unwrap();
        assert_eq!(rec.company, "Unknown");
        assert_eq!(rec.wallet, "");
        assert!(serde_json::from_str::<WalletRecord>(r#"{"company": "KZP"}"#).is_err());
    }
}
