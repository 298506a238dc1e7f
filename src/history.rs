use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use tracing::{info, warn};

use crate::types::BalanceReading;

/// Name of the first CSV column.
pub const TIMESTAMP_COLUMN: &str = "Timestamp";

/// One parsed history row.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub timestamp: DateTime<FixedOffset>,
    /// One value per wallet column; `None` for a failed lookup or empty cell.
    pub values: Vec<Option<f64>>,
}

/// Parsed history file: wallet column names plus rows in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    pub wallets: Vec<String>,
    pub rows: Vec<HistoryRow>,
}

/// Append-only CSV of balance readings, one row per run.
///
/// The column set is fixed when the file is created. When the wallet set
/// changes, the old file is renamed aside and a fresh file is started.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row for `readings`, stamped with the first reading's time.
    ///
    /// Returns the path of the rotated-out file if the header had to change.
    pub fn append(&self, readings: &[BalanceReading]) -> Result<Option<PathBuf>> {
        let Some(timestamp) = readings.first().map(|r| r.timestamp) else {
            anyhow::bail!("no readings to log");
        };
        let mut header = vec![TIMESTAMP_COLUMN.to_string()];
        header.extend(readings.iter().map(|r| r.wallet_key.clone()));

        let rotated = match self.existing_header()? {
            Some(existing) if existing != header => Some(self.rotate(timestamp)?),
            _ => None,
        };

        let needs_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let mut writer = csv::Writer::from_writer(file);

        if needs_header {
            writer.write_record(&header)?;
        }

        let mut row = Vec::with_capacity(header.len());
        row.push(timestamp.to_rfc3339());
        row.extend(
            readings
                .iter()
                .map(|r| r.amount.map(|a| a.normalize().to_string()).unwrap_or_default()),
        );
        writer.write_record(&row)?;
        writer
            .flush()
            .with_context(|| format!("failed to write {}", self.path.display()))?;

        info!("Balances logged to {}", self.path.display());
        Ok(rotated)
    }

    /// Header of the current file, or `None` if it is missing or empty.
    fn existing_header(&self) -> Result<Option<Vec<String>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let mut record = csv::StringRecord::new();
        if !reader.read_record(&mut record)? {
            return Ok(None);
        }
        Ok(Some(record.iter().map(str::to_string).collect()))
    }

    fn rotate(&self, timestamp: DateTime<FixedOffset>) -> Result<PathBuf> {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "history".to_string());
        let ext = self
            .path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "csv".to_string());
        let stamp = timestamp.format("%Y%m%dT%H%M%S");
        let mut target = self.path.with_file_name(format!("{stem}.{stamp}.{ext}"));
        let mut n = 1;
        while target.exists() {
            target = self.path.with_file_name(format!("{stem}.{stamp}-{n}.{ext}"));
            n += 1;
        }
        std::fs::rename(&self.path, &target).with_context(|| {
            format!("failed to rotate {} to {}", self.path.display(), target.display())
        })?;
        warn!(
            "Wallet set changed; previous history moved to {}",
            target.display()
        );
        Ok(target)
    }

    /// Read and parse the whole file.
    ///
    /// Rows with an unparsable timestamp are skipped; unparsable or empty
    /// cells become `None`.
    pub fn load(&self) -> Result<History> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;

        let headers = reader.headers()?.clone();
        if headers.get(0) != Some(TIMESTAMP_COLUMN) {
            anyhow::bail!(
                "'{TIMESTAMP_COLUMN}' column not found in {}",
                self.path.display()
            );
        }
        let wallets: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let Some(timestamp) = record
                .get(0)
                .and_then(|t| DateTime::parse_from_rfc3339(t.trim()).ok())
            else {
                continue;
            };
            let values = (1..=wallets.len())
                .map(|i| record.get(i).and_then(|v| v.trim().parse::<f64>().ok()))
                .collect();
            rows.push(HistoryRow { timestamp, values });
        }

        Ok(History { wallets, rows })
    }
}

impl History {
    /// The last `n` distinct timestamps in ascending time order.
    pub fn tail(&self, n: usize) -> Vec<&HistoryRow> {
        let mut by_time: BTreeMap<DateTime<FixedOffset>, &HistoryRow> = BTreeMap::new();
        for row in &self.rows {
            by_time.entry(row.timestamp).or_insert(row);
        }
        let skip = by_time.len().saturating_sub(n);
        by_time.into_values().skip(skip).collect()
    }
}
