use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use plotters::prelude::*;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::history::{History, HistoryLog, HistoryRow};
use crate::types::format_amount;

const PANEL_WIDTH: u32 = 600;
const PANEL_HEIGHT: u32 = 400;
const TITLE_HEIGHT: u32 = 60;

/// Render the trend chart for the last `records` rows of the history file.
///
/// Returns the image path on success. Missing, empty or malformed history is
/// logged and yields `None`.
pub fn plot_wallet_trends(
    log: &HistoryLog,
    output: &Path,
    records: usize,
    zone_label: &str,
) -> Option<PathBuf> {
    let history = match log.load() {
        Ok(h) => h,
        Err(e) => {
            warn!("Cannot plot trends from {}: {e:#}", log.path().display());
            return None;
        }
    };

    match render(&history, output, records, zone_label) {
        Ok(true) => {
            info!("Chart saved to {}", output.display());
            Some(output.to_path_buf())
        }
        Ok(false) => {
            info!(
                "Not enough data in {} to plot trends",
                log.path().display()
            );
            None
        }
        Err(e) => {
            warn!("Error saving chart to {}: {e:#}", output.display());
            None
        }
    }
}

/// Draw one small-multiple panel per wallet column into an SVG at `output`.
///
/// Returns `Ok(false)` without touching `output` when there is nothing to draw.
pub fn render(history: &History, output: &Path, records: usize, zone_label: &str) -> Result<bool> {
    let rows = history.tail(records);
    let Some(last_row) = rows.last() else {
        return Ok(false);
    };
    let wallet_count = history.wallets.len();
    if wallet_count == 0 {
        return Ok(false);
    }

    let cols = wallet_count.min(2);
    let grid_rows = wallet_count.div_ceil(cols);
    let size = (
        PANEL_WIDTH * cols as u32,
        PANEL_HEIGHT * grid_rows as u32 + TITLE_HEIGHT,
    );

    let root = SVGBackend::new(output, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let title = format!(
        "USDT Wallet Balance Trend ({} Records as of {} {zone_label})",
        rows.len(),
        last_row.timestamp.naive_local().format("%Y-%m-%d %H:%M")
    );
    let body = root.titled(&title, ("sans-serif", 24)).map_err(plot_err)?;
    let panels = body.split_evenly((grid_rows, cols));

    for (i, (name, panel)) in history.wallets.iter().zip(panels.iter()).enumerate() {
        draw_panel(panel, name, i, &rows)?;
    }

    root.present().map_err(plot_err)?;
    Ok(true)
}

fn draw_panel(
    area: &DrawingArea<SVGBackend<'_>, plotters::coord::Shift>,
    name: &str,
    column: usize,
    rows: &[&HistoryRow],
) -> Result<()> {
    let points: Vec<(f64, f64)> = rows
        .iter()
        .enumerate()
        .filter_map(|(x, row)| {
            row.values
                .get(column)
                .copied()
                .flatten()
                .map(|v| (x as f64, v))
        })
        .collect();

    let latest = rows
        .last()
        .and_then(|row| row.values.get(column).copied().flatten());
    let caption = match latest.and_then(Decimal::from_f64_retain) {
        Some(v) => format!("{name}: {} USDT", format_amount(v)),
        None => format!("{name}: n/a"),
    };

    let (y_min, y_max) = y_bounds(&points);
    let x_max = (rows.len().saturating_sub(1)).max(1) as f64;

    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 16))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(70)
        .build_cartesian_2d(0f64..x_max, y_min..y_max)
        .map_err(plot_err)?;

    let label_for = |x: &f64| {
        let idx = x.round();
        if (x - idx).abs() > 1e-6 || idx < 0.0 {
            return String::new();
        }
        rows.get(idx as usize)
            .map(|row| row.timestamp.naive_local().format("%m-%d %H:%M").to_string())
            .unwrap_or_default()
    };

    chart
        .configure_mesh()
        .x_labels(rows.len().min(6))
        .x_label_formatter(&label_for)
        .y_label_formatter(&|y: &f64| format!("{y:.0}"))
        .label_style(("sans-serif", 11))
        .draw()
        .map_err(plot_err)?;

    if points.is_empty() {
        return Ok(());
    }

    let color = Palette99::pick(column).mix(1.0);
    chart
        .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))
        .map_err(plot_err)?;
    chart
        .draw_series(
            points
                .iter()
                .map(|&p| Circle::new(p, 3, color.filled())),
        )
        .map_err(plot_err)?;

    Ok(())
}

/// Y range covering every point with 5% headroom; flat or empty series get a
/// unit-wide band.
fn y_bounds(points: &[(f64, f64)]) -> (f64, f64) {
    let mut iter = points.iter().map(|&(_, y)| y);
    let Some(first) = iter.next() else {
        return (0.0, 1.0);
    };
    let (min, max) = iter.fold((first, first), |(lo, hi), y| (lo.min(y), hi.max(y)));
    if (max - min).abs() < f64::EPSILON {
        return (min - 1.0, max + 1.0);
    }
    let pad = (max - min) * 0.05;
    (min - pad, max + pad)
}

fn plot_err<E: std::fmt::Display>(e: E) -> anyhow::Error {
    anyhow!("plotting failed: {e}")
}
