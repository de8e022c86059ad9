//! Top-mover analytics over the gold history
//!
//! For every currency quoted on the latest date in the history:
//! - `current_price`: the rate on that date
//! - `pct_change`: change versus the mean rate over the whole previous
//!   calendar month, 0 when that month has no observations
//! - `volatility`: sample standard deviation of period-over-period percent
//!   changes across the trailing `window` observations
//!
//! Currencies are ranked by `|pct_change|` with a stable sort, so ties keep
//! alphabetical order.

use crate::types::RateRecord;
use chrono::{Datelike, NaiveDate};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution};
use std::collections::BTreeMap;

/// Default trailing window for volatility
pub const DEFAULT_WINDOW: usize = 30;

/// Default number of movers handed to enrichment
pub const DEFAULT_TOP_N: usize = 5;

/// Derived metrics for one target currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub target_currency: String,
    pub current_price: f64,
    pub pct_change: f64,
    pub volatility: f64,
}

/// Computes per-currency metrics and ranks movers
#[derive(Debug, Clone, Copy)]
pub struct MetricsEngine {
    window: usize,
    top_n: usize,
}

impl MetricsEngine {
    /// `window` is clamped to at least 2 observations
    pub fn new(window: usize, top_n: usize) -> Self {
        Self {
            window: window.max(2),
            top_n,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Metrics for every currency quoted on the latest date, alphabetical
    pub fn compute_metrics(&self, history: &[RateRecord]) -> Vec<MetricsRecord> {
        let Some(latest) = history.iter().map(|r| r.date).max() else {
            return Vec::new();
        };
        let prior = prior_month_range(latest);

        let mut series: HashMap<&str, Vec<(NaiveDate, f64)>> = HashMap::new();
        let mut current: BTreeMap<&str, f64> = BTreeMap::new();
        for record in history {
            series
                .entry(record.target_currency.as_str())
                .or_default()
                .push((record.date, record.rate));
            if record.date == latest {
                current.insert(record.target_currency.as_str(), record.rate);
            }
        }

        current
            .into_iter()
            .map(|(currency, current_price)| {
                let mut observations = series.remove(currency).unwrap_or_default();
                observations.sort_by_key(|(date, _)| *date);

                let prior_mean = prior.and_then(|(start, end)| {
                    mean(
                        observations
                            .iter()
                            .filter(|(date, _)| *date >= start && *date <= end)
                            .map(|(_, rate)| *rate),
                    )
                });

                let rates: Vec<f64> = observations.iter().map(|(_, rate)| *rate).collect();
                MetricsRecord {
                    target_currency: currency.to_string(),
                    current_price,
                    pct_change: prior_mean
                        .map(|m| pct_change(current_price, m))
                        .unwrap_or(0.0),
                    volatility: volatility(&rates, self.window),
                }
            })
            .collect()
    }

    /// The `top_n` currencies with the largest absolute percent change
    pub fn compute_top_movers(&self, history: &[RateRecord]) -> Vec<MetricsRecord> {
        let mut metrics = self.compute_metrics(history);
        metrics.sort_by(|a, b| b.pct_change.abs().total_cmp(&a.pct_change.abs()));
        metrics.truncate(self.top_n);
        metrics
    }
}

impl Default for MetricsEngine {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_TOP_N)
    }
}

/// First and last day of the calendar month before `latest`'s month
pub fn prior_month_range(latest: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let end = NaiveDate::from_ymd_opt(latest.year(), latest.month(), 1)?.pred_opt()?;
    let start = NaiveDate::from_ymd_opt(end.year(), end.month(), 1)?;
    Some((start, end))
}

/// Percent change from `reference` to `current`; 0 for a non-positive reference
pub fn pct_change(current: f64, reference: f64) -> f64 {
    if reference <= 0.0 || !reference.is_finite() {
        return 0.0;
    }
    (current - reference) / reference * 100.0
}

/// Volatility (percent) of the trailing `window` rates, oldest first
pub fn volatility(rates: &[f64], window: usize) -> f64 {
    let tail = &rates[rates.len().saturating_sub(window)..];
    let changes: Vec<f64> = tail
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if changes.len() < 2 {
        return 0.0;
    }

    let std_dev = Data::new(changes).std_dev().unwrap_or(0.0) * 100.0;
    if std_dev.is_finite() {
        std_dev
    } else {
        0.0
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
