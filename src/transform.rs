//! Transformer: raw snapshot → silver batch
//!
//! Every `(target_currency, rate)` entry is validated on its own. Valid
//! entries become [`RateRecord`]s rounded to six decimals; everything else
//! is quarantined as a [`RejectRecord`] and never reaches silver.

use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::storage::{columnar, write_json_atomically, DataLayout};
use crate::types::{is_currency_code, round_to, RateRecord, RejectRecord, RATE_DECIMALS};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use hashbrown::HashSet;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshot schema accepted at the transformer boundary
#[derive(Debug, Clone, Deserialize)]
pub struct RawSnapshot {
    #[serde(default)]
    pub base_code: Option<String>,
    pub conversion_rates: BTreeMap<String, Value>,
    #[serde(rename = "_metadata")]
    pub metadata: RawMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMetadata {
    pub timestamp: String,
}

/// Result of transforming one snapshot
#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub batch: String,
    pub date: NaiveDate,
    pub silver_path: PathBuf,
    pub accepted: usize,
    pub reject_count: usize,
    pub reject_path: Option<PathBuf>,
}

/// Result of transforming several snapshots
#[derive(Debug, Default)]
pub struct TransformReport {
    pub outcomes: Vec<TransformOutcome>,
    pub failures: Vec<(PathBuf, PipelineError)>,
}

/// Converts raw snapshots into silver batches
#[derive(Debug, Clone)]
pub struct Transformer {
    layout: DataLayout,
    expected_base: String,
}

impl Transformer {
    pub fn new(layout: DataLayout, expected_base: &str) -> Self {
        Self {
            layout,
            expected_base: expected_base.to_string(),
        }
    }

    /// Transform one snapshot file. Re-running overwrites the same batch.
    pub fn transform(&self, ctx: &RunContext, snapshot_path: &Path) -> Result<TransformOutcome> {
        let snapshot = read_snapshot(snapshot_path)?;
        let captured = parse_capture_timestamp(&snapshot.metadata.timestamp).ok_or_else(|| {
            PipelineError::MalformedSnapshot {
                path: snapshot_path.to_path_buf(),
                reason: format!("bad _metadata.timestamp '{}'", snapshot.metadata.timestamp),
            }
        })?;
        let base = match &snapshot.base_code {
            Some(code) if is_currency_code(code) => code.clone(),
            Some(code) => {
                return Err(PipelineError::MalformedSnapshot {
                    path: snapshot_path.to_path_buf(),
                    reason: format!("bad base_code '{}'", code),
                })
            }
            None => self.expected_base.clone(),
        };

        let date = captured.date_naive();
        let batch = batch_name(snapshot_path, date);
        let (records, rejects) = split_rates(&snapshot, &base, date);
        let records = dedupe(records);

        let reject_path = self.quarantine(ctx, &batch, &rejects);

        let silver_path = self.layout.silver_path(&batch);
        columnar::write_silver(&silver_path, &records)?;

        log::info!(
            "{}: silver batch {} written to {} ({} records, {} rejects)",
            ctx,
            batch,
            silver_path.display(),
            records.len(),
            rejects.len()
        );

        Ok(TransformOutcome {
            batch,
            date,
            silver_path,
            accepted: records.len(),
            reject_count: rejects.len(),
            reject_path,
        })
    }

    /// Transform several snapshots. A malformed snapshot is recorded and
    /// skipped; any other error aborts.
    pub fn transform_many(&self, ctx: &RunContext, paths: &[PathBuf]) -> Result<TransformReport> {
        let mut report = TransformReport::default();
        for path in paths {
            match self.transform(ctx, path) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e @ PipelineError::MalformedSnapshot { .. }) => {
                    log::error!("{}: skipping {}", ctx, e);
                    report.failures.push((path.clone(), e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Persist rejects for `batch`. Never fails the caller.
    fn quarantine(&self, ctx: &RunContext, batch: &str, rejects: &[RejectRecord]) -> Option<PathBuf> {
        let path = self.layout.reject_path(batch);
        if rejects.is_empty() {
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    log::warn!("{}: could not remove stale rejects {}: {}", ctx, path.display(), e);
                }
            }
            return None;
        }

        match write_json_atomically(&path, rejects) {
            Ok(()) => {
                log::warn!(
                    "{}: {} records quarantined to {}",
                    ctx,
                    rejects.len(),
                    path.display()
                );
                Some(path)
            }
            Err(e) => {
                log::warn!(
                    "{}: failed to quarantine {} records for {}: {}",
                    ctx,
                    rejects.len(),
                    batch,
                    e
                );
                None
            }
        }
    }
}

/// Parse a snapshot file against [`RawSnapshot`]
pub fn read_snapshot(path: &Path) -> Result<RawSnapshot> {
    let malformed = |reason: String| PipelineError::MalformedSnapshot {
        path: path.to_path_buf(),
        reason,
    };
    let contents = fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;
    serde_json::from_str(&contents).map_err(|e| malformed(e.to_string()))
}

/// Validate a single rate value, returning it rounded to six decimals
pub fn validate_rate(target_currency: &str, value: &Value) -> Result<f64> {
    let invalid = |reason: &str| PipelineError::InvalidRateValue {
        target_currency: target_currency.to_string(),
        reason: reason.to_string(),
    };

    if !is_currency_code(target_currency) {
        return Err(invalid("invalid currency code"));
    }
    let rate = match value {
        Value::Null => return Err(invalid("rate is null")),
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid("rate is not representable"))?,
        _ => return Err(invalid("rate is not a number")),
    };
    if !rate.is_finite() {
        return Err(invalid("rate is not finite"));
    }
    if rate <= 0.0 {
        return Err(invalid("rate must be strictly positive"));
    }
    let rounded = round_to(rate, RATE_DECIMALS);
    if !rounded.is_finite() {
        return Err(invalid("rate is not finite"));
    }
    if rounded <= 0.0 {
        return Err(invalid("rate rounds to zero"));
    }
    Ok(rounded)
}

/// Split a snapshot into accepted records and rejects
pub fn split_rates(
    snapshot: &RawSnapshot,
    base_currency: &str,
    date: NaiveDate,
) -> (Vec<RateRecord>, Vec<RejectRecord>) {
    let mut records = Vec::with_capacity(snapshot.conversion_rates.len());
    let mut rejects = Vec::new();

    for (target, value) in &snapshot.conversion_rates {
        match validate_rate(target, value) {
            Ok(rate) => records.push(RateRecord {
                base_currency: base_currency.to_string(),
                target_currency: target.clone(),
                rate,
                retrieved_at: snapshot.metadata.timestamp.clone(),
                date,
            }),
            Err(PipelineError::InvalidRateValue { reason, .. }) => rejects.push(RejectRecord {
                target_currency: target.clone(),
                rate: value.clone(),
                reason,
            }),
            Err(other) => rejects.push(RejectRecord {
                target_currency: target.clone(),
                rate: value.clone(),
                reason: other.to_string(),
            }),
        }
    }
    (records, rejects)
}

/// Keep the first record per `(target_currency, retrieved_at)`
pub fn dedupe(records: Vec<RateRecord>) -> Vec<RateRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert((r.target_currency.clone(), r.retrieved_at.clone())))
        .collect()
}

/// Parse the snapshot capture timestamp (RFC 3339, or naive ISO-8601 as UTC)
pub fn parse_capture_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Silver batch name: the snapshot stem, prefixed with the capture date
/// unless it already starts with it
fn batch_name(snapshot_path: &Path, date: NaiveDate) -> String {
    let day = date.to_string();
    let stem = snapshot_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    if stem == day || stem.starts_with(&format!("{}_", day)) {
        stem.to_string()
    } else if stem.is_empty() {
        day
    } else {
        format!("{}_{}", day, stem)
    }
}
