//! Core record types shared by the pipeline stages

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Exchange rate (units of target currency per unit of base currency)
pub type Rate = f64;

/// ISO 4217 currency code, e.g. "EUR"
pub type CurrencyCode = String;

/// Decimal places kept for silver/gold rates
pub const RATE_DECIMALS: i32 = 6;

/// Check that `code` looks like an ISO 4217 code (three ASCII uppercase letters)
pub fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// Round `value` to `decimals` decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let scaled = value * factor;
    // magnitudes this large carry no fractional digits
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

/// One validated exchange-rate observation (a silver row)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    pub base_currency: CurrencyCode,
    pub target_currency: CurrencyCode,
    pub rate: Rate,
    /// Capture timestamp as written by the rate source (ISO-8601)
    pub retrieved_at: String,
    pub date: NaiveDate,
}

impl RateRecord {
    /// Gold-layer uniqueness key
    pub fn gold_key(&self) -> (NaiveDate, CurrencyCode, CurrencyCode) {
        (
            self.date,
            self.base_currency.clone(),
            self.target_currency.clone(),
        )
    }
}

/// A candidate record excluded from the silver layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectRecord {
    pub target_currency: CurrencyCode,
    /// Raw value exactly as it appeared in the snapshot
    pub rate: serde_json::Value,
    pub reason: String,
}

/// Lineage attached to every gold row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub pipeline_version: String,
    pub run_id: String,
    pub run_timestamp: String,
}

/// A gold row: a deduplicated rate record plus provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldRecord {
    #[serde(flatten)]
    pub record: RateRecord,
    #[serde(flatten)]
    pub provenance: Provenance,
}

/// Request metadata injected into every raw snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub timestamp: String,
    pub status_code: u16,
    pub url: String,
}

/// Reference to a snapshot persisted by the rate source
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    pub path: PathBuf,
    pub base_currency: CurrencyCode,
    pub captured_at: String,
    pub rate_count: usize,
}
