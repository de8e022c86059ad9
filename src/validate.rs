//! Gold dataset validation
//!
//! Checks a gold parquet file against the published schema: every column
//! present with the right type, one row per `(date, base, target)` key and
//! strictly positive rates.

use crate::error::Result;
use crate::storage::columnar::{self, COL_RATE, PROVENANCE_COLUMNS, SILVER_COLUMNS};
use hashbrown::HashSet;
use polars::prelude::DataType;
use std::fmt;
use std::path::{Path, PathBuf};

/// Findings for one gold file
#[derive(Debug, Clone, Default)]
pub struct SchemaReport {
    pub path: PathBuf,
    pub rows: usize,
    pub missing_columns: Vec<String>,
    /// `(column, found type)` for columns with the wrong type
    pub wrong_types: Vec<(String, String)>,
    pub duplicate_keys: usize,
    pub non_positive_rates: usize,
}

impl SchemaReport {
    pub fn is_valid(&self) -> bool {
        self.missing_columns.is_empty()
            && self.wrong_types.is_empty()
            && self.duplicate_keys == 0
            && self.non_positive_rates == 0
    }

    /// One line per problem
    pub fn problems(&self) -> Vec<String> {
        let mut problems: Vec<String> = self
            .missing_columns
            .iter()
            .map(|c| format!("missing column '{}'", c))
            .collect();
        problems.extend(
            self.wrong_types
                .iter()
                .map(|(c, t)| format!("column '{}' has type {}", c, t)),
        );
        if self.duplicate_keys > 0 {
            problems.push(format!("{} duplicate (date, base, target) keys", self.duplicate_keys));
        }
        if self.non_positive_rates > 0 {
            problems.push(format!("{} non-positive rates", self.non_positive_rates));
        }
        problems
    }
}

impl fmt::Display for SchemaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}: valid ({} rows)", self.path.display(), self.rows)
        } else {
            write!(f, "{}: {}", self.path.display(), self.problems().join("; "))
        }
    }
}

fn expected_type(column: &str) -> DataType {
    if column == COL_RATE {
        DataType::Float64
    } else {
        DataType::String
    }
}

/// Validate the gold file at `path`.
///
/// An unreadable file is an error; schema problems are reported.
pub fn validate_gold_file(path: &Path) -> Result<SchemaReport> {
    let df = columnar::read_frame(path)?;
    let schema = df.schema();

    let mut report = SchemaReport {
        path: path.to_path_buf(),
        rows: df.height(),
        ..Default::default()
    };

    for column in SILVER_COLUMNS.iter().chain(PROVENANCE_COLUMNS.iter()) {
        match schema.get(*column) {
            None => report.missing_columns.push(column.to_string()),
            Some(dtype) if *dtype != expected_type(column) => {
                report.wrong_types.push((column.to_string(), dtype.to_string()))
            }
            Some(_) => {}
        }
    }

    // Row checks need a well-formed frame
    if !report.missing_columns.is_empty() || !report.wrong_types.is_empty() {
        return Ok(report);
    }

    let rows = columnar::read_gold(path)?;
    let mut seen = HashSet::with_capacity(rows.len());
    for row in &rows {
        if !seen.insert(row.record.gold_key()) {
            report.duplicate_keys += 1;
        }
        if row.record.rate <= 0.0 || row.record.rate.is_nan() {
            report.non_positive_rates += 1;
        }
    }

    log::debug!("{}", report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GoldRecord, Provenance, RateRecord};
    use chrono::NaiveDate;
    use polars::prelude::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn gold(target: &str, rate: f64) -> GoldRecord {
        GoldRecord {
            record: RateRecord {
                base_currency: "USD".to_string(),
                target_currency: target.to_string(),
                rate,
                retrieved_at: "2024-01-01T12:00:00Z".to_string(),
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            },
            provenance: Provenance {
                pipeline_version: "1.0".to_string(),
                run_id: "20240101_120000".to_string(),
                run_timestamp: "2024-01-01T12:00:00Z".to_string(),
            },
        }
    }

    #[test]
    fn test_valid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("2024-01-01.parquet");
        columnar::write_gold(&path, &[gold("EUR", 0.9), gold("JPY", 141.0)]).unwrap();

        let report = validate_gold_file(&path).unwrap();
        assert!(report.is_valid(), "{}", report);
        assert_eq!(report.rows, 2);
    }

    #[test]
    fn test_duplicates_and_bad_rates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("2024-01-01.parquet");
        columnar::write_gold(
            &path,
            &[gold("EUR", 0.9), gold("EUR", 0.91), gold("JPY", 0.0)],
        )
        .unwrap();

        let report = validate_gold_file(&path).unwrap();
        assert!(!report.is_valid());
        assert_eq!(report.duplicate_keys, 1);
        assert_eq!(report.non_positive_rates, 1);
        assert_eq!(report.problems().len(), 2);
    }

    #[test]
    fn test_silver_file_lacks_provenance() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.parquet");
        columnar::write_silver(&path, &[gold("EUR", 0.9).record]).unwrap();

        let report = validate_gold_file(&path).unwrap();
        assert_eq!(report.missing_columns, PROVENANCE_COLUMNS.to_vec());
    }

    #[test]
    fn test_wrong_rate_type() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("typed.parquet");
        let mut columns: Vec<Series> = SILVER_COLUMNS
            .iter()
            .chain(PROVENANCE_COLUMNS.iter())
            .map(|c| Series::new(c, vec!["x".to_string()]))
            .collect();
        columns[2] = Series::new(COL_RATE, vec![1i64]);
        let mut df = DataFrame::new(columns).unwrap();
        ParquetWriter::new(File::create(&path).unwrap())
            .finish(&mut df)
            .unwrap();

        let report = validate_gold_file(&path).unwrap();
        assert_eq!(report.wrong_types.len(), 1);
        assert_eq!(report.wrong_types[0].0, COL_RATE);
    }
}
