//! Parquet encoding of the silver and gold layers

use super::atomic::write_atomically;
use crate::error::{PipelineError, Result};
use crate::types::{GoldRecord, Provenance, RateRecord};
use chrono::NaiveDate;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

pub const COL_BASE_CURRENCY: &str = "base_currency";
pub const COL_TARGET_CURRENCY: &str = "target_currency";
pub const COL_RATE: &str = "rate";
pub const COL_RETRIEVED_AT: &str = "retrieved_at";
pub const COL_DATE: &str = "date";
pub const COL_PIPELINE_VERSION: &str = "pipeline_version";
pub const COL_RUN_ID: &str = "run_id";
pub const COL_RUN_TIMESTAMP: &str = "run_timestamp";

/// Silver column order
pub const SILVER_COLUMNS: [&str; 5] = [
    COL_BASE_CURRENCY,
    COL_TARGET_CURRENCY,
    COL_RATE,
    COL_RETRIEVED_AT,
    COL_DATE,
];

/// Gold adds provenance after the silver columns
pub const PROVENANCE_COLUMNS: [&str; 3] = [COL_PIPELINE_VERSION, COL_RUN_ID, COL_RUN_TIMESTAMP];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Build the silver frame for `records`
pub fn silver_frame(records: &[RateRecord]) -> Result<DataFrame> {
    Ok(DataFrame::new(silver_series(records.iter()))?)
}

/// Build the gold frame for `records`
pub fn gold_frame(records: &[GoldRecord]) -> Result<DataFrame> {
    let mut columns = silver_series(records.iter().map(|g| &g.record));
    columns.push(Series::new(
        COL_PIPELINE_VERSION,
        records
            .iter()
            .map(|g| g.provenance.pipeline_version.clone())
            .collect::<Vec<_>>(),
    ));
    columns.push(Series::new(
        COL_RUN_ID,
        records
            .iter()
            .map(|g| g.provenance.run_id.clone())
            .collect::<Vec<_>>(),
    ));
    columns.push(Series::new(
        COL_RUN_TIMESTAMP,
        records
            .iter()
            .map(|g| g.provenance.run_timestamp.clone())
            .collect::<Vec<_>>(),
    ));
    Ok(DataFrame::new(columns)?)
}

fn silver_series<'a>(records: impl Iterator<Item = &'a RateRecord> + Clone) -> Vec<Series> {
    let base: Vec<String> = records.clone().map(|r| r.base_currency.clone()).collect();
    let target: Vec<String> = records.clone().map(|r| r.target_currency.clone()).collect();
    let rate: Vec<f64> = records.clone().map(|r| r.rate).collect();
    let retrieved: Vec<String> = records.clone().map(|r| r.retrieved_at.clone()).collect();
    let date: Vec<String> = records
        .map(|r| r.date.format(DATE_FORMAT).to_string())
        .collect();

    vec![
        Series::new(COL_BASE_CURRENCY, base),
        Series::new(COL_TARGET_CURRENCY, target),
        Series::new(COL_RATE, rate),
        Series::new(COL_RETRIEVED_AT, retrieved),
        Series::new(COL_DATE, date),
    ]
}

/// Write a silver batch, replacing any file at `path`
pub fn write_silver(path: &Path, records: &[RateRecord]) -> Result<()> {
    let mut df = silver_frame(records)?;
    write_frame(path, &mut df)
}

/// Write a gold dataset, replacing any file at `path`
pub fn write_gold(path: &Path, records: &[GoldRecord]) -> Result<()> {
    let mut df = gold_frame(records)?;
    write_frame(path, &mut df)
}

/// Read a silver batch, validating its columns
pub fn read_silver(path: &Path) -> Result<Vec<RateRecord>> {
    let df = read_frame(path)?;
    frame_to_records(&df).map_err(|e| with_path(path, e))
}

/// Read a gold dataset, validating its columns
pub fn read_gold(path: &Path) -> Result<Vec<GoldRecord>> {
    let df = read_frame(path)?;
    let inner = || -> Result<Vec<GoldRecord>> {
        let records = frame_to_records(&df)?;
        let versions = string_column(&df, COL_PIPELINE_VERSION)?;
        let run_ids = string_column(&df, COL_RUN_ID)?;
        let stamps = string_column(&df, COL_RUN_TIMESTAMP)?;

        Ok(records
            .into_iter()
            .zip(versions)
            .zip(run_ids)
            .zip(stamps)
            .map(|(((record, pipeline_version), run_id), run_timestamp)| GoldRecord {
                record,
                provenance: Provenance {
                    pipeline_version,
                    run_id,
                    run_timestamp,
                },
            })
            .collect())
    };
    inner().map_err(|e| with_path(path, e))
}

/// Load a parquet file into a frame
pub fn read_frame(path: &Path) -> Result<DataFrame> {
    let file = File::open(path)?;
    Ok(ParquetReader::new(file).finish()?)
}

fn write_frame(path: &Path, df: &mut DataFrame) -> Result<()> {
    write_atomically(path, |file| {
        ParquetWriter::new(file)
            .with_compression(ParquetCompression::Snappy)
            .finish(df)?;
        Ok(())
    })
}

fn frame_to_records(df: &DataFrame) -> Result<Vec<RateRecord>> {
    let base = string_column(df, COL_BASE_CURRENCY)?;
    let target = string_column(df, COL_TARGET_CURRENCY)?;
    let rate = f64_column(df, COL_RATE)?;
    let retrieved = string_column(df, COL_RETRIEVED_AT)?;
    let dates = string_column(df, COL_DATE)?;

    let mut records = Vec::with_capacity(df.height());
    for (i, date) in dates.iter().enumerate() {
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|e| {
            PipelineError::SchemaError(format!("row {}: bad date '{}': {}", i, date, e))
        })?;
        records.push(RateRecord {
            base_currency: base[i].clone(),
            target_currency: target[i].clone(),
            rate: rate[i],
            retrieved_at: retrieved[i].clone(),
            date,
        });
    }
    Ok(records)
}

fn string_column(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let column = df
        .column(name)
        .map_err(|_| PipelineError::SchemaError(format!("missing column '{}'", name)))?
        .str()
        .map_err(|e| PipelineError::SchemaError(format!("column '{}': {}", name, e)))?;

    column
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            value
                .map(str::to_string)
                .ok_or_else(|| null_cell(name, row))
        })
        .collect()
}

fn f64_column(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = df
        .column(name)
        .map_err(|_| PipelineError::SchemaError(format!("missing column '{}'", name)))?
        .f64()
        .map_err(|e| PipelineError::SchemaError(format!("column '{}': {}", name, e)))?;

    column
        .into_iter()
        .enumerate()
        .map(|(row, value)| value.ok_or_else(|| null_cell(name, row)))
        .collect()
}

fn null_cell(column: &str, row: usize) -> PipelineError {
    PipelineError::SchemaError(format!("null in column '{}' at row {}", column, row))
}

fn with_path(path: &Path, e: PipelineError) -> PipelineError {
    match e {
        PipelineError::SchemaError(msg) => {
            PipelineError::SchemaError(format!("{}: {}", path.display(), msg))
        }
        other => other,
    }
}
