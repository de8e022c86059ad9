//! Aggregator: silver batches → gold dataset
//!
//! Same-day batches are concatenated in name order and deduplicated on
//! `(date, base_currency, target_currency)`, last write wins. The gold file
//! for a date is replaced on every run, and so is the date's slice of the
//! relational mirror, so re-running a day never accumulates rows.

use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::mirror::RelationalSink;
use crate::retry::RetryPolicy;
use crate::storage::{columnar, DataLayout};
use crate::types::{GoldRecord, Provenance, RateRecord};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Builds and persists the gold layer
pub struct Aggregator {
    layout: DataLayout,
    pipeline_version: String,
    mirror: Option<Box<dyn RelationalSink>>,
    mirror_retry: RetryPolicy,
}

impl Aggregator {
    pub fn new(layout: DataLayout, pipeline_version: &str) -> Self {
        Self {
            layout,
            pipeline_version: pipeline_version.to_string(),
            mirror: None,
            mirror_retry: RetryPolicy::immediate(1),
        }
    }

    /// Mirror every daily gold dataset into `sink`
    pub fn with_mirror(mut self, sink: Box<dyn RelationalSink>, retry: RetryPolicy) -> Self {
        self.mirror = Some(sink);
        self.mirror_retry = retry;
        self
    }

    /// Consolidate every silver batch for `date` into `gold/{date}.parquet`.
    ///
    /// Returns `None` when there is nothing to aggregate for the date; any
    /// earlier gold file and mirror rows for that date are removed.
    pub fn aggregate(&mut self, ctx: &RunContext, date: NaiveDate) -> Result<Option<PathBuf>> {
        let batches = self.layout.silver_batches_for(date)?;
        let mut rows = Vec::new();
        for batch in &batches {
            let records = columnar::read_silver(batch)?;
            let total = records.len();
            let same_day: Vec<RateRecord> = records.into_iter().filter(|r| r.date == date).collect();
            if same_day.len() != total {
                log::warn!(
                    "{}: ignored {} rows in {} not dated {}",
                    ctx,
                    total - same_day.len(),
                    batch.display(),
                    date
                );
            }
            rows.extend(same_day);
        }

        let path = self.layout.gold_path(date);
        if rows.is_empty() {
            log::warn!("{}: {}; nothing to aggregate", ctx, PipelineError::NoDataForDate(date));
            self.clear_date(ctx, date, &path)?;
            return Ok(None);
        }

        let gold = stamp(consolidate(rows), ctx, &self.pipeline_version);
        columnar::write_gold(&path, &gold)?;
        log::info!(
            "{}: gold dataset for {} written to {} ({} rows from {} batches)",
            ctx,
            date,
            path.display(),
            gold.len(),
            batches.len()
        );

        self.mirror_date(ctx, date, &gold)?;
        Ok(Some(path))
    }

    /// Consolidate every silver batch into `gold/cumulative.parquet`
    pub fn aggregate_cumulative(&self, ctx: &RunContext) -> Result<Option<PathBuf>> {
        let mut rows = Vec::new();
        for batch in self.layout.all_silver_batches()? {
            rows.extend(columnar::read_silver(&batch)?);
        }
        if rows.is_empty() {
            log::warn!("{}: no silver batches; nothing to aggregate", ctx);
            return Ok(None);
        }

        let gold = stamp(consolidate(rows), ctx, &self.pipeline_version);
        let path = self.layout.cumulative_gold_path();
        columnar::write_gold(&path, &gold)?;
        log::info!(
            "{}: cumulative gold dataset written to {} ({} rows)",
            ctx,
            path.display(),
            gold.len()
        );
        Ok(Some(path))
    }

    /// Every daily gold row, oldest file first
    pub fn load_history(&self) -> Result<Vec<GoldRecord>> {
        load_gold_files(&self.layout.daily_gold_files()?)
    }

    /// Drop a gold file and mirror slice left over from an earlier run
    fn clear_date(&mut self, ctx: &RunContext, date: NaiveDate, gold_path: &Path) -> Result<()> {
        if !gold_path.exists() {
            return Ok(());
        }
        fs::remove_file(gold_path)
            .map_err(|e| PipelineError::sink(gold_path.display().to_string(), e))?;
        log::warn!("{}: removed stale gold file {}", ctx, gold_path.display());
        self.mirror_date(ctx, date, &[])
    }

    fn mirror_date(&mut self, ctx: &RunContext, date: NaiveDate, gold: &[GoldRecord]) -> Result<()> {
        let Some(sink) = self.mirror.as_mut() else {
            return Ok(());
        };
        let target = sink.describe();
        let written = self
            .mirror_retry
            .run_blocking(&format!("{} mirror {}", ctx, date), |_| {
                sink.replace_date(date, gold)
            })
            .map_err(|e| PipelineError::sink(target.clone(), e))?;
        log::info!("{}: mirrored {} rows for {} into {}", ctx, written, date, target);
        Ok(())
    }
}

/// Deduplicate on the gold key, last write wins; output is key-ordered
pub fn consolidate(records: impl IntoIterator<Item = RateRecord>) -> Vec<RateRecord> {
    let mut by_key = BTreeMap::new();
    for record in records {
        by_key.insert(record.gold_key(), record);
    }
    by_key.into_values().collect()
}

fn stamp(records: Vec<RateRecord>, ctx: &RunContext, pipeline_version: &str) -> Vec<GoldRecord> {
    let provenance = Provenance {
        pipeline_version: pipeline_version.to_string(),
        run_id: ctx.run_id.clone(),
        run_timestamp: ctx.timestamp_iso(),
    };
    records
        .into_iter()
        .map(|record| GoldRecord {
            record,
            provenance: provenance.clone(),
        })
        .collect()
}

/// Read and concatenate gold files
pub fn load_gold_files(paths: &[PathBuf]) -> Result<Vec<GoldRecord>> {
    let mut rows = Vec::new();
    for path in paths {
        rows.extend(read_gold_logged(path)?);
    }
    Ok(rows)
}

fn read_gold_logged(path: &Path) -> Result<Vec<GoldRecord>> {
    let rows = columnar::read_gold(path)?;
    log::debug!("loaded {} gold rows from {}", rows.len(), path.display());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::tempdir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn rec(target: &str, rate: f64, date: NaiveDate) -> RateRecord {
        RateRecord {
            base_currency: "USD".to_string(),
            target_currency: target.to_string(),
            rate,
            retrieved_at: format!("{}T12:00:00Z", date),
            date,
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Rc<RefCell<Vec<(NaiveDate, usize)>>>,
        failures_left: usize,
    }

    impl RelationalSink for RecordingSink {
        fn replace_date(&mut self, date: NaiveDate, rows: &[GoldRecord]) -> Result<usize> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(PipelineError::sink("recording", "database is locked"));
            }
            self.calls.borrow_mut().push((date, rows.len()));
            Ok(rows.len())
        }

        fn describe(&self) -> String {
            "recording".to_string()
        }
    }

    #[test]
    fn test_duplicate_rows_collapse_to_one() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        columnar::write_silver(&layout.silver_path("2024-01-01"), &[rec("EUR", 0.90, day())]).unwrap();
        columnar::write_silver(&layout.silver_path("2024-01-01_120000"), &[rec("EUR", 0.90, day())])
            .unwrap();
        let mut aggregator = Aggregator::new(layout, "1.0");

        let path = aggregator.aggregate(&RunContext::new("load"), day()).unwrap().unwrap();
        let gold = columnar::read_gold(&path).unwrap();

        assert_eq!(gold.len(), 1);
        assert_eq!(gold[0].record.target_currency, "EUR");
        assert_eq!(gold[0].provenance.pipeline_version, "1.0");
    }

    #[test]
    fn test_last_batch_wins() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        columnar::write_silver(&layout.silver_path("2024-01-01"), &[rec("EUR", 0.90, day())]).unwrap();
        columnar::write_silver(&layout.silver_path("2024-01-01_180000"), &[rec("EUR", 0.93, day())])
            .unwrap();
        let mut aggregator = Aggregator::new(layout, "1.0");

        let path = aggregator.aggregate(&RunContext::new("load"), day()).unwrap().unwrap();
        assert_eq!(columnar::read_gold(&path).unwrap()[0].record.rate, 0.93);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        columnar::write_silver(
            &layout.silver_path("2024-01-01"),
            &[rec("EUR", 0.9, day()), rec("JPY", 141.0, day())],
        )
        .unwrap();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = RecordingSink {
            calls: calls.clone(),
            failures_left: 0,
        };
        let mut aggregator =
            Aggregator::new(layout.clone(), "1.0").with_mirror(Box::new(sink), RetryPolicy::immediate(1));
        let ctx = RunContext::new("load");

        let first = aggregator.aggregate(&ctx, day()).unwrap().unwrap();
        let rows_first: Vec<_> = columnar::read_gold(&first).unwrap().into_iter().map(|g| g.record).collect();
        let second = aggregator.aggregate(&ctx, day()).unwrap().unwrap();
        let rows_second: Vec<_> = columnar::read_gold(&second).unwrap().into_iter().map(|g| g.record).collect();

        assert_eq!(first, second);
        assert_eq!(rows_first, rows_second);
        assert_eq!(rows_second.len(), 2);
        assert_eq!(layout.daily_gold_files().unwrap().len(), 1);
        assert_eq!(*calls.borrow(), vec![(day(), 2), (day(), 2)]);
    }

    #[test]
    fn test_missing_day_is_not_an_error() {
        let dir = tempdir().unwrap();
        let mut aggregator = Aggregator::new(DataLayout::new(dir.path()), "1.0");
        assert!(aggregator.aggregate(&RunContext::new("load"), day()).unwrap().is_none());
    }

    #[test]
    fn test_emptied_day_removes_stale_gold() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let batch = layout.silver_path("2024-01-01");
        columnar::write_silver(&batch, &[rec("EUR", 0.9, day())]).unwrap();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = RecordingSink {
            calls: calls.clone(),
            failures_left: 0,
        };
        let mut aggregator =
            Aggregator::new(layout.clone(), "1.0").with_mirror(Box::new(sink), RetryPolicy::immediate(1));
        let ctx = RunContext::new("load");

        let gold = aggregator.aggregate(&ctx, day()).unwrap().unwrap();
        assert!(gold.exists());

        fs::remove_file(&batch).unwrap();
        assert!(aggregator.aggregate(&ctx, day()).unwrap().is_none());

        assert!(!gold.exists());
        assert!(layout.daily_gold_files().unwrap().is_empty());
        assert_eq!(*calls.borrow(), vec![(day(), 1), (day(), 0)]);
    }

    #[test]
    fn test_mirror_retries_then_fails() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        columnar::write_silver(&layout.silver_path("2024-01-01"), &[rec("EUR", 0.9, day())]).unwrap();

        let flaky = RecordingSink {
            calls: Rc::new(RefCell::new(Vec::new())),
            failures_left: 1,
        };
        let mut aggregator = Aggregator::new(layout.clone(), "1.0")
            .with_mirror(Box::new(flaky), RetryPolicy::immediate(2));
        assert!(aggregator.aggregate(&RunContext::new("load"), day()).is_ok());

        let broken = RecordingSink {
            calls: Rc::new(RefCell::new(Vec::new())),
            failures_left: 5,
        };
        let mut aggregator =
            Aggregator::new(layout, "1.0").with_mirror(Box::new(broken), RetryPolicy::immediate(2));
        let err = aggregator.aggregate(&RunContext::new("load"), day()).unwrap_err();
        assert!(matches!(err, PipelineError::SinkWriteFailure { .. }));
    }

    #[test]
    fn test_cumulative_spans_dates() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        columnar::write_silver(&layout.silver_path("2024-01-01"), &[rec("EUR", 0.9, day())]).unwrap();
        columnar::write_silver(&layout.silver_path("2024-01-02"), &[rec("EUR", 0.91, d2)]).unwrap();
        let aggregator = Aggregator::new(layout, "1.0");

        let path = aggregator
            .aggregate_cumulative(&RunContext::new("load"))
            .unwrap()
            .unwrap();
        let gold = columnar::read_gold(&path).unwrap();
        assert_eq!(gold.len(), 2);
        assert!(aggregator.load_history().unwrap().is_empty());
    }
}
