//! On-disk layout of the raw, silver and gold layers
//!
//! ```text
//! <data_dir>/raw/YYYY-MM-DD[_HHMMSS].json      snapshots (append-only)
//! <data_dir>/raw/rejects/<batch>_rejects.json  quarantined records
//! <data_dir>/silver/<batch>.parquet            one batch per snapshot
//! <data_dir>/gold/YYYY-MM-DD.parquet           one dataset per day
//! <data_dir>/gold/cumulative.parquet           all days
//! <data_dir>/gold/YYYY-MM-DD-insights.json     narrative summary
//! ```

pub mod atomic;
pub mod columnar;

pub use atomic::{tmp_path, write_atomically, write_json_atomically};

use crate::error::Result;
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

const PARQUET_EXT: &str = "parquet";
const CUMULATIVE_STEM: &str = "cumulative";

/// Resolves every path the pipeline reads or writes
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    pub fn reject_dir(&self) -> PathBuf {
        self.raw_dir().join("rejects")
    }

    pub fn silver_dir(&self) -> PathBuf {
        self.root.join("silver")
    }

    pub fn gold_dir(&self) -> PathBuf {
        self.root.join("gold")
    }

    /// Create every layer directory
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.raw_dir(),
            self.reject_dir(),
            self.silver_dir(),
            self.gold_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn silver_path(&self, batch: &str) -> PathBuf {
        self.silver_dir().join(format!("{}.{}", batch, PARQUET_EXT))
    }

    pub fn reject_path(&self, batch: &str) -> PathBuf {
        self.reject_dir().join(format!("{}_rejects.json", batch))
    }

    pub fn gold_path(&self, date: NaiveDate) -> PathBuf {
        self.gold_dir().join(format!("{}.{}", date, PARQUET_EXT))
    }

    pub fn cumulative_gold_path(&self) -> PathBuf {
        self.gold_dir()
            .join(format!("{}.{}", CUMULATIVE_STEM, PARQUET_EXT))
    }

    pub fn insights_path(&self, date: NaiveDate) -> PathBuf {
        self.gold_dir().join(format!("{}-insights.json", date))
    }

    /// Silver batches for `date`, in name order
    pub fn silver_batches_for(&self, date: NaiveDate) -> Result<Vec<PathBuf>> {
        let prefix = date.to_string();
        Ok(list_parquet(&self.silver_dir())?
            .into_iter()
            .filter(|p| {
                file_stem(p)
                    .map(|stem| stem == prefix || stem.starts_with(&format!("{}_", prefix)))
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Every silver batch, in name order
    pub fn all_silver_batches(&self) -> Result<Vec<PathBuf>> {
        list_parquet(&self.silver_dir())
    }

    /// Daily gold files (`YYYY-MM-DD.parquet`), oldest first
    pub fn daily_gold_files(&self) -> Result<Vec<PathBuf>> {
        Ok(list_parquet(&self.gold_dir())?
            .into_iter()
            .filter(|p| {
                file_stem(p)
                    .map(|stem| NaiveDate::parse_from_str(stem, "%Y-%m-%d").is_ok())
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Raw snapshots (`*.json` directly under `raw/`), in name order
    pub fn raw_snapshots(&self) -> Result<Vec<PathBuf>> {
        list_with_extension(&self.raw_dir(), "json")
    }
}

fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

fn list_parquet(dir: &Path) -> Result<Vec<PathBuf>> {
    list_with_extension(dir, PARQUET_EXT)
}

fn list_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(ext) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_paths() {
        let layout = DataLayout::new("/srv/rates");
        assert_eq!(
            layout.gold_path(date(2024, 1, 2)),
            PathBuf::from("/srv/rates/gold/2024-01-02.parquet")
        );
        assert_eq!(
            layout.reject_path("2024-01-02"),
            PathBuf::from("/srv/rates/raw/rejects/2024-01-02_rejects.json")
        );
        assert_eq!(
            layout.insights_path(date(2024, 1, 2)),
            PathBuf::from("/srv/rates/gold/2024-01-02-insights.json")
        );
    }

    #[test]
    fn test_silver_batches_match_date_prefix_only() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_dirs().unwrap();
        for name in [
            "2024-01-01.parquet",
            "2024-01-01_093000.parquet",
            "2024-01-011.parquet",
            "2024-01-02.parquet",
            "2024-01-01.parquet.tmp",
        ] {
            fs::write(layout.silver_dir().join(name), b"").unwrap();
        }

        let batches = layout.silver_batches_for(date(2024, 1, 1)).unwrap();
        let names: Vec<_> = batches
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["2024-01-01.parquet", "2024-01-01_093000.parquet"]);
    }

    #[test]
    fn test_daily_gold_files_skip_cumulative() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.ensure_dirs().unwrap();
        fs::write(layout.gold_path(date(2024, 1, 1)), b"").unwrap();
        fs::write(layout.cumulative_gold_path(), b"").unwrap();
        fs::write(layout.insights_path(date(2024, 1, 1)), b"{}").unwrap();

        assert_eq!(
            layout.daily_gold_files().unwrap(),
            vec![layout.gold_path(date(2024, 1, 1))]
        );
    }

    #[test]
    fn test_missing_dirs_list_empty() {
        let layout = DataLayout::new("/nonexistent/rates");
        assert!(layout.all_silver_batches().unwrap().is_empty());
    }
}
