//! Relational mirror of the gold layer (SQLite)
//!
//! Each date is replaced as one unit of work: begin, delete the date's
//! rows, bulk insert, commit. A failure anywhere rolls the whole day back,
//! so readers see either the old rows or the new ones.

use crate::error::Result;
use crate::types::GoldRecord;
use chrono::NaiveDate;

/// Destination that holds a per-date copy of the gold dataset
pub trait RelationalSink {
    /// Replace every row for `date` with `rows`, returning the rows written
    fn replace_date(&mut self, date: NaiveDate, rows: &[GoldRecord]) -> Result<usize>;

    /// Human-readable identity for logs
    fn describe(&self) -> String;
}

#[cfg(feature = "rusqlite-support")]
pub use sqlite::SqliteMirror;

#[cfg(feature = "rusqlite-support")]
mod sqlite {
    use super::RelationalSink;
    use crate::error::{PipelineError, Result};
    use crate::types::{GoldRecord, Provenance, RateRecord};
    use chrono::NaiveDate;
    use rusqlite::{params, Connection};
    use std::path::{Path, PathBuf};

    pub const TABLE: &str = "exchange_rates";

    /// `exchange_rates` table in a SQLite database
    pub struct SqliteMirror {
        conn: Connection,
        location: Option<PathBuf>,
    }

    impl SqliteMirror {
        /// Create or open the database at `db_path`
        pub fn open(db_path: &Path) -> Result<Self> {
            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let conn = Connection::open(db_path)?;
            let mut mirror = Self {
                conn,
                location: Some(db_path.to_path_buf()),
            };
            mirror.create_tables()?;
            Ok(mirror)
        }

        /// Create in-memory database (for testing)
        pub fn open_in_memory() -> Result<Self> {
            let conn = Connection::open_in_memory()?;
            let mut mirror = Self {
                conn,
                location: None,
            };
            mirror.create_tables()?;
            Ok(mirror)
        }

        fn create_tables(&mut self) -> Result<()> {
            self.conn.execute(
                "CREATE TABLE IF NOT EXISTS exchange_rates (
                    date TEXT NOT NULL,
                    base_currency TEXT NOT NULL,
                    target_currency TEXT NOT NULL,
                    rate REAL NOT NULL CHECK (rate > 0),
                    retrieved_at TEXT NOT NULL,
                    pipeline_version TEXT NOT NULL,
                    run_id TEXT NOT NULL,
                    run_timestamp TEXT NOT NULL,
                    PRIMARY KEY (date, base_currency, target_currency)
                )",
                [],
            )?;
            Ok(())
        }

        /// Rows stored for `date`, ordered by key
        pub fn rows_for_date(&self, date: NaiveDate) -> Result<Vec<GoldRecord>> {
            let mut stmt = self.conn.prepare(
                "SELECT base_currency, target_currency, rate, retrieved_at,
                        pipeline_version, run_id, run_timestamp
                 FROM exchange_rates WHERE date = ?1
                 ORDER BY base_currency, target_currency",
            )?;

            let rows = stmt
                .query_map(params![date.to_string()], |row| {
                    Ok(GoldRecord {
                        record: RateRecord {
                            base_currency: row.get(0)?,
                            target_currency: row.get(1)?,
                            rate: row.get(2)?,
                            retrieved_at: row.get(3)?,
                            date,
                        },
                        provenance: Provenance {
                            pipeline_version: row.get(4)?,
                            run_id: row.get(5)?,
                            run_timestamp: row.get(6)?,
                        },
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        }

        /// Total rows in the table
        pub fn count(&self) -> Result<usize> {
            let count: i64 =
                self.conn
                    .query_row("SELECT COUNT(*) FROM exchange_rates", [], |row| row.get(0))?;
            Ok(count as usize)
        }
    }

    impl RelationalSink for SqliteMirror {
        fn replace_date(&mut self, date: NaiveDate, rows: &[GoldRecord]) -> Result<usize> {
            let day = date.to_string();
            // Dropping `tx` without commit rolls back
            let tx = self.conn.transaction()?;
            tx.execute("DELETE FROM exchange_rates WHERE date = ?1", params![day])?;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO exchange_rates (date, base_currency, target_currency, rate,
                         retrieved_at, pipeline_version, run_id, run_timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for row in rows {
                    if row.record.date != date {
                        return Err(PipelineError::sink(
                            TABLE,
                            format!("row for {} in batch for {}", row.record.date, date),
                        ));
                    }
                    insert.execute(params![
                        day,
                        row.record.base_currency,
                        row.record.target_currency,
                        row.record.rate,
                        row.record.retrieved_at,
                        row.provenance.pipeline_version,
                        row.provenance.run_id,
                        row.provenance.run_timestamp,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(rows.len())
        }

        fn describe(&self) -> String {
            match &self.location {
                Some(path) => format!("sqlite:{}#{}", path.display(), TABLE),
                None => format!("sqlite::memory:#{}", TABLE),
            }
        }
    }

}
