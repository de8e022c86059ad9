//! Persisted narrative summary for a run

use super::Narrative;
use crate::context::RunContext;
use crate::error::Result;
use crate::metrics::MetricsRecord;
use crate::storage::{write_json_atomically, DataLayout};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Contents of `gold/{date}-insights.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    pub date: NaiveDate,
    pub run_id: String,
    pub degraded: bool,
    pub narrative: Option<String>,
    pub top_movers: Vec<MetricsRecord>,
}

impl Insights {
    pub fn new(ctx: &RunContext, date: NaiveDate, narrative: &Narrative, top_movers: &[MetricsRecord]) -> Self {
        Self {
            date,
            run_id: ctx.run_id.clone(),
            degraded: narrative.is_degraded(),
            narrative: narrative.text().map(str::to_string),
            top_movers: top_movers.to_vec(),
        }
    }
}

/// Write `insights` next to the gold dataset for its date
pub fn save_insights(layout: &DataLayout, insights: &Insights) -> Result<PathBuf> {
    let path = layout.insights_path(insights.date);
    write_json_atomically(&path, insights)?;
    Ok(path)
}

/// Read an insights file
pub fn load_insights(path: &Path) -> Result<Insights> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}
