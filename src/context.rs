//! Run context threaded through every stage
//!
//! Each stage receives a [`RunContext`] instead of reaching for a global
//! logger, so log lines and provenance always name the run that produced them.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use std::fmt;

/// Identity of one pipeline invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub run_id: String,
    pub service_name: String,
    pub run_timestamp: DateTime<Utc>,
}

impl RunContext {
    /// Create a context for a run starting now
    pub fn new(service_name: &str) -> Self {
        Self::at(service_name, Utc::now())
    }

    /// Create a context for a run starting at `run_timestamp`
    pub fn at(service_name: &str, run_timestamp: DateTime<Utc>) -> Self {
        Self {
            run_id: run_timestamp.format("%Y%m%d_%H%M%S").to_string(),
            service_name: service_name.to_string(),
            run_timestamp,
        }
    }

    /// Same run, different stage
    pub fn for_service(&self, service_name: &str) -> Self {
        Self {
            run_id: self.run_id.clone(),
            service_name: service_name.to_string(),
            run_timestamp: self.run_timestamp,
        }
    }

    /// UTC date the run started on
    pub fn run_date(&self) -> NaiveDate {
        self.run_timestamp.date_naive()
    }

    /// Run timestamp as an ISO-8601 string
    pub fn timestamp_iso(&self) -> String {
        self.run_timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl fmt::Display for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run={} service={}", self.run_id, self.service_name)
    }
}
