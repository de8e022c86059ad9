//! Append-only audit log of enrichment prompts

use crate::context::RunContext;
use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name used under the logs directory
pub const AUDIT_FILE: &str = "llm_prompts.log";

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub run_id: String,
    pub prompt_hash: String,
    pub prompt: String,
}

/// SHA-256 of `prompt`, hex encoded
pub fn prompt_hash(prompt: &str) -> String {
    hex::encode(Sha256::digest(prompt.as_bytes()))
}

/// JSON-lines audit log
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Audit log inside `logs_dir`
    pub fn in_dir(logs_dir: &Path) -> Self {
        Self::new(logs_dir.join(AUDIT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry for `prompt`
    pub fn record(&self, ctx: &RunContext, prompt: &str) -> Result<AuditEntry> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entry = AuditEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            run_id: ctx.run_id.clone(),
            prompt_hash: prompt_hash(prompt),
            prompt: prompt.to_string(),
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        log::debug!("{}: audited prompt {}", ctx, entry.prompt_hash);
        Ok(entry)
    }

    /// Every entry in the log, oldest first
    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        fs::read_to_string(&self.path)?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Into::into))
            .collect()
    }
}
