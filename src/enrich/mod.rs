//! Enrichment gateway: top movers → narrative text
//!
//! The text generator is an external service. Only a bounded, rounded
//! [`MetricsPayload`] ever reaches it, every prompt is audited before it is
//! sent, and persistent failure degrades the narrative instead of failing
//! the run.

pub mod audit;
pub mod chat;
pub mod insights;

pub use audit::{prompt_hash, AuditEntry, AuditLog};
pub use chat::ChatCompletionsGenerator;
pub use insights::{load_insights, save_insights, Insights};

use crate::config::{EnrichmentConfig, EnrichmentMode};
use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::metrics::MetricsRecord;
use crate::retry::RetryPolicy;
use crate::types::{is_currency_code, round_to};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Most records a payload may carry
pub const MAX_PAYLOAD_RECORDS: usize = 5;

/// Decimal places kept for payload values
pub const PAYLOAD_DECIMALS: i32 = 4;

pub const DEFAULT_INSTRUCTION: &str = "You are a financial analyst. Using the aggregated exchange-rate \
metrics below, write a short business-oriented executive summary (3 sentences), 3 actionable \
insights and an alert for any currency with unusually high volatility. Compare against last month \
and quote percentages.";

/// Validated, bounded input for the text generator
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsPayload {
    records: Vec<MetricsRecord>,
}

impl MetricsPayload {
    pub fn new(records: Vec<MetricsRecord>) -> Result<Self> {
        if records.len() > MAX_PAYLOAD_RECORDS {
            return Err(PipelineError::SchemaError(format!(
                "metrics payload holds {} records, at most {} allowed",
                records.len(),
                MAX_PAYLOAD_RECORDS
            )));
        }

        let records = records
            .into_iter()
            .map(|r| {
                if !is_currency_code(&r.target_currency) {
                    return Err(PipelineError::SchemaError(format!(
                        "invalid currency code in metrics payload: {}",
                        r.target_currency
                    )));
                }
                let values = [r.current_price, r.pct_change, r.volatility];
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(PipelineError::SchemaError(format!(
                        "non-finite metric for {}",
                        r.target_currency
                    )));
                }
                Ok(MetricsRecord {
                    current_price: round_to(r.current_price, PAYLOAD_DECIMALS),
                    pct_change: round_to(r.pct_change, PAYLOAD_DECIMALS),
                    volatility: round_to(r.volatility, PAYLOAD_DECIMALS),
                    target_currency: r.target_currency,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { records })
    }

    pub fn records(&self) -> &[MetricsRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Compact JSON array of the records
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.records)?)
    }

    pub fn currencies(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.target_currency.as_str()).collect()
    }
}

/// Instruction followed by the payload as the only data
pub fn build_prompt(instruction: &str, payload: &MetricsPayload) -> Result<String> {
    Ok(format!("{}\n\nData (JSON): {}", instruction.trim(), payload.to_json()?))
}

/// Failure of a single generation attempt
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Service returned HTTP {0}")]
    Status(u16),

    #[error("Empty response")]
    Empty,

    #[error("Audit log unavailable: {0}")]
    Audit(String),
}

/// Opaque text-generation service
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> impl Future<Output = std::result::Result<String, GenerationError>> + Send;

    fn name(&self) -> &str;
}

/// Canned narrative for development runs
#[derive(Debug, Clone, Default)]
pub struct SimulatedGenerator;

impl SimulatedGenerator {
    pub const TEXT: &'static str = "Simulated executive summary: \
1) currency X rose 2% against last month; \
2) currency Y showed high volatility; \
3) watch currency Z for a downward trend.";
}

impl TextGenerator for SimulatedGenerator {
    async fn generate(&self, _prompt: &str) -> std::result::Result<String, GenerationError> {
        Ok(Self::TEXT.to_string())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

/// Generator chosen from configuration at runtime
pub enum ConfiguredGenerator {
    Simulated(SimulatedGenerator),
    Chat(ChatCompletionsGenerator),
}

impl ConfiguredGenerator {
    pub fn from_config(config: &EnrichmentConfig) -> Result<Self> {
        Ok(match config.mode {
            EnrichmentMode::Simulated => Self::Simulated(SimulatedGenerator),
            EnrichmentMode::Chat => Self::Chat(ChatCompletionsGenerator::from_config(config)?),
        })
    }
}

impl TextGenerator for ConfiguredGenerator {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, GenerationError> {
        match self {
            Self::Simulated(g) => g.generate(prompt).await,
            Self::Chat(g) => g.generate(prompt).await,
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Simulated(g) => g.name(),
            Self::Chat(g) => g.name(),
        }
    }
}

/// Outcome of an enrichment call
#[derive(Debug)]
pub enum Narrative {
    Generated(String),
    /// Holds [`PipelineError::EnrichmentDegraded`]
    Degraded(PipelineError),
}

impl Narrative {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Generated(text) => Some(text),
            Self::Degraded(_) => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

/// Retried, audited access to a [`TextGenerator`]
pub struct EnrichmentGateway<G: TextGenerator> {
    generator: G,
    audit: AuditLog,
    retry: RetryPolicy,
    instruction: String,
}

impl<G: TextGenerator> EnrichmentGateway<G> {
    pub fn new(generator: G, audit: AuditLog) -> Self {
        Self {
            generator,
            audit,
            retry: RetryPolicy::enrichment(),
            instruction: DEFAULT_INSTRUCTION.to_string(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_instruction(mut self, instruction: &str) -> Self {
        self.instruction = instruction.to_string();
        self
    }

    /// Attempt ceiling and instruction from config, backoff from the
    /// enrichment defaults
    pub fn with_config(self, config: &EnrichmentConfig) -> Self {
        let gateway = self.with_retry(RetryPolicy::new(
            config.max_attempts,
            Duration::from_secs(2),
            Duration::from_secs(10),
        ));
        match config.instruction.as_deref().map(str::trim) {
            Some(instruction) if !instruction.is_empty() => gateway.with_instruction(instruction),
            _ => gateway,
        }
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Generate a narrative for `payload`. Never fails the run.
    pub async fn enrich(&self, ctx: &RunContext, payload: &MetricsPayload) -> Narrative {
        let prompt = match build_prompt(&self.instruction, payload) {
            Ok(prompt) => prompt,
            Err(e) => {
                return self.degrade(ctx, PipelineError::EnrichmentDegraded {
                    attempts: 0,
                    reason: e.to_string(),
                })
            }
        };
        let prompt = prompt.as_str();

        let label = format!("{} enrichment via {}", ctx, self.generator.name());
        match self.retry.run(&label, |_| self.attempt(ctx, prompt)).await {
            Ok(text) => {
                log::info!(
                    "{}: enrichment ok for {:?} ({} chars)",
                    ctx,
                    payload.currencies(),
                    text.len()
                );
                Narrative::Generated(text)
            }
            Err(exhausted) => self.degrade(
                ctx,
                PipelineError::EnrichmentDegraded {
                    attempts: exhausted.attempts,
                    reason: exhausted.last_error.to_string(),
                },
            ),
        }
    }

    async fn attempt(&self, ctx: &RunContext, prompt: &str) -> std::result::Result<String, GenerationError> {
        // no audit entry, no request
        self.audit
            .record(ctx, prompt)
            .map_err(|e| GenerationError::Audit(e.to_string()))?;

        let text = self.generator.generate(prompt).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(text.to_string())
    }

    fn degrade(&self, ctx: &RunContext, error: PipelineError) -> Narrative {
        log::warn!("{}: {}", ctx, error);
        Narrative::Degraded(error)
    }
}
