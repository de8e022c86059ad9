//! # Rusty-Rates
//!
//! A batch pipeline for currency exchange rates.
//!
//! Each run fetches one snapshot from a remote rate API, validates it into a
//! silver batch (bad records are quarantined, never dropped silently),
//! consolidates the day into a deduplicated gold dataset, optionally mirrored
//! into SQLite, and ranks the day's top movers for a narrative summary.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rusty_rates::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = PipelineConfig::load(None)?;
//!     let mut pipeline = Pipeline::from_config(&config)?;
//!     let summary = pipeline.run(&RunContext::new("pipeline")).await?;
//!     println!("{} movers", summary.top_movers.len());
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod context;
pub mod enrich;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod mirror;
pub mod pipeline;
pub mod retry;
pub mod storage;
pub mod transform;
pub mod types;
pub mod validate;

pub mod prelude {
    //! Commonly used types and traits
    pub use crate::aggregate::Aggregator;
    pub use crate::config::PipelineConfig;
    pub use crate::context::RunContext;
    pub use crate::enrich::{EnrichmentGateway, MetricsPayload, Narrative, TextGenerator};
    pub use crate::error::{PipelineError, Result};
    pub use crate::ingest::{QuoteTransport, RateSource};
    pub use crate::metrics::{MetricsEngine, MetricsRecord};
    pub use crate::pipeline::{Pipeline, RunSummary};
    pub use crate::retry::RetryPolicy;
    pub use crate::storage::DataLayout;
    pub use crate::transform::Transformer;
    pub use crate::types::*;
    pub use crate::validate::{validate_gold_file, SchemaReport};
}
