//! End-to-end run: fetch → transform → aggregate → metrics → enrichment
//!
//! Stages execute strictly in order. Stage errors abort the run with their
//! cause intact; a degraded narrative does not.

use crate::aggregate::Aggregator;
use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::enrich::{
    save_insights, AuditLog, ConfiguredGenerator, EnrichmentGateway, Insights, MetricsPayload,
    Narrative, TextGenerator, MAX_PAYLOAD_RECORDS,
};
use crate::error::{PipelineError, Result};
use crate::ingest::{HttpTransport, QuoteTransport, RateSource};
use crate::metrics::{MetricsEngine, MetricsRecord};
use crate::storage::DataLayout;
use crate::transform::{TransformOutcome, Transformer};
use crate::types::SnapshotHandle;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// What a successful run produced
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub snapshot: SnapshotHandle,
    pub transform: TransformOutcome,
    pub gold_path: Option<PathBuf>,
    pub top_movers: Vec<MetricsRecord>,
    pub narrative: Narrative,
    pub insights_path: PathBuf,
    pub elapsed: Duration,
}

/// Build the aggregator described by `config`, with its relational mirror
/// when one is configured
pub fn aggregator_from_config(config: &PipelineConfig, layout: &DataLayout) -> Result<Aggregator> {
    let aggregator = Aggregator::new(layout.clone(), &config.pipeline_version);

    #[cfg(feature = "rusqlite-support")]
    if let Some(db_path) = &config.mirror.db_path {
        let mirror = crate::mirror::SqliteMirror::open(db_path)?;
        return Ok(aggregator.with_mirror(Box::new(mirror), config.mirror.retry_policy()));
    }

    #[cfg(not(feature = "rusqlite-support"))]
    if config.mirror.db_path.is_some() {
        return Err(PipelineError::ConfigError(
            "relational mirror configured but built without rusqlite-support".to_string(),
        ));
    }

    Ok(aggregator)
}

/// One configured pipeline
pub struct Pipeline<T: QuoteTransport, G: TextGenerator> {
    layout: DataLayout,
    base_currency: String,
    source: RateSource<T>,
    transformer: Transformer,
    aggregator: Aggregator,
    metrics: MetricsEngine,
    gateway: EnrichmentGateway<G>,
}

impl Pipeline<HttpTransport, ConfiguredGenerator> {
    /// Production pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let layout = DataLayout::new(&config.storage.data_dir);

        let generator = ConfiguredGenerator::from_config(&config.enrichment)?;
        let gateway = EnrichmentGateway::new(generator, AuditLog::in_dir(&config.storage.logs_dir))
            .with_config(&config.enrichment);

        let source = RateSource::from_config(config, &layout)?;
        let aggregator = aggregator_from_config(config, &layout)?;
        Ok(Self::new(layout, &config.source.base_currency, source, aggregator, gateway)
            .with_metrics(MetricsEngine::new(config.metrics.window, config.metrics.top_n)))
    }
}

impl<T: QuoteTransport, G: TextGenerator> Pipeline<T, G> {
    pub fn new(
        layout: DataLayout,
        base_currency: &str,
        source: RateSource<T>,
        aggregator: Aggregator,
        gateway: EnrichmentGateway<G>,
    ) -> Self {
        Self {
            transformer: Transformer::new(layout.clone(), base_currency),
            metrics: MetricsEngine::default(),
            base_currency: base_currency.to_string(),
            layout,
            source,
            aggregator,
            gateway,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsEngine) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Execute every stage once. Failures are logged and returned.
    pub async fn run(&mut self, ctx: &RunContext) -> Result<RunSummary> {
        let started = Instant::now();
        log::info!("{}: pipeline start (base {})", ctx, self.base_currency);

        match self.execute(ctx).await {
            Ok(mut summary) => {
                summary.elapsed = started.elapsed();
                log::info!(
                    "{}: pipeline finished in {:.2}s",
                    ctx,
                    summary.elapsed.as_secs_f64()
                );
                Ok(summary)
            }
            Err(e) => {
                log::error!(
                    "{}: pipeline failed after {:.2}s: {}",
                    ctx,
                    started.elapsed().as_secs_f64(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn execute(&mut self, ctx: &RunContext) -> Result<RunSummary> {
        self.layout.ensure_dirs()?;

        let snapshot = self
            .source
            .fetch(&ctx.for_service("ingest"), &self.base_currency)
            .await?;

        let transform = self
            .transformer
            .transform(&ctx.for_service("transform"), &snapshot.path)?;

        let load_ctx = ctx.for_service("load");
        let gold_path = self.aggregator.aggregate(&load_ctx, transform.date)?;

        let history: Vec<_> = self
            .aggregator
            .load_history()?
            .into_iter()
            .map(|g| g.record)
            .collect();
        let top_movers = self.metrics.compute_top_movers(&history);
        log::info!(
            "{}: {} top movers from {} gold rows",
            load_ctx,
            top_movers.len(),
            history.len()
        );

        let llm_ctx = ctx.for_service("llm");
        let narrative = self.narrate(&llm_ctx, &top_movers).await;

        let insights = Insights::new(ctx, transform.date, &narrative, &top_movers);
        let insights_path = save_insights(&self.layout, &insights)?;

        Ok(RunSummary {
            run_id: ctx.run_id.clone(),
            snapshot,
            transform,
            gold_path,
            top_movers,
            narrative,
            insights_path,
            elapsed: Duration::ZERO,
        })
    }

    async fn narrate(&self, ctx: &RunContext, movers: &[MetricsRecord]) -> Narrative {
        let bounded = movers.iter().take(MAX_PAYLOAD_RECORDS).cloned().collect();
        match MetricsPayload::new(bounded) {
            Ok(payload) => self.gateway.enrich(ctx, &payload).await,
            Err(e) => {
                let error = PipelineError::EnrichmentDegraded {
                    attempts: 0,
                    reason: e.to_string(),
                };
                log::warn!("{}: {}", ctx, error);
                Narrative::Degraded(error)
            }
        }
    }
}
