//! End-to-end tests for the rate pipeline
//!
//! The rate API is replaced by a scripted transport and enrichment runs
//! against the simulated generator, so every run is local and fast.

#![cfg(feature = "rusqlite-support")]

use rusty_rates::aggregate::Aggregator;
use rusty_rates::context::RunContext;
use rusty_rates::enrich::{load_insights, AuditLog, EnrichmentGateway, SimulatedGenerator};
use rusty_rates::error::PipelineError;
use rusty_rates::ingest::{FetchError, HttpReply, QuoteTransport, RateSource};
use rusty_rates::mirror::SqliteMirror;
use rusty_rates::pipeline::Pipeline;
use rusty_rates::retry::RetryPolicy;
use rusty_rates::storage::{columnar, DataLayout};
use rusty_rates::types::RejectRecord;
use rusty_rates::validate::validate_gold_file;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tempfile::tempdir;

const BODY: &str = r#"{
    "result": "success",
    "base_code": "USD",
    "conversion_rates": {"USD": 1, "EUR": 0.9, "GBP": 0.78, "JPY": null, "XXX": -1.0}
}"#;

struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<HttpReply, FetchError>>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<Result<HttpReply, FetchError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }

    fn always(status: u16, body: &str, times: usize) -> Self {
        Self::new(
            (0..times)
                .map(|_| {
                    Ok(HttpReply {
                        status,
                        body: body.to_string(),
                    })
                })
                .collect(),
        )
    }
}

impl QuoteTransport for ScriptedTransport {
    async fn get(&self, _url: &str) -> Result<HttpReply, FetchError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(FetchError::Transport("script exhausted".to_string())))
    }
}

fn pipeline(
    root: &Path,
    transport: ScriptedTransport,
    db_path: Option<&Path>,
) -> Pipeline<ScriptedTransport, SimulatedGenerator> {
    let layout = DataLayout::new(root.join("data"));
    let source = RateSource::new(
        transport,
        "https://rates.example.com/v6",
        "SECRET",
        layout.raw_dir(),
        RetryPolicy::immediate(5),
    );
    let mut aggregator = Aggregator::new(layout.clone(), "1.0");
    if let Some(db) = db_path {
        aggregator = aggregator.with_mirror(
            Box::new(SqliteMirror::open(db).unwrap()),
            RetryPolicy::immediate(1),
        );
    }
    let gateway = EnrichmentGateway::new(SimulatedGenerator, AuditLog::in_dir(&root.join("logs")))
        .with_retry(RetryPolicy::immediate(3));

    Pipeline::new(layout, "USD", source, aggregator, gateway)
}

#[tokio::test]
async fn test_full_run_produces_every_layer() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("rates.db");
    let mut pipeline = pipeline(dir.path(), ScriptedTransport::always(200, BODY, 1), Some(&db));

    let summary = pipeline.run(&RunContext::new("pipeline")).await.unwrap();

    // Raw snapshot keeps the body and carries redacted metadata
    let raw = fs::read_to_string(&summary.snapshot.path).unwrap();
    assert!(raw.contains("\"_metadata\""));
    assert!(!raw.contains("SECRET"));

    // Silver holds only valid, positive rates
    let silver = columnar::read_silver(&summary.transform.silver_path).unwrap();
    let codes: Vec<_> = silver.iter().map(|r| r.target_currency.as_str()).collect();
    assert_eq!(codes, vec!["EUR", "GBP", "USD"]);
    assert!(silver.iter().all(|r| r.rate > 0.0));

    // JPY (null) and XXX (negative) are quarantined, not dropped
    let reject_path = summary.transform.reject_path.clone().unwrap();
    let rejects: Vec<RejectRecord> =
        serde_json::from_str(&fs::read_to_string(reject_path).unwrap()).unwrap();
    let rejected: Vec<_> = rejects.iter().map(|r| r.target_currency.as_str()).collect();
    assert_eq!(rejected, vec!["JPY", "XXX"]);
    assert_eq!(rejects[0].reason, "rate is null");
    assert!(rejected.iter().all(|code| !codes.contains(code)));

    // Gold is valid and mirrored
    let gold_path = summary.gold_path.clone().unwrap();
    assert!(validate_gold_file(&gold_path).unwrap().is_valid());
    let mirror = SqliteMirror::open(&db).unwrap();
    assert_eq!(mirror.rows_for_date(summary.transform.date).unwrap().len(), 3);

    // Narrative and audit trail
    assert!(!summary.narrative.is_degraded());
    let insights = load_insights(&summary.insights_path).unwrap();
    assert_eq!(insights.run_id, summary.run_id);
    assert!(!insights.degraded);
    assert_eq!(insights.top_movers.len(), 3);
    let audit = AuditLog::in_dir(&dir.path().join("logs")).entries().unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].run_id, summary.run_id);
}

#[tokio::test]
async fn test_source_outage_writes_nothing() {
    let dir = tempdir().unwrap();
    let transport = ScriptedTransport::always(500, "", 5);
    let mut pipeline = pipeline(dir.path(), transport, None);

    let err = pipeline.run(&RunContext::new("pipeline")).await.unwrap_err();

    assert!(matches!(err, PipelineError::SourceUnavailable { attempts: 5, .. }));
    assert!(err.is_fatal());
    assert!(pipeline.layout().raw_snapshots().unwrap().is_empty());
    assert!(pipeline.layout().all_silver_batches().unwrap().is_empty());
}

#[tokio::test]
async fn test_recovers_from_transient_errors() {
    let dir = tempdir().unwrap();
    let transport = ScriptedTransport::new(vec![
        Err(FetchError::Transport("connection reset".to_string())),
        Ok(HttpReply {
            status: 503,
            body: String::new(),
        }),
        Ok(HttpReply {
            status: 200,
            body: BODY.to_string(),
        }),
    ]);
    let mut pipeline = pipeline(dir.path(), transport, None);

    let summary = pipeline.run(&RunContext::new("pipeline")).await.unwrap();
    assert_eq!(summary.transform.accepted, 3);
}

#[tokio::test]
async fn test_second_run_same_day_does_not_duplicate() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("rates.db");
    let mut pipeline = pipeline(dir.path(), ScriptedTransport::always(200, BODY, 2), Some(&db));

    let first = pipeline.run(&RunContext::new("pipeline")).await.unwrap();
    let second = pipeline.run(&RunContext::new("pipeline")).await.unwrap();

    // Two snapshots, two batches, one gold dataset
    assert_ne!(first.snapshot.path, second.snapshot.path);
    assert_eq!(pipeline.layout().raw_snapshots().unwrap().len(), 2);
    assert_eq!(pipeline.layout().all_silver_batches().unwrap().len(), 2);
    assert_eq!(first.gold_path, second.gold_path);

    let gold = columnar::read_gold(second.gold_path.as_ref().unwrap()).unwrap();
    assert_eq!(gold.len(), 3);
    assert!(validate_gold_file(second.gold_path.as_ref().unwrap())
        .unwrap()
        .is_valid());

    let mirror = SqliteMirror::open(&db).unwrap();
    assert_eq!(mirror.count().unwrap(), 3);
}

#[tokio::test]
async fn test_malformed_body_is_retried_then_fails() {
    let dir = tempdir().unwrap();
    let transport = ScriptedTransport::always(200, r#"{"result":"error"}"#, 5);
    let mut pipeline = pipeline(dir.path(), transport, None);

    let err = pipeline.run(&RunContext::new("pipeline")).await.unwrap_err();
    assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
}
