//! Rate source: fetch exchange-rate snapshots into the raw layer
//!
//! One GET per attempt against `{base_url}/{api_key}/latest/{base}`.
//! Non-200 replies, transport failures and bodies without a
//! `conversion_rates` object are retried under the configured
//! [`RetryPolicy`]; exhaustion surfaces as
//! [`PipelineError::SourceUnavailable`] and nothing is written.

pub mod http;

pub use http::HttpTransport;

use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;
use crate::storage::{write_json_atomically, DataLayout};
use crate::types::{SnapshotHandle, SnapshotMetadata};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;

const METADATA_KEY: &str = "_metadata";
const RATES_KEY: &str = "conversion_rates";

/// Raw HTTP reply
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// Why a single fetch attempt failed
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("unparseable response body: {0}")]
    Body(String),
}

/// Issues GET requests for the rate source
pub trait QuoteTransport: Send + Sync {
    fn get(&self, url: &str)
        -> impl Future<Output = std::result::Result<HttpReply, FetchError>> + Send;
}

/// Fetches snapshots and persists them into the raw layer
pub struct RateSource<T: QuoteTransport = HttpTransport> {
    transport: T,
    base_url: String,
    api_key: String,
    raw_dir: PathBuf,
    retry: RetryPolicy,
}

impl RateSource<HttpTransport> {
    /// Build the production source from configuration
    pub fn from_config(config: &PipelineConfig, layout: &DataLayout) -> Result<Self> {
        let transport = HttpTransport::new(config.source_timeout())?;
        Ok(Self::new(
            transport,
            &config.source.base_url,
            &config.source.api_key,
            layout.raw_dir(),
            config.retry.policy(),
        ))
    }
}

impl<T: QuoteTransport> RateSource<T> {
    pub fn new(
        transport: T,
        base_url: &str,
        api_key: &str,
        raw_dir: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            raw_dir: raw_dir.into(),
            retry,
        }
    }

    /// Quote endpoint for `base_currency`
    pub fn endpoint(&self, base_currency: &str) -> String {
        format!("{}/{}/latest/{}", self.base_url, self.api_key, base_currency)
    }

    /// Fetch one snapshot for `base_currency` and persist it atomically
    pub async fn fetch(&self, ctx: &RunContext, base_currency: &str) -> Result<SnapshotHandle> {
        let url = self.endpoint(base_currency);
        let label = format!("{} fetch {}", ctx, base_currency);

        let (status, body) = self
            .retry
            .run(&label, |_| self.request_once(&url))
            .await
            .map_err(|e| PipelineError::SourceUnavailable {
                attempts: e.attempts,
                last_error: e.last_error.to_string(),
            })?;

        let captured = Utc::now();
        let metadata = SnapshotMetadata {
            timestamp: captured.to_rfc3339_opts(SecondsFormat::Micros, true),
            status_code: status,
            url: self.redact(&url),
        };
        let handle = self.persist(body, metadata, captured)?;

        log::info!(
            "{}: snapshot with {} rates written to {}",
            ctx,
            handle.rate_count,
            handle.path.display()
        );
        Ok(handle)
    }

    async fn request_once(
        &self,
        url: &str,
    ) -> std::result::Result<(u16, Map<String, Value>), FetchError> {
        let reply = self.transport.get(url).await?;
        if reply.status != 200 {
            return Err(FetchError::Status(reply.status));
        }

        let body: Value =
            serde_json::from_str(&reply.body).map_err(|e| FetchError::Body(e.to_string()))?;
        match body {
            Value::Object(map) if map.get(RATES_KEY).map_or(false, Value::is_object) => {
                Ok((reply.status, map))
            }
            Value::Object(_) => Err(FetchError::Body(format!("missing '{}' object", RATES_KEY))),
            _ => Err(FetchError::Body("expected a JSON object".to_string())),
        }
    }

    fn persist(
        &self,
        mut body: Map<String, Value>,
        metadata: SnapshotMetadata,
        captured: DateTime<Utc>,
    ) -> Result<SnapshotHandle> {
        let rate_count = body
            .get(RATES_KEY)
            .and_then(Value::as_object)
            .map_or(0, Map::len);
        let base_currency = body
            .get("base_code")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let captured_at = metadata.timestamp.clone();

        body.insert(METADATA_KEY.to_string(), serde_json::to_value(&metadata)?);

        let path = snapshot_path(&self.raw_dir, captured);
        write_json_atomically(&path, &Value::Object(body))?;

        Ok(SnapshotHandle {
            path,
            base_currency,
            captured_at,
            rate_count,
        })
    }

    fn redact(&self, url: &str) -> String {
        if self.api_key.is_empty() {
            url.to_string()
        } else {
            url.replace(&self.api_key, "***")
        }
    }
}

/// Path for a snapshot captured at `captured`.
///
/// The first snapshot of a UTC day is `YYYY-MM-DD.json`; later ones get a
/// `_HHMMSS` suffix, then a counter. Existing snapshots are never reused.
pub fn snapshot_path(raw_dir: &Path, captured: DateTime<Utc>) -> PathBuf {
    let daily = raw_dir.join(format!("{}.json", captured.format("%Y-%m-%d")));
    if !daily.exists() {
        return daily;
    }

    let stem = captured.format("%Y-%m-%d_%H%M%S").to_string();
    let mut candidate = raw_dir.join(format!("{}.json", stem));
    let mut n = 1;
    while candidate.exists() {
        candidate = raw_dir.join(format!("{}_{}.json", stem, n));
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct ScriptedTransport {
        replies: Mutex<VecDeque<std::result::Result<HttpReply, FetchError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<std::result::Result<HttpReply, FetchError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl QuoteTransport for ScriptedTransport {
        async fn get(&self, _url: &str) -> std::result::Result<HttpReply, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(FetchError::Transport("script exhausted".to_string())))
        }
    }

    fn ok(body: &str) -> std::result::Result<HttpReply, FetchError> {
        Ok(HttpReply {
            status: 200,
            body: body.to_string(),
        })
    }

    fn status(code: u16) -> std::result::Result<HttpReply, FetchError> {
        Ok(HttpReply {
            status: code,
            body: String::new(),
        })
    }

    const BODY: &str = r#"{"result":"success","base_code":"USD","conversion_rates":{"USD":1,"EUR":0.9}}"#;

    #[test]
    fn test_endpoint_format() {
        let source = RateSource::new(
            ScriptedTransport::new(vec![]),
            "https://v6.example.com/v6/",
            "KEY",
            "/tmp",
            RetryPolicy::immediate(1),
        );
        assert_eq!(
            source.endpoint("USD"),
            "https://v6.example.com/v6/KEY/latest/USD"
        );
    }

    #[tokio::test]
    async fn test_fetch_persists_snapshot_with_metadata() {
        let dir = tempdir().unwrap();
        let source = RateSource::new(
            ScriptedTransport::new(vec![ok(BODY)]),
            "https://v6.example.com/v6",
            "KEY",
            dir.path(),
            RetryPolicy::immediate(5),
        );
        let ctx = RunContext::new("ingest");

        let handle = source.fetch(&ctx, "USD").await.unwrap();

        assert_eq!(handle.base_currency, "USD");
        assert_eq!(handle.rate_count, 2);
        let stored: Value = serde_json::from_str(&fs::read_to_string(&handle.path).unwrap()).unwrap();
        assert_eq!(stored["conversion_rates"]["EUR"], 0.9);
        assert_eq!(stored["_metadata"]["status_code"], 200);
        assert_eq!(
            stored["_metadata"]["url"],
            "https://v6.example.com/v6/***/latest/USD"
        );
        assert!(!crate::storage::tmp_path(&handle.path).exists());
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![
            status(503),
            Err(FetchError::Transport("connection reset".to_string())),
            ok("not json"),
            ok(BODY),
        ]);
        let source = RateSource::new(transport, "http://x", "k", dir.path(), RetryPolicy::immediate(5));

        let handle = source.fetch(&RunContext::new("ingest"), "USD").await.unwrap();

        assert!(handle.path.exists());
        assert_eq!(source.transport.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_into_source_unavailable() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new((0..5).map(|_| status(500)).collect());
        let source = RateSource::new(transport, "http://x", "k", dir.path(), RetryPolicy::immediate(5));

        let err = source.fetch(&RunContext::new("ingest"), "USD").await.unwrap_err();

        match err {
            PipelineError::SourceUnavailable { attempts, last_error } => {
                assert_eq!(attempts, 5);
                assert!(last_error.contains("500"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(source.transport.calls.load(Ordering::SeqCst), 5);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_body_without_rates_is_retried() {
        let dir = tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![
            ok(r#"{"result":"error","error-type":"invalid-key"}"#),
            ok(r#"{"conversion_rates":[1,2]}"#),
        ]);
        let source = RateSource::new(transport, "http://x", "k", dir.path(), RetryPolicy::immediate(2));

        let err = source.fetch(&RunContext::new("ingest"), "USD").await.unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable { attempts: 2, .. }));
    }

    #[test]
    fn test_snapshot_path_never_overwrites() {
        let dir = tempdir().unwrap();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap();

        let first = snapshot_path(dir.path(), t);
        assert_eq!(first, dir.path().join("2024-01-01.json"));
        fs::write(&first, "{}").unwrap();

        let second = snapshot_path(dir.path(), t);
        assert_eq!(second, dir.path().join("2024-01-01_093000.json"));
        fs::write(&second, "{}").unwrap();

        let third = snapshot_path(dir.path(), t);
        assert_eq!(third, dir.path().join("2024-01-01_093000_1.json"));
    }
}
