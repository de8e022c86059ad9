//! reqwest-backed transport for the rate quote API

use super::{FetchError, HttpReply, QuoteTransport};
use crate::error::{PipelineError, Result};
use reqwest::Client;
use std::time::Duration;

/// HTTP transport; the client timeout bounds every attempt
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl QuoteTransport for HttpTransport {
    async fn get(&self, url: &str) -> std::result::Result<HttpReply, FetchError> {
        // reqwest errors embed the URL, which carries the API key
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.without_url().to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.without_url().to_string()))?;

        Ok(HttpReply { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_creation() {
        assert!(HttpTransport::new(Duration::from_secs(10)).is_ok());
    }
}
