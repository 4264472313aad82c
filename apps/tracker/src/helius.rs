use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use schema::RawTransaction;
use std::time::Duration;
use thiserror::Error;

/// Transaction types requested from the indexing API.
pub const TRACKED_TYPES: [&str; 2] = ["TRANSFER", "SWAP"];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("http status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("undecodable response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Request URLs carry the API key, so they never reach the message.
    fn transport(e: reqwest::Error) -> Self {
        FetchError::Transport(e.without_url().to_string())
    }

    /// Transient failures are retried at the failure backoff; the rest end the
    /// wallet's monitor.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::Status { .. })
    }
}

/// Source of recent transactions for an address.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn recent_transactions(&self, address: &str) -> Result<Vec<RawTransaction>, FetchError>;
}

#[derive(Clone)]
pub struct HeliusClient {
    http: Client,
    base_url: String,
    api_key: String,
    limit: usize,
}

impl HeliusClient {
    pub fn new(base_url: &str, api_key: &str, limit: usize, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            limit,
        })
    }

    fn url_for(&self, address: &str) -> String {
        format!("{}/addresses/{}/transactions", self.base_url, address)
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut q = vec![
            ("api-key", self.api_key.clone()),
            ("limit", self.limit.to_string()),
        ];
        for t in TRACKED_TYPES {
            q.push(("types", t.to_string()));
        }
        q
    }
}

#[async_trait]
impl TransactionSource for HeliusClient {
    async fn recent_transactions(&self, address: &str) -> Result<Vec<RawTransaction>, FetchError> {
        let resp = self
            .http
            .get(self.url_for(address))
            .query(&self.query())
            .send()
            .await
            .map_err(FetchError::transport)?;

        let status = resp.status();
        if !status.is_success() {
            // usually 429/5xx; body is only for the log line
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(FetchError::transport)?;

        serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }
}
