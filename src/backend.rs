//! HTTP client for the asynchronous search backend.
//!
//! The backend contract is small: initiate a search, poll the cache endpoint
//! for materialized results, read the history feed. The trait seam exists so
//! the orchestrator can be exercised against an in-process fake.

use crate::model::{SearchConfig, SearchType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend has not materialized results for this reference yet
    /// (404 on the cache endpoint). A retry cause, not a failure.
    #[error("search {0} is not ready yet")]
    NotReady(String),
    #[error("backend reported an error: {0}")]
    Backend(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response shape: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncSearchRequest {
    pub query: String,
    pub page: u32,
    pub page_size: u32,
    pub search_type: SearchType,
    pub enable_llm: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AsyncSearchAccepted {
    pub search_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// One raw document record as the backend serializes it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub relevance_reason: Option<String>,
}

/// Materialized search payload from `GET /cache/{search_id}`.
///
/// The total arrives as `total_results` from the cache store and as `total`
/// from direct search responses; both spellings are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPayload {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub results: Vec<RawRecord>,
    #[serde(default)]
    pub total_results: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub search_type: Option<String>,
    #[serde(default)]
    pub rewritten_terms: Vec<String>,
    #[serde(default)]
    pub search_id: Option<String>,
}

impl SearchPayload {
    pub fn total_count(&self) -> u64 {
        self.total_results
            .or(self.total)
            .unwrap_or(self.results.len() as u64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryRecord {
    pub search_id: String,
    pub query: String,
    #[serde(default)]
    pub search_type: Option<String>,
    #[serde(default)]
    pub enable_llm: bool,
    #[serde(default)]
    pub total_results: Option<u64>,
    #[serde(default)]
    pub results_count: Option<u64>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
    #[serde(default)]
    pub count: u64,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Liveness flag only; any transport error reads as "not reachable".
    async fn health(&self) -> bool;

    async fn start_search(
        &self,
        request: &AsyncSearchRequest,
    ) -> Result<AsyncSearchAccepted, BackendError>;

    async fn fetch_results(&self, search_id: &str) -> Result<SearchPayload, BackendError>;

    async fn history(&self, limit: usize) -> Result<HistoryResponse, BackendError>;

    /// Opaque statistics object, passed through uninterpreted.
    async fn cache_stats(&self) -> Result<serde_json::Value, BackendError>;
}

pub struct HttpSearchBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSearchBackend {
    pub fn new(cfg: &SearchConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .user_agent(cfg.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, BackendError> {
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| BackendError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn health(&self) -> bool {
        match self.http.get(self.url("/health")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn start_search(
        &self,
        request: &AsyncSearchRequest,
    ) -> Result<AsyncSearchAccepted, BackendError> {
        let resp = self
            .http
            .post(self.url("/search/async"))
            .json(request)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(BackendError::Backend(format!(
                "search initiation returned {}",
                resp.status()
            )));
        }
        Self::decode(resp).await
    }

    async fn fetch_results(&self, search_id: &str) -> Result<SearchPayload, BackendError> {
        let url = self.url(&format!("/cache/{}", urlencoding::encode(search_id)));
        let resp = self.http.get(url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::NotReady(search_id.to_string()));
        }
        if !resp.status().is_success() {
            return Err(BackendError::Backend(format!(
                "result fetch returned {}",
                resp.status()
            )));
        }
        let mut payload: SearchPayload = Self::decode(resp).await?;
        if let Some(error) = payload.error.take() {
            return Err(BackendError::Backend(error));
        }
        Ok(payload)
    }

    async fn history(&self, limit: usize) -> Result<HistoryResponse, BackendError> {
        let resp = self
            .http
            .get(self.url("/search/history"))
            .query(&[("limit", limit)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(BackendError::Backend(format!(
                "history fetch returned {}",
                resp.status()
            )));
        }
        Self::decode(resp).await
    }

    async fn cache_stats(&self) -> Result<serde_json::Value, BackendError> {
        let resp = self.http.get(self.url("/cache/stats")).send().await?;
        if !resp.status().is_success() {
            return Err(BackendError::Backend(format!(
                "cache stats returned {}",
                resp.status()
            )));
        }
        Self::decode(resp).await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted in-process backend for orchestrator and history tests.

    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct FakeBackend {
        /// `search_id` handed out by `start_search`; `None` scripts an initiation failure.
        pub accept_with: Option<String>,
        /// Number of `fetch_results` calls answered `NotReady` before the payload is served.
        pub ready_after: u32,
        /// Payload served once ready; `None` scripts a genuine backend failure.
        pub payload: Option<SearchPayload>,
        /// History feed; `None` scripts a fetch failure.
        pub history: Option<HistoryResponse>,
        pub start_calls: AtomicU32,
        pub fetch_calls: AtomicU32,
        pub fetched_ids: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SearchBackend for FakeBackend {
        async fn health(&self) -> bool {
            true
        }

        async fn start_search(
            &self,
            _request: &AsyncSearchRequest,
        ) -> Result<AsyncSearchAccepted, BackendError> {
            self.start_calls.fetch_add(1, Ordering::Relaxed);
            match &self.accept_with {
                Some(id) => Ok(AsyncSearchAccepted {
                    search_id: id.clone(),
                    message: Some("accepted".into()),
                }),
                None => Err(BackendError::Backend("initiation rejected".into())),
            }
        }

        async fn fetch_results(&self, search_id: &str) -> Result<SearchPayload, BackendError> {
            let call = self.fetch_calls.fetch_add(1, Ordering::Relaxed) + 1;
            self.fetched_ids.lock().unwrap().push(search_id.to_string());
            if call <= self.ready_after {
                return Err(BackendError::NotReady(search_id.to_string()));
            }
            match &self.payload {
                Some(payload) => Ok(payload.clone()),
                None => Err(BackendError::Backend("evaluation failed".into())),
            }
        }

        async fn history(&self, _limit: usize) -> Result<HistoryResponse, BackendError> {
            match &self.history {
                Some(resp) => Ok(resp.clone()),
                None => Err(BackendError::Backend("history unavailable".into())),
            }
        }

        async fn cache_stats(&self) -> Result<serde_json::Value, BackendError> {
            Ok(serde_json::json!({ "entries": 0 }))
        }
    }
}
