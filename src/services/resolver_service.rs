//! Resolver — locates a previously uploaded object across every plausible
//! retrieval location and returns the first success.
//!
//! The candidate list exists because the public base URL's exact shape
//! (host-only vs host+bucket-path) is configuration dependent and has changed
//! over time, and old note records may embed either a full URL or a bare key.
//! Ordering favors cheap unauthenticated HTTP reads, which can be edge
//! cached, before the authenticated GetObject fallback. Candidates are tried
//! one at a time; the first success short-circuits the rest.

use crate::{
    config::StorageConfig,
    services::object_store::ObjectStorage,
};
use bytes::Bytes;
use reqwest::Url;
use std::{collections::HashSet, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

/// Per-candidate request timeout. A timed-out candidate counts as failed and
/// the loop advances.
const CANDIDATE_TIMEOUT: Duration = Duration::from_secs(15);

/// Diagnostic body length kept from a failed direct (Case A) fetch.
const DIRECT_SNIPPET_LEN: usize = 2000;

/// Diagnostic body length kept from a failed candidate, log-only.
const CANDIDATE_SNIPPET_LEN: usize = 400;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid url `{0}`")]
    InvalidUrl(String),
    #[error("upstream request failed: {0}")]
    Unreachable(String),
    #[error("upstream returned {status}")]
    Upstream { status: u16, snippet: String },
    #[error("all HTTP candidates and authenticated reads failed for key `{key}`")]
    Exhausted { key: String },
}

pub type ResolveResult<T> = Result<T, ResolveError>;

/// Bytes plus content type, ready to stream back to the client.
#[derive(Debug, Clone)]
pub struct ResolvedObject {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Outcome of a lightweight reachability probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub ok: bool,
    pub status: u16,
    pub content_type: Option<String>,
}

#[derive(Clone)]
pub struct ResolverService {
    http: reqwest::Client,
    config: StorageConfig,
    store: Option<Arc<dyn ObjectStorage>>,
}

impl ResolverService {
    /// Build the resolver with one reused HTTP client. `store` is `None`
    /// when no storage credentials are configured, which disables the
    /// authenticated fallback entirely.
    pub fn new(
        config: StorageConfig,
        store: Option<Arc<dyn ObjectStorage>>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(CANDIDATE_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            config,
            store,
        })
    }

    /// Case A — an explicit absolute URL: a single direct retrieval.
    pub async fn fetch_url(&self, raw: &str) -> ResolveResult<ResolvedObject> {
        let url = Url::parse(raw).map_err(|_| ResolveError::InvalidUrl(raw.to_string()))?;
        debug!(url = %url, "direct proxy fetch");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| ResolveError::Unreachable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let snippet = truncated_body(response, DIRECT_SNIPPET_LEN).await;
            warn!(%status, "direct upstream failed");
            return Err(ResolveError::Upstream {
                status: status.as_u16(),
                snippet,
            });
        }

        let content_type = response_content_type(&response);
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ResolveError::Unreachable(err.to_string()))?;
        Ok(ResolvedObject {
            bytes,
            content_type,
        })
    }

    /// Case B — a storage key: ordered HTTP candidates, then (only with
    /// credentials) authenticated reads over key variants. Individual
    /// failures are logged and swallowed; only exhaustion is reported.
    pub async fn resolve_key(&self, key: &str) -> ResolveResult<ResolvedObject> {
        let candidates = self.candidate_urls(key);
        debug!(key, ?candidates, "trying HTTP candidates");

        for candidate in &candidates {
            match self.try_candidate(candidate).await {
                Ok(object) => {
                    debug!(candidate = %candidate, "resolved via HTTP candidate");
                    return Ok(object);
                }
                Err(reason) => warn!(candidate = %candidate, %reason, "candidate failed"),
            }
        }

        let Some(store) = &self.store else {
            debug!(key, "no storage credentials configured; skipping authenticated fallback");
            return Err(ResolveError::Exhausted {
                key: key.to_string(),
            });
        };

        for variant in self.key_variants(key) {
            match store.get(&variant).await {
                Ok(object) => {
                    debug!(key = %variant, "resolved via authenticated read");
                    return Ok(ResolvedObject {
                        bytes: object.bytes,
                        content_type: object
                            .content_type
                            .unwrap_or_else(|| "application/octet-stream".into()),
                    });
                }
                Err(err) => warn!(key = %variant, error = %err, "authenticated read failed"),
            }
        }

        Err(ResolveError::Exhausted {
            key: key.to_string(),
        })
    }

    /// Reachability probe used by the client before rendering an image:
    /// HEAD first, retry as GET when the HEAD is rejected.
    pub async fn probe_url(&self, raw: &str) -> ResolveResult<ProbeResult> {
        let url = Url::parse(raw).map_err(|_| ResolveError::InvalidUrl(raw.to_string()))?;

        let mut response = self
            .http
            .head(url.clone())
            .send()
            .await
            .map_err(|err| ResolveError::Unreachable(err.to_string()))?;
        if !response.status().is_success() {
            response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|err| ResolveError::Unreachable(err.to_string()))?;
        }

        Ok(ProbeResult {
            ok: response.status().is_success(),
            status: response.status().as_u16(),
            content_type: response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
        })
    }

    /// The ordered, deduplicated HTTP candidate URLs for a key. Order is the
    /// contract; dedup keeps the first occurrence.
    pub fn candidate_urls(&self, key: &str) -> Vec<String> {
        let mut candidates = Vec::new();

        if let Some(base) = self.config.public_base() {
            candidates.push(format!("{base}/{key}"));
            if let Some(bucket) = &self.config.bucket {
                // Covers a configured base that omits the bucket segment.
                candidates.push(format!("{base}/{bucket}/{key}"));
            }
        }
        if let Some(endpoint) = self.config.endpoint_url() {
            if let Some(bucket) = &self.config.bucket {
                candidates.push(format!("{endpoint}/{bucket}/{key}"));
            }
            candidates.push(format!("{endpoint}/{key}"));
        }
        // Legacy records store path-qualified keys; re-adding the raw-key
        // candidate guarantees its position under dedup.
        if key.contains('/') {
            if let Some(base) = self.config.public_base() {
                candidates.push(format!("{base}/{key}"));
            }
        }

        dedup_preserving_order(candidates)
    }

    /// Key variants tried by the authenticated fallback: the key as given,
    /// minus a leading `{bucket}/` prefix when present, else with the prefix
    /// prepended.
    pub fn key_variants(&self, key: &str) -> Vec<String> {
        let mut variants = vec![key.to_string()];
        if let Some(bucket) = &self.config.bucket {
            let prefix = format!("{bucket}/");
            match key.strip_prefix(&prefix) {
                Some(stripped) => variants.push(stripped.to_string()),
                None => variants.push(format!("{prefix}{}", key.trim_start_matches('/'))),
            }
        }
        dedup_preserving_order(variants)
    }

    async fn try_candidate(&self, candidate: &str) -> Result<ResolvedObject, String> {
        let response = self
            .http
            .get(candidate)
            .send()
            .await
            .map_err(|err| err.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let snippet = truncated_body(response, CANDIDATE_SNIPPET_LEN).await;
            return Err(format!("status {status}: {snippet}"));
        }

        let content_type = response_content_type(&response);
        let bytes = response.bytes().await.map_err(|err| err.to_string())?;
        Ok(ResolvedObject {
            bytes,
            content_type,
        })
    }
}

fn response_content_type(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| "application/octet-stream".into())
}

async fn truncated_body(response: reqwest::Response, max: usize) -> String {
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no-body>".to_string());
    truncate_at_boundary(&body, max)
}

fn truncate_at_boundary(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn dedup_preserving_order(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}
