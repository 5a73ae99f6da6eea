use crate::blockchain::models::{
    decode_event_record, flatten_segments, Block, EventRecord, WireBlock, WireEventPage, WireHead,
};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Upper bound on segment pages fetched for one block.
const MAX_EVENT_SEGMENTS: u32 = 1024;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Endpoint {endpoint} responded with status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("Rate limited by {0}")]
    RateLimited(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The body parsed as JSON but does not have the expected shape. Asking
    /// again returns the same document.
    #[error("Unexpected response shape: {0}")]
    Schema(String),

    #[error("Chain unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl ClientError {
    /// Transient faults are retried at single-height granularity.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ClientError::InvalidEndpoint(_) | ClientError::Schema(_))
    }
}

/// Block and event retrieval for one chain.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    async fn block_at(&self, height: u64) -> Result<Block, ClientError>;

    /// Full ordered event list of a block. With `use_segments` the events are
    /// fetched page by page and overlapping pages are deduplicated.
    async fn events_at(
        &self,
        block_hash: &str,
        use_segments: bool,
    ) -> Result<Vec<EventRecord>, ClientError>;

    /// Highest finalized height, when the chain exposes one.
    async fn finalized_height(&self) -> Result<Option<u64>, ClientError> {
        Ok(None)
    }
}

/// HTTP client for a block/events service, tried in endpoint order: the
/// first endpoint that answers wins each request.
pub struct HttpChainClient {
    http: reqwest::Client,
    endpoints: Vec<Url>,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl HttpChainClient {
    pub fn new(
        endpoints: Vec<Url>,
        timeout: Duration,
        rate_limit: Option<u32>,
    ) -> Result<Self, ClientError> {
        if endpoints.is_empty() {
            return Err(ClientError::InvalidEndpoint("no endpoints configured".to_string()));
        }

        let endpoints = endpoints
            .into_iter()
            .map(|mut url| {
                // Url::join drops the last path segment without a trailing slash.
                if !url.path().ends_with('/') {
                    let path = format!("{}/", url.path());
                    url.set_path(&path);
                }
                url
            })
            .collect::<Vec<_>>();

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let limiter = rate_limit
            .and_then(NonZeroU32::new)
            .map(|per_sec| RateLimiter::direct(Quota::per_second(per_sec)));

        info!(
            "Initializing chain client with {} endpoint(s), primary: {}, timeout: {:?}",
            endpoints.len(),
            endpoints[0],
            timeout
        );

        Ok(Self {
            http,
            endpoints,
            limiter,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let mut last_error = None;

        for endpoint in &self.endpoints {
            let url = endpoint
                .join(path)
                .map_err(|e| ClientError::InvalidEndpoint(format!("{}{}: {}", endpoint, path, e)))?;

            match self.fetch(url).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    debug!("Endpoint {} failed for {}: {}", endpoint, path, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ClientError::Unavailable(path.to_string())))
    }

    async fn fetch<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let response = self.http.get(url.clone()).send().await?;
        match response.status() {
            status if status.is_success() => {
                let body = response.bytes().await?;
                // A body that is not JSON at all is usually a cut-off response.
                let value: serde_json::Value = serde_json::from_slice(&body)
                    .map_err(|e| ClientError::Malformed(format!("{}: {}", url, e)))?;
                serde_json::from_value(value).map_err(|e| ClientError::Schema(format!("{}: {}", url, e)))
            }
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(url.to_string())),
            StatusCode::TOO_MANY_REQUESTS => Err(ClientError::RateLimited(url.to_string())),
            status => Err(ClientError::Status {
                endpoint: url.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl ChainAdapter for HttpChainClient {
    async fn block_at(&self, height: u64) -> Result<Block, ClientError> {
        let wire: WireBlock = self.get_json(&format!("blocks/{}", height)).await?;
        if wire.number != height {
            return Err(ClientError::Malformed(format!(
                "asked for block {}, got {}",
                height, wire.number
            )));
        }
        Ok(wire.into())
    }

    async fn events_at(
        &self,
        block_hash: &str,
        use_segments: bool,
    ) -> Result<Vec<EventRecord>, ClientError> {
        if !use_segments {
            let page: WireEventPage = self.get_json(&format!("blocks/{}/events", block_hash)).await?;
            return Ok(page.events.iter().map(decode_event_record).collect());
        }

        let mut segments = Vec::new();
        for segment in 0..MAX_EVENT_SEGMENTS {
            let page: WireEventPage = self
                .get_json(&format!("blocks/{}/events?segment={}", block_hash, segment))
                .await?;
            let has_more = page.has_more && !page.events.is_empty();
            segments.push(page.events.iter().map(decode_event_record).collect());
            if !has_more {
                return Ok(flatten_segments(segments));
            }
        }

        Err(ClientError::Schema(format!(
            "block {} reports more than {} event segments",
            block_hash, MAX_EVENT_SEGMENTS
        )))
    }

    async fn finalized_height(&self) -> Result<Option<u64>, ClientError> {
        let head: WireHead = self.get_json("blocks/head?finalized=true").await?;
        Ok(Some(head.number))
    }
}
