use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::backoff::{retry_after, with_retry_after, Attempt};
use crate::auth::Token;
use crate::error::{CISummaryError, Result};
use crate::providers::circleci::cache::{CacheKey, CacheStore};

pub const DEFAULT_BASE_URL: &str = "https://circleci.com";
const TOKEN_HEADER: &str = "Circle-Token";

/// A decoded API response, tagged with whether it came from the cache.
#[derive(Debug)]
pub struct Fetched<T> {
    pub value: T,
    pub cached: bool,
}

/// Totals of logical requests issued by a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    pub total_requests: usize,
    pub uncached_requests: usize,
}

impl RequestCounts {
    /// Requests issued after `earlier` was taken.
    #[must_use]
    pub fn since(self, earlier: RequestCounts) -> RequestCounts {
        RequestCounts {
            total_requests: self.total_requests.saturating_sub(earlier.total_requests),
            uncached_requests: self.uncached_requests.saturating_sub(earlier.uncached_requests),
        }
    }
}

#[derive(Debug, Default)]
struct RequestStats {
    total: AtomicUsize,
    uncached: AtomicUsize,
}

impl RequestStats {
    fn record(&self, cached: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if !cached {
            self.uncached.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> RequestCounts {
        RequestCounts {
            total_requests: self.total.load(Ordering::Relaxed),
            uncached_requests: self.uncached.load(Ordering::Relaxed),
        }
    }
}

/// CircleCI v2 REST client.
///
/// Every request carries the API token. Reads retry for as long as the
/// server keeps answering with a `Retry-After` hint; writes are sent once.
pub struct CircleCiClient {
    client: Client,
    api_url: Url,
    token: Token,
    cache: Option<Arc<dyn CacheStore>>,
    stats: RequestStats,
}

impl CircleCiClient {
    /// Creates a client for the CircleCI instance at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`CISummaryError::MissingToken`] when no token is supplied and
    /// a configuration error if the base URL is invalid.
    pub fn new(
        base_url: &str,
        token: Option<Token>,
        cache: Option<Arc<dyn CacheStore>>,
    ) -> Result<Self> {
        let token = token
            .filter(|t| !t.as_str().is_empty())
            .ok_or(CISummaryError::MissingToken)?;

        let client = Client::builder()
            .user_agent(concat!("cisummary/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CISummaryError::Config(format!("Failed to create HTTP client: {e}")))?;

        let api_url = Url::parse(base_url)
            .map_err(|e| CISummaryError::Config(format!("Invalid base URL: {e}")))?
            .join("api/v2/")
            .map_err(|e| CISummaryError::Config(format!("Invalid API base URL: {e}")))?;

        Ok(Self {
            client,
            api_url,
            token,
            cache,
            stats: RequestStats::default(),
        })
    }

    pub fn request_counts(&self) -> RequestCounts {
        self.stats.snapshot()
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .api_url
            .join(path)
            .map_err(|e| CISummaryError::Config(format!("Invalid endpoint {path}: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn attempt(&self, request: RequestBuilder) -> Result<Attempt> {
        let response = request
            .header(TOKEN_HEADER, self.token.as_str())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(Attempt::Done(response.bytes().await?.to_vec()));
        }

        if let Some(delay) = retry_after(response.headers()) {
            return Ok(Attempt::RetryAfter(delay));
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        Err(CISummaryError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// GET `path` relative to `/api/v2/` and decode the JSON body.
    pub(super) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = self.endpoint(path, query)?;
        debug!("GET {url}");

        let url = &url;
        let body = with_retry_after(
            path,
            move || self.attempt(self.client.get(url.clone())),
            tokio::time::sleep,
        )
        .await?;
        self.stats.record(false);

        Ok(serde_json::from_slice(&body)?)
    }

    /// POST a JSON body once. Never cached and never retried.
    pub(super) async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.endpoint(path, &[])?;
        debug!("POST {url}");

        let request = self
            .client
            .post(url)
            .header(TOKEN_HEADER, self.token.as_str())
            .json(body);
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(CISummaryError::Api {
                status: status.as_u16(),
                message,
            });
        }
        self.stats.record(false);

        Ok(response.json().await?)
    }

    /// Serves `key` from the cache, or runs `fetch` and stores the result
    /// when `is_terminal` accepts it.
    ///
    /// The cache is best-effort: unreadable entries and failed writes are
    /// logged and otherwise ignored.
    pub(super) async fn cached<T, F, Fut>(
        &self,
        key: CacheKey,
        is_terminal: fn(&T) -> bool,
        fetch: F,
    ) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cache) = &self.cache {
            match cache.get(&key) {
                Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                    Ok(value) => {
                        debug!("Cache hit for {key}");
                        self.stats.record(true);
                        return Ok(Fetched {
                            value,
                            cached: true,
                        });
                    }
                    Err(e) => warn!("Ignoring unreadable cache entry {key}: {e}"),
                },
                Ok(None) => {}
                Err(e) => warn!("Failed to read cache entry {key}: {e}"),
            }
        }

        let value = fetch().await?;

        if let Some(cache) = &self.cache {
            if is_terminal(&value) {
                let payload = serde_json::to_vec(&value)?;
                if let Err(e) = cache.put(&key, &payload) {
                    warn!("Failed to write cache entry {key}: {e}");
                }
            } else {
                debug!("Not caching {key}: payload is not terminal");
            }
        }

        Ok(Fetched {
            value,
            cached: false,
        })
    }
}
