//! The built-in cache hook.
//!
//! | strategy | request phase | 2xx response | network error |
//! |---|---|---|---|
//! | network-first | pass through | cache it | serve from cache if fresh |
//! | cache-first | hit answers, miss passes through | cache it | propagate |
//! | network-only | pass through | ignore | propagate |
//! | cache-only | hit answers, miss fails | n/a | n/a |
//! | stale-while-revalidate | hit answers and refreshes in background | cache it | propagate, the request phase already missed |
//!
//! Excluded requests (mutating methods, matching paths) bypass the cache
//! whatever the strategy.

use crate::compression::{gunzip, gzip};
use crate::error::RequestError;
use crate::interceptor::{Interceptor, RequestFlow};
use crate::keying::{CacheKeying, ExcludeRules};
use crate::options::{CacheOptions, CacheStrategy};
use crate::request::{CacheStatus, HttpRequest, HttpResponse, CACHE_STATUS_HEADER};
use crate::transport::{self, Transport};
use async_trait::async_trait;
use courier_cache::{BodyEncoding, CacheEntry, CacheError, CacheStore, EntryMetadata};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Reads and writes HTTP responses as cache entries.
#[derive(Clone)]
struct ResponseCache {
    store: Arc<CacheStore>,
    max_age: Duration,
    compress: bool,
}

impl ResponseCache {
    async fn read(&self, key: &str) -> Option<HttpResponse> {
        let entry = self.store.get(key).await?;
        let body = match entry.encoding {
            BodyEncoding::Identity => entry.data,
            BodyEncoding::Gzip => match gunzip(&entry.data) {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(key, error = %e, "cached body failed to decompress, dropping entry");
                    self.store.delete(key).await;
                    return None;
                }
            },
        };
        let response = HttpResponse {
            status: entry.status,
            headers: entry.headers,
            body,
            cache_status: None,
        };
        Some(response.mark(CacheStatus::Hit))
    }

    async fn write(&self, key: &str, request: &HttpRequest, response: &HttpResponse) {
        let headers: BTreeMap<String, String> = response
            .headers
            .iter()
            .filter(|(name, _)| name.as_str() != CACHE_STATUS_HEADER)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let (data, encoding) = if self.compress {
            match gzip(&response.body) {
                Ok(packed) => (packed, BodyEncoding::Gzip),
                Err(e) => {
                    tracing::warn!(key, error = %e, "compression failed, storing body as is");
                    (response.body.clone(), BodyEncoding::Identity)
                }
            }
        } else {
            (response.body.clone(), BodyEncoding::Identity)
        };

        let metadata = EntryMetadata {
            url: request.full_url(),
            method: request.method.to_string(),
            etag: response.header("etag").map(String::from),
            last_modified: response.header("last-modified").map(String::from),
        };
        let entry = CacheEntry::new(
            key,
            response.status,
            headers,
            data,
            metadata,
            self.store.clock().now_ms(),
            self.max_age,
        )
        .with_encoding(encoding);
        self.store.put(key, entry).await;
    }
}

enum Decision {
    /// Caching switched off entirely; responses are left unmarked.
    Disabled,
    Bypass,
    Cacheable(String),
}

/// Applies a [`CacheStrategy`] to every request passing through the pipeline.
pub struct CacheInterceptor {
    strategy: CacheStrategy,
    enabled: bool,
    keying: CacheKeying,
    exclude: ExcludeRules,
    cache: ResponseCache,
    transport: Arc<dyn Transport>,
}

impl CacheInterceptor {
    /// `transport` is used only for stale-while-revalidate background
    /// refreshes, which skip the rest of the pipeline.
    pub fn new(
        options: &CacheOptions,
        store: Arc<CacheStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            strategy: options.strategy,
            enabled: options.enabled,
            keying: options.keying(),
            exclude: options.exclude_rules()?,
            cache: ResponseCache {
                store,
                max_age: options.max_age(),
                compress: options.compress,
            },
            transport,
        })
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.cache.store
    }

    fn decision(&self, request: &HttpRequest) -> Decision {
        if !self.enabled {
            return Decision::Disabled;
        }
        if self.strategy == CacheStrategy::NetworkOnly || self.exclude.is_excluded_request(request)
        {
            return Decision::Bypass;
        }
        Decision::Cacheable(self.keying.key_for(request))
    }

    fn revalidate(&self, request: HttpRequest, key: String) {
        let upstream = Arc::clone(&self.transport);
        let cache = self.cache.clone();
        tokio::spawn(async move {
            match transport::send(upstream.as_ref(), &request).await {
                Ok(response) if response.is_success() => {
                    cache.write(&key, &request, &response).await;
                    tracing::debug!(key = %key, "background revalidation refreshed entry");
                }
                Ok(response) => {
                    tracing::debug!(
                        key = %key,
                        status = response.status,
                        "background revalidation got non-success status, entry kept"
                    );
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "background revalidation failed");
                }
            }
        });
    }
}

#[async_trait]
impl Interceptor for CacheInterceptor {
    async fn on_request(&self, request: &mut HttpRequest) -> Result<RequestFlow, RequestError> {
        let key = match self.decision(request) {
            Decision::Cacheable(key) => key,
            Decision::Bypass => {
                tracing::debug!(method = %request.method, url = %request.url, "cache bypass");
                return Ok(RequestFlow::Continue);
            }
            Decision::Disabled => return Ok(RequestFlow::Continue),
        };

        match self.strategy {
            CacheStrategy::NetworkFirst | CacheStrategy::NetworkOnly => Ok(RequestFlow::Continue),
            CacheStrategy::CacheFirst => match self.cache.read(&key).await {
                Some(response) => {
                    tracing::debug!(key = %key, strategy = %self.strategy, "cache hit");
                    Ok(RequestFlow::Respond(response))
                }
                None => {
                    tracing::debug!(key = %key, strategy = %self.strategy, "cache miss");
                    Ok(RequestFlow::Continue)
                }
            },
            CacheStrategy::CacheOnly => match self.cache.read(&key).await {
                Some(response) => {
                    tracing::debug!(key = %key, strategy = %self.strategy, "cache hit");
                    Ok(RequestFlow::Respond(response))
                }
                None => Err(RequestError::CacheOnlyMiss { key }),
            },
            CacheStrategy::StaleWhileRevalidate => match self.cache.read(&key).await {
                Some(response) => {
                    tracing::debug!(key = %key, strategy = %self.strategy, "cache hit, revalidating");
                    self.revalidate(request.clone(), key);
                    Ok(RequestFlow::Respond(response))
                }
                None => {
                    tracing::debug!(key = %key, strategy = %self.strategy, "cache miss");
                    Ok(RequestFlow::Continue)
                }
            },
        }
    }

    async fn on_response(
        &self,
        request: &HttpRequest,
        response: HttpResponse,
    ) -> Result<HttpResponse, RequestError> {
        if response.cache_status == Some(CacheStatus::Hit) {
            return Ok(response);
        }
        match self.decision(request) {
            Decision::Disabled => Ok(response),
            Decision::Bypass => Ok(response.mark(CacheStatus::Bypass)),
            Decision::Cacheable(key) => {
                if self.strategy != CacheStrategy::CacheOnly && response.is_success() {
                    self.cache.write(&key, request, &response).await;
                }
                Ok(response.mark(CacheStatus::Miss))
            }
        }
    }

    async fn on_error(
        &self,
        request: &HttpRequest,
        error: &RequestError,
    ) -> Result<Option<HttpResponse>, RequestError> {
        // Stale-while-revalidate only reaches the network after a miss in
        // the request phase, so a second read would only count another miss.
        if self.strategy != CacheStrategy::NetworkFirst || !error.is_network() {
            return Ok(None);
        }
        let Decision::Cacheable(key) = self.decision(request) else {
            return Ok(None);
        };
        let cached = self.cache.read(&key).await;
        if cached.is_some() {
            tracing::debug!(key = %key, error = %error, "network failed, serving cached response");
        }
        Ok(cached)
    }
}
