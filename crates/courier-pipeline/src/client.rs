use crate::error::RequestError;
use crate::interceptor::{Interceptor, InterceptorHandle, InterceptorId, InterceptorOptions};
use crate::options::CacheOptions;
use crate::pipeline::InterceptorPipeline;
use crate::request::{HttpRequest, HttpResponse};
use crate::strategy::CacheInterceptor;
use crate::transport::Transport;
use courier_cache::{CacheError, CacheStats, CacheStore, SystemClock};
use std::sync::Arc;

/// Name under which the built-in cache hook is registered.
pub const CACHE_INTERCEPTOR_NAME: &str = "cache";

struct CacheBinding {
    store: Arc<CacheStore>,
    handle: InterceptorHandle,
}

/// What a host application holds: one transport, one pipeline and, when
/// caching is configured, the store behind the built-in cache hook.
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    pipeline: InterceptorPipeline,
    cache: Option<CacheBinding>,
}

impl HttpClient {
    /// Client without caching.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pipeline: InterceptorPipeline::new(),
            cache: None,
        }
    }

    /// Client with a cache store opened from `options`, recovering any
    /// entries a durable backend already holds.
    pub async fn with_cache(
        transport: Arc<dyn Transport>,
        options: CacheOptions,
    ) -> Result<Self, CacheError> {
        options.validate()?;
        let store = CacheStore::open(
            options.storage,
            &options.storage_dir,
            options.max_size_bytes,
            options.eviction,
            Arc::new(SystemClock),
        )
        .await?;
        Self::with_cache_store(transport, &options, Arc::new(store))
    }

    /// Client over a store built by the caller, e.g. with a manual clock.
    pub fn with_cache_store(
        transport: Arc<dyn Transport>,
        options: &CacheOptions,
        store: Arc<CacheStore>,
    ) -> Result<Self, CacheError> {
        let interceptor =
            CacheInterceptor::new(options, Arc::clone(&store), Arc::clone(&transport))?;
        let pipeline = InterceptorPipeline::new();
        let handle = pipeline.add(
            Arc::new(interceptor),
            InterceptorOptions::named(CACHE_INTERCEPTOR_NAME).priority(options.priority),
        );
        tracing::info!(
            strategy = %options.strategy,
            enabled = options.enabled,
            backend = store.backend_name(),
            max_age_ms = options.max_age_ms,
            "http client cache configured"
        );
        Ok(Self {
            transport,
            pipeline,
            cache: Some(CacheBinding { store, handle }),
        })
    }

    pub async fn request(&self, request: HttpRequest) -> Result<HttpResponse, RequestError> {
        self.pipeline
            .execute(request, self.transport.as_ref())
            .await
    }

    pub async fn get(&self, url: impl Into<String>) -> Result<HttpResponse, RequestError> {
        self.request(HttpRequest::get(url)).await
    }

    pub fn add_interceptor(
        &self,
        interceptor: Arc<dyn Interceptor>,
        options: InterceptorOptions,
    ) -> InterceptorHandle {
        let handle = self.pipeline.add(interceptor, options);
        tracing::info!(id = %handle.id(), name = handle.name().unwrap_or(""), "interceptor added");
        handle
    }

    pub fn remove_interceptor(&self, id: InterceptorId) -> bool {
        let removed = self.pipeline.remove(id);
        if removed {
            tracing::info!(id = %id, "interceptor removed");
        }
        removed
    }

    /// Removes every interceptor, the built-in cache hook included.
    pub fn remove_all_interceptors(&self) -> usize {
        self.pipeline.remove_all()
    }

    pub fn get_interceptors(&self) -> Vec<InterceptorHandle> {
        self.pipeline.get_all()
    }

    pub fn pipeline(&self) -> &InterceptorPipeline {
        &self.pipeline
    }

    pub fn cache_store(&self) -> Option<&Arc<CacheStore>> {
        self.cache.as_ref().map(|c| &c.store)
    }

    /// Handle of the built-in cache hook, to toggle caching at runtime.
    pub fn cache_handle(&self) -> Option<&InterceptorHandle> {
        self.cache.as_ref().map(|c| &c.handle)
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache_store().map(|s| s.stats())
    }

    pub async fn clear_cache(&self) {
        if let Some(store) = self.cache_store() {
            store.clear().await;
            tracing::info!("cache cleared");
        }
    }

    /// Sweep expired entries. Returns how many were removed.
    pub async fn cleanup_cache(&self) -> usize {
        match self.cache_store() {
            Some(store) => store.cleanup().await,
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CacheStrategy;
    use crate::transport::testing::MockTransport;

    fn transport() -> Arc<MockTransport> {
        Arc::new(MockTransport::new())
    }

    #[tokio::test]
    async fn plain_client_has_no_cache() {
        let t = transport();
        let client = HttpClient::new(t.clone());
        let resp = client.get("https://api.test/").await.unwrap();
        assert_eq!(resp.cache_status, None);
        assert!(client.cache_stats().is_none());
        assert_eq!(client.cleanup_cache().await, 0);
        assert!(client.get_interceptors().is_empty());
    }

    #[tokio::test]
    async fn cache_hook_is_registered_and_toggleable() {
        let t = transport();
        let options = CacheOptions::default().with_strategy(CacheStrategy::CacheFirst);
        let client = HttpClient::with_cache(t.clone(), options).await.unwrap();

        let hooks = client.get_interceptors();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].name(), Some(CACHE_INTERCEPTOR_NAME));

        client.get("https://api.test/a").await.unwrap();
        client.get("https://api.test/a").await.unwrap();
        assert_eq!(t.calls(), 1);

        client.cache_handle().unwrap().disable();
        client.get("https://api.test/a").await.unwrap();
        assert_eq!(t.calls(), 2);
    }

    #[tokio::test]
    async fn clear_cache_resets_stats() {
        let t = transport();
        let options = CacheOptions::default().with_strategy(CacheStrategy::CacheFirst);
        let client = HttpClient::with_cache(t.clone(), options).await.unwrap();
        client.get("https://api.test/a").await.unwrap();
        client.get("https://api.test/a").await.unwrap();
        assert_eq!(client.cache_stats().unwrap().hits, 1);

        client.clear_cache().await;
        let stats = client.cache_stats().unwrap();
        assert_eq!((stats.total_entries, stats.hits, stats.misses), (0, 0, 0));
    }

    #[tokio::test]
    async fn invalid_options_are_rejected() {
        let mut options = CacheOptions::default();
        options.exclude.paths = vec!["[".into()];
        assert!(HttpClient::with_cache(transport(), options).await.is_err());
    }

    #[tokio::test]
    async fn remove_all_drops_cache_hook() {
        let t = transport();
        let options = CacheOptions::default().with_strategy(CacheStrategy::CacheOnly);
        let client = HttpClient::with_cache(t.clone(), options).await.unwrap();
        assert!(client.get("https://api.test/a").await.is_err());

        assert_eq!(client.remove_all_interceptors(), 1);
        assert!(client.get("https://api.test/a").await.is_ok());
        assert_eq!(t.calls(), 1);
    }
}
