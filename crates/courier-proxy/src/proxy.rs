use crate::config::{Config, UpstreamConfig};
use crate::logging::RequestLogger;
use crate::transport::is_hop_by_hop;
use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use courier_cache::CacheError;
use courier_pipeline::{
    CacheOptions, HttpClient, HttpRequest, HttpResponse, InterceptorOptions, NetworkError,
    RequestError, Transport,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

/// Request bodies above this are rejected before reaching the pipeline.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Priority of the request log hook: below the cache hook, so it sees the
/// final cache status and only logs requests that actually go upstream.
const REQUEST_LOG_PRIORITY: i32 = -100;

/// Shared application state passed to all handlers.
pub struct AppState {
    client: ArcSwap<HttpClient>,
    cache_options: ArcSwap<CacheOptions>,
    upstream: ArcSwap<UpstreamConfig>,
    transport: Arc<dyn Transport>,
}

impl AppState {
    pub async fn new(config: &Config, transport: Arc<dyn Transport>) -> Result<Self, CacheError> {
        let client = build_client(&config.cache, Arc::clone(&transport)).await?;
        Ok(Self {
            client: ArcSwap::from_pointee(client),
            cache_options: ArcSwap::from_pointee(config.cache.clone()),
            upstream: ArcSwap::from_pointee(config.upstream.clone()),
            transport,
        })
    }

    pub fn client(&self) -> Arc<HttpClient> {
        self.client.load_full()
    }

    pub fn cache_options(&self) -> Arc<CacheOptions> {
        self.cache_options.load_full()
    }

    pub fn upstream(&self) -> Arc<UpstreamConfig> {
        self.upstream.load_full()
    }

    pub fn set_upstream(&self, upstream: &UpstreamConfig) {
        self.upstream.store(Arc::new(upstream.clone()));
    }

    /// Swap in a new client built from `options`. In-flight requests finish
    /// on the client they started with.
    pub async fn rebuild_client(&self, options: &CacheOptions) -> Result<(), CacheError> {
        let client = build_client(options, Arc::clone(&self.transport)).await?;
        self.client.store(Arc::new(client));
        self.cache_options.store(Arc::new(options.clone()));
        Ok(())
    }
}

/// Client with the cache hook from `options` plus the proxy's own hooks.
pub async fn build_client(
    options: &CacheOptions,
    transport: Arc<dyn Transport>,
) -> Result<HttpClient, CacheError> {
    let client = HttpClient::with_cache(transport, options.clone()).await?;
    client.add_interceptor(
        Arc::new(RequestLogger),
        InterceptorOptions::named("request-log").priority(REQUEST_LOG_PRIORITY),
    );
    Ok(client)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Forward the incoming request through the client pipeline to the upstream.
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();
    let (parts, body) = req.into_parts();
    let upstream = state.upstream();

    let url = format!(
        "{}{}",
        upstream.url.trim_end_matches('/'),
        parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
    );

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, url = %url, "failed to read request body");
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
    };

    let mut request = HttpRequest::new(parts.method.clone(), url).with_timeout(upstream.timeout());
    for (name, value) in &parts.headers {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            request
                .headers
                .insert(name.as_str().to_string(), value.to_string());
        }
    }
    if !body.is_empty() {
        request.body = Some(body);
    }

    let key = format!("{}:{}", request.method, request.url);
    let result = state.client().request(request).await;
    let elapsed = start.elapsed();
    metrics::histogram!("courier_request_duration_seconds").record(elapsed.as_secs_f64());

    match result {
        Ok(response) => {
            let cache = response.cache_status.map(|s| s.as_str()).unwrap_or("NONE");
            metrics::counter!("courier_requests_total", "cache" => cache).increment(1);
            tracing::debug!(
                key = %key,
                status = response.status,
                cache,
                latency_us = elapsed.as_micros() as u64,
                "proxied request"
            );
            into_axum_response(response)
        }
        Err(e) => {
            let status = error_status(&e);
            metrics::counter!("courier_request_errors_total", "kind" => error_kind(&e))
                .increment(1);
            tracing::warn!(
                key = %key,
                status = status.as_u16(),
                error = %e,
                latency_us = elapsed.as_micros() as u64,
                "request failed"
            );
            error_response(status, &e.to_string())
        }
    }
}

pub fn error_status(err: &RequestError) -> StatusCode {
    match err {
        RequestError::Network(NetworkError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        RequestError::Network(_) => StatusCode::BAD_GATEWAY,
        // Same answer as `Cache-Control: only-if-cached` with nothing stored.
        RequestError::CacheOnlyMiss { .. } => StatusCode::GATEWAY_TIMEOUT,
        RequestError::Interceptor { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_kind(err: &RequestError) -> &'static str {
    match err {
        RequestError::Network(NetworkError::Timeout(_)) => "timeout",
        RequestError::Network(_) => "network",
        RequestError::CacheOnlyMiss { .. } => "cache_only_miss",
        RequestError::Interceptor { .. } => "interceptor",
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    (status, message.to_string()).into_response()
}

fn into_axum_response(response: HttpResponse) -> Response<Body> {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = status;

    let headers = out.headers_mut();
    for (name, value) in &response.headers {
        // Body length is set by the server from the actual bytes.
        if is_hop_by_hop(name) || name == "content-length" {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    out
}
