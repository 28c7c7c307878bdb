use crate::proxy::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use courier_cache::CacheStats;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub strategy: String,
    pub eviction: String,
    pub storage: String,
    pub cache: Option<CacheStats>,
}

#[derive(Debug, Serialize)]
pub struct InterceptorInfo {
    pub id: String,
    pub name: Option<String>,
    pub priority: i32,
    pub enabled: bool,
}

pub fn router(state: Arc<AppState>, prometheus: Option<PrometheusHandle>) -> Router {
    let mut router = Router::new()
        .route("/api/stats", get(stats_handler))
        .route("/api/cache/clear", post(clear_handler))
        .route("/api/cache/cleanup", post(cleanup_handler))
        .route("/api/interceptors", get(interceptors_handler));
    if let Some(handle) = prometheus {
        router = router.route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        );
    }
    router.with_state(state)
}

/// GET /api/stats
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let options = state.cache_options();
    Json(StatsResponse {
        strategy: options.strategy.to_string(),
        eviction: options.eviction.to_string(),
        storage: options.storage.to_string(),
        cache: state.client().cache_stats(),
    })
}

/// POST /api/cache/clear
pub async fn clear_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.client().clear_cache().await;
    publish_gauges(&state);
    Json(serde_json::json!({ "cleared": true }))
}

/// POST /api/cache/cleanup
pub async fn cleanup_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let removed = state.client().cleanup_cache().await;
    publish_gauges(&state);
    Json(serde_json::json!({ "removed": removed }))
}

/// GET /api/interceptors
pub async fn interceptors_handler(State(state): State<Arc<AppState>>) -> Json<Vec<InterceptorInfo>> {
    let hooks = state
        .client()
        .get_interceptors()
        .into_iter()
        .map(|h| InterceptorInfo {
            id: h.id().to_string(),
            name: h.name().map(String::from),
            priority: h.priority(),
            enabled: h.is_enabled(),
        })
        .collect();
    Json(hooks)
}

fn publish_gauges(state: &AppState) {
    if let Some(stats) = state.client().cache_stats() {
        metrics::gauge!("courier_cache_entries").set(stats.total_entries as f64);
        metrics::gauge!("courier_cache_size_bytes").set(stats.total_size as f64);
        metrics::gauge!("courier_cache_max_size_bytes").set(stats.max_size as f64);
        metrics::gauge!("courier_cache_hit_rate").set(stats.hit_rate);
        metrics::gauge!("courier_cache_evictions").set(stats.evictions as f64);
    }
}

/// Periodically sweeps expired entries and refreshes the cache gauges.
pub async fn cache_sweeper(state: Arc<AppState>, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let removed = state.client().cleanup_cache().await;
                if removed > 0 {
                    tracing::info!(removed, "swept expired cache entries");
                }
                publish_gauges(&state);
            }
        }
    }
    tracing::debug!("cache sweeper stopped");
}
