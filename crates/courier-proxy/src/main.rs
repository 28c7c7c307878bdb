mod admin;
mod config;
mod logging;
mod proxy;
mod transport;

use clap::Parser;
use config::Config;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use proxy::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use transport::HyperTransport;

#[derive(Parser, Debug)]
#[command(name = "courier-proxy", about = "Caching forward proxy")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = if args.config.exists() {
        match Config::load(&args.config).await {
            Ok(c) => {
                tracing::info!(path = %args.config.display(), "loaded config");
                c
            }
            Err(e) => {
                tracing::error!(path = %args.config.display(), error = %e, "failed to load config, using defaults");
                Config::default_config()
            }
        }
    } else {
        tracing::info!(path = %args.config.display(), "no config file found, using defaults");
        Config::default_config()
    };

    let prom_handle = match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(error = %e, "failed to install prometheus recorder, /metrics disabled");
            None
        }
    };

    let state = match AppState::new(&config, Arc::new(HyperTransport::new())).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            tracing::error!(error = %e, "failed to open cache store");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();

    tokio::spawn(admin::cache_sweeper(
        Arc::clone(&state),
        Duration::from_secs(config.server.sweep_interval_secs.max(1)),
        shutdown.clone(),
    ));

    let proxy_router = proxy::router(Arc::clone(&state));
    let admin_router = admin::router(Arc::clone(&state), prom_handle);

    let proxy_addr = config.server.listen_addr.clone();
    let admin_addr = config.server.admin_addr.clone();

    tracing::info!(
        proxy = %proxy_addr,
        admin = %admin_addr,
        upstream = %config.upstream.url,
        strategy = %config.cache.strategy,
        eviction = %config.cache.eviction,
        storage = %config.cache.storage,
        max_size_bytes = config.cache.max_size_bytes,
        "courier proxy starting"
    );

    let proxy_listener = match tokio::net::TcpListener::bind(&proxy_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %proxy_addr, error = %e, "failed to bind proxy");
            std::process::exit(1);
        }
    };
    let admin_listener = match tokio::net::TcpListener::bind(&admin_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %admin_addr, error = %e, "failed to bind admin");
            std::process::exit(1);
        }
    };

    spawn_config_watcher(args.config, config, Arc::clone(&state), shutdown.clone());

    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(shutdown_clone).await;
    });

    let proxy_future = axum::serve(proxy_listener, proxy_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let admin_future = axum::serve(admin_listener, admin_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    tokio::select! {
        result = proxy_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "proxy server error");
            }
        }
        result = admin_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "admin server error");
            }
        }
    }

    shutdown.cancel();
    tracing::info!("courier proxy shut down");
}

/// Listen for SIGINT (Ctrl+C) or SIGTERM and cancel the shutdown token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl+C");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    tracing::info!("shutdown signal received, draining connections");
    token.cancel();
}

/// Watch the config file and apply changes on the runtime.
///
/// The notify callback runs on its own thread, so it only nudges a channel;
/// loading and applying happen in a task that owns the watcher.
fn spawn_config_watcher(
    config_path: PathBuf,
    initial: Config,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) {
    let (tx, mut rx) = mpsc::channel::<()>(1);

    let mut watcher = match notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                // A full channel already has a reload pending.
                let _ = tx.try_send(());
            }
        }
    }) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "failed to start config watcher");
            return;
        }
    };

    if let Err(e) = watcher.watch(&config_path, RecursiveMode::NonRecursive) {
        tracing::warn!(path = %config_path.display(), error = %e, "failed to watch config file");
        return;
    }
    tracing::info!(path = %config_path.display(), "config file watcher started");

    tokio::spawn(async move {
        let _watcher = watcher;
        let mut current = initial;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = rx.recv() => {
                    if msg.is_none() {
                        break;
                    }
                    match Config::load(&config_path).await {
                        Ok(new_config) => {
                            let outcome = config::diff_and_apply(&current, &new_config, &state).await;
                            if !(outcome.cache_rebuilt || outcome.upstream_updated || outcome.restart_required) {
                                tracing::debug!("config file changed, no effective differences");
                            }
                            current = new_config;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to reload config");
                        }
                    }
                }
            }
        }
    });
}
