//! Greenlight HTTP server.
//!
//! Wires the operation store, notification hub, executor, and sweeper
//! together and mounts the REST and WebSocket surface on top.

use crate::config::GreenlightConfig;
use crate::routes;
use anyhow::Result;
use axum::Extension;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use gl_core::{NotificationHub, OperationExecutor, OperationStore, spawn_sweeper_loop};
use gl_tools::WorkspaceMutator;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub store: Arc<OperationStore>,
    pub hub: Arc<NotificationHub>,
    pub executor: Arc<OperationExecutor>,
    pub mutator: Arc<WorkspaceMutator>,
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = GreenlightConfig::load_with_path(config_path).await?;
    let addr = cfg.bind_addr()?;
    let workspace_root = cfg.workspace_root_path()?;
    tracing::info!(
        bind_addr = %addr,
        approval_timeout_secs = cfg.approvals.timeout_secs,
        sweep_interval_secs = cfg.approvals.sweep_interval_secs,
        retention_secs = cfg.approvals.retention_secs,
        observer_buffer = cfg.approvals.observer_buffer,
        workspace_root = %workspace_root.display(),
        config_path = %path.display(),
        "config ok"
    );
    if !tokio::fs::try_exists(&workspace_root).await? {
        tracing::warn!(
            workspace_root = %workspace_root.display(),
            "workspace root does not exist; run `greenlight init`"
        );
        return Ok(());
    }
    let probe = workspace_root.join(".doctor-probe");
    match tokio::fs::write(&probe, b"ok").await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(&probe).await;
            tracing::info!(
                workspace_root = %workspace_root.display(),
                "workspace root is writable"
            );
        }
        Err(e) => {
            tracing::warn!(
                workspace_root = %workspace_root.display(),
                error = %e,
                "workspace root is not writable"
            );
        }
    }
    Ok(())
}

pub async fn serve(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let (mut cfg, cfg_path) = GreenlightConfig::load_with_path(config_path).await?;
    if let Some(host) = host {
        cfg.server.host = host;
    }
    if let Some(port) = port {
        cfg.server.port = port;
    }
    cfg.validate()?;
    let started_at = Instant::now();
    let addr = cfg.bind_addr()?;
    let workspace_root = cfg.workspace_root_path()?;
    tracing::info!(
        bind_addr = %addr,
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        http_max_in_flight = cfg.server.http_max_in_flight,
        approval_timeout_secs = cfg.approvals.timeout_secs,
        sweep_interval_secs = cfg.approvals.sweep_interval_secs,
        retention_secs = cfg.approvals.retention_secs,
        observer_buffer = cfg.approvals.observer_buffer,
        workspace_root = %workspace_root.display(),
        workspace_file_bytes_max = cfg.workspace.file_bytes_max,
        config_path = %cfg_path.display(),
        "server configuration loaded"
    );
    let listener = preflight_bind_listener(addr).await?;

    tokio::fs::create_dir_all(&workspace_root)
        .await
        .map_err(|e| anyhow::anyhow!("create workspace root {}: {e}", workspace_root.display()))?;
    let mutator = Arc::new(
        WorkspaceMutator::new(&workspace_root)?.with_file_bytes_max(cfg.workspace.file_bytes_max),
    );
    let hub = Arc::new(NotificationHub::new(cfg.approvals.observer_buffer));
    let store = Arc::new(OperationStore::new(cfg.store_config(), hub.clone()));
    let executor = Arc::new(OperationExecutor::new(store.clone(), mutator.clone()));

    let shutdown = CancellationToken::new();
    let sweeper_handle = spawn_sweeper_loop(
        store.clone(),
        Duration::from_secs(cfg.approvals.sweep_interval_secs),
        shutdown.child_token(),
    );

    let state = Arc::new(AppState {
        store,
        hub,
        executor,
        mutator,
        shutdown: shutdown.clone(),
        started_at,
    });

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = routes::router()
        .layer(Extension(state))
        .layer(CorsLayer::permissive())
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "greenlight serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    match sweeper_handle.await {
        Ok(()) => tracing::info!("sweeper shutdown completed"),
        Err(e) => tracing::error!(error = %e, "sweeper task join failed during shutdown"),
    }

    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
