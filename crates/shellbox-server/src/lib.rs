//! HTTP control surface for the shellbox runtime.
//!
//! Exposes the [`Runtime`] facade over nine JSON endpoints plus a multipart
//! upload. Authentication is a shared token in `X-API-Key` (disabled when no
//! token is configured); taxonomy errors cross the wire as an envelope under
//! a dedicated status code.

pub mod handlers;
pub mod middleware;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use shellbox_runtime::{LocalRuntime, Runtime};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

/// Uploads dominate body size; everything else is small JSON.
const MAX_BODY_SIZE: usize = 256 * 1024 * 1024;

pub struct AppState<R> {
    pub runtime: Arc<R>,
    /// Shared token; `None` disables the check.
    pub api_key: Option<String>,
}

impl<R> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            api_key: self.api_key.clone(),
        }
    }
}

pub fn build_router<R: Runtime>(runtime: Arc<R>, api_key: Option<String>) -> Router {
    let state = AppState { runtime, api_key };
    Router::new()
        .route("/", get(handlers::root))
        .route("/is_alive", get(handlers::is_alive::<R>))
        .route("/create_session", post(handlers::create_session::<R>))
        .route("/run_in_session", post(handlers::run_in_session::<R>))
        .route("/close_session", post(handlers::close_session::<R>))
        .route("/execute", post(handlers::execute::<R>))
        .route("/read_file", post(handlers::read_file::<R>))
        .route("/write_file", post(handlers::write_file::<R>))
        .route("/upload", post(handlers::upload::<R>))
        .route("/close", post(handlers::close::<R>))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_api_key::<R>,
        ))
        .layer(axum::middleware::from_fn(middleware::log_requests))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .with_state(state)
}

/// Bind, serve until a shutdown signal cancels the token, then close every
/// live session.
pub async fn run_server(host: &str, port: u16, api_key: Option<String>) -> Result<()> {
    let runtime = Arc::new(LocalRuntime::new());
    let app = build_router(Arc::clone(&runtime), api_key);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        addr = %listener.local_addr().context("failed to read listener address")?,
        "shellbox server listening"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_for_shutdown(shutdown.clone()));

    let graceful = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            graceful.cancelled().await;
        })
        .await
        .context("server failed")?;

    shutdown.cancel();
    info!("shutting down; closing sessions");
    let _ = runtime.close().await;
    Ok(())
}

async fn watch_for_shutdown(token: CancellationToken) {
    shutdown_signal().await;
    info!("shutdown signal received; draining connections");
    token.cancel();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                if let Err(ctrl_err) = tokio::signal::ctrl_c().await {
                    warn!(error = %ctrl_err, "ctrl_c handler error");
                }
                return;
            }
        };

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(err) = res {
                    warn!(error = %err, "ctrl_c handler error");
                }
            }
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "ctrl_c handler error");
        }
    }
}
