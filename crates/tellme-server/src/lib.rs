//! TellMe application host.
//!
//! Owns the startup sequence, mounts externally defined routes, and serves
//! them over axum with the storage handle from [`tellme_db`] injected into
//! every request.

pub mod api;
pub mod config;
pub mod lifespan;
pub mod middleware;
pub mod routes;

use axum::{extract::DefaultBodyLimit, http::StatusCode, routing::get, Extension, Json, Router};
use serde_json::{json, Value};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tellme_db::{DbError, Session, Storage};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

pub use api::ApiError;
pub use lifespan::{Lifespan, Running};
pub use routes::RouteSet;

/// Maximum request body size (2 MiB).
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The process-wide storage handle.
    pub storage: Storage,
    /// Directory served as a static fallback, if any.
    pub static_dir: Option<PathBuf>,
    ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            static_dir: None,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_static_dir(mut self, dir: Option<impl Into<PathBuf>>) -> Self {
        self.static_dir = dir.map(Into::into);
        self
    }

    /// Whether startup has completed and requests are being served.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Runs `f` with a fresh session on the blocking pool.
    ///
    /// This is how handlers reach storage: one call per unit of work, with
    /// every statement and the release running off the async workers. The
    /// session is released when `f` returns, errors, or panics.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or `ApiError::InternalServerError` if no
    /// session could be opened or the task panicked.
    pub async fn run_session<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut Session) -> Result<T, ApiError> + Send + 'static,
        T: Send + 'static,
    {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.with_session(f))
            .await
            .map_err(|e| ApiError::InternalServerError(format!("session task failed: {e}")))?
    }
}

/// Errors that stop the server from starting or keep it from serving.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Opening the store or ensuring its schema failed.
    #[error(transparent)]
    Storage(#[from] DbError),

    /// The blocking startup task did not complete.
    #[error("startup task failed: {0}")]
    Startup(#[from] tokio::task::JoinError),

    /// Binding or serving failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Health check handler.
///
/// Reports `starting` with `503` until startup completes, then `ok`.
async fn health(Extension(state): Extension<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let ready = state.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if ready { "ok" } else { "starting" },
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": state.storage.session_counts(),
        })),
    )
}

/// Builds the application router around the mounted `api` routes.
pub fn app(state: AppState, api: Router) -> Router {
    let router = Router::new().route("/health", get(health)).merge(api);

    let router = match &state.static_dir {
        Some(dir) if dir.join("index.html").exists() => {
            tracing::info!(path = %dir.display(), "serving static files");
            let index = ServeFile::new(dir.join("index.html"));
            router.fallback_service(ServeDir::new(dir).fallback(index))
        }
        Some(dir) => {
            tracing::warn!(
                path = %dir.display(),
                "static directory has no index.html, skipping static file serving"
            );
            router
        }
        None => router,
    };

    router
        .layer(axum::middleware::from_fn(middleware::readiness_gate))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(Extension(Arc::new(state)))
}

/// Runs startup, serves `routes` on `listener` until `shutdown` resolves, then
/// runs teardown.
///
/// No request is accepted before schema-ensure has finished.
///
/// # Errors
///
/// Returns `ServerError` if startup fails or the server stops on an I/O error.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    routes: RouteSet,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (api, metadata) = routes.into_parts();
    let running = Lifespan::new(metadata).startup(&state).await?;

    let addr = listener.local_addr()?;
    tracing::info!(%addr, "starting tellme server");

    let result = axum::serve(listener, app(state.clone(), api))
        .with_graceful_shutdown(shutdown)
        .await;

    running.shutdown(&state).await;
    result?;

    tracing::info!("tellme server shut down");
    Ok(())
}
