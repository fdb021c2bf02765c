//! HTTP API server module
//!
//! A thin axum layer over [`SplitService`]: every handler is one service call
//! plus a response mapping. Errors are rendered by
//! [`error_response`](self::error_response) as
//! `{"error": {"code", "message"}}` with a matching status.

use crate::orchestrator::SplitService;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod error_response;
pub mod routes;


/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SplitService>,
}

impl AppState {
    pub fn new(service: Arc<SplitService>) -> Self {
        Self { service }
    }
}

/// Create the API router with all route definitions
///
/// # Routes
///
/// - `GET /` - Upload form
/// - `POST /upload` - Upload a PDF (multipart field `pdfFile`), start splitting
/// - `GET /progress/{id}` - Poll a job
/// - `GET /result/{id}` - Files of a completed job, or redirect to `/`
/// - `GET /download/{folder}/{file}` - Download one page
/// - `GET /download-all/{folder}` - Download every page as a ZIP
/// - `GET /health` - Health check
pub fn create_router(service: Arc<SplitService>) -> Router {
    let body_limit = service.config().max_upload_bytes;
    let state = AppState::new(service);

    Router::new()
        .route("/", get(routes::index))
        .route("/upload", post(routes::upload))
        .route("/progress/{id}", get(routes::progress))
        .route("/result/{id}", get(routes::result))
        .route("/download/{folder}/{file}", get(routes::download_file))
        .route("/download-all/{folder}", get(routes::download_all))
        .route("/health", get(routes::health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    service: Arc<SplitService>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }
    axum::serve(listener, create_router(service))
        .with_graceful_shutdown(shutdown)
        .await
}
