//! HTTP routes for the DETool UI
//!
//! - `/` and `/<file>` serve the pre-built UI from the static directory
//! - `/api/tagsettings` reads and replaces the shared tag settings
//! - `/shutdown` stops the listener that is serving the request

use crate::config::ENTRY_PAGE;
use crate::settings::{Document, SettingsError, SettingsStore};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, get_service, post};
use axum::{Json, Router};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// In-process stop request for one listener run
///
/// Fired either by the lifecycle controller or by `POST /shutdown`; the
/// listener's accept loop and its drain deadline wait on it. A signal fired
/// before anyone waits is remembered.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    fired: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            fired: Arc::new(fired),
        }
    }

    pub fn fire(&self) {
        self.fired.send_replace(true);
    }

    pub fn is_fired(&self) -> bool {
        *self.fired.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.fired.subscribe();
        // The sender lives in `self`, so this only returns once fired
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state handed to every route
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: SettingsStore,
    /// `None` when the hosting listener cannot be stopped gracefully
    pub shutdown: Option<ShutdownSignal>,
}

/// Build the full route table
pub fn router(state: AppState, static_dir: impl Into<PathBuf>) -> Router {
    let static_dir = static_dir.into();
    let entry_page = static_dir.join(ENTRY_PAGE);

    Router::new()
        .route("/", get_service(ServeFile::new(entry_page)))
        .route("/api/tagsettings", get(get_tag_settings).post(save_tag_settings))
        .route("/shutdown", post(shutdown))
        .fallback_service(ServeDir::new(static_dir))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

async fn get_tag_settings(State(state): State<AppState>) -> Response {
    match state.store.load() {
        Ok(doc) => (StatusCode::OK, Json(doc)).into_response(),
        Err(e) => settings_failure(e),
    }
}

async fn save_tag_settings(
    State(state): State<AppState>,
    Json(doc): Json<Document>,
) -> Response {
    match state.store.save(&doc) {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response(),
        Err(e) => settings_failure(e),
    }
}

async fn shutdown(State(state): State<AppState>) -> Response {
    match state.shutdown {
        Some(signal) => {
            tracing::info!("Shutdown requested over HTTP");
            signal.fire();
            (StatusCode::OK, "Server shutting down...").into_response()
        }
        None => {
            tracing::warn!("Shutdown requested but this listener has no graceful shutdown");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Not running with a graceful-shutdown capable server",
            )
                .into_response()
        }
    }
}

fn settings_failure(e: SettingsError) -> Response {
    tracing::error!("{}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}
