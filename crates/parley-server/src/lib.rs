//! Parley server library logic.
//!
//! The HTTP surface is two endpoints, `start-session` and `end-session`.
//! Starting a session claims the conversation row, builds the persona
//! context and asks the configured [`VoiceProvider`] for a session; ending
//! one persists the transcript.

pub mod api_voice;
pub mod background;
pub mod config;
pub mod orchestrator;
pub mod transcript;

use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use parley_db::DbPool;
use parley_types::ProviderKind;
use parley_voice::{
    ElevenLabsClient, ElevenLabsProvider, LiveKitProvider, VoiceProvider, VoiceService,
};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use orchestrator::{SessionError, SessionOrchestrator};
pub use transcript::TranscriptFinalizer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Start/end session logic, including the in-flight dedup table.
    pub orchestrator: SessionOrchestrator,
}

/// Builds the provider selected by `voice.provider`.
///
/// Missing credentials are not an error here: the provider refuses to
/// create sessions, and every start request rolls back its claim.
pub fn build_provider(config: &config::Config) -> Arc<dyn VoiceProvider> {
    match config.voice.provider {
        ProviderKind::LiveKit => {
            if !config.livekit.has_credentials() {
                tracing::warn!("LiveKit credentials missing, voice sessions will fail to start");
            }
            Arc::new(LiveKitProvider::new(VoiceService::new(
                config.livekit.clone(),
            )))
        }
        ProviderKind::ElevenLabs => {
            if config.elevenlabs.api_key.is_empty() {
                tracing::warn!("ElevenLabs API key missing, voice sessions will fail to start");
            }
            Arc::new(ElevenLabsProvider::new(ElevenLabsClient::new(
                config.elevenlabs.clone(),
            )))
        }
    }
}

/// Runs `f` on a pooled connection on the blocking thread pool.
///
/// Pool exhaustion maps through `on_pool_error`, a panicked closure through
/// [`SessionError::Internal`].
pub(crate) async fn with_connection<T, F>(
    pool: &DbPool,
    on_pool_error: fn(String) -> SessionError,
    f: F,
) -> Result<T, SessionError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, SessionError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| on_pool_error(format!("db connection failed: {}", e)))?;
        f(&conn)
    })
    .await
    .map_err(|e| SessionError::Internal(format!("task join error: {}", e)))?
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/voice/start-session",
            post(api_voice::start_session_handler),
        )
        .route(
            "/api/voice/end-session",
            post(api_voice::end_session_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
