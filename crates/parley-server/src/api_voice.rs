//! Handlers for `/api/voice/*`.

use crate::orchestrator::SessionError;
use crate::AppState;
use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parley_types::{
    DuplicateResponse, EndSessionRequest, EndSessionResponse, ErrorResponse, StartOutcome,
    StartSessionRequest,
};
use std::sync::Arc;

impl SessionError {
    fn status(&self) -> StatusCode {
        match self {
            SessionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SessionError::VoiceNotEnabled => StatusCode::FORBIDDEN,
            SessionError::ProviderSessionCreationFailed(_) => StatusCode::BAD_GATEWAY,
            SessionError::ContextFetchFailed(_)
            | SessionError::PersistenceFailed(_)
            | SessionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            SessionError::InvalidRequest(msg) => ErrorResponse {
                error: msg,
                details: None,
            },
            other => ErrorResponse {
                error: "Failed to start voice session".to_string(),
                details: Some(other.to_string()),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Handler for `POST /api/voice/start-session`.
///
/// `200` with the session config, `202` when another request owns the claim.
pub async fn start_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<Response, SessionError> {
    match state.orchestrator.start(&payload).await? {
        StartOutcome::Started(config) => Ok((StatusCode::OK, Json(config)).into_response()),
        StartOutcome::Duplicate => {
            Ok((StatusCode::ACCEPTED, Json(DuplicateResponse::default())).into_response())
        }
    }
}

/// Handler for `POST /api/voice/end-session`.
///
/// Always `200` once a conversation id is given, even if the transcript
/// could not be stored.
pub async fn end_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<EndSessionRequest>,
) -> Result<Json<EndSessionResponse>, SessionError> {
    Ok(Json(state.orchestrator.end(payload).await?))
}
