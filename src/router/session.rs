use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::AppState;
use crate::error::Result;
use crate::router::Authenticated;

/// Handler resuming a prior session from scoped storage.
pub async fn restore(State(state): State<AppState>) -> Result<Response> {
    Ok(match state.sessions.restore().await? {
        Some(session) => Json(Authenticated::from(session)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// Handler tearing down the current session. Idempotent.
pub async fn logout(State(state): State<AppState>) -> Result<StatusCode> {
    state.sessions.close().await?;
    Ok(StatusCode::NO_CONTENT)
}
