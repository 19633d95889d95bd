use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Status {
    name: String,
    url: String,
    version: String,
    /// Which identity store is of record for this process.
    pub mode: String,
}

/// Handler for `status.json`.
pub async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(Status {
        name: state.config.name.clone(),
        url: state.config.url.clone(),
        version: state.config.version().to_owned(),
        mode: state.repository.mode().to_string(),
    })
}

/// Handler exposing Prometheus metrics.
pub async fn metrics(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}
