//! Locally-entered observations and forced reload

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Serialize;
use tracing::info;

use crate::pipeline::RefreshReport;
use crate::sources::NewLocalObservation;
use crate::{ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: String,
}

/// POST /local-observations
///
/// The entry is published by the refresh scheduled here.
pub async fn add_local_observation(
    State(state): State<AppState>,
    Json(entry): Json<NewLocalObservation>,
) -> ApiResult<(StatusCode, Json<CreatedResponse>)> {
    let id = state.local_store.add(entry)?;
    info!(id = %id, "Local observation added");

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        pipeline.refresh().await;
    });

    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

/// POST /refresh
///
/// Refetches every adapter and answers once the generation has settled.
pub async fn reload(State(state): State<AppState>) -> Json<RefreshReport> {
    Json(state.pipeline.reload().await)
}

pub fn local_routes() -> Router<AppState> {
    Router::new()
        .route("/local-observations", post(add_local_observation))
        .route("/refresh", post(reload))
}
