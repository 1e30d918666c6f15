//! Published observation and travel collections

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use whalemap_common::Extent;

use crate::types::{Observation, Travel};
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ObservationParams {
    /// `minx,miny,maxx,maxy`
    pub bbox: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ObservationsResponse {
    pub generation: u64,
    pub count: usize,
    pub observations: Vec<Observation>,
}

#[derive(Debug, Serialize)]
pub struct TravelsResponse {
    pub generation: u64,
    pub count: usize,
    pub travels: Vec<Travel>,
}

/// GET /observations?bbox=minx,miny,maxx,maxy
pub async fn list_observations(
    State(state): State<AppState>,
    Query(params): Query<ObservationParams>,
) -> ApiResult<Json<ObservationsResponse>> {
    let observations = match params.bbox.as_deref() {
        Some(bbox) => {
            let extent = Extent::parse(bbox)?;
            state.pipeline.observations_in_extent(&extent).await
        }
        None => state.pipeline.observations().await.as_ref().clone(),
    };

    Ok(Json(ObservationsResponse {
        generation: state.pipeline.current_generation(),
        count: observations.len(),
        observations,
    }))
}

/// GET /travels
pub async fn list_travels(State(state): State<AppState>) -> Json<TravelsResponse> {
    let travels = state.pipeline.travels().await.as_ref().clone();
    Json(TravelsResponse {
        generation: state.pipeline.settled_generation().await,
        count: travels.len(),
        travels,
    })
}

pub fn observation_routes() -> Router<AppState> {
    Router::new()
        .route("/observations", get(list_observations))
        .route("/travels", get(list_travels))
}
