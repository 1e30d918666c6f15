//! Query state endpoints
//!
//! Each setter takes the field's canonical string. A change schedules a new
//! fetch generation through the pipeline's query subscription; setting an
//! equal value does nothing.

use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use whalemap_common::events::QueryField;

use crate::query::QuerySnapshot;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SetValueRequest {
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct SetValueResponse {
    /// False when the new value equals the current one
    pub changed: bool,
    pub query: QuerySnapshot,
}

/// Path segment to query field (`time` is the focus instant)
fn parse_field(name: &str) -> Option<QueryField> {
    match name {
        "time" | "focus" => Some(QueryField::Focus),
        "radius" => Some(QueryField::Radius),
        "taxon" => Some(QueryField::Taxon),
        "extent" => Some(QueryField::Extent),
        _ => None,
    }
}

/// GET /query
pub async fn get_query(State(state): State<AppState>) -> Json<QuerySnapshot> {
    Json(state.pipeline.query().snapshot())
}

/// PUT /query/{time,radius,taxon,extent}
pub async fn set_query_field(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<SetValueRequest>,
) -> ApiResult<Json<SetValueResponse>> {
    let field = parse_field(&name)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown query field: {}", name)))?;

    let query = state.pipeline.query();
    let changed = query.set_str(field, &request.value)?;
    if changed {
        info!(field = ?field, value = %query.encode(field), "Query updated");
    }

    Ok(Json(SetValueResponse {
        changed,
        query: query.snapshot(),
    }))
}

pub fn query_routes() -> Router<AppState> {
    Router::new()
        .route("/query", get(get_query))
        .route("/query/:field", put(set_query_field))
}
