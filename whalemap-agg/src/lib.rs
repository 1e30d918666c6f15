//! whalemap-agg library interface
//!
//! Marine mammal sighting aggregation: source adapters, taxonomy, text
//! heuristics, the generation-guarded aggregation pipeline and travel
//! correlation, plus the HTTP surface the binary serves.

pub mod api;
pub mod config;
pub mod error;
pub mod heuristics;
pub mod pipeline;
pub mod query;
pub mod reactive;
pub mod sources;
pub mod taxonomy;
pub mod travel;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use crate::config::AggConfig;
use crate::pipeline::{AggregationPipeline, PipelineHandle};
use crate::query::QueryState;
use crate::sources::{build_adapters, LocalObservationStore};
use crate::taxonomy::TaxonRegistry;
use crate::travel::TravelCorrelator;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;
use whalemap_common::events::EventBus;
use whalemap_common::time::parse_instant;
use whalemap_common::{Error, Result};

/// Event bus capacity for pipeline and query notifications
pub const EVENT_BUS_CAPACITY: usize = 100;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AggregationPipeline>,
    /// Backing store of the local adapter; written by `POST /local-observations`
    pub local_store: Arc<LocalObservationStore>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Keeps the pipeline subscribed to query changes while any state clone lives
    _attachment: Arc<PipelineHandle>,
}

impl AppState {
    /// Attach the pipeline to its query state
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(pipeline: Arc<AggregationPipeline>, local_store: Arc<LocalObservationStore>) -> Self {
        let attachment = pipeline.attach();
        Self {
            event_bus: pipeline.event_bus().clone(),
            pipeline,
            local_store,
            startup_time: Utc::now(),
            _attachment: Arc::new(attachment),
        }
    }

    /// Build the pipeline, adapters and local store from configuration
    pub fn from_config(config: &AggConfig) -> Result<Self> {
        let registry = TaxonRegistry::global();
        let query = initial_query(config, Arc::clone(&registry))?;

        let local_store = Arc::new(LocalObservationStore::in_memory(
            Arc::clone(&registry),
            config.query.local_offset,
        ));
        let adapters = build_adapters(&config.sources, registry, Arc::clone(&local_store))
            .map_err(|e| Error::Config(e.to_string()))?;

        let pipeline = Arc::new(AggregationPipeline::new(
            adapters,
            query,
            TravelCorrelator::new(config.travel.clone()),
            EventBus::new(EVENT_BUS_CAPACITY),
            config.sources.adapter_timeout(),
        ));
        Ok(Self::new(pipeline, local_store))
    }
}

/// Query state from the `[query]` and `[extent]` sections
pub fn initial_query(config: &AggConfig, registry: Arc<TaxonRegistry>) -> Result<QueryState> {
    let offset = config.query.local_offset;
    let focus = match config.query.focus.as_deref() {
        Some(value) => parse_instant(value, offset)
            .map_err(|e| Error::Config(format!("query.focus: {}", e)))?,
        None => Utc::now(),
    };
    let taxon = registry
        .lookup(&config.query.taxon)
        .or_else(|| registry.lookup(&registry.normalize(&config.query.taxon)))
        .cloned()
        .ok_or_else(|| Error::Config(format!("query.taxon: unknown taxon {:?}", config.query.taxon)))?;

    info!(
        focus = %focus,
        radius = %whalemap_common::time::format_iso_duration(config.query.radius),
        taxon = %taxon.scientific_name,
        extent = %config.extent,
        "Initial query"
    );
    Ok(QueryState::new(
        focus,
        config.query.radius,
        taxon,
        config.extent,
        offset,
        registry,
    ))
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::observation_routes())
        .merge(api::query_routes())
        .merge(api::local_routes())
        .merge(api::event_routes())
        .with_state(state)
}
