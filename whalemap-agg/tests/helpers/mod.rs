//! Test Helper Utilities
//!
//! Mock adapters and fixture builders shared by the whalemap-agg integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use whalemap_agg::pipeline::AggregationPipeline;
use whalemap_agg::query::QueryState;
use whalemap_agg::taxonomy::TaxonRegistry;
use whalemap_agg::travel::TravelCorrelator;
use whalemap_agg::types::{
    AdapterError, FetchRequest, Observation, RefetchPolicy, Source, SourceAdapter,
};
use whalemap_common::events::EventBus;
use whalemap_common::{Extent, LonLat};

/// 2025-01-21T12:00:00Z
pub fn focus() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 21, 12, 0, 0).unwrap()
}

pub fn salish_sea() -> Extent {
    Extent::new(-125.0, 47.0, -122.0, 49.5).unwrap()
}

pub fn animal(
    source: Source,
    id: u64,
    taxon: &str,
    coordinates: LonLat,
    hours_from_focus: i64,
) -> Observation {
    Observation::animal(
        source,
        id,
        taxon,
        coordinates,
        Some(focus() + Duration::hours(hours_from_focus)),
    )
}

pub fn vessel(name: &str, coordinates: LonLat) -> Observation {
    Observation::vessel(Source::Wsf, name, coordinates, Some(focus()), Some(90.0))
}

/// Query at [`focus`] ± `radius` over the Salish Sea
pub fn test_query(taxon: &str, radius: Duration) -> QueryState {
    let registry = TaxonRegistry::global();
    let node = registry.lookup(taxon).unwrap().clone();
    QueryState::new(
        focus(),
        radius,
        node,
        salish_sea(),
        FixedOffset::east_opt(0).unwrap(),
        registry,
    )
}

pub fn test_pipeline(
    adapters: Vec<Arc<dyn SourceAdapter>>,
    query: QueryState,
    adapter_timeout: std::time::Duration,
) -> Arc<AggregationPipeline> {
    Arc::new(AggregationPipeline::new(
        adapters,
        query,
        TravelCorrelator::default(),
        EventBus::new(256),
        adapter_timeout,
    ))
}

/// Returns a fixed result and counts calls
pub struct StaticAdapter {
    name: &'static str,
    observations: Vec<Observation>,
    policy: RefetchPolicy,
    calls: AtomicUsize,
}

impl StaticAdapter {
    pub fn new(name: &'static str, observations: Vec<Observation>) -> Self {
        Self::with_policy(name, observations, RefetchPolicy::QUERY_SCOPED)
    }

    pub fn with_policy(
        name: &'static str,
        observations: Vec<Observation>,
        policy: RefetchPolicy,
    ) -> Self {
        Self {
            name,
            observations,
            policy,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for StaticAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn refetch_policy(&self) -> RefetchPolicy {
        self.policy
    }

    async fn fetch(&self, _request: &FetchRequest) -> Result<Vec<Observation>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.observations.clone())
    }
}

/// Plays back one `(delay, result)` per call; repeats the last once exhausted
pub struct ScriptedAdapter {
    name: &'static str,
    script: Mutex<VecDeque<(std::time::Duration, Vec<Observation>)>>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(
        name: &'static str,
        script: Vec<(std::time::Duration, Vec<Observation>)>,
    ) -> Self {
        Self {
            name,
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, _request: &FetchRequest) -> Result<Vec<Observation>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, observations) = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap_or_default()
            }
        };
        tokio::time::sleep(delay).await;
        Ok(observations)
    }
}

/// Always fails with a network error
pub struct FailingAdapter(pub &'static str);

#[async_trait]
impl SourceAdapter for FailingAdapter {
    fn name(&self) -> &'static str {
        self.0
    }

    async fn fetch(&self, _request: &FetchRequest) -> Result<Vec<Observation>, AdapterError> {
        Err(AdapterError::Network("connection refused".to_string()))
    }
}
