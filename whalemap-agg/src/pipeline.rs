//! Aggregation pipeline
//!
//! Owns the canonical observation collection. Every query change starts a new
//! fetch generation that runs all adapters concurrently. Results are merged by
//! id as each adapter completes, results of superseded generations are dropped,
//! and the filtered collection is republished after every merge. Once all
//! adapters of a generation have settled, travel edges are recomputed.
//!
//! # Generations
//! The generation counter is the only correctness guard: every write re-checks
//! it under the state lock. Cancelling the previous generation's token merely
//! stops work whose results would be discarded anyway.

use crate::query::{QuerySnapshot, QueryState};
use crate::reactive::Subscription;
use crate::taxonomy::TaxonRegistry;
use crate::travel::TravelCorrelator;
use crate::types::{
    AdapterError, FetchRequest, Observation, ObservationKind, SourceAdapter, TaxonFilter,
    TimeWindow, Travel,
};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use whalemap_common::events::{EventBus, QueryField, WhalemapEvent};
use whalemap_common::time::now;
use whalemap_common::Extent;

/// One adapter's most recent successful fetch
#[derive(Debug, Clone)]
struct Contribution {
    /// Query inputs the fetch was made with
    snapshot: QuerySnapshot,
    observations: Vec<Observation>,
}

/// Inputs of the generation in progress
#[derive(Debug, Clone)]
struct Cycle {
    generation: u64,
    snapshot: QuerySnapshot,
    window: TimeWindow,
    filter: TaxonFilter,
}

#[derive(Debug, Default)]
struct PipelineState {
    /// id -> observation, rebuilt from contributions each generation
    canonical: HashMap<String, Observation>,
    contributions: HashMap<&'static str, Contribution>,
    cycle: Option<Cycle>,
    published: Arc<Vec<Observation>>,
    travels: Arc<Vec<Travel>>,
    settled_generation: u64,
}

/// Result of merging one adapter's fetch
#[derive(Debug, Clone, PartialEq, Eq)]
enum MergeOutcome {
    Merged(usize),
    Failed(String),
    Stale,
}

/// An adapter that failed during a refresh
#[derive(Debug, Clone, Serialize)]
pub struct AdapterFailure {
    pub source: &'static str,
    pub error: String,
}

/// Summary of one refresh cycle
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub generation: u64,
    /// Adapters called this cycle
    pub fetched: Vec<&'static str>,
    /// Adapters whose previous results were kept
    pub carried: Vec<&'static str>,
    pub failed: Vec<AdapterFailure>,
    /// A newer generation started before this one settled
    pub superseded: bool,
    /// Published observation count at settle time
    pub published: usize,
    pub travels: usize,
}

/// Concurrent fetch, merge, filter and publish
pub struct AggregationPipeline {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    registry: Arc<TaxonRegistry>,
    query: QueryState,
    correlator: TravelCorrelator,
    event_bus: EventBus,
    adapter_timeout: Duration,
    generation: AtomicU64,
    state: RwLock<PipelineState>,
    cancel: Mutex<CancellationToken>,
}

impl AggregationPipeline {
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        query: QueryState,
        correlator: TravelCorrelator,
        event_bus: EventBus,
        adapter_timeout: Duration,
    ) -> Self {
        Self {
            adapters,
            registry: Arc::clone(query.registry()),
            query,
            correlator,
            event_bus,
            adapter_timeout,
            generation: AtomicU64::new(0),
            state: RwLock::new(PipelineState::default()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn adapter_names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    /// Latest generation started
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Latest generation whose adapters all settled
    pub async fn settled_generation(&self) -> u64 {
        self.state.read().await.settled_generation
    }

    /// Published (filtered) observations, ordered by time then id
    pub async fn observations(&self) -> Arc<Vec<Observation>> {
        Arc::clone(&self.state.read().await.published)
    }

    /// Travel edges from the latest settled generation
    pub async fn travels(&self) -> Arc<Vec<Travel>> {
        Arc::clone(&self.state.read().await.travels)
    }

    /// Published observations inside `extent`
    pub async fn observations_in_extent(&self, extent: &Extent) -> Vec<Observation> {
        self.state
            .read()
            .await
            .published
            .iter()
            .filter(|o| extent.contains(o.coordinates))
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WhalemapEvent> {
        self.event_bus.subscribe()
    }

    /// Run a generation, refetching only adapters affected by the query change
    pub async fn refresh(&self) -> RefreshReport {
        self.run(false).await
    }

    /// Run a generation that refetches every adapter
    pub async fn reload(&self) -> RefreshReport {
        self.run(true).await
    }

    async fn run(&self, forced: bool) -> RefreshReport {
        let (cycle, token, to_fetch, carried) = self.begin_generation(forced).await;
        let generation = cycle.generation;

        let request = FetchRequest {
            generation,
            extent: cycle.snapshot.extent,
            window: cycle.window,
            taxon: cycle.filter.clone(),
        };

        let fetched: Vec<&'static str> = to_fetch.iter().map(|a| a.name()).collect();
        info!(
            generation,
            forced,
            fetched = ?fetched,
            carried = ?carried,
            "Starting fetch generation"
        );

        let request = &request;
        let mut pending: FuturesUnordered<_> = to_fetch
            .into_iter()
            .map(|adapter| {
                let token = token.clone();
                let timeout = self.adapter_timeout;
                async move {
                    let name = adapter.name();
                    let result = tokio::select! {
                        _ = token.cancelled() => Err(AdapterError::Cancelled),
                        outcome = tokio::time::timeout(timeout, adapter.fetch(request)) => {
                            outcome.unwrap_or(Err(AdapterError::Timeout(timeout)))
                        }
                    };
                    (name, result)
                }
            })
            .collect();

        let mut failed = Vec::new();
        let mut superseded = false;
        while let Some((name, result)) = pending.next().await {
            match self.merge(generation, name, result).await {
                MergeOutcome::Merged(_) => {}
                MergeOutcome::Failed(error) => failed.push(AdapterFailure {
                    source: name,
                    error,
                }),
                MergeOutcome::Stale => superseded = true,
            }
        }

        let settled = self.settle(generation).await;
        let state = self.state.read().await;
        RefreshReport {
            generation,
            fetched,
            carried,
            failed,
            superseded: superseded || !settled,
            published: state.published.len(),
            travels: state.travels.len(),
        }
    }

    /// Start a generation: pick adapters to refetch, carry the rest, and
    /// republish the carried results under the new filter
    async fn begin_generation(
        &self,
        forced: bool,
    ) -> (Cycle, CancellationToken, Vec<Arc<dyn SourceAdapter>>, Vec<&'static str>) {
        let mut state = self.state.write().await;

        // Snapshot and counter are both taken under the lock so a later
        // generation never holds an older query
        let snapshot = self.query.snapshot();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = {
            let mut current = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
            current.cancel();
            *current = CancellationToken::new();
            current.clone()
        };

        let mut to_fetch = Vec::new();
        let mut carried = Vec::new();
        for adapter in &self.adapters {
            let name = adapter.name();
            let keep = !forced
                && state.contributions.get(name).is_some_and(|previous| {
                    let changes = snapshot.changes_since(&previous.snapshot);
                    !adapter.refetch_policy().needs_refetch(&changes)
                });
            if keep {
                carried.push(name);
            } else {
                state.contributions.remove(name);
                to_fetch.push(Arc::clone(adapter));
            }
        }

        let mut canonical = HashMap::new();
        for adapter in &self.adapters {
            if let Some(contribution) = state.contributions.get(adapter.name()) {
                for observation in &contribution.observations {
                    canonical.insert(observation.id.clone(), observation.clone());
                }
            }
        }
        state.canonical = canonical;

        let cycle = Cycle {
            generation,
            window: snapshot.window(),
            filter: snapshot.taxon_filter(&self.registry),
            snapshot,
        };
        state.cycle = Some(cycle.clone());
        self.publish(&mut state, generation);

        (cycle, token, to_fetch, carried)
    }

    /// Merge one adapter's result if its generation is still the latest
    async fn merge(
        &self,
        generation: u64,
        name: &'static str,
        result: Result<Vec<Observation>, AdapterError>,
    ) -> MergeOutcome {
        let mut state = self.state.write().await;
        let latest = self.generation.load(Ordering::SeqCst);
        let snapshot = match &state.cycle {
            Some(cycle) if cycle.generation == generation && latest == generation => {
                cycle.snapshot.clone()
            }
            _ => {
                debug!(source = name, generation, latest, "Discarding result of superseded generation");
                return MergeOutcome::Stale;
            }
        };

        match result {
            Ok(observations) => {
                let count = observations.len();
                for observation in &observations {
                    state
                        .canonical
                        .insert(observation.id.clone(), observation.clone());
                }
                state.contributions.insert(
                    name,
                    Contribution {
                        snapshot,
                        observations,
                    },
                );
                debug!(source = name, generation, count, "Merged adapter results");
                self.publish(&mut state, generation);
                MergeOutcome::Merged(count)
            }
            Err(e) => {
                warn!(source = name, generation, error = %e, "Adapter failed (isolated)");
                self.event_bus.emit_lossy(WhalemapEvent::AdapterFailed {
                    generation,
                    source: name.to_string(),
                    error: e.to_string(),
                    timestamp: now(),
                });
                MergeOutcome::Failed(e.to_string())
            }
        }
    }

    /// Correlate the merged collection once a generation has settled
    ///
    /// Returns false when the generation was superseded.
    async fn settle(&self, generation: u64) -> bool {
        let mut state = self.state.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "Skipping correlation for superseded generation");
            return false;
        }

        let merged: Vec<Observation> = state.canonical.values().cloned().collect();
        let travels = self.correlator.correlate(&merged);
        let count = travels.len();
        state.travels = Arc::new(travels);
        state.settled_generation = generation;

        info!(
            generation,
            observations = state.published.len(),
            travels = count,
            "Generation settled"
        );
        self.event_bus.emit_lossy(WhalemapEvent::TravelsChanged {
            generation,
            count,
            timestamp: now(),
        });
        true
    }

    /// Filter the canonical collection for the current cycle and publish it
    fn publish(&self, state: &mut PipelineState, generation: u64) {
        let Some(cycle) = state.cycle.as_ref() else {
            return;
        };

        let mut published: Vec<Observation> = state
            .canonical
            .values()
            .filter(|o| passes_filter(o, &cycle.filter, &cycle.window))
            .cloned()
            .collect();
        published.sort_by(|a, b| {
            a.observed_at
                .cmp(&b.observed_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let count = published.len();
        state.published = Arc::new(published);
        self.event_bus.emit_lossy(WhalemapEvent::ObservationsChanged {
            generation,
            count,
            timestamp: now(),
        });
    }

    /// Subscribe to the query's reactive values; each change schedules a refresh
    ///
    /// Must be called from within a tokio runtime. Dropping the handle detaches.
    pub fn attach(self: &Arc<Self>) -> PipelineHandle {
        let notify = Arc::new(Notify::new());

        let subscriptions = [
            QueryField::Focus,
            QueryField::Radius,
            QueryField::Taxon,
            QueryField::Extent,
        ]
        .into_iter()
        .map(|field| {
            let notify = Arc::clone(&notify);
            let query = self.query.clone();
            let event_bus = self.event_bus.clone();
            let callback = move || {
                event_bus.emit_lossy(WhalemapEvent::QueryChanged {
                    field,
                    value: query.encode(field),
                    timestamp: now(),
                });
                notify.notify_one();
            };
            match field {
                QueryField::Focus => self.query.focus.subscribe(callback),
                QueryField::Radius => self.query.radius.subscribe(callback),
                QueryField::Taxon => self.query.taxon.subscribe(callback),
                QueryField::Extent => self.query.extent.subscribe(callback),
            }
        })
        .collect();

        let pipeline = Arc::downgrade(self);
        let driver = tokio::spawn(async move {
            loop {
                notify.notified().await;
                let Some(pipeline) = pipeline.upgrade() else {
                    break;
                };
                tokio::spawn(async move {
                    pipeline.refresh().await;
                });
            }
        });

        PipelineHandle {
            _subscriptions: subscriptions,
            driver,
        }
    }
}

/// Vessels always pass; animals need a taxon in the closure and a time in the
/// window (untimed records pass)
fn passes_filter(observation: &Observation, filter: &TaxonFilter, window: &TimeWindow) -> bool {
    match observation.kind {
        ObservationKind::Vessel => true,
        ObservationKind::Animal => {
            let in_taxon = observation
                .taxon
                .as_deref()
                .is_some_and(|t| filter.matches(t));
            let in_window = observation.observed_at.map_or(true, |t| window.contains(t));
            in_taxon && in_window
        }
    }
}

/// Keeps the pipeline attached to its query state
pub struct PipelineHandle {
    _subscriptions: Vec<Subscription>,
    driver: JoinHandle<()>,
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
