//! Core types and the source adapter trait
//!
//! Defines the canonical `Observation` record every provider is normalized into,
//! the inferred `Travel` edge, and the `SourceAdapter` trait that each provider
//! implements for uniform concurrent execution by the aggregation pipeline.

use crate::heuristics::{Ecotype, Heading};
use crate::taxonomy::TaxonNode;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use whalemap_common::{Extent, LonLat};

// ============================================================================
// Observation
// ============================================================================

/// Provider identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Citizen-science observation API (iNaturalist)
    INaturalist,
    /// Regional sightings network (Maplify / Whale Alert)
    Maplify,
    /// Vessel-tracking feed (Washington State Ferries)
    Wsf,
    /// Locally-entered observations
    Local,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::INaturalist => "inaturalist",
            Source::Maplify => "maplify",
            Source::Wsf => "wsf",
            Source::Local => "local",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespaced observation id: `<source>:<providerId>`
pub fn observation_id(source: Source, provider_id: impl fmt::Display) -> String {
    format!("{}:{}", source, provider_id)
}

/// What an observation is of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationKind {
    /// A marine mammal sighting; carries a taxon
    Animal,
    /// A vessel position; display-only, no taxon
    Vessel,
}

/// Tags derived from a report body by the text heuristics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationTags {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecotype: Option<Ecotype>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<char>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub individuals: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<Heading>,
}

/// Canonical sighting record
///
/// Immutable once built by an adapter; superseded records are dropped, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Globally unique, `<source>:<providerId>`
    pub id: String,
    pub source: Source,
    pub kind: ObservationKind,
    /// Canonical scientific name, or the raw provider string when unresolved
    pub taxon: Option<String>,
    /// Vessel name (vessel records only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub coordinates: LonLat,
    /// `None` when the provider gave no usable time
    pub observed_at: Option<DateTime<Utc>>,
    pub count: Option<u32>,
    pub body: Option<String>,
    #[serde(default)]
    pub tags: ObservationTags,
    pub url: Option<String>,
    #[serde(default)]
    pub photos: Vec<String>,
    /// Location deliberately blurred by the provider
    #[serde(default)]
    pub obscured: bool,
    /// Originating sub-network for aggregated providers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Course over ground in degrees (vessel records only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_degrees: Option<f64>,
}

impl Observation {
    /// Animal observation with every optional field empty
    pub fn animal(
        source: Source,
        provider_id: impl fmt::Display,
        taxon: impl Into<String>,
        coordinates: LonLat,
        observed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: observation_id(source, provider_id),
            source,
            kind: ObservationKind::Animal,
            taxon: Some(taxon.into()),
            name: None,
            coordinates,
            observed_at,
            count: None,
            body: None,
            tags: ObservationTags::default(),
            url: None,
            photos: Vec::new(),
            obscured: false,
            network: None,
            heading_degrees: None,
        }
    }

    /// Vessel position record
    pub fn vessel(
        source: Source,
        name: impl Into<String>,
        coordinates: LonLat,
        observed_at: Option<DateTime<Utc>>,
        heading_degrees: Option<f64>,
    ) -> Self {
        let name = name.into();
        Self {
            id: observation_id(source, &name),
            source,
            kind: ObservationKind::Vessel,
            taxon: None,
            name: Some(name),
            coordinates,
            observed_at,
            count: None,
            body: None,
            tags: ObservationTags::default(),
            url: None,
            photos: Vec::new(),
            obscured: false,
            network: None,
            heading_degrees,
        }
    }
}

// ============================================================================
// Travel
// ============================================================================

/// Inferred directed movement between two observations of the same species
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Travel {
    pub from: String,
    pub to: String,
    pub from_coordinates: LonLat,
    pub to_coordinates: LonLat,
    pub distance_meters: f64,
    pub elapsed_seconds: i64,
}

// ============================================================================
// Fetch request
// ============================================================================

/// Closed time window `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// `[focus - radius, focus + radius]`, clamped to the representable range
    pub fn around(focus: DateTime<Utc>, radius: Duration) -> Self {
        let radius = radius.abs();
        Self {
            start: focus
                .checked_sub_signed(radius)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: focus
                .checked_add_signed(radius)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

/// Taxon descendant-closure used to filter observations
#[derive(Debug, Clone, PartialEq)]
pub struct TaxonFilter {
    /// The selected taxon
    pub focus: TaxonNode,
    /// Lowercased scientific names of the focus taxon and all its descendants
    names: HashSet<String>,
}

impl TaxonFilter {
    pub fn new(focus: TaxonNode, closure: impl IntoIterator<Item = TaxonNode>) -> Self {
        let names = closure
            .into_iter()
            .map(|t| t.scientific_name.to_lowercase())
            .collect();
        Self { focus, names }
    }

    /// Whether a taxon name belongs to the closure (case-insensitive)
    pub fn matches(&self, taxon: &str) -> bool {
        self.names.contains(&taxon.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Everything an adapter needs to run one fetch
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Generation this fetch belongs to (logging only; the pipeline enforces staleness)
    pub generation: u64,
    pub extent: Extent,
    pub window: TimeWindow,
    pub taxon: TaxonFilter,
}

// ============================================================================
// Source adapter trait
// ============================================================================

/// Which query inputs an adapter's results depend on
///
/// When none of an adapter's inputs changed since its last successful fetch,
/// the pipeline keeps that fetch's results instead of calling the provider again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefetchPolicy {
    pub extent: bool,
    pub time: bool,
    pub taxon: bool,
    /// Refetch on every cycle regardless of inputs (cheap local sources)
    pub every_cycle: bool,
}

impl RefetchPolicy {
    /// Depends on extent, time window and taxon
    pub const QUERY_SCOPED: Self = Self {
        extent: true,
        time: true,
        taxon: true,
        every_cycle: false,
    };

    /// Always refetched
    pub const EVERY_CYCLE: Self = Self {
        extent: false,
        time: false,
        taxon: false,
        every_cycle: true,
    };

    /// Fetched once; only a forced reload refetches
    pub const ONCE: Self = Self {
        extent: false,
        time: false,
        taxon: false,
        every_cycle: false,
    };

    pub fn needs_refetch(&self, changes: &QueryChanges) -> bool {
        self.every_cycle
            || (self.extent && changes.extent)
            || (self.time && changes.time)
            || (self.taxon && changes.taxon)
    }
}

/// Which query inputs differ between two snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryChanges {
    pub extent: bool,
    pub time: bool,
    pub taxon: bool,
}

/// Source adapter trait
///
/// One implementation per provider. `fetch` maps a provider response into zero or
/// more canonical observations. Failures are isolated by the pipeline: a failing
/// adapter contributes nothing to the cycle and never blocks the others.
///
/// # Example
/// ```rust,ignore
/// use whalemap_agg::types::{AdapterError, FetchRequest, Observation, SourceAdapter};
///
/// pub struct Fixture(Vec<Observation>);
///
/// #[async_trait::async_trait]
/// impl SourceAdapter for Fixture {
///     fn name(&self) -> &'static str { "fixture" }
///
///     async fn fetch(&self, _request: &FetchRequest) -> Result<Vec<Observation>, AdapterError> {
///         Ok(self.0.clone())
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Adapter name for logging and failure reports
    fn name(&self) -> &'static str;

    /// Inputs this adapter's results depend on
    fn refetch_policy(&self) -> RefetchPolicy {
        RefetchPolicy::QUERY_SCOPED
    }

    /// Fetch and normalize observations for the request
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Observation>, AdapterError>;
}

/// Adapter failure
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Provider returned a non-success status
    #[error("API error: {0}")]
    Api(String),

    /// Malformed provider payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// Fetch exceeded the per-adapter timeout
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A newer generation started before the fetch completed
    #[error("Cancelled by a newer generation")]
    Cancelled,

    /// Local key/value store error
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid caller input (local observation entry)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
