//! Source adapters
//!
//! One adapter per provider, each implementing [`SourceAdapter`] so the
//! aggregation pipeline can run them concurrently with per-adapter failure
//! isolation.
//!
//! # Adapters
//! 1. **inaturalist** - Citizen-science observation API (paged, rate limited)
//! 2. **maplify** - Regional sightings network, filtered client-side by taxon
//! 3. **wsf** - Washington State Ferries vessel positions (display overlay)
//! 4. **local** - Locally-entered observations from a session key/value store

pub mod inaturalist;
pub mod local;
pub mod maplify;
pub mod store;
pub mod wsf;

use crate::config::SourcesConfig;
use crate::taxonomy::TaxonRegistry;
use crate::types::{AdapterError, SourceAdapter};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;

pub use inaturalist::INaturalistAdapter;
pub use local::LocalAdapter;
pub use maplify::MaplifyAdapter;
pub use store::{KeyValueStore, LocalObservationStore, MemoryStore, NewLocalObservation};
pub use wsf::WsfAdapter;

/// Build the enabled adapters in a stable order
///
/// The vessel feed is skipped (with a log line) when no access code is configured.
pub fn build_adapters(
    config: &SourcesConfig,
    registry: Arc<TaxonRegistry>,
    local_store: Arc<LocalObservationStore>,
) -> Result<Vec<Arc<dyn SourceAdapter>>, AdapterError> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    if config.inaturalist.enabled {
        adapters.push(Arc::new(INaturalistAdapter::new(
            &config.inaturalist,
            Arc::clone(&registry),
        )?));
    }

    if config.maplify.enabled {
        adapters.push(Arc::new(MaplifyAdapter::new(
            &config.maplify,
            Arc::clone(&registry),
        )?));
    }

    if config.wsf.enabled {
        match config.wsf.access_code.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(_) => adapters.push(Arc::new(WsfAdapter::new(&config.wsf)?)),
            None => info!("No WSF access code configured, vessel positions disabled"),
        }
    }

    if config.local.enabled {
        adapters.push(Arc::new(LocalAdapter::new(local_store)));
    }

    info!(
        adapters = ?adapters.iter().map(|a| a.name()).collect::<Vec<_>>(),
        "Source adapters ready"
    );
    Ok(adapters)
}

/// Numeric field that some providers send as a string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum LenientNumber {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl LenientNumber {
    pub(crate) fn as_u32(&self) -> Option<u32> {
        match self {
            LenientNumber::Integer(n) => u32::try_from(*n).ok(),
            LenientNumber::Float(f) if f.is_finite() && *f >= 0.0 => Some(f.round() as u32),
            LenientNumber::Float(_) => None,
            LenientNumber::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for LenientNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LenientNumber::Integer(n) => write!(f, "{}", n),
            LenientNumber::Float(v) => write!(f, "{}", v),
            LenientNumber::Text(s) => f.write_str(s.trim()),
        }
    }
}

/// Shared HTTP client setup
pub(crate) fn http_client() -> Result<reqwest::Client, AdapterError> {
    reqwest::Client::builder()
        .user_agent(whalemap_common::config::get_user_agent())
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| AdapterError::Network(format!("Failed to build HTTP client: {}", e)))
}

/// Map a non-success response to an API error, keeping the body for the log
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AdapterError::Api(format!(
        "{} returned {}: {}",
        provider,
        status,
        body.chars().take(200).collect::<String>()
    )))
}
