//! Locally-entered observations
//!
//! Observations are kept as a GeoJSON FeatureCollection under a fixed key in a
//! session-scoped key/value store. Nothing is written to disk.

use crate::heuristics::extract_tags;
use crate::taxonomy::TaxonRegistry;
use crate::types::{observation_id, AdapterError, Observation, Source};
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;
use whalemap_common::time::parse_instant;
use whalemap_common::LonLat;

/// Key the collection is stored under
pub const LOCAL_OBSERVATIONS_KEY: &str = "whalemap.local-observations";

/// Scoped string key/value store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AdapterError>;
    fn set(&self, key: &str, value: String) -> Result<(), AdapterError>;
}

/// In-memory store living as long as the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, AdapterError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| AdapterError::Store("store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), AdapterError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AdapterError::Store("store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

// GeoJSON shapes

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FeatureCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    features: Vec<Feature>,
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self {
            kind: "FeatureCollection".to_string(),
            features: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    geometry: Point,
    #[serde(default)]
    properties: FeatureProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Point {
    #[serde(rename = "type")]
    kind: String,
    coordinates: LonLat,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeatureProperties {
    #[serde(default)]
    taxon: Option<String>,
    #[serde(default)]
    observed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

/// A user-entered sighting
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLocalObservation {
    pub taxon: String,
    pub coordinates: LonLat,
    /// ISO-8601 instant or naive local time
    pub observed_at: String,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Reads and appends locally-entered observations
pub struct LocalObservationStore {
    store: Arc<dyn KeyValueStore>,
    registry: Arc<TaxonRegistry>,
    /// Offset for naive local `observedAt` values
    local_offset: FixedOffset,
    /// Serializes read-modify-write in `add`
    write_lock: Mutex<()>,
}

impl LocalObservationStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        registry: Arc<TaxonRegistry>,
        local_offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            registry,
            local_offset,
            write_lock: Mutex::new(()),
        }
    }

    /// Backed by a fresh [`MemoryStore`]
    pub fn in_memory(registry: Arc<TaxonRegistry>, local_offset: FixedOffset) -> Self {
        Self::new(Arc::new(MemoryStore::new()), registry, local_offset)
    }

    fn read_collection(&self) -> Result<FeatureCollection, AdapterError> {
        match self.store.get(LOCAL_OBSERVATIONS_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| AdapterError::Parse(format!("Local observations: {}", e))),
            None => Ok(FeatureCollection::default()),
        }
    }

    /// All stored observations as canonical records
    pub fn load(&self) -> Result<Vec<Observation>, AdapterError> {
        let collection = self.read_collection()?;
        let observations: Vec<Observation> = collection
            .features
            .iter()
            .enumerate()
            .filter_map(|(index, feature)| self.to_observation(index, feature))
            .collect();
        debug!(count = observations.len(), "Loaded local observations");
        Ok(observations)
    }

    fn to_observation(&self, index: usize, feature: &Feature) -> Option<Observation> {
        let provider_id = match feature.id.as_deref() {
            Some(id) => id.strip_prefix("local:").unwrap_or(id).to_string(),
            None => index.to_string(),
        };

        let raw_taxon = match feature.properties.taxon.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => {
                warn!(id = %provider_id, "Local observation has no taxon, skipping");
                return None;
            }
        };

        let observed_at = feature.properties.observed_at.as_deref().and_then(|value| {
            match parse_instant(value, self.local_offset) {
                Ok(instant) => Some(instant),
                Err(e) => {
                    warn!(id = %provider_id, error = %e, "Unparseable local observedAt");
                    None
                }
            }
        });

        let mut observation = Observation::animal(
            Source::Local,
            &provider_id,
            self.registry.normalize(raw_taxon),
            feature.geometry.coordinates,
            observed_at,
        );
        observation.count = feature.properties.count;
        if let Some(body) = &feature.properties.body {
            observation.tags = extract_tags(body);
            observation.body = Some(body.clone());
        }
        Some(observation)
    }

    /// Append a user-entered observation and return its id (`local:<uuid>`)
    pub fn add(&self, entry: NewLocalObservation) -> Result<String, AdapterError> {
        if entry.taxon.trim().is_empty() {
            return Err(AdapterError::InvalidInput("taxon is required".to_string()));
        }
        let LonLat { lon, lat } = entry.coordinates;
        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
            return Err(AdapterError::InvalidInput(format!(
                "coordinates out of range: [{}, {}]",
                lon, lat
            )));
        }
        let observed_at: DateTime<Utc> = parse_instant(&entry.observed_at, self.local_offset)
            .map_err(|e| AdapterError::InvalidInput(e.to_string()))?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AdapterError::Store("write lock poisoned".to_string()))?;

        let mut collection = self.read_collection()?;
        let uuid = Uuid::new_v4().to_string();
        collection.features.push(Feature {
            kind: "Feature".to_string(),
            id: Some(uuid.clone()),
            geometry: Point {
                kind: "Point".to_string(),
                coordinates: entry.coordinates,
            },
            properties: FeatureProperties {
                taxon: Some(entry.taxon.trim().to_string()),
                observed_at: Some(observed_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
                count: entry.count,
                body: entry.body,
            },
        });

        let serialized = serde_json::to_string(&collection)
            .map_err(|e| AdapterError::Store(format!("Serialize local observations: {}", e)))?;
        self.store.set(LOCAL_OBSERVATIONS_KEY, serialized)?;

        let id = observation_id(Source::Local, &uuid);
        debug!(id = %id, "Added local observation");
        Ok(id)
    }
}
