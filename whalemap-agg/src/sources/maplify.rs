//! Regional-network adapter (Maplify / Whale Alert)
//!
//! The provider has no taxon parameter: sightings are fetched by bounding box and
//! date range, then filtered client-side against the taxon closure.
//!
//! # API Reference
//! - Endpoint: https://maplify.com/waseak/php/search-all-sightings.php?start=&end=&BBOX=minx,miny,maxx,maxy
//! - Response: `{"count": "<string>", "results": [...]}`
//! - `created` is a zone-less local timestamp (`2025-01-21 17:50:00`)

use super::{check_status, http_client, LenientNumber};
use crate::config::MaplifyConfig;
use crate::heuristics::{extract_tags, Ecotype};
use crate::taxonomy::{species, TaxonRegistry};
use crate::types::{
    observation_id, AdapterError, FetchRequest, Observation, ObservationKind, ObservationTags,
    Source, SourceAdapter, TaxonFilter,
};
use async_trait::async_trait;
use chrono::FixedOffset;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};
use whalemap_common::time::parse_naive_local;
use whalemap_common::LonLat;

#[derive(Debug, Deserialize)]
struct MaplifyResponse {
    /// Sent as a string
    #[serde(default)]
    count: Option<LenientNumber>,
    #[serde(default)]
    results: Vec<MaplifyResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct MaplifyResult {
    id: LenientNumber,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    scientific_name: Option<String>,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    number_sighted: Option<LenientNumber>,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
    #[serde(default)]
    comments: Option<String>,
    /// Originating sub-network (CINMS, ocean_alert, rwsas, FARPB, whale_alert)
    #[serde(default)]
    source: Option<String>,
}

pub struct MaplifyAdapter {
    client: Client,
    base_url: String,
    /// Offset the provider's `created` timestamps are written in
    reference_offset: FixedOffset,
    registry: Arc<TaxonRegistry>,
}

impl MaplifyAdapter {
    pub fn new(config: &MaplifyConfig, registry: Arc<TaxonRegistry>) -> Result<Self, AdapterError> {
        Ok(Self {
            client: http_client()?,
            base_url: config.base_url.clone(),
            reference_offset: config.reference_offset,
            registry,
        })
    }

    /// Normalize a result and keep it when its taxon is in the closure
    fn to_observation(&self, result: MaplifyResult, filter: &TaxonFilter) -> Option<Observation> {
        let raw_name = result
            .name
            .as_deref()
            .or(result.scientific_name.as_deref())
            .unwrap_or_default();
        let normalized = self.registry.normalize(raw_name);

        let body = result.comments.filter(|c| !c.trim().is_empty());
        let tags = body.as_deref().map(extract_tags).unwrap_or_default();
        let taxon = refine_by_ecotype(&normalized, &tags);

        let in_closure = filter.matches(&taxon)
            || filter.matches(&normalized)
            || result
                .scientific_name
                .as_deref()
                .is_some_and(|s| filter.matches(s));
        if !in_closure {
            return None;
        }

        let observed_at = result.created.as_deref().and_then(|created| {
            match parse_naive_local(created, self.reference_offset) {
                Ok(instant) => Some(instant),
                Err(e) => {
                    warn!(id = %result.id, created, error = %e, "Unparseable Maplify timestamp");
                    None
                }
            }
        });

        Some(Observation {
            id: observation_id(Source::Maplify, &result.id),
            source: Source::Maplify,
            kind: ObservationKind::Animal,
            taxon: Some(taxon),
            name: None,
            coordinates: LonLat::new(result.longitude, result.latitude),
            observed_at,
            count: result.number_sighted.as_ref().and_then(LenientNumber::as_u32),
            body,
            tags,
            url: None,
            photos: result
                .photo_url
                .filter(|u| !u.trim().is_empty())
                .into_iter()
                .collect(),
            obscured: false,
            network: result.source,
            heading_degrees: None,
        })
    }

    fn parse_response(&self, response: MaplifyResponse, filter: &TaxonFilter) -> Vec<Observation> {
        let received = response.results.len();
        if let Some(reported) = response.count.as_ref().and_then(LenientNumber::as_u32) {
            if reported as usize != received {
                debug!(reported, received, "Maplify count differs from results length");
            }
        }
        response
            .results
            .into_iter()
            .filter_map(|r| self.to_observation(r, filter))
            .collect()
    }
}

/// Orca reports with a recognised ecotype become the subspecies
fn refine_by_ecotype(taxon: &str, tags: &ObservationTags) -> String {
    if species(taxon) != "Orcinus orca" {
        return taxon.to_string();
    }
    match tags.ecotype {
        Some(Ecotype::Biggs) => "Orcinus orca rectipinnus".to_string(),
        Some(Ecotype::SouthernResident) => "Orcinus orca ater".to_string(),
        _ => taxon.to_string(),
    }
}

#[async_trait]
impl SourceAdapter for MaplifyAdapter {
    fn name(&self) -> &'static str {
        "maplify"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Observation>, AdapterError> {
        let extent = request.extent.clamped();
        let bbox = format!(
            "{:.3},{:.3},{:.3},{:.3}",
            extent.min_lon, extent.min_lat, extent.max_lon, extent.max_lat
        );
        let start = request
            .window
            .start
            .with_timezone(&self.reference_offset)
            .date_naive()
            .to_string();
        let end = request
            .window
            .end
            .with_timezone(&self.reference_offset)
            .date_naive()
            .to_string();

        debug!(generation = request.generation, %start, %end, %bbox, "Querying Maplify");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("start", start.as_str()), ("end", end.as_str()), ("BBOX", bbox.as_str())])
            .send()
            .await
            .map_err(|e| AdapterError::Network(format!("Maplify request failed: {}", e)))?;
        let response = check_status("Maplify", response).await?;
        let body: MaplifyResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("Failed to parse Maplify response: {}", e)))?;

        let observations = self.parse_response(body, &request.taxon);
        debug!(
            generation = request.generation,
            count = observations.len(),
            "Maplify sightings fetched"
        );
        Ok(observations)
    }
}
