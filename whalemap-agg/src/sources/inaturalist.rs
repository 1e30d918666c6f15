//! Citizen-science adapter (iNaturalist)
//!
//! Queries the observation search API by taxon id, date range and bounding box,
//! paging until `total_results` is covered or the configured page cap is reached.
//!
//! # API Reference
//! - Endpoint: https://api.inaturalist.org/v2/observations
//! - Response: `{total_results, page, per_page, results: [...]}`
//! - Rate Limit: about 1 request/second per the API recommended practices

use super::{check_status, http_client};
use crate::config::INaturalistConfig;
use crate::heuristics::extract_tags;
use crate::taxonomy::TaxonRegistry;
use crate::types::{AdapterError, FetchRequest, Observation, Source, SourceAdapter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, warn};
use whalemap_common::LonLat;

/// Field projection requested from the v2 API
const FIELDS: &str = "(id:!t,description:!t,geojson:!t,geoprivacy:!t,photos:(url:!t),\
taxon:(name:!t,preferred_common_name:!t),taxon_geoprivacy:!t,time_observed_at:!t,uri:!t)";

#[derive(Debug, Deserialize)]
struct ResultPage {
    #[serde(default)]
    total_results: u64,
    #[serde(default)]
    page: u32,
    #[serde(default)]
    results: Vec<INatObservation>,
}

#[derive(Debug, Deserialize)]
struct INatObservation {
    id: u64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    geojson: Option<GeoPoint>,
    #[serde(default)]
    geoprivacy: Option<String>,
    #[serde(default)]
    photos: Vec<INatPhoto>,
    #[serde(default)]
    taxon: Option<INatTaxon>,
    #[serde(default)]
    taxon_geoprivacy: Option<String>,
    #[serde(default)]
    time_observed_at: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeoPoint {
    coordinates: LonLat,
}

#[derive(Debug, Deserialize)]
struct INatTaxon {
    name: String,
}

#[derive(Debug, Deserialize)]
struct INatPhoto {
    #[serde(default)]
    url: Option<String>,
}

pub struct INaturalistAdapter {
    client: Client,
    base_url: String,
    per_page: u32,
    max_pages: u32,
    registry: Arc<TaxonRegistry>,
    rate_limiter: DefaultDirectRateLimiter,
}

impl INaturalistAdapter {
    pub fn new(
        config: &INaturalistConfig,
        registry: Arc<TaxonRegistry>,
    ) -> Result<Self, AdapterError> {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            client: http_client()?,
            base_url: config.base_url.clone(),
            per_page: config.per_page.clamp(1, 200),
            max_pages: config.max_pages.max(1),
            registry,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    async fn fetch_page(
        &self,
        request: &FetchRequest,
        page: u32,
    ) -> Result<ResultPage, AdapterError> {
        self.rate_limiter.until_ready().await;

        let extent = request.extent.clamped();
        let params = [
            ("taxon_id", request.taxon.focus.id.to_string()),
            ("d1", request.window.start.date_naive().to_string()),
            ("d2", request.window.end.date_naive().to_string()),
            ("nelat", format!("{:.6}", extent.max_lat)),
            ("nelng", format!("{:.6}", extent.max_lon)),
            ("swlat", format!("{:.6}", extent.min_lat)),
            ("swlng", format!("{:.6}", extent.min_lon)),
            ("geoprivacy", "open".to_string()),
            ("taxon_geoprivacy", "open".to_string()),
            ("fields", FIELDS.to_string()),
            ("per_page", self.per_page.to_string()),
            ("page", page.to_string()),
        ];

        debug!(generation = request.generation, page, "Querying iNaturalist");
        let response = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| AdapterError::Network(format!("iNaturalist request failed: {}", e)))?;
        let response = check_status("iNaturalist", response).await?;
        response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("Failed to parse iNaturalist response: {}", e)))
    }

    /// Canonical record, or `None` (with a warning) when time or location is missing
    fn to_observation(&self, raw: INatObservation) -> Option<Observation> {
        let observed_at = match raw.time_observed_at.as_deref().map(DateTime::parse_from_rfc3339) {
            Some(Ok(t)) => t.with_timezone(&Utc),
            Some(Err(e)) => {
                warn!(id = raw.id, error = %e, "Unparseable iNaturalist time_observed_at, dropping");
                return None;
            }
            None => {
                warn!(id = raw.id, "iNaturalist observation without time_observed_at, dropping");
                return None;
            }
        };
        let Some(geojson) = raw.geojson else {
            warn!(id = raw.id, "iNaturalist observation without geometry, dropping");
            return None;
        };
        let Some(taxon) = raw.taxon else {
            warn!(id = raw.id, "iNaturalist observation without taxon, dropping");
            return None;
        };

        let obscured = raw.geoprivacy.as_deref() == Some("obscured")
            || raw.taxon_geoprivacy.as_deref() == Some("obscured");

        let mut observation = Observation::animal(
            Source::INaturalist,
            raw.id,
            self.registry.normalize(&taxon.name),
            geojson.coordinates,
            Some(observed_at),
        );
        let body = raw.description.filter(|d| !d.trim().is_empty());
        if let Some(text) = &body {
            observation.tags = extract_tags(text);
        }
        observation.body = body;
        observation.url = raw.uri;
        observation.photos = raw.photos.into_iter().filter_map(|p| p.url).collect();
        observation.obscured = obscured;
        Some(observation)
    }

    fn parse_page(&self, page: ResultPage) -> Vec<Observation> {
        page.results
            .into_iter()
            .filter_map(|raw| self.to_observation(raw))
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for INaturalistAdapter {
    fn name(&self) -> &'static str {
        "inaturalist"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Observation>, AdapterError> {
        let mut observations = Vec::new();
        let mut page = 1;

        loop {
            let result = self.fetch_page(request, page).await?;
            let received = result.results.len() as u64;
            let total = result.total_results;
            if result.page != 0 && result.page != page {
                debug!(requested = page, returned = result.page, "iNaturalist page mismatch");
            }
            observations.extend(self.parse_page(result));

            let covered = u64::from(page) * u64::from(self.per_page) >= total;
            if received == 0 || covered {
                break;
            }
            if page >= self.max_pages {
                warn!(
                    generation = request.generation,
                    total,
                    pages = page,
                    "iNaturalist page cap reached, results truncated"
                );
                break;
            }
            page += 1;
        }

        debug!(
            generation = request.generation,
            count = observations.len(),
            "iNaturalist observations fetched"
        );
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn adapter() -> INaturalistAdapter {
        INaturalistAdapter::new(&INaturalistConfig::default(), TaxonRegistry::global()).unwrap()
    }

    const PAGE: &str = r#"{
        "total_results": 3,
        "page": 1,
        "per_page": 200,
        "results": [
            {"id": 1, "description": "J37 and K25 southern resident orcas heading north",
             "geojson": {"type": "Point", "coordinates": [-122.45, 47.8]},
             "geoprivacy": null, "taxon_geoprivacy": "obscured",
             "photos": [{"url": "https://static.inaturalist.org/photos/1/square.jpg"}],
             "taxon": {"name": "Orcinus orca", "preferred_common_name": "Killer Whale"},
             "time_observed_at": "2025-01-21T10:15:00-08:00",
             "uri": "https://www.inaturalist.org/observations/1"},
            {"id": 2, "description": null,
             "geojson": {"type": "Point", "coordinates": [-122.5, 47.9]},
             "taxon": {"name": "Megaptera novaeangliae"},
             "time_observed_at": null},
            {"id": 3, "geojson": {"type": "Point", "coordinates": [-122.5, 47.9]},
             "taxon": {"name": "Megaptera novaeangliae"},
             "time_observed_at": "yesterday"}
        ]
    }"#;

    #[test]
    fn test_parse_page_maps_fields() {
        let page: ResultPage = serde_json::from_str(PAGE).unwrap();
        let observations = adapter().parse_page(page);

        // Records without a parseable time are dropped
        assert_eq!(observations.len(), 1);
        let orca = &observations[0];
        assert_eq!(orca.id, "inaturalist:1");
        assert_eq!(orca.taxon.as_deref(), Some("Orcinus orca"));
        assert_eq!(orca.coordinates, LonLat::new(-122.45, 47.8));
        assert_eq!(
            orca.observed_at,
            Some(Utc.with_ymd_and_hms(2025, 1, 21, 18, 15, 0).unwrap())
        );
        assert!(orca.obscured);
        assert_eq!(orca.photos.len(), 1);
        assert_eq!(orca.url.as_deref(), Some("https://www.inaturalist.org/observations/1"));
        assert_eq!(orca.tags.individuals, vec!["J37", "K25"]);
        assert_eq!(orca.tags.pod, Some('J'));
    }

    #[test]
    fn test_config_clamps() {
        let config = INaturalistConfig {
            per_page: 1000,
            max_pages: 0,
            requests_per_second: 0,
            ..INaturalistConfig::default()
        };
        let adapter = INaturalistAdapter::new(&config, TaxonRegistry::global()).unwrap();
        assert_eq!(adapter.per_page, 200);
        assert_eq!(adapter.max_pages, 1);
    }
}
