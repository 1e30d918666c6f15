//! Vessel-tracking adapter (Washington State Ferries)
//!
//! Fetches current vessel positions from the WSDOT vessel locations REST API.
//! Vessel records are a display overlay: they carry a name and heading instead
//! of a taxon, and the pipeline does not taxon- or time-filter them.
//!
//! # API Reference
//! - Endpoint: https://www.wsdot.wa.gov/ferries/api/vessels/rest/vessellocations?apiaccesscode=...
//! - `TimeStamp` is a `/Date(1737500000000-0800)/` token (epoch milliseconds + zone)

use super::{check_status, http_client};
use crate::config::WsfConfig;
use crate::types::{
    AdapterError, FetchRequest, Observation, RefetchPolicy, Source, SourceAdapter,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use whalemap_common::LonLat;

static WCF_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Date\((-?\d+)").expect("valid WCF date regex"));

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VesselLocation {
    #[serde(rename = "VesselID")]
    vessel_id: u64,
    vessel_name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    heading: Option<f64>,
    in_service: bool,
    at_dock: bool,
    #[serde(default)]
    time_stamp: Option<String>,
}

/// Epoch milliseconds embedded in a `/Date(ms[+-]zone)/` token
pub fn parse_wcf_date(value: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = WCF_DATE_RE.captures(value)?.get(1)?.as_str().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

pub struct WsfAdapter {
    client: Client,
    base_url: String,
    access_code: Option<String>,
}

impl WsfAdapter {
    pub fn new(config: &WsfConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            client: http_client()?,
            base_url: config.base_url.clone(),
            access_code: config.access_code.clone(),
        })
    }

    fn to_observations(locations: Vec<VesselLocation>) -> Vec<Observation> {
        locations
            .into_iter()
            .filter(|v| v.in_service && !v.at_dock)
            .map(|v| {
                let observed_at = v.time_stamp.as_deref().and_then(|raw| {
                    let parsed = parse_wcf_date(raw);
                    if parsed.is_none() {
                        warn!(vessel = %v.vessel_name, timestamp = raw, "Unparseable vessel timestamp");
                    }
                    parsed
                });
                debug!(vessel_id = v.vessel_id, vessel = %v.vessel_name, "Vessel underway");
                Observation::vessel(
                    Source::Wsf,
                    v.vessel_name,
                    LonLat::new(v.longitude, v.latitude),
                    observed_at,
                    v.heading,
                )
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for WsfAdapter {
    fn name(&self) -> &'static str {
        "wsf"
    }

    /// Positions do not depend on the query; only a forced reload refetches
    fn refetch_policy(&self) -> RefetchPolicy {
        RefetchPolicy::ONCE
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Observation>, AdapterError> {
        let mut builder = self.client.get(&self.base_url);
        if let Some(code) = &self.access_code {
            builder = builder.query(&[("apiaccesscode", code.as_str())]);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AdapterError::Network(format!("WSF request failed: {}", e)))?;
        let response = check_status("WSF", response).await?;
        let locations: Vec<VesselLocation> = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("Failed to parse WSF response: {}", e)))?;

        let total = locations.len();
        let observations = Self::to_observations(locations);
        debug!(
            generation = request.generation,
            total,
            underway = observations.len(),
            "WSF vessel positions fetched"
        );
        Ok(observations)
    }
}
