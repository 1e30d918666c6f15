//! Aggregator bootstrap configuration (`whalemap-agg.toml`)
//!
//! Every section is optional; missing keys fall back to compiled defaults.
//!
//! ```toml
//! port = 5730
//!
//! [logging]
//! level = "info"
//!
//! [query]
//! radius = "P2D"
//! taxon = "Cetacea"
//! local_offset = "-08:00"
//!
//! [extent]
//! min_lon = -125.0
//! min_lat = 47.0
//! max_lon = -122.0
//! max_lat = 49.5
//!
//! [sources]
//! adapter_timeout_secs = 20
//!
//! [sources.wsf]
//! access_code = "..."
//!
//! [travel]
//! max_gap = "PT12H"
//! ```

use crate::travel::TravelConfig;
use chrono::{Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use whalemap_common::config::{load_config, LoggingConfig};
use whalemap_common::{Extent, Result};

/// Config file name searched in the platform config directories
pub const CONFIG_FILE_NAME: &str = "whalemap-agg.toml";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "WHALEMAP_CONFIG";

pub const DEFAULT_PORT: u16 = 5730;

/// Top-level aggregator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggConfig {
    pub port: u16,
    pub logging: LoggingConfig,
    pub query: QueryConfig,
    #[serde(default = "default_extent")]
    pub extent: Extent,
    pub sources: SourcesConfig,
    pub travel: TravelConfig,
}

impl Default for AggConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            logging: LoggingConfig::default(),
            query: QueryConfig::default(),
            extent: default_extent(),
            sources: SourcesConfig::default(),
            travel: TravelConfig::default(),
        }
    }
}

impl AggConfig {
    /// Resolve and load the config file (explicit path, `WHALEMAP_CONFIG`,
    /// user config dir, `/etc/whalemap`), falling back to defaults
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<std::path::PathBuf>)> {
        load_config(explicit, CONFIG_ENV_VAR, CONFIG_FILE_NAME)
    }
}

/// Salish Sea
fn default_extent() -> Extent {
    Extent {
        min_lon: -125.0,
        min_lat: 47.0,
        max_lon: -122.0,
        max_lat: 49.5,
    }
}

/// Initial query state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Initial time focus (ISO instant or naive local); `None` means now
    pub focus: Option<String>,
    #[serde(with = "whalemap_common::time::duration_serde")]
    pub radius: Duration,
    pub taxon: String,
    /// Offset applied to zone-less focus strings and local entries
    #[serde(with = "whalemap_common::time::offset_serde")]
    pub local_offset: FixedOffset,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            focus: None,
            radius: Duration::days(2),
            taxon: "Cetacea".to_string(),
            local_offset: pacific_standard(),
        }
    }
}

fn pacific_standard() -> FixedOffset {
    FixedOffset::west_opt(8 * 3600).unwrap_or_else(utc)
}

fn utc() -> FixedOffset {
    Utc.fix()
}

/// Source adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Per-adapter fetch timeout; a timeout counts as an adapter failure
    pub adapter_timeout_secs: u64,
    pub inaturalist: INaturalistConfig,
    pub maplify: MaplifyConfig,
    pub wsf: WsfConfig,
    pub local: LocalConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_secs: 20,
            inaturalist: INaturalistConfig::default(),
            maplify: MaplifyConfig::default(),
            wsf: WsfConfig::default(),
            local: LocalConfig::default(),
        }
    }
}

impl SourcesConfig {
    pub fn adapter_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.adapter_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct INaturalistConfig {
    pub enabled: bool,
    pub base_url: String,
    pub per_page: u32,
    /// Page cap per fetch
    pub max_pages: u32,
    pub requests_per_second: u32,
}

impl Default for INaturalistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.inaturalist.org/v2/observations".to_string(),
            per_page: 200,
            max_pages: 5,
            requests_per_second: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaplifyConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Offset the provider's zone-less timestamps are written in
    #[serde(with = "whalemap_common::time::offset_serde")]
    pub reference_offset: FixedOffset,
}

impl Default for MaplifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://maplify.com/waseak/php/search-all-sightings.php".to_string(),
            reference_offset: utc(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsfConfig {
    pub enabled: bool,
    pub base_url: String,
    /// WSDOT traveler API access code; the adapter is skipped without one
    pub access_code: Option<String>,
}

impl Default for WsfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://www.wsdot.wa.gov/ferries/api/vessels/rest/vessellocations"
                .to_string(),
            access_code: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub enabled: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
