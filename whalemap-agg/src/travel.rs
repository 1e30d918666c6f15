//! Movement inference between sequential sightings
//!
//! A constrained nearest-successor search: each observation links to the first
//! later observation of the same species that is close enough in time and space
//! to be the same animals having swum there.

use crate::taxonomy::species;
use crate::types::{Observation, ObservationKind, Travel};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use whalemap_common::geo::distance_m;

/// Absorbs float error when a distance sits exactly on the bound
const DISTANCE_TOLERANCE_M: f64 = 1e-6;

/// Travel correlation bounds (`[travel]` in the config file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelConfig {
    /// Largest accepted gap between two sightings (ISO-8601 duration)
    #[serde(default = "default_max_gap", with = "whalemap_common::time::duration_serde")]
    pub max_gap: Duration,

    /// Largest accepted great-circle distance in meters
    #[serde(default = "default_max_distance_m")]
    pub max_distance_m: f64,

    /// Largest accepted implied speed in km/h
    #[serde(default = "default_max_speed_kmh")]
    pub max_speed_kmh: f64,
}

impl Default for TravelConfig {
    fn default() -> Self {
        Self {
            max_gap: default_max_gap(),
            max_distance_m: default_max_distance_m(),
            max_speed_kmh: default_max_speed_kmh(),
        }
    }
}

fn default_max_gap() -> Duration {
    Duration::hours(12)
}

fn default_max_distance_m() -> f64 {
    10_000.0
}

fn default_max_speed_kmh() -> f64 {
    10.0
}

/// Stateless correlator; the same input always yields the same edges
#[derive(Debug, Clone, Default)]
pub struct TravelCorrelator {
    config: TravelConfig,
}

struct Candidate<'a> {
    observation: &'a Observation,
    observed_at: DateTime<Utc>,
    species: String,
}

impl TravelCorrelator {
    pub fn new(config: TravelConfig) -> Self {
        Self { config }
    }

    /// Infer travel edges over the full merged collection
    ///
    /// Only timed animal records with a taxon take part.
    pub fn correlate(&self, observations: &[Observation]) -> Vec<Travel> {
        let mut candidates: Vec<Candidate<'_>> = observations
            .iter()
            .filter(|o| o.kind == ObservationKind::Animal)
            .filter_map(|o| {
                let taxon = o.taxon.as_deref()?;
                let observed_at = o.observed_at?;
                Some(Candidate {
                    observation: o,
                    observed_at,
                    species: species(taxon),
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.observed_at
                .cmp(&b.observed_at)
                .then_with(|| a.observation.id.cmp(&b.observation.id))
        });

        let mut travels = Vec::new();
        for (i, from) in candidates.iter().enumerate() {
            for to in &candidates[i + 1..] {
                let gap = to.observed_at - from.observed_at;
                if gap <= Duration::zero() {
                    continue;
                }
                if gap > self.config.max_gap {
                    break;
                }
                if to.species != from.species {
                    continue;
                }
                if let Some(travel) = self.link(from, to, gap) {
                    travels.push(travel);
                    break;
                }
            }
        }
        travels
    }

    fn link(&self, from: &Candidate<'_>, to: &Candidate<'_>, gap: Duration) -> Option<Travel> {
        let distance = distance_m(from.observation.coordinates, to.observation.coordinates);
        if distance > self.config.max_distance_m + DISTANCE_TOLERANCE_M {
            return None;
        }

        let hours = gap.to_std().ok()?.as_secs_f64() / 3600.0;
        let speed_kmh = (distance / 1000.0) / hours;
        if speed_kmh > self.config.max_speed_kmh + 1e-9 {
            return None;
        }

        Some(Travel {
            from: from.observation.id.clone(),
            to: to.observation.id.clone(),
            from_coordinates: from.observation.coordinates,
            to_coordinates: to.observation.coordinates,
            distance_meters: distance,
            elapsed_seconds: gap.num_seconds(),
        })
    }
}
