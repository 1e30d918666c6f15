//! Query state: the four reactive inputs of the aggregation pipeline
//!
//! Time focus, time-window radius, taxon selection and spatial extent. Each has
//! a typed setter and a setter taking its canonical string encoding.

use crate::reactive::ReactiveValue;
use crate::taxonomy::{TaxonNode, TaxonRegistry};
use crate::types::{QueryChanges, TaxonFilter, TimeWindow};
use chrono::{DateTime, Duration, FixedOffset, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use whalemap_common::events::QueryField;
use whalemap_common::time::{format_iso_duration, parse_instant, parse_iso_duration};
use whalemap_common::{Error, Extent, Result};

/// Reactive query inputs
#[derive(Clone)]
pub struct QueryState {
    pub focus: ReactiveValue<DateTime<Utc>>,
    pub radius: ReactiveValue<Duration>,
    pub taxon: ReactiveValue<TaxonNode>,
    pub extent: ReactiveValue<Extent>,
    /// Offset used for zone-less focus strings
    local_offset: FixedOffset,
    registry: Arc<TaxonRegistry>,
}

impl QueryState {
    pub fn new(
        focus: DateTime<Utc>,
        radius: Duration,
        taxon: TaxonNode,
        extent: Extent,
        local_offset: FixedOffset,
        registry: Arc<TaxonRegistry>,
    ) -> Self {
        Self {
            focus: ReactiveValue::new(focus),
            radius: ReactiveValue::new(radius.abs()),
            taxon: ReactiveValue::new(taxon),
            extent: ReactiveValue::new(extent),
            local_offset,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<TaxonRegistry> {
        &self.registry
    }

    pub fn set_focus(&self, focus: DateTime<Utc>) -> bool {
        self.focus.set(focus)
    }

    /// ISO-8601 instant, or naive `YYYY-MM-DDTHH:MM` in the local offset
    pub fn set_focus_str(&self, value: &str) -> Result<bool> {
        let focus = parse_instant(value, self.local_offset).map_err(invalid)?;
        Ok(self.set_focus(focus))
    }

    /// Negative radii are stored as their absolute value
    pub fn set_radius(&self, radius: Duration) -> bool {
        self.radius.set(radius.abs())
    }

    /// ISO-8601 duration such as `P2D` or `PT12H`
    pub fn set_radius_str(&self, value: &str) -> Result<bool> {
        let radius = parse_iso_duration(value).map_err(invalid)?;
        Ok(self.set_radius(radius))
    }

    pub fn set_taxon(&self, taxon: TaxonNode) -> bool {
        self.taxon.set(taxon)
    }

    /// Taxon name, resolved by lookup and then by informal-name normalization
    pub fn set_taxon_str(&self, value: &str) -> Result<bool> {
        let node = self.resolve_taxon(value)?;
        Ok(self.set_taxon(node))
    }

    pub fn set_extent(&self, extent: Extent) -> bool {
        self.extent.set(extent)
    }

    /// `minx,miny,maxx,maxy`
    pub fn set_extent_str(&self, value: &str) -> Result<bool> {
        let extent = Extent::parse(value)?;
        Ok(self.set_extent(extent))
    }

    /// Set a field from its canonical string
    pub fn set_str(&self, field: QueryField, value: &str) -> Result<bool> {
        match field {
            QueryField::Focus => self.set_focus_str(value),
            QueryField::Radius => self.set_radius_str(value),
            QueryField::Taxon => self.set_taxon_str(value),
            QueryField::Extent => self.set_extent_str(value),
        }
    }

    /// Canonical string of a field's current value
    pub fn encode(&self, field: QueryField) -> String {
        match field {
            QueryField::Focus => self.focus.get().to_rfc3339_opts(SecondsFormat::Secs, true),
            QueryField::Radius => format_iso_duration(self.radius.get()),
            QueryField::Taxon => self.taxon.get().scientific_name,
            QueryField::Extent => self.extent.get().to_string(),
        }
    }

    pub fn resolve_taxon(&self, value: &str) -> Result<TaxonNode> {
        if let Some(node) = self.registry.lookup(value) {
            return Ok(node.clone());
        }
        let normalized = self.registry.normalize(value);
        self.registry
            .lookup(&normalized)
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("Unknown taxon {:?}", value)))
    }

    /// Consistent copy of all four inputs
    pub fn snapshot(&self) -> QuerySnapshot {
        QuerySnapshot {
            focus: self.focus.get(),
            radius: self.radius.get(),
            taxon: self.taxon.get(),
            extent: self.extent.get(),
        }
    }
}

fn invalid(e: Error) -> Error {
    match e {
        Error::InvalidInput(_) => e,
        other => Error::InvalidInput(other.to_string()),
    }
}

/// Query inputs at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySnapshot {
    pub focus: DateTime<Utc>,
    #[serde(with = "whalemap_common::time::duration_serde")]
    pub radius: Duration,
    pub taxon: TaxonNode,
    pub extent: Extent,
}

impl QuerySnapshot {
    /// `[focus - radius, focus + radius]`
    pub fn window(&self) -> TimeWindow {
        TimeWindow::around(self.focus, self.radius)
    }

    pub fn taxon_filter(&self, registry: &TaxonRegistry) -> TaxonFilter {
        registry.filter(&self.taxon)
    }

    /// Which inputs differ from `previous`
    pub fn changes_since(&self, previous: &QuerySnapshot) -> QueryChanges {
        QueryChanges {
            extent: self.extent != previous.extent,
            time: self.focus != previous.focus || self.radius != previous.radius,
            taxon: self.taxon != previous.taxon,
        }
    }
}
