//! Geographic primitives (WGS84 longitude/latitude)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius in meters (IUGG), matching the common web-map sphere
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS84 position, serialized as a GeoJSON `[lon, lat]` pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl From<[f64; 2]> for LonLat {
    fn from([lon, lat]: [f64; 2]) -> Self {
        Self { lon, lat }
    }
}

impl From<LonLat> for [f64; 2] {
    fn from(p: LonLat) -> Self {
        [p.lon, p.lat]
    }
}

/// Great-circle (haversine) distance in meters
pub fn distance_m(a: LonLat, b: LonLat) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Geographic bounding box used to scope provider queries
///
/// Deserialization goes through [`Extent::new`], so inverted or non-finite
/// bounds are rejected wherever an extent is read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ExtentBounds")]
pub struct Extent {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Extent {
    /// Build an extent, rejecting inverted or non-finite bounds
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        let all_finite = [min_lon, min_lat, max_lon, max_lat].iter().all(|v| v.is_finite());
        if !all_finite || min_lon > max_lon || min_lat > max_lat {
            return Err(Error::InvalidInput(format!(
                "Invalid extent {},{},{},{}",
                min_lon, min_lat, max_lon, max_lat
            )));
        }
        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    /// Parse `minx,miny,maxx,maxy`
    pub fn parse(value: &str) -> Result<Self> {
        let parts: Vec<f64> = value
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::InvalidInput(format!("Extent {:?}: {}", value, e)))?;
        match parts.as_slice() {
            [min_lon, min_lat, max_lon, max_lat] => {
                Self::new(*min_lon, *min_lat, *max_lon, *max_lat)
            }
            _ => Err(Error::InvalidInput(format!(
                "Extent needs 4 comma-separated numbers, got {:?}",
                value
            ))),
        }
    }

    /// Clamp to valid WGS84 ranges (map views can extend past the antimeridian)
    pub fn clamped(&self) -> Self {
        Self {
            min_lon: self.min_lon.max(-180.0),
            min_lat: self.min_lat.max(-90.0),
            max_lon: self.max_lon.min(180.0),
            max_lat: self.max_lat.min(90.0),
        }
    }

    pub fn contains(&self, p: LonLat) -> bool {
        p.lon >= self.min_lon && p.lon <= self.max_lon && p.lat >= self.min_lat && p.lat <= self.max_lat
    }
}

/// Unvalidated wire form of [`Extent`]
#[derive(Deserialize)]
struct ExtentBounds {
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
}

impl TryFrom<ExtentBounds> for Extent {
    type Error = Error;

    fn try_from(b: ExtentBounds) -> Result<Self> {
        Extent::new(b.min_lon, b.min_lat, b.max_lon, b.max_lat)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        let p = LonLat::new(-122.45, 47.8);
        assert_eq!(distance_m(p, p), 0.0);
    }

    #[test]
    fn test_one_degree_latitude() {
        let d = distance_m(LonLat::new(-123.0, 48.0), LonLat::new(-123.0, 49.0));
        // One degree of arc on the mean sphere
        assert!((d - 111_195.08).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn test_extent_parse_and_contains() {
        let extent = Extent::parse("-123.5, 47.0, -122.0, 49.0").unwrap();
        assert!(extent.contains(LonLat::new(-122.45, 47.8)));
        assert!(!extent.contains(LonLat::new(-121.0, 47.8)));
        assert_eq!(extent.to_string(), "-123.5,47,-122,49");
    }

    #[test]
    fn test_extent_rejects_inverted() {
        assert!(Extent::parse("0,0,-1,1").is_err());
        assert!(Extent::parse("1,2,3").is_err());
        assert!(Extent::parse("a,b,c,d").is_err());
    }

    #[test]
    fn test_extent_deserialize_validates() {
        let ok: Extent = serde_json::from_str(
            r#"{"min_lon":-125.0,"min_lat":47.0,"max_lon":-122.0,"max_lat":49.5}"#,
        )
        .unwrap();
        assert_eq!(ok, Extent::new(-125.0, 47.0, -122.0, 49.5).unwrap());

        let inverted = serde_json::from_str::<Extent>(
            r#"{"min_lon":-122.0,"min_lat":47.0,"max_lon":-125.0,"max_lat":49.5}"#,
        );
        assert!(inverted.unwrap_err().to_string().contains("Invalid extent"));
    }

    #[test]
    fn test_extent_clamped() {
        let wide = Extent::new(-200.0, -95.0, 200.0, 95.0).unwrap().clamped();
        assert_eq!(wide, Extent::new(-180.0, -90.0, 180.0, 90.0).unwrap());
    }

    #[test]
    fn test_lonlat_serializes_as_pair() {
        let json = serde_json::to_string(&LonLat::new(-122.5, 47.75)).unwrap();
        assert_eq!(json, "[-122.5,47.75]");
        let back: LonLat = serde_json::from_str(&json).unwrap();
        assert_eq!(back, LonLat::new(-122.5, 47.75));
    }
}
