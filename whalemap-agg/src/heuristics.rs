//! Free-text tag extraction
//!
//! Pure functions over a report body. Each returns "no match" rather than failing.

use crate::types::ObservationTags;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::warn;

static ECOTYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:(srkw|southern\s+residents?)|(nrkw|northern\s+residents?)|(transients?|bigg['’]?s))\b",
    )
    .expect("valid ecotype regex")
});

static POD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([JKLT])(?:\s*(?:\+|&|/|,|and)\s*[JKLT])*\s*-?\s*pods?\b")
        .expect("valid pod regex")
});

static INDIVIDUAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([JKLTjklt])-?0*(\d{1,3})([A-Z]\d{0,2})?(s)?\b").expect("valid individual regex")
});

static HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b((?:north|south)-?(?:east|west)|north|south|east|west)(?:-?bound)?\b")
        .expect("valid heading regex")
});

static KNOWN_INDIVIDUALS: Lazy<HashSet<String>> = Lazy::new(|| {
    include_str!("../data/individuals.txt")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
});

/// Killer whale ecotype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ecotype {
    #[serde(rename = "SRKW")]
    SouthernResident,
    #[serde(rename = "NRKW")]
    NorthernResident,
    #[serde(rename = "Biggs")]
    Biggs,
}

impl Ecotype {
    pub fn label(&self) -> &'static str {
        match self {
            Ecotype::SouthernResident => "SRKW",
            Ecotype::NorthernResident => "NRKW",
            Ecotype::Biggs => "Biggs",
        }
    }
}

impl fmt::Display for Ecotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Compass heading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Heading {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Heading {
    fn from_word(word: &str) -> Option<Self> {
        let word: String = word.to_lowercase().chars().filter(|c| *c != '-').collect();
        match word.as_str() {
            "north" => Some(Heading::North),
            "northeast" => Some(Heading::NorthEast),
            "east" => Some(Heading::East),
            "southeast" => Some(Heading::SouthEast),
            "south" => Some(Heading::South),
            "southwest" => Some(Heading::SouthWest),
            "west" => Some(Heading::West),
            "northwest" => Some(Heading::NorthWest),
            _ => None,
        }
    }
}

/// Individual or matriline id as written in a report
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct IndividualId {
    pod: char,
    number: u32,
    suffix: String,
    matriline: bool,
}

impl IndividualId {
    /// Catalogue form without the matriline marker
    fn catalogue(&self) -> String {
        format!("{}{}{}", self.pod, self.number, self.suffix)
    }
}

impl fmt::Display for IndividualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.catalogue())?;
        if self.matriline {
            f.write_str("s")?;
        }
        Ok(())
    }
}

/// Earliest ecotype mention wins
pub fn detect_ecotype(text: &str) -> Option<Ecotype> {
    let caps = ECOTYPE_RE.captures(text)?;
    if caps.get(1).is_some() {
        Some(Ecotype::SouthernResident)
    } else if caps.get(2).is_some() {
        Some(Ecotype::NorthernResident)
    } else {
        Some(Ecotype::Biggs)
    }
}

/// First named pod letter
///
/// Falls back to `T` for Bigg's, then to the pod of the first resident individual.
pub fn detect_pod(text: &str, ecotype: Option<Ecotype>) -> Option<char> {
    if let Some(caps) = POD_RE.captures(text) {
        return caps
            .get(1)
            .and_then(|m| m.as_str().chars().next())
            .map(|c| c.to_ascii_uppercase());
    }
    if ecotype == Some(Ecotype::Biggs) {
        return Some('T');
    }
    scan_individuals(text)
        .into_iter()
        .map(|id| id.pod)
        .find(|pod| matches!(pod, 'J' | 'K' | 'L'))
}

/// Known individuals and matrilines, deduplicated and sorted by (pod, number, suffix)
pub fn detect_individuals(text: &str) -> Vec<String> {
    let mut ids = scan_individuals(text);
    ids.sort();
    ids.dedup();
    ids.iter().map(ToString::to_string).collect()
}

/// First compass word
pub fn detect_heading(text: &str) -> Option<Heading> {
    HEADING_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| Heading::from_word(m.as_str()))
}

/// Run every heuristic over a report body
pub fn extract_tags(text: &str) -> ObservationTags {
    let ecotype = detect_ecotype(text);
    ObservationTags {
        ecotype,
        pod: detect_pod(text, ecotype),
        individuals: detect_individuals(text),
        heading: detect_heading(text),
    }
}

/// Accepted ids in order of appearance
fn scan_individuals(text: &str) -> Vec<IndividualId> {
    let mut found = Vec::new();
    for caps in INDIVIDUAL_RE.captures_iter(text) {
        let pod = match caps.get(1).and_then(|m| m.as_str().chars().next()) {
            Some(c) => c.to_ascii_uppercase(),
            None => continue,
        };
        let number = match caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok()) {
            Some(n) => n,
            None => continue,
        };
        let id = IndividualId {
            pod,
            number,
            suffix: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default(),
            matriline: caps.get(4).is_some(),
        };

        if id.matriline || KNOWN_INDIVIDUALS.contains(&id.catalogue()) {
            found.push(id);
        } else {
            warn!(individual = %id, "Unknown individual, ignoring");
        }
    }
    found
}
