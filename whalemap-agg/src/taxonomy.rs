//! Static taxonomy tree
//!
//! Loaded once per process from the embedded table in `data/taxa.json` and never
//! mutated afterwards. The scientific name is the primary key.

use crate::types::TaxonFilter;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;
use whalemap_common::{Error, Result};

const EMBEDDED_TAXA: &str = include_str!("../data/taxa.json");

static GLOBAL: Lazy<Arc<TaxonRegistry>> = Lazy::new(|| {
    Arc::new(TaxonRegistry::from_json(EMBEDDED_TAXA).expect("embedded taxonomy table is valid"))
});

/// One node of the taxonomy tree
///
/// Accepts the citizen-science provider's field names (`name`,
/// `preferred_common_name`, `parent_id`) when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonNode {
    pub id: u64,
    #[serde(alias = "name")]
    pub scientific_name: String,
    #[serde(default, alias = "preferred_common_name")]
    pub common_name: Option<String>,
    #[serde(default, alias = "parent_id")]
    pub parent_id: Option<u64>,
}

/// Informal-term rules tried after exact lookup, in priority order
///
/// A rule matches when every group has at least one term present in the text.
struct NormalizeRule {
    groups: &'static [&'static [&'static str]],
    scientific_name: &'static str,
}

const ORCA_TERMS: &[&str] = &["orca", "killer whale"];

const NORMALIZE_RULES: &[NormalizeRule] = &[
    NormalizeRule {
        groups: &[&["resident killer whale", "resident orca"]],
        scientific_name: "Orcinus orca ater",
    },
    NormalizeRule {
        groups: &[&["bigg's", "bigg\u{2019}s", "biggs", "transient"], ORCA_TERMS],
        scientific_name: "Orcinus orca rectipinnus",
    },
    NormalizeRule {
        groups: &[ORCA_TERMS],
        scientific_name: "Orcinus orca",
    },
    NormalizeRule {
        groups: &[&["minke"]],
        scientific_name: "Balaenoptera acutorostrata",
    },
    NormalizeRule {
        groups: &[&["finback", "fin whale"]],
        scientific_name: "Balaenoptera physalus",
    },
    NormalizeRule {
        groups: &[&["humpback"]],
        scientific_name: "Megaptera novaeangliae",
    },
    NormalizeRule {
        groups: &[&["gray whale", "grey whale"]],
        scientific_name: "Eschrichtius robustus",
    },
    NormalizeRule {
        groups: &[&["dall's porpoise", "dalls porpoise"]],
        scientific_name: "Phocoenoides dalli",
    },
    NormalizeRule {
        groups: &[&["harbor porpoise", "harbour porpoise"]],
        scientific_name: "Phocoena phocoena",
    },
    NormalizeRule {
        groups: &[&["harbor seal", "harbour seal"]],
        scientific_name: "Phoca vitulina",
    },
    NormalizeRule {
        groups: &[&["steller"], &["sea lion"]],
        scientific_name: "Eumetopias jubatus",
    },
    NormalizeRule {
        groups: &[&["california"], &["sea lion"]],
        scientific_name: "Zalophus californianus",
    },
];

/// Read-only taxonomy with name lookup and descendant closure
#[derive(Debug)]
pub struct TaxonRegistry {
    nodes: Vec<TaxonNode>,
    by_id: HashMap<u64, usize>,
    by_scientific: HashMap<String, usize>,
    by_common: HashMap<String, usize>,
    children: HashMap<u64, Vec<usize>>,
}

impl TaxonRegistry {
    /// Process-wide registry built from the embedded table
    pub fn global() -> Arc<TaxonRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Build a registry from a JSON array of nodes
    ///
    /// Rejects duplicate ids or names, dangling parents, and cycles.
    pub fn from_json(json: &str) -> Result<Self> {
        let nodes: Vec<TaxonNode> = serde_json::from_str(json)
            .map_err(|e| Error::Parse(format!("Taxonomy table: {}", e)))?;
        Self::from_nodes(nodes)
    }

    pub fn from_nodes(nodes: Vec<TaxonNode>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(nodes.len());
        let mut by_scientific = HashMap::with_capacity(nodes.len());
        let mut by_common = HashMap::new();
        let mut children: HashMap<u64, Vec<usize>> = HashMap::new();

        for (index, node) in nodes.iter().enumerate() {
            if by_id.insert(node.id, index).is_some() {
                return Err(Error::Parse(format!("Duplicate taxon id {}", node.id)));
            }
            let key = node.scientific_name.trim().to_lowercase();
            if by_scientific.insert(key, index).is_some() {
                return Err(Error::Parse(format!(
                    "Duplicate taxon name {}",
                    node.scientific_name
                )));
            }
            if let Some(common) = node.common_name.as_deref().and_then(common_key) {
                by_common.entry(common).or_insert(index);
            }
            if let Some(parent) = node.parent_id {
                children.entry(parent).or_default().push(index);
            }
        }

        for node in &nodes {
            if let Some(parent) = node.parent_id {
                if !by_id.contains_key(&parent) {
                    return Err(Error::Parse(format!(
                        "Taxon {} has unknown parent {}",
                        node.scientific_name, parent
                    )));
                }
            }
        }

        // Walking up from any node must reach a root within nodes.len() steps
        for node in &nodes {
            let mut current = node.parent_id;
            let mut steps = 0;
            while let Some(id) = current {
                steps += 1;
                if steps > nodes.len() {
                    return Err(Error::Parse(format!(
                        "Taxonomy cycle through {}",
                        node.scientific_name
                    )));
                }
                current = by_id.get(&id).and_then(|&i| nodes[i].parent_id);
            }
        }

        Ok(Self {
            nodes,
            by_id,
            by_scientific,
            by_common,
            children,
        })
    }

    /// Case-insensitive lookup by scientific name, then by common name
    /// (ignoring a trailing "whale" on either side)
    pub fn lookup(&self, name: &str) -> Option<&TaxonNode> {
        let key = name.trim().to_lowercase();
        if let Some(&index) = self.by_scientific.get(&key) {
            return Some(&self.nodes[index]);
        }
        common_key(&key)
            .and_then(|common| self.by_common.get(&common))
            .map(|&index| &self.nodes[index])
    }

    pub fn by_id(&self, id: u64) -> Option<&TaxonNode> {
        self.by_id.get(&id).map(|&index| &self.nodes[index])
    }

    /// The node plus everything beneath it
    pub fn descendants(&self, node: &TaxonNode) -> HashSet<TaxonNode> {
        let mut result = HashSet::new();
        let mut stack = vec![node.clone()];
        while let Some(current) = stack.pop() {
            if let Some(kids) = self.children.get(&current.id) {
                stack.extend(kids.iter().map(|&i| self.nodes[i].clone()));
            }
            result.insert(current);
        }
        result
    }

    /// Closure filter for a selected taxon
    pub fn filter(&self, node: &TaxonNode) -> TaxonFilter {
        TaxonFilter::new(node.clone(), self.descendants(node))
    }

    /// Map free text to a canonical scientific name
    ///
    /// Returns the input unchanged (with a warning) when nothing matches.
    pub fn normalize(&self, text: &str) -> String {
        if let Some(node) = self.lookup(text) {
            return node.scientific_name.clone();
        }

        let lowered = text.to_lowercase();
        for rule in NORMALIZE_RULES {
            let matched = rule
                .groups
                .iter()
                .all(|group| group.iter().any(|term| lowered.contains(term)));
            if matched {
                return rule.scientific_name.to_string();
            }
        }

        warn!(taxon = text, "Unresolved taxon name, keeping raw string");
        text.to_string()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaxonNode> {
        self.nodes.iter()
    }
}

/// Binomial species of a taxon name: its first two whitespace tokens
pub fn species(name: &str) -> String {
    name.split_whitespace().take(2).collect::<Vec<_>>().join(" ")
}

fn common_key(name: &str) -> Option<String> {
    let lowered = name.trim().to_lowercase();
    let stripped = lowered.strip_suffix("whale").unwrap_or(&lowered).trim_end();
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}
