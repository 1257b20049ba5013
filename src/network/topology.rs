use anyhow::Context;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::protocol::{Cost, DistanceVector};
use crate::RouterId;

/// Configured weight meaning "known destination, no direct link".
pub const NO_LINK: i64 = -1;

/// Raw configuration: router -> ordered (destination, weight) pairs.
pub type LinkSpec = BTreeMap<RouterId, Vec<(RouterId, i64)>>;

/// What the server knows about one router before the run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEntry {
    /// Configured weights with `-1` already translated to `Cost::Infinity`.
    pub initial_vector: DistanceVector,
    /// Destinations over a direct link (configured weight >= 0), in configuration order.
    pub neighbors: Vec<RouterId>,
}

/// The static topology. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    entries: BTreeMap<RouterId, TopologyEntry>,
}

impl Topology {
    pub fn from_links(links: LinkSpec) -> Result<Self> {
        if links.is_empty() {
            return Err(Error::Config("topology contains no routers".into()));
        }

        let mut entries = BTreeMap::new();
        for (router_id, pairs) in &links {
            let mut initial_vector = DistanceVector::new();
            let mut neighbors = Vec::new();
            initial_vector.insert(router_id.clone(), Cost::ZERO);

            for (destination, weight) in pairs {
                if destination == router_id {
                    return Err(Error::Config(format!("router {} lists a link to itself", router_id)));
                }
                if !links.contains_key(destination) {
                    return Err(Error::UnknownRouter(destination.clone()));
                }

                let cost = translate_weight(router_id, destination, *weight)?;
                if initial_vector.insert(destination.clone(), cost).is_some() {
                    return Err(Error::Config(format!(
                        "router {} lists destination {} twice",
                        router_id, destination
                    )));
                }
                if !cost.is_infinite() {
                    neighbors.push(destination.clone());
                }
            }

            // Every configured router is a destination, reachable or not.
            for other in links.keys() {
                initial_vector.entry(other.clone()).or_insert(Cost::Infinity);
            }

            debug!("Topology entry {}: neighbors {:?}", router_id, neighbors);
            entries.insert(
                router_id.clone(),
                TopologyEntry {
                    initial_vector,
                    neighbors,
                },
            );
        }

        // UPDATEs travel only along links both ends list, so a one-sided link is unusable.
        for (router_id, entry) in &entries {
            for neighbor in &entry.neighbors {
                let listed_back = entries
                    .get(neighbor)
                    .is_some_and(|other: &TopologyEntry| other.neighbors.contains(router_id));
                if !listed_back {
                    return Err(Error::Config(format!(
                        "link {} -> {} is not configured on {}",
                        router_id, neighbor, neighbor
                    )));
                }
            }
        }

        Ok(Self { entries })
    }

    /// Parses the line format `u: <v, 2>, <w, 5>, <x, -1>`.
    ///
    /// The characters `: < > ,` are separators; blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut links = LinkSpec::new();

        for (index, raw_line) in text.lines().enumerate() {
            let line = raw_line.split('#').next().unwrap_or_default();
            let cleaned: String = line
                .chars()
                .map(|c| if matches!(c, ':' | '<' | '>' | ',') { ' ' } else { c })
                .collect();
            let tokens: Vec<&str> = cleaned.split_whitespace().collect();

            let Some((router_id, rest)) = tokens.split_first() else {
                continue;
            };
            if rest.len() % 2 != 0 {
                return Err(Error::Config(format!(
                    "line {}: expected (destination, weight) pairs after {}",
                    index + 1,
                    router_id
                )));
            }

            let mut pairs = Vec::with_capacity(rest.len() / 2);
            for pair in rest.chunks(2) {
                let weight = pair[1].parse::<i64>().map_err(|e| {
                    Error::Config(format!("line {}: bad weight {:?}: {}", index + 1, pair[1], e))
                })?;
                pairs.push((pair[0].to_string(), weight));
            }

            if links.insert(router_id.to_string(), pairs).is_some() {
                return Err(Error::Config(format!(
                    "line {}: router {} is defined twice",
                    index + 1,
                    router_id
                )));
            }
        }

        Self::from_links(links)
    }

    /// Parses `{ "u": [["v", 2], ["w", 5]], ... }`.
    pub fn from_json(text: &str) -> Result<Self> {
        let links: LinkSpec =
            serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid topology JSON: {}", e)))?;
        Self::from_links(links)
    }

    /// Loads a topology file; `.json` files use the JSON form, anything else the line form.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading topology {}", path.display()))?;

        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let topology = if is_json {
            Self::from_json(&content)
        } else {
            Self::parse(&content)
        };

        topology.with_context(|| format!("parsing topology {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, router_id: &str) -> bool {
        self.entries.contains_key(router_id)
    }

    pub fn entry(&self, router_id: &str) -> Option<&TopologyEntry> {
        self.entries.get(router_id)
    }

    pub fn neighbors(&self, router_id: &str) -> &[RouterId] {
        self.entries
            .get(router_id)
            .map(|entry| entry.neighbors.as_slice())
            .unwrap_or_default()
    }

    pub fn router_ids(&self) -> impl Iterator<Item = &RouterId> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RouterId, &TopologyEntry)> {
        self.entries.iter()
    }

    /// Direct links as `(from, to, weight)`, as seen from `from`'s configuration.
    pub fn links(&self) -> impl Iterator<Item = (&RouterId, &RouterId, u32)> {
        self.entries.iter().flat_map(|(from, entry)| {
            entry.initial_vector.iter().filter_map(move |(to, cost)| match cost {
                Cost::Finite(weight) if to != from => Some((from, to, *weight)),
                _ => None,
            })
        })
    }
}

fn translate_weight(router_id: &str, destination: &str, weight: i64) -> Result<Cost> {
    if weight == NO_LINK {
        return Ok(Cost::Infinity);
    }
    u32::try_from(weight).map(Cost::Finite).map_err(|_| {
        Error::Config(format!(
            "weight {} from {} to {} is out of range",
            weight, router_id, destination
        ))
    })
}
