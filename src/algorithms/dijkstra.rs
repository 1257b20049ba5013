use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use crate::network::Topology;
use crate::protocol::{Cost, DistanceVector};
use crate::RouterId;

/// Shortest-path costs from every router to every configured router.
pub type AllPairs = BTreeMap<RouterId, DistanceVector>;

/// Reference costs from `source` over the configured directed weights.
///
/// Every router in the topology appears in the result; unreachable ones are `Infinity`.
pub fn shortest_paths(topology: &Topology, source: &str) -> DistanceVector {
    let mut adjacency: HashMap<&str, Vec<(&str, u32)>> = HashMap::new();
    for (from, to, weight) in topology.links() {
        adjacency.entry(from.as_str()).or_default().push((to.as_str(), weight));
    }

    let mut distances: HashMap<&str, u32> = HashMap::new();
    let mut heap = BinaryHeap::new();

    if topology.contains(source) {
        distances.insert(source, 0);
        heap.push(Reverse((0u32, source)));
    }

    while let Some(Reverse((cost, router))) = heap.pop() {
        if cost > distances.get(router).copied().unwrap_or(u32::MAX) {
            continue;
        }

        for &(neighbor, weight) in adjacency.get(router).map(Vec::as_slice).unwrap_or_default() {
            let tentative = cost.saturating_add(weight);
            if tentative < distances.get(neighbor).copied().unwrap_or(u32::MAX) {
                distances.insert(neighbor, tentative);
                heap.push(Reverse((tentative, neighbor)));
            }
        }
    }

    topology
        .router_ids()
        .map(|id| {
            let cost = distances.get(id.as_str()).map_or(Cost::Infinity, |d| Cost::Finite(*d));
            (id.clone(), cost)
        })
        .collect()
}

pub fn all_pairs(topology: &Topology) -> AllPairs {
    topology
        .router_ids()
        .map(|id| (id.clone(), shortest_paths(topology, id)))
        .collect()
}
