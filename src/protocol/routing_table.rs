use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{Cost, DistanceVector, NextHopTable};
use crate::RouterId;

/// A router's distance vector together with the next hop for every destination.
///
/// The owner's own entry is pinned at cost 0 with no next hop; the next-hop table
/// always holds exactly the vector's keys minus the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    owner: RouterId,
    costs: DistanceVector,
    next_hops: NextHopTable,
}

impl RoutingTable {
    /// Builds the table from the vector handed out by the server. Every finite
    /// destination is a direct link, so its next hop is the destination itself.
    pub fn from_initial(owner: RouterId, initial: DistanceVector) -> Self {
        let mut costs = initial;
        costs.insert(owner.clone(), Cost::ZERO);

        let next_hops = costs
            .iter()
            .filter(|(destination, _)| **destination != owner)
            .map(|(destination, cost)| {
                let hop = (!cost.is_infinite()).then(|| destination.clone());
                (destination.clone(), hop)
            })
            .collect();

        Self {
            owner,
            costs,
            next_hops,
        }
    }

    /// One Bellman-Ford round against `neighbor`'s reported vector.
    ///
    /// Returns the destinations whose cost improved; empty means nothing to announce.
    pub fn relax(&mut self, neighbor: &str, reported: &DistanceVector) -> Vec<RouterId> {
        let to_neighbor = self.cost(neighbor);
        let mut changed = Vec::new();

        for (destination, current) in self.costs.iter_mut() {
            if *destination == self.owner {
                continue;
            }

            let via_neighbor = reported.get(destination).copied().unwrap_or(Cost::Infinity);
            let candidate = to_neighbor + via_neighbor;

            if candidate < *current {
                *current = candidate;
                self.next_hops.insert(destination.clone(), Some(neighbor.to_string()));
                changed.push(destination.clone());
            }
        }

        changed
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Unknown destinations are unreachable.
    pub fn cost(&self, destination: &str) -> Cost {
        self.costs.get(destination).copied().unwrap_or(Cost::Infinity)
    }

    pub fn next_hop(&self, destination: &str) -> Option<&str> {
        self.next_hops.get(destination).and_then(|hop| hop.as_deref())
    }

    pub fn costs(&self) -> &DistanceVector {
        &self.costs
    }

    pub fn next_hops(&self) -> &NextHopTable {
        &self.next_hops
    }

    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }
}

/// `u: u-0-none v-2-v w-3-v`, sorted by destination.
impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.owner)?;
        for (destination, cost) in &self.costs {
            let hop = self.next_hop(destination).unwrap_or("none");
            write!(f, " {}-{}-{}", destination, cost, hop)?;
        }
        Ok(())
    }
}
