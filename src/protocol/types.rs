use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Add;

use crate::RouterId;

/// Path weight. `Infinity` marks a destination that is currently unreachable.
///
/// Variant order matters: the derived `Ord` places every finite cost below `Infinity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cost {
    Finite(u32),
    Infinity,
}

impl Cost {
    pub const ZERO: Cost = Cost::Finite(0);

    pub fn is_infinite(&self) -> bool {
        matches!(self, Cost::Infinity)
    }

    pub fn finite(&self) -> Option<u32> {
        match self {
            Cost::Finite(value) => Some(*value),
            Cost::Infinity => None,
        }
    }
}

/// Saturating: any sum involving `Infinity`, or overflowing `u32`, is `Infinity`.
impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        match (self, rhs) {
            (Cost::Finite(a), Cost::Finite(b)) => a.checked_add(b).map_or(Cost::Infinity, Cost::Finite),
            _ => Cost::Infinity,
        }
    }
}

impl From<u32> for Cost {
    fn from(value: u32) -> Self {
        Cost::Finite(value)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cost::Finite(value) => write!(f, "{}", value),
            Cost::Infinity => f.write_str("inf"),
        }
    }
}

/// Destination -> best known cost. Ordered so that logs and reports are stable.
pub type DistanceVector = BTreeMap<RouterId, Cost>;

/// Destination -> neighbor the best known path leaves through.
pub type NextHopTable = BTreeMap<RouterId, Option<RouterId>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finite_costs_order_below_infinity() {
        assert!(Cost::Finite(u32::MAX) < Cost::Infinity);
        assert!(Cost::Finite(2) < Cost::Finite(5));
        assert_eq!(Cost::Infinity.max(Cost::Finite(7)), Cost::Infinity);
    }

    #[test]
    fn addition_saturates_at_infinity() {
        assert_eq!(Cost::Finite(1) + Cost::Finite(2), Cost::Finite(3));
        assert_eq!(Cost::Infinity + Cost::Infinity, Cost::Infinity);
        assert_eq!(Cost::Finite(3) + Cost::Infinity, Cost::Infinity);
        assert_eq!(Cost::Finite(u32::MAX) + Cost::Finite(1), Cost::Infinity);
    }

    #[test]
    fn wire_form_is_tagged() {
        assert_eq!(serde_json::to_string(&Cost::Finite(4)).unwrap(), r#"{"finite":4}"#);
        assert_eq!(serde_json::to_string(&Cost::Infinity).unwrap(), r#""infinity""#);
    }
}
