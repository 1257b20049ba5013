pub mod topology;
pub mod transport;

pub use topology::{Topology, TopologyEntry};
