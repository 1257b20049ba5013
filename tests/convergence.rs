use dv_routing::config::SimulationConfig;
use dv_routing::network::Topology;
use dv_routing::protocol::Cost;
use dv_routing::router::Outcome;
use dv_routing::server::StopReason;
use dv_routing::simulation::{self, SimulationReport};

fn local_config() -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.server.bind_addr = "127.0.0.1:0".parse().unwrap();
    config.server.idle_timeout_ms = 500;
    config
}

async fn converge(topology: &str) -> (Topology, SimulationReport) {
    let topology = Topology::parse(topology).unwrap();
    let report = simulation::run(topology.clone(), &local_config()).await.unwrap();
    (topology, report)
}

#[tokio::test]
async fn triangle_prefers_the_two_hop_route() {
    let (topology, report) = converge("A: <B, 1>, <C, 5>\nB: <A, 1>, <C, 1>\nC: <A, 5>, <B, 1>").await;

    let a = &report.routers["A"].table;
    assert_eq!(a.cost("B"), Cost::Finite(1));
    assert_eq!(a.next_hop("B"), Some("B"));
    assert_eq!(a.cost("C"), Cost::Finite(2));
    assert_eq!(a.next_hop("C"), Some("B"));

    let c = &report.routers["C"].table;
    assert_eq!(c.cost("B"), Cost::Finite(1));
    assert_eq!(c.next_hop("B"), Some("B"));
    assert_eq!(c.cost("A"), Cost::Finite(2));
    assert_eq!(c.next_hop("A"), Some("B"));

    assert!(report.verify(&topology).is_empty());
    assert_eq!(report.server.stopped_by, StopReason::Idle);
}

#[tokio::test]
async fn disconnected_pair_stays_unreachable() {
    let (_, report) = converge("A: <B, -1>\nB: <A, -1>").await;

    for (router, other) in [("A", "B"), ("B", "A")] {
        let table = &report.routers[router].table;
        assert_eq!(table.cost(other), Cost::Infinity);
        assert_eq!(table.next_hop(other), None);
        assert_eq!(table.cost(router), Cost::ZERO);
        assert_eq!(report.routers[router].improving_rounds, 0);
    }
    // Isolated routers still announce their initial vector once.
    assert_eq!(report.server.relay.updates_relayed, 2);
    assert_eq!(report.server.relay.datagrams_forwarded, 0);
}

#[tokio::test]
async fn sparse_records_still_reach_the_far_end() {
    // Nobody lists the routers they have no link to.
    let (topology, report) = converge("a: <b, 1>\nb: <a, 1>, <c, 1>\nc: <b, 1>").await;

    let a = &report.routers["a"].table;
    assert_eq!(a.cost("c"), Cost::Finite(2));
    assert_eq!(a.next_hop("c"), Some("b"));
    let c = &report.routers["c"].table;
    assert_eq!(c.cost("a"), Cost::Finite(2));
    assert_eq!(c.next_hop("a"), Some("b"));

    let mismatches = report.verify(&topology);
    assert!(mismatches.is_empty(), "{:?}", mismatches);
}

#[tokio::test]
async fn star_leaves_route_through_the_center() {
    let (topology, report) = converge(
        "X: <L1, 1>, <L2, 1>, <L3, 1>, <L4, 1>\n\
         L1: <X, 1>, <L2, -1>, <L3, -1>, <L4, -1>\n\
         L2: <X, 1>, <L1, -1>, <L3, -1>, <L4, -1>\n\
         L3: <X, 1>, <L1, -1>, <L2, -1>, <L4, -1>\n\
         L4: <X, 1>, <L1, -1>, <L2, -1>, <L3, -1>",
    )
    .await;

    let leaves = ["L1", "L2", "L3", "L4"];
    for leaf in leaves {
        let table = &report.routers[leaf].table;
        assert_eq!(table.cost("X"), Cost::Finite(1));
        assert_eq!(table.next_hop("X"), Some("X"));
        for other in leaves.iter().filter(|other| **other != leaf) {
            assert_eq!(table.cost(other), Cost::Finite(2), "{} -> {}", leaf, other);
            assert_eq!(table.next_hop(other), Some("X"));
        }
    }
    assert!(report.verify(&topology).is_empty());
}

#[tokio::test]
async fn six_routers_match_reference_shortest_paths() {
    let (topology, report) = converge(
        "u: <v, 2>, <w, 5>, <x, 1>, <y, -1>, <z, -1>\n\
         v: <u, 2>, <w, 3>, <x, 2>, <y, -1>, <z, -1>\n\
         w: <u, 5>, <v, 3>, <x, 3>, <y, 1>, <z, 5>\n\
         x: <u, 1>, <v, 2>, <w, 3>, <y, 1>, <z, -1>\n\
         y: <u, -1>, <v, -1>, <w, 1>, <x, 1>, <z, 2>\n\
         z: <u, -1>, <v, -1>, <w, 5>, <x, -1>, <y, 2>",
    )
    .await;

    assert_eq!(report.routers.len(), 6);
    for router in report.routers.values() {
        assert_eq!(router.outcome, Outcome::Terminated);
        // First announcement plus one per improving round.
        assert_eq!(router.updates_sent, router.improving_rounds + 1);
    }

    let mismatches = report.verify(&topology);
    assert!(mismatches.is_empty(), "{:?}", mismatches);

    let u = &report.routers["u"].table;
    assert_eq!(u.cost("z"), Cost::Finite(4));
    assert_eq!(u.next_hop("z"), Some("x"));
    assert_eq!(u.next_hop("w"), Some("x"));
}
