use crate::network::graph::{Edge, EdgeId, NodeId, RoadClass, RoadNetwork};
use rand::Rng;
use std::collections::HashSet;

/// Builds a straight `size` x `size` grid network.
///
/// Nodes sit at `col * spacing + margin, row * spacing + margin`. Every road
/// is a pair of opposing directed edges with consecutive ids and the same
/// jittered weight (class base x uniform 0.8..1.5). Road classes follow the
/// row/col bands of the deployed map: the perimeter and the first column are
/// highways, the central arteries are main roads, one band is secondary and
/// the rest is residential.
pub fn build_grid(size: i16, spacing: f64, margin: f64, rng: &mut impl Rng) -> RoadNetwork {
    let mut network = RoadNetwork::new();

    for row in 0..size {
        for col in 0..size {
            let x = col as f64 * spacing + margin;
            let y = row as f64 * spacing + margin;
            network.add_node(NodeId(row, col), x, y);
        }
    }

    let mut next_edge_id = 0u32;

    for row in 0..size {
        for col in 0..size {
            let from = NodeId(row, col);

            if col < size - 1 {
                let to = NodeId(row, col + 1);
                let class = if row == 0 || row == size - 1 || col == 0 {
                    RoadClass::Highway
                } else if row == 2 || col == 2 {
                    RoadClass::Main
                } else if row == 3 {
                    RoadClass::Secondary
                } else {
                    RoadClass::Residential
                };
                add_road_pair(&mut network, &mut next_edge_id, from, to, class, rng);
            }

            if row < size - 1 {
                let to = NodeId(row + 1, col);
                let class = if col == 0 || col == size - 1 || row == 0 {
                    RoadClass::Highway
                } else if col == 2 || row == 2 {
                    RoadClass::Main
                } else if col == 3 {
                    RoadClass::Secondary
                } else {
                    RoadClass::Residential
                };
                add_road_pair(&mut network, &mut next_edge_id, from, to, class, rng);
            }
        }
    }

    network
}

/// Adds one road as a pair of opposing edges with consecutive ids. Both
/// directions share one jittered weight.
fn add_road_pair(
    network: &mut RoadNetwork,
    next_edge_id: &mut u32,
    from: NodeId,
    to: NodeId,
    class: RoadClass,
    rng: &mut impl Rng,
) {
    let weight = class.base_weight() * rng.random_range(0.8..1.5);
    network.add_edge(Edge {
        id: EdgeId(*next_edge_id),
        from,
        to,
        weight,
        road_class: class,
    });
    network.add_edge(Edge {
        id: EdgeId(*next_edge_id + 1),
        from: to,
        to: from,
        weight,
        road_class: class,
    });
    *next_edge_id += 2;
}

/// Edge ids of the outer ring, the roads that keep the network connected and
/// must never be closed. An edge belongs to the ring when both endpoints lie
/// on the same boundary line of the grid.
pub fn perimeter_edges(network: &RoadNetwork, size: i16) -> HashSet<EdgeId> {
    let max = size - 1;
    let on_same_boundary = |a: NodeId, b: NodeId| {
        (a.0 == 0 && b.0 == 0)
            || (a.0 == max && b.0 == max)
            || (a.1 == 0 && b.1 == 0)
            || (a.1 == max && b.1 == max)
    };

    network
        .edges
        .values()
        .filter(|edge| on_same_boundary(edge.from, edge.to))
        .map(|edge| edge.id)
        .collect()
}
