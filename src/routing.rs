// routing.rs
//
// Route planning over the road network. A* with a Euclidean heuristic over
// the vehicle's live view of the world: reported congestion inflates edge
// costs, red and yellow lights at the far end of an edge add flat penalties,
// and closed edges are pruned from expansion outright. The heuristic is the
// straight-line distance scaled by the cheapest weight-per-distance ratio in
// the network, so it never overshoots the true remaining cost and the result
// matches plain Dijkstra. A finished path is re-validated against the closure
// set before it is handed out, so a caller never receives a route through a
// known-blocked edge.

use crate::network::{EdgeId, LightPhase, NodeId, Orientation, RoadNetwork};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Cost added per reported tick of delay on an edge.
pub const TRAFFIC_DELAY_FACTOR: f64 = 5.0;
/// Flat cost for an edge ending at a red light.
pub const RED_LIGHT_PENALTY: f64 = 200.0;
/// Flat cost for an edge ending at a yellow light.
pub const YELLOW_LIGHT_PENALTY: f64 = 50.0;

/// Cached traffic report for one edge.
#[derive(Debug, Clone, Copy)]
pub struct TrafficInfo {
    pub delay: u32,
    pub speed: f64,
}

/// Cached light broadcast: phase plus the position the light announced.
#[derive(Debug, Clone, Copy)]
pub struct LightInfo {
    pub phase: LightPhase,
    pub x: f64,
    pub y: f64,
}

/// A planned route and the cost the planner assigned to it (penalties
/// included).
#[derive(Debug, Clone)]
pub struct PlannedRoute {
    /// Node sequence from the plan origin to the goal, origin included.
    pub nodes: Vec<NodeId>,
    pub cost: f64,
}

/// Computes the cheapest route from `start` to `goal` under the live view,
/// or None when the closure set leaves no way through.
pub fn plan_route(
    network: &RoadNetwork,
    start: NodeId,
    goal: NodeId,
    traffic: &HashMap<EdgeId, TrafficInfo>,
    lights: &HashMap<(NodeId, Orientation), LightInfo>,
    blocked: &HashSet<EdgeId>,
) -> Option<PlannedRoute> {
    if !network.nodes.contains_key(&start) || !network.nodes.contains_key(&goal) {
        return None;
    }
    if start == goal {
        return Some(PlannedRoute {
            nodes: vec![start],
            cost: 0.0,
        });
    }

    let scale = heuristic_scale(network);
    let heuristic = |node: NodeId| network.distance(node, goal) * scale;

    let mut open_set = BinaryHeap::new();
    open_set.push(Reverse((OrderedFloat(heuristic(start)), start)));

    let mut came_from: HashMap<NodeId, NodeId> = HashMap::new();
    let mut g_score: HashMap<NodeId, f64> = HashMap::new();
    g_score.insert(start, 0.0);

    while let Some(Reverse((_, current))) = open_set.pop() {
        if current == goal {
            let mut path = vec![current];
            let mut node = current;
            while let Some(&previous) = came_from.get(&node) {
                path.push(previous);
                node = previous;
            }
            path.reverse();

            // Belt and braces: a path that slipped through with a blocked
            // edge is no route at all.
            if first_blocked_edge(network, &path, blocked).is_some() {
                return None;
            }
            let cost = g_score.get(&goal).copied().unwrap_or(0.0);
            return Some(PlannedRoute { nodes: path, cost });
        }

        let current_g = g_score.get(&current).copied().unwrap_or(f64::INFINITY);
        for &(neighbor, edge_id) in network.neighbors(current) {
            // Closed edges are pruned, never merely penalized.
            if blocked.contains(&edge_id) {
                continue;
            }
            let edge = match network.edge(edge_id) {
                Some(edge) => edge,
                None => continue,
            };

            let step = edge.weight
                + traffic_penalty(edge_id, traffic)
                + signal_penalty(network, edge_id, lights).unwrap_or(0.0);
            let tentative = current_g + step;

            let known = g_score.get(&neighbor).copied().unwrap_or(f64::INFINITY);
            if tentative < known {
                came_from.insert(neighbor, current);
                g_score.insert(neighbor, tentative);
                let f = tentative + heuristic(neighbor);
                open_set.push(Reverse((OrderedFloat(f), neighbor)));
            }
        }
    }

    None
}

/// Cheapest base weight per unit of straight-line length across the network.
/// Multiplying the Euclidean distance by this keeps the heuristic a lower
/// bound on the remaining cost, penalties only push the true cost higher.
fn heuristic_scale(network: &RoadNetwork) -> f64 {
    let mut per_unit = f64::INFINITY;
    for edge in network.edges.values() {
        let length = network.distance(edge.from, edge.to);
        if length > 0.0 {
            per_unit = per_unit.min(edge.weight / length);
        }
    }
    if per_unit.is_finite() {
        per_unit
    } else {
        0.0
    }
}

/// The first blocked edge along a node sequence, walking consecutive pairs.
/// Node pairs with no connecting edge are skipped.
///
/// This is the single authoritative route check: the planner re-validates
/// fresh paths with it and vehicles run it over the remaining route at tick
/// start, after node arrival and on every closure update.
pub fn first_blocked_edge(
    network: &RoadNetwork,
    nodes: &[NodeId],
    blocked: &HashSet<EdgeId>,
) -> Option<EdgeId> {
    for pair in nodes.windows(2) {
        if let Some(edge) = network.edge_between(pair[0], pair[1]) {
            if blocked.contains(&edge.id) {
                return Some(edge.id);
            }
        }
    }
    None
}

/// Splits a path's planner cost into base weight and penalty shares, for the
/// metrics sink.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RouteCostBreakdown {
    pub base: f64,
    pub traffic_penalty: f64,
    pub signal_penalty: f64,
}

pub fn route_cost_breakdown(
    network: &RoadNetwork,
    nodes: &[NodeId],
    traffic: &HashMap<EdgeId, TrafficInfo>,
    lights: &HashMap<(NodeId, Orientation), LightInfo>,
) -> RouteCostBreakdown {
    let mut breakdown = RouteCostBreakdown::default();
    for pair in nodes.windows(2) {
        if let Some(edge) = network.edge_between(pair[0], pair[1]) {
            breakdown.base += edge.weight;
            breakdown.traffic_penalty += traffic_penalty(edge.id, traffic);
            breakdown.signal_penalty += signal_penalty(network, edge.id, lights).unwrap_or(0.0);
        }
    }
    breakdown
}

fn traffic_penalty(edge_id: EdgeId, traffic: &HashMap<EdgeId, TrafficInfo>) -> f64 {
    traffic
        .get(&edge_id)
        .map(|info| info.delay as f64 * TRAFFIC_DELAY_FACTOR)
        .unwrap_or(0.0)
}

/// Penalty for the light governing travel over this edge: the head at the
/// edge's destination whose orientation crosses the edge's dominant axis,
/// the same head the stopping rule obeys on that approach.
fn signal_penalty(
    network: &RoadNetwork,
    edge_id: EdgeId,
    lights: &HashMap<(NodeId, Orientation), LightInfo>,
) -> Option<f64> {
    let edge = network.edge(edge_id)?;
    let governing = network.edge_orientation(edge).perpendicular();
    let info = lights.get(&(edge.to, governing))?;
    match info.phase {
        LightPhase::Red => Some(RED_LIGHT_PENALTY),
        LightPhase::Yellow => Some(YELLOW_LIGHT_PENALTY),
        LightPhase::Green => None,
    }
}
