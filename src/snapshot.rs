// snapshot.rs
//
// Read-only views of agent state, published through watch channels so the
// binary and the tests can observe a running simulation without another
// message round trip. Every struct here is plain data cloned out of the
// owning agent.

use crate::agents::vehicle::VehicleKind;
use crate::network::{EdgeId, LightPhase, NodeId, Orientation};

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSnapshot {
    pub id: String,
    pub kind: VehicleKind,
    pub x: f64,
    pub y: f64,
    /// Last node reached.
    pub current_node: NodeId,
    /// Next node on the route, None while idle.
    pub target_node: Option<NodeId>,
    pub destination: NodeId,
    /// Nodes left on the current route, zero while idle.
    pub route_len: usize,
    pub stopped: bool,
    pub waiting_ticks: u64,
    pub travel_ticks: u64,
    /// Closure set as this vehicle knows it, sorted for stable comparisons.
    pub known_blocked: Vec<EdgeId>,
    /// Planner cost of the current route, penalties included.
    pub planned_cost: f64,
    /// Base weight accrued over edges actually driven since the last plan.
    pub traveled_cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightSnapshot {
    pub node: NodeId,
    pub orientation: Orientation,
    pub phase: LightPhase,
    /// Draw position: the intersection corner, shifted off the crossing so
    /// the two heads of a pair do not overlap.
    pub x: f64,
    pub y: f64,
}

/// Fleet-wide arrival statistics, updated incrementally per arrival report.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ArrivalStats {
    pub total: u64,
    pub avg_travel_ticks: f64,
    pub avg_waiting_ticks: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorSnapshot {
    /// Vehicles that have fetched the network, sorted by id.
    pub registered: Vec<String>,
    /// Closure set as last announced, sorted.
    pub blocked_edges: Vec<EdgeId>,
    /// Last phase heard from each light head, sorted by node then head.
    pub light_phases: Vec<(NodeId, Orientation, LightPhase)>,
    pub stats: ArrivalStats,
}
