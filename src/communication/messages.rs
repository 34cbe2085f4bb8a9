use crate::network::{EdgeId, LightPhase, NodeId, Orientation, RoadNetwork};
use serde::{Deserialize, Serialize};

/// Every payload that crosses the bus, as one tagged union.
///
/// The wire form is JSON with a `"type"` tag in snake case, e.g.
/// `{"type":"traffic_report","vehicle_id":"car_3",...}`. Decoding happens
/// exactly once, at the mailbox boundary; agents match on the variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Vehicle asks the coordinator for the road network. Registers the
    /// sender for later fan-outs.
    RequestNetwork { vehicle_id: String },
    /// Coordinator reply carrying the full network.
    NetworkData { network: RoadNetwork },
    /// Light asks the coordinator for its node position.
    RequestPosition { node_id: NodeId },
    /// Coordinator reply with the node coordinate.
    PositionData { node_id: NodeId, x: f64, y: f64 },
    /// Congestion report for the edge a vehicle is traversing. Relayed to
    /// every registered vehicle.
    TrafficReport {
        vehicle_id: String,
        edge_id: EdgeId,
        delay: u32,
        speed: f64,
    },
    /// Light phase broadcast, relayed to every registered vehicle.
    TrafficLightUpdate {
        node_id: NodeId,
        orientation: Orientation,
        phase: LightPhase,
        x: f64,
        y: f64,
    },
    /// Direct light-to-paired-light phase notification.
    PairedLightUpdate {
        node_id: NodeId,
        orientation: Orientation,
        phase: LightPhase,
    },
    /// Ambulance position broadcast, relayed to every registered vehicle.
    AmbulancePosition {
        vehicle_id: String,
        x: f64,
        y: f64,
        current_node: NodeId,
        speed: f64,
    },
    /// Disruptor tells the coordinator which edges just closed or reopened.
    RoadDisruption {
        blocked_edges: Vec<EdgeId>,
        active: bool,
    },
    /// Coordinator fan-out replacing every vehicle's blocked-edge mirror.
    BlockedEdgesUpdate { blocked_edges: Vec<EdgeId> },
    /// External nudge forcing a vehicle to drop its route and replan.
    RecalculateRoute,
    /// Trip completion report, folded into the coordinator statistics.
    Arrival {
        vehicle_id: String,
        travel_ticks: u64,
        waiting_ticks: u64,
    },
}

impl Message {
    /// The wire tag, for log lines.
    pub fn wire_type(&self) -> &'static str {
        match self {
            Message::RequestNetwork { .. } => "request_network",
            Message::NetworkData { .. } => "network_data",
            Message::RequestPosition { .. } => "request_position",
            Message::PositionData { .. } => "position_data",
            Message::TrafficReport { .. } => "traffic_report",
            Message::TrafficLightUpdate { .. } => "traffic_light_update",
            Message::PairedLightUpdate { .. } => "paired_light_update",
            Message::AmbulancePosition { .. } => "ambulance_position",
            Message::RoadDisruption { .. } => "road_disruption",
            Message::BlockedEdgesUpdate { .. } => "blocked_edges_update",
            Message::RecalculateRoute => "recalculate_route",
            Message::Arrival { .. } => "arrival",
        }
    }
}
