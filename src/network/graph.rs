use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Grid intersection identifier as a (row, col) pair.
///
/// Serialized as the string `"row_col"` so that JSON maps keyed by node id
/// stay plain objects on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub i16, pub i16);

impl NodeId {
    /// Parses the `"row_col"` form back into a node id.
    pub fn parse(text: &str) -> Option<NodeId> {
        let (row, col) = text.split_once('_')?;
        Some(NodeId(row.parse().ok()?, col.parse().ok()?))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.0, self.1)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        NodeId::parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid node id '{}'", text)))
    }
}

/// Directed edge identifier. Opposing directions of one road carry
/// consecutive ids.
///
/// Serializes as its plain number; JSON turns edge-keyed map keys into
/// strings on the wire, so deserialization accepts both forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EdgeId(pub u32);

impl<'de> Deserialize<'de> for EdgeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EdgeIdVisitor;

        impl<'de> serde::de::Visitor<'de> for EdgeIdVisitor {
            type Value = EdgeId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an edge id as an integer or its string form")
            }

            fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<EdgeId, E> {
                u32::try_from(value)
                    .map(EdgeId)
                    .map_err(|_| E::custom(format!("edge id {} out of range", value)))
            }

            fn visit_str<E: serde::de::Error>(self, text: &str) -> Result<EdgeId, E> {
                text.parse()
                    .map(EdgeId)
                    .map_err(|_| E::custom(format!("invalid edge id '{}'", text)))
            }
        }

        deserializer.deserialize_any(EdgeIdVisitor)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Axis of a road or a traffic light head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

impl Orientation {
    /// The crossing axis. A vehicle moving horizontally is governed by the
    /// vertical light head at the intersection, and vice versa.
    pub fn perpendicular(self) -> Orientation {
        match self {
            Orientation::Horizontal => Orientation::Vertical,
            Orientation::Vertical => Orientation::Horizontal,
        }
    }

    /// Dominant axis of a movement delta. Ties count as vertical.
    pub fn of_delta(dx: f64, dy: f64) -> Orientation {
        if dx.abs() > dy.abs() {
            Orientation::Horizontal
        } else {
            Orientation::Vertical
        }
    }
}

/// Signal phase of a single light head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightPhase {
    Green,
    Yellow,
    Red,
}

/// Road category. Determines the base routing weight and the speed limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoadClass {
    Highway,
    Main,
    Secondary,
    Residential,
}

impl RoadClass {
    /// Base edge weight before per-road jitter. Lower is preferred by the
    /// planner.
    pub fn base_weight(self) -> f64 {
        match self {
            RoadClass::Highway => 5.0,
            RoadClass::Main => 15.0,
            RoadClass::Secondary => 30.0,
            RoadClass::Residential => 50.0,
        }
    }

    pub fn speed_limit(self) -> u32 {
        match self {
            RoadClass::Highway => 100,
            RoadClass::Main => 80,
            RoadClass::Secondary => 60,
            RoadClass::Residential => 40,
        }
    }
}

/// An intersection with its world position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub x: f64,
    pub y: f64,
}

/// A directed road segment between two intersections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub weight: f64,
    pub road_class: RoadClass,
}

/// The road network shared by every agent.
///
/// Immutable after construction: the coordinator hands each vehicle a full
/// copy inside `network_data` and nobody mutates it afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoadNetwork {
    pub nodes: HashMap<NodeId, Node>,
    pub edges: HashMap<EdgeId, Edge>,
    /// node -> outgoing (neighbor, edge id) pairs.
    pub adjacency: HashMap<NodeId, Vec<(NodeId, EdgeId)>>,
}

impl RoadNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: NodeId, x: f64, y: f64) {
        self.nodes.insert(id, Node { id, x, y });
        self.adjacency.entry(id).or_default();
    }

    /// Inserts an edge and records it in the adjacency list.
    pub fn add_edge(&mut self, edge: Edge) {
        self.adjacency
            .entry(edge.from)
            .or_default()
            .push((edge.to, edge.id));
        self.edges.insert(edge.id, edge);
    }

    /// Outgoing (neighbor, edge id) pairs of a node. Unknown nodes have no
    /// neighbors.
    pub fn neighbors(&self, node: NodeId) -> &[(NodeId, EdgeId)] {
        self.adjacency.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    /// The directed edge from `from` to `to`, if the nodes are adjacent.
    pub fn edge_between(&self, from: NodeId, to: NodeId) -> Option<&Edge> {
        self.neighbors(from)
            .iter()
            .find(|(neighbor, _)| *neighbor == to)
            .and_then(|(_, edge_id)| self.edge(*edge_id))
    }

    pub fn position(&self, node: NodeId) -> Option<(f64, f64)> {
        self.nodes.get(&node).map(|n| (n.x, n.y))
    }

    /// Euclidean distance between two nodes, or 0.0 when either position is
    /// unknown (degrades the planner heuristic, never breaks it).
    pub fn distance(&self, a: NodeId, b: NodeId) -> f64 {
        match (self.position(a), self.position(b)) {
            (Some((ax, ay)), Some((bx, by))) => {
                let dx = bx - ax;
                let dy = by - ay;
                (dx * dx + dy * dy).sqrt()
            }
            _ => 0.0,
        }
    }

    /// Dominant axis of an edge, derived from its endpoint positions.
    pub fn edge_orientation(&self, edge: &Edge) -> Orientation {
        match (self.position(edge.from), self.position(edge.to)) {
            (Some((ax, ay)), Some((bx, by))) => Orientation::of_delta(bx - ax, by - ay),
            // Grid edges connect same-row or same-column nodes.
            _ => {
                if edge.from.0 == edge.to.0 {
                    Orientation::Horizontal
                } else {
                    Orientation::Vertical
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}
