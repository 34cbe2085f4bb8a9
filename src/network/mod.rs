// network/mod.rs
pub mod graph;
pub mod grid;

pub use graph::{Edge, EdgeId, LightPhase, Node, NodeId, Orientation, RoadClass, RoadNetwork};
pub use grid::{build_grid, perimeter_edges};
