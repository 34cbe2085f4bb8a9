// config.rs
//
// Simulation parameters gathered in one place. Defaults reproduce the
// standard scenario: a 6x6 grid, ten lit intersections, one round-trip
// commuter, ten cars and four ambulances, with three road closures when the
// disruptor fires.

use crate::network::NodeId;
use std::ops::RangeInclusive;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Grid side length in nodes.
    pub grid_size: i16,
    /// Distance between neighboring nodes, world units.
    pub node_spacing: f64,
    /// Offset of node (0,0) from the world origin.
    pub grid_margin: f64,

    /// Intersections that get a pair of light heads.
    pub light_nodes: Vec<NodeId>,
    /// Starting green span, ticks, sampled per light.
    pub green_ticks: RangeInclusive<u32>,
    /// Starting red span, ticks, sampled per light.
    pub red_ticks: RangeInclusive<u32>,
    /// Yellow span, ticks, sampled per light.
    pub yellow_ticks: RangeInclusive<u32>,

    /// Cars spawned at random nodes.
    pub cars: usize,
    /// Ambulances spawned at random nodes.
    pub ambulances: usize,
    /// Commuter endpoints, shuttled between for the whole run.
    pub journey_origin: NodeId,
    pub journey_destination: NodeId,
    /// Scales every vehicle's base speed.
    pub speed_multiplier: f64,

    /// Undirected road pairs closed per disruption.
    pub closure_pairs: usize,

    /// One movement step per period.
    pub move_period: Duration,
    /// One traffic report per period.
    pub report_period: Duration,
    /// One ambulance position broadcast per period.
    pub ambulance_period: Duration,
    /// One light timer tick per period.
    pub light_period: Duration,

    /// Cooldown between route recalculation attempts.
    pub recalc_backoff: Duration,
    /// Failed replans a car tolerates before giving up on its destination.
    pub recalc_failure_limit: u32,

    /// Fixed seed for reproducible runs; None draws from the OS.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            grid_size: 6,
            node_spacing: 200.0,
            grid_margin: 50.0,
            light_nodes: default_light_nodes(),
            green_ticks: 5..=12,
            red_ticks: 5..=10,
            yellow_ticks: 1..=2,
            cars: 10,
            ambulances: 4,
            journey_origin: NodeId(0, 0),
            journey_destination: NodeId(5, 5),
            speed_multiplier: 2.0,
            closure_pairs: 3,
            move_period: Duration::from_millis(50),
            report_period: Duration::from_secs(3),
            ambulance_period: Duration::from_millis(200),
            light_period: Duration::from_millis(500),
            recalc_backoff: Duration::from_millis(500),
            recalc_failure_limit: 5,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Scenario sized to `grid_size`, keeping the commuter's endpoints on
    /// opposite corners and dropping light nodes that fall off the grid.
    pub fn for_grid(grid_size: i16) -> Self {
        let mut config = SimulationConfig {
            grid_size,
            journey_origin: NodeId(0, 0),
            journey_destination: NodeId(grid_size - 1, grid_size - 1),
            ..SimulationConfig::default()
        };
        config
            .light_nodes
            .retain(|node| node.0 < grid_size && node.1 < grid_size);
        config
    }

    /// Base speeds after the global multiplier.
    pub fn journey_speed(&self) -> f64 {
        300.0 * self.speed_multiplier
    }

    pub fn ambulance_speed(&self) -> f64 {
        280.0 * self.speed_multiplier
    }

    pub fn car_speed(&self) -> f64 {
        240.0 * self.speed_multiplier
    }
}

/// The ten lit intersections of the standard scenario: the inner ring
/// corners, the center block and two mid-edge crossings.
fn default_light_nodes() -> Vec<NodeId> {
    vec![
        NodeId(1, 1),
        NodeId(1, 4),
        NodeId(4, 1),
        NodeId(4, 4),
        NodeId(2, 2),
        NodeId(2, 3),
        NodeId(3, 2),
        NodeId(3, 3),
        NodeId(1, 3),
        NodeId(3, 1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scenario_shape() {
        let config = SimulationConfig::default();
        assert_eq!(config.grid_size, 6);
        assert_eq!(config.light_nodes.len(), 10);
        assert_eq!(config.cars, 10);
        assert_eq!(config.ambulances, 4);
        assert_eq!(config.journey_destination, NodeId(5, 5));
        assert_eq!(config.journey_speed(), 600.0);
        assert_eq!(config.car_speed(), 480.0);
    }

    #[test]
    fn smaller_grids_drop_out_of_range_lights() {
        let config = SimulationConfig::for_grid(3);
        assert_eq!(config.journey_destination, NodeId(2, 2));
        assert!(config
            .light_nodes
            .iter()
            .all(|node| node.0 < 3 && node.1 < 3));
        assert_eq!(config.light_nodes, vec![NodeId(1, 1), NodeId(2, 2)]);
    }
}
