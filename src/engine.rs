// engine.rs
//
// Wires a whole city together: builds the seeded grid, starts the bus,
// spawns the coordinator, the disruptor, a pair of light heads per lit
// intersection and the vehicle fleet, and hands back the knobs a caller
// needs: a shutdown switch, the disruptor handle and snapshot receivers.
// Every mailbox is attached before the first agent task starts, so no
// startup message can race an unregistered address.

use crate::agents::{
    coordinator, disruptor, traffic_light, vehicle, CoordinatorAgent, DisruptorAgent,
    DisruptorCommand, TrafficLightAgent, VehicleAgent, VehicleKind,
};
use crate::communication::{MessageBus, COORDINATOR};
use crate::config::SimulationConfig;
use crate::metrics::{self, MetricsReceiver, MetricsSender};
use crate::network::{NodeId, Orientation, RoadNetwork, build_grid, perimeter_edges};
use crate::snapshot::{CoordinatorSnapshot, LightSnapshot, VehicleSnapshot};
use log::{debug, info};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const DISRUPTOR_COMMAND_DEPTH: usize = 16;

/// Command sender for the disruptor task. Cloneable, safe to hold anywhere;
/// the agent performs the actual bus traffic.
#[derive(Clone)]
pub struct DisruptorHandle {
    commands: mpsc::Sender<DisruptorCommand>,
}

impl DisruptorHandle {
    pub async fn activate(&self) -> bool {
        self.commands.send(DisruptorCommand::Activate).await.is_ok()
    }

    pub async fn deactivate(&self) -> bool {
        self.commands
            .send(DisruptorCommand::Deactivate)
            .await
            .is_ok()
    }

    pub async fn toggle(&self) -> bool {
        self.commands.send(DisruptorCommand::Toggle).await.is_ok()
    }
}

/// A running simulation and the handles into it.
pub struct Simulation {
    bus: MessageBus,
    network: RoadNetwork,
    shutdown: watch::Sender<bool>,
    disruptor: DisruptorHandle,
    coordinator_rx: watch::Receiver<CoordinatorSnapshot>,
    vehicle_rx: HashMap<String, watch::Receiver<VehicleSnapshot>>,
    light_rx: Vec<watch::Receiver<LightSnapshot>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Simulation {
    /// Starts every agent of the configured scenario.
    pub fn launch(config: &SimulationConfig) -> Simulation {
        Self::launch_inner(config, None)
    }

    /// Same, with route planning metrics flowing to the returned receiver.
    pub fn launch_with_metrics(config: &SimulationConfig) -> (Simulation, MetricsReceiver) {
        let (sender, receiver) = metrics::channel();
        (Self::launch_inner(config, Some(sender)), receiver)
    }

    fn launch_inner(config: &SimulationConfig, metrics: Option<MetricsSender>) -> Simulation {
        let mut rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_rng(&mut rand::rng()),
        };
        let network = build_grid(
            config.grid_size,
            config.node_spacing,
            config.grid_margin,
            &mut rng,
        );
        let protected = perimeter_edges(&network, config.grid_size);
        info!(
            "city up: {} nodes, {} edges, {} protected",
            network.node_count(),
            network.edge_count(),
            protected.len()
        );

        let bus = MessageBus::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        // Mailboxes for everyone before any task runs.
        let coordinator_mailbox = bus.attach(COORDINATOR);

        let mut light_specs = Vec::new();
        for &node in &config.light_nodes {
            for orientation in [Orientation::Horizontal, Orientation::Vertical] {
                let agent = TrafficLightAgent::new(
                    node,
                    orientation,
                    rng.random_range(config.green_ticks.clone()),
                    rng.random_range(config.red_ticks.clone()),
                    rng.random_range(config.yellow_ticks.clone()),
                );
                let mailbox = bus.attach(&agent.id);
                light_specs.push((agent, mailbox));
            }
        }

        let mut vehicle_specs = Vec::new();
        let journey = VehicleAgent::new(
            "journey_0".to_string(),
            VehicleKind::Journey,
            config.journey_origin,
            config.journey_destination,
            config.journey_speed(),
            config.recalc_backoff,
            config.recalc_failure_limit,
            SmallRng::from_rng(&mut rng),
        );
        vehicle_specs.push(journey);
        let mut nodes: Vec<NodeId> = network.nodes.keys().copied().collect();
        nodes.sort();
        for index in 0..config.cars {
            let (start, destination) = random_trip(&nodes, &mut rng);
            vehicle_specs.push(VehicleAgent::new(
                format!("car_{}", index + 1),
                VehicleKind::Car,
                start,
                destination,
                config.car_speed(),
                config.recalc_backoff,
                config.recalc_failure_limit,
                SmallRng::from_rng(&mut rng),
            ));
        }
        for index in 0..config.ambulances {
            let (start, destination) = random_trip(&nodes, &mut rng);
            vehicle_specs.push(VehicleAgent::new(
                format!("amb_{index}"),
                VehicleKind::Ambulance,
                start,
                destination,
                config.ambulance_speed(),
                config.recalc_backoff,
                config.recalc_failure_limit,
                SmallRng::from_rng(&mut rng),
            ));
        }
        let mut vehicle_mailboxes = Vec::new();
        for agent in &vehicle_specs {
            vehicle_mailboxes.push(bus.attach(&agent.id));
        }

        // Coordinator first so the network requests land somewhere.
        let coordinator_agent = CoordinatorAgent::new(network.clone());
        let (coordinator_tx, coordinator_rx) = watch::channel(coordinator_agent.snapshot());
        tasks.push(tokio::spawn(coordinator::run(
            coordinator_agent,
            bus.clone(),
            coordinator_mailbox,
            coordinator_tx,
            shutdown_rx.clone(),
        )));

        let (command_tx, command_rx) = mpsc::channel(DISRUPTOR_COMMAND_DEPTH);
        let disruptor_agent = DisruptorAgent::new(
            network.clone(),
            protected,
            config.closure_pairs,
            SmallRng::from_rng(&mut rng),
        );
        tasks.push(tokio::spawn(disruptor::run(
            disruptor_agent,
            bus.clone(),
            command_rx,
            shutdown_rx.clone(),
        )));

        let mut light_rx = Vec::new();
        for (agent, mailbox) in light_specs {
            let (snapshot_tx, snapshot_rx) = watch::channel(agent.snapshot());
            light_rx.push(snapshot_rx);
            tasks.push(tokio::spawn(traffic_light::run(
                agent,
                bus.clone(),
                mailbox,
                snapshot_tx,
                config.light_period,
                shutdown_rx.clone(),
            )));
        }

        let mut vehicle_rx = HashMap::new();
        for (mut agent, mailbox) in vehicle_specs.into_iter().zip(vehicle_mailboxes) {
            if let Some(sender) = &metrics {
                agent.set_metrics(sender.clone());
            }
            let (snapshot_tx, snapshot_rx) = watch::channel(agent.snapshot());
            vehicle_rx.insert(agent.id.clone(), snapshot_rx);
            tasks.push(tokio::spawn(vehicle::run(
                agent,
                bus.clone(),
                mailbox,
                snapshot_tx,
                config.move_period,
                config.report_period,
                config.ambulance_period,
                shutdown_rx.clone(),
            )));
        }

        debug!("{} agent tasks running", tasks.len());
        Simulation {
            bus,
            network,
            shutdown: shutdown_tx,
            disruptor: DisruptorHandle {
                commands: command_tx,
            },
            coordinator_rx,
            vehicle_rx,
            light_rx,
            tasks,
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    pub fn disruptor(&self) -> DisruptorHandle {
        self.disruptor.clone()
    }

    pub fn coordinator_snapshots(&self) -> watch::Receiver<CoordinatorSnapshot> {
        self.coordinator_rx.clone()
    }

    pub fn vehicle_snapshots(&self) -> &HashMap<String, watch::Receiver<VehicleSnapshot>> {
        &self.vehicle_rx
    }

    pub fn light_snapshots(&self) -> &[watch::Receiver<LightSnapshot>] {
        &self.light_rx
    }

    /// Flips the shutdown flag and waits for every agent task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("simulation stopped");
    }
}

/// Distinct random start and destination nodes.
fn random_trip(nodes: &[NodeId], rng: &mut SmallRng) -> (NodeId, NodeId) {
    let start = nodes[rng.random_range(0..nodes.len())];
    loop {
        let destination = nodes[rng.random_range(0..nodes.len())];
        if destination != start {
            return (start, destination);
        }
    }
}
