// agents/coordinator.rs
//
// The hub every other agent talks through. It owns the canonical road
// network, hands it to vehicles on request, answers position lookups for
// lights, and relays the periodic broadcasts (traffic reports, light
// phases, ambulance positions) to every registered vehicle. It carries no
// routing or signal logic of its own; it mirrors what it hears so the
// snapshot can show the city at a glance.

use crate::communication::{decode, AgentId, Mailbox, Message, MessageBus, COORDINATOR};
use crate::network::{EdgeId, LightPhase, NodeId, Orientation, RoadNetwork};
use crate::snapshot::{ArrivalStats, CoordinatorSnapshot};
use log::{debug, info};
use std::collections::HashMap;
use tokio::sync::watch;

pub struct CoordinatorAgent {
    network: RoadNetwork,
    /// Fan-out targets, in registration order.
    registered: Vec<AgentId>,
    /// Closure set as last announced by the disruptor, kept sorted.
    blocked: Vec<EdgeId>,
    /// Last phase and broadcast position per light head.
    lights: HashMap<(NodeId, Orientation), (LightPhase, f64, f64)>,
    stats: ArrivalStats,
}

impl CoordinatorAgent {
    pub fn new(network: RoadNetwork) -> Self {
        Self {
            network,
            registered: Vec::new(),
            blocked: Vec::new(),
            lights: HashMap::new(),
            stats: ArrivalStats::default(),
        }
    }

    /// Processes one envelope. `from` is the bus sender address, which is
    /// what the registry records.
    pub fn handle_envelope(&mut self, from: &str, message: Message) -> Vec<(AgentId, Message)> {
        match message {
            Message::RequestNetwork { vehicle_id } => {
                if vehicle_id != from {
                    debug!("{from} requested the network as {vehicle_id}");
                }
                if !self.registered.iter().any(|id| id == from) {
                    self.registered.push(from.to_string());
                    info!("registered {from} ({} vehicles)", self.registered.len());
                }
                vec![(
                    from.to_string(),
                    Message::NetworkData {
                        network: self.network.clone(),
                    },
                )]
            }
            Message::RequestPosition { node_id } => match self.network.position(node_id) {
                Some((x, y)) => {
                    vec![(from.to_string(), Message::PositionData { node_id, x, y })]
                }
                None => {
                    debug!("{from} asked for unknown node {node_id}");
                    Vec::new()
                }
            },
            Message::TrafficLightUpdate {
                node_id,
                orientation,
                phase,
                x,
                y,
            } => {
                self.lights.insert((node_id, orientation), (phase, x, y));
                self.relay(Message::TrafficLightUpdate {
                    node_id,
                    orientation,
                    phase,
                    x,
                    y,
                })
            }
            message @ Message::TrafficReport { .. } => self.relay(message),
            message @ Message::AmbulancePosition { .. } => self.relay(message),
            Message::RoadDisruption {
                blocked_edges,
                active,
            } => {
                if active {
                    self.blocked = blocked_edges;
                    self.blocked.sort();
                } else {
                    self.blocked.clear();
                }
                info!(
                    "road disruption {}: {} edges closed",
                    if active { "on" } else { "off" },
                    self.blocked.len()
                );
                self.relay(Message::BlockedEdgesUpdate {
                    blocked_edges: self.blocked.clone(),
                })
            }
            Message::Arrival {
                vehicle_id,
                travel_ticks,
                waiting_ticks,
            } => {
                self.fold_arrival(travel_ticks, waiting_ticks);
                info!(
                    "{vehicle_id} arrived after {travel_ticks} ticks ({waiting_ticks} waiting), \
                     fleet avg {:.1}/{:.1}",
                    self.stats.avg_travel_ticks, self.stats.avg_waiting_ticks
                );
                Vec::new()
            }
            other => {
                debug!("coordinator ignoring {} from {from}", other.wire_type());
                Vec::new()
            }
        }
    }

    fn relay(&self, message: Message) -> Vec<(AgentId, Message)> {
        self.registered
            .iter()
            .map(|id| (id.clone(), message.clone()))
            .collect()
    }

    /// Running averages without keeping every report around.
    fn fold_arrival(&mut self, travel_ticks: u64, waiting_ticks: u64) {
        self.stats.total += 1;
        let n = self.stats.total as f64;
        self.stats.avg_travel_ticks =
            (self.stats.avg_travel_ticks * (n - 1.0) + travel_ticks as f64) / n;
        self.stats.avg_waiting_ticks =
            (self.stats.avg_waiting_ticks * (n - 1.0) + waiting_ticks as f64) / n;
    }

    pub fn stats(&self) -> ArrivalStats {
        self.stats
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        let mut registered = self.registered.clone();
        registered.sort();
        let mut light_phases: Vec<(NodeId, Orientation, LightPhase)> = self
            .lights
            .iter()
            .map(|(&(node, orientation), &(phase, _, _))| (node, orientation, phase))
            .collect();
        light_phases.sort_by_key(|&(node, orientation, _)| {
            (node.0, node.1, orientation == Orientation::Vertical)
        });
        CoordinatorSnapshot {
            registered,
            blocked_edges: self.blocked.clone(),
            light_phases,
            stats: self.stats,
        }
    }
}

/// The coordinator is purely reactive: one branch for traffic, one for
/// shutdown.
pub async fn run(
    mut agent: CoordinatorAgent,
    bus: MessageBus,
    mut mailbox: Mailbox,
    snapshot_tx: watch::Sender<CoordinatorSnapshot>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            envelope = mailbox.recv() => {
                match envelope {
                    Some(envelope) => {
                        if let Some(message) = decode(&envelope) {
                            for (to, out) in agent.handle_envelope(&envelope.from, message) {
                                bus.send(&to, COORDINATOR, &out);
                            }
                            let _ = snapshot_tx.send(agent.snapshot());
                        }
                    }
                    None => break,
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("coordinator stopped");
}
