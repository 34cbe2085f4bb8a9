// agents/disruptor.rs
//
// Closes roads and reopens them on command. A disruption picks whole road
// pairs, both directions of travel, from anywhere except the protected
// perimeter ring, then hands the set to the coordinator as a single
// road_disruption message. The disruptor itself keeps no mailbox; it only
// ever speaks.

use crate::communication::{Message, MessageBus, COORDINATOR, DISRUPTOR};
use crate::network::{EdgeId, RoadNetwork};
use log::{debug, info, warn};
use rand::rngs::SmallRng;
use rand::Rng;
use std::collections::HashSet;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisruptorCommand {
    Activate,
    Deactivate,
    Toggle,
}

pub struct DisruptorAgent {
    network: RoadNetwork,
    /// Edges that must always stay open.
    protected: HashSet<EdgeId>,
    /// Road pairs to close per disruption.
    closure_pairs: usize,
    /// The currently closed set, None while the city runs undisturbed.
    active: Option<Vec<EdgeId>>,
    rng: SmallRng,
}

impl DisruptorAgent {
    pub fn new(
        network: RoadNetwork,
        protected: HashSet<EdgeId>,
        closure_pairs: usize,
        rng: SmallRng,
    ) -> Self {
        Self {
            network,
            protected,
            closure_pairs,
            active: None,
            rng,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Picks a fresh closure set and announces it. A second activation while
    /// one is in force does nothing.
    pub fn activate(&mut self) -> Option<Message> {
        if self.active.is_some() {
            debug!("disruption already active, ignoring");
            return None;
        }
        let blocked = self.pick_closures();
        if blocked.is_empty() {
            warn!("no closable roads outside the protected set");
            return None;
        }
        info!("closing {} road segments: {:?}", blocked.len(), blocked);
        self.active = Some(blocked.clone());
        Some(Message::RoadDisruption {
            blocked_edges: blocked,
            active: true,
        })
    }

    /// Closes roads when none are closed, reopens them otherwise.
    pub fn toggle(&mut self) -> Option<Message> {
        if self.active.is_some() {
            self.deactivate()
        } else {
            self.activate()
        }
    }

    /// Reopens the roads of the active disruption, if any.
    pub fn deactivate(&mut self) -> Option<Message> {
        match self.active.take() {
            Some(blocked) => {
                info!("reopening {} road segments", blocked.len());
                Some(Message::RoadDisruption {
                    blocked_edges: blocked,
                    active: false,
                })
            }
            None => {
                debug!("no disruption to lift");
                None
            }
        }
    }

    /// Samples whole road pairs outside the protected set. Picking an edge
    /// always drags its opposite direction along.
    fn pick_closures(&mut self) -> Vec<EdgeId> {
        let mut candidates: Vec<EdgeId> = self
            .network
            .edges
            .values()
            .filter(|edge| !self.protected.contains(&edge.id))
            .map(|edge| edge.id)
            .collect();
        candidates.sort();

        let mut chosen: HashSet<EdgeId> = HashSet::new();
        let mut blocked = Vec::new();
        while blocked.len() < self.closure_pairs * 2 && !candidates.is_empty() {
            let index = self.rng.random_range(0..candidates.len());
            let edge_id = candidates.swap_remove(index);
            if !chosen.insert(edge_id) {
                continue;
            }
            blocked.push(edge_id);

            let partner = self
                .network
                .edge(edge_id)
                .and_then(|edge| self.network.edge_between(edge.to, edge.from))
                .map(|edge| edge.id);
            if let Some(partner_id) = partner {
                if chosen.insert(partner_id) {
                    blocked.push(partner_id);
                    candidates.retain(|&id| id != partner_id);
                }
            }
        }
        blocked.sort();
        blocked
    }
}

/// Waits for commands and forwards each announcement to the coordinator.
pub async fn run(
    mut agent: DisruptorAgent,
    bus: MessageBus,
    mut commands: mpsc::Receiver<DisruptorCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => {
                let message = match command {
                    Some(DisruptorCommand::Activate) => agent.activate(),
                    Some(DisruptorCommand::Deactivate) => agent.deactivate(),
                    Some(DisruptorCommand::Toggle) => agent.toggle(),
                    None => break,
                };
                if let Some(message) = message {
                    bus.send(COORDINATOR, DISRUPTOR, &message);
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("disruptor stopped");
}
