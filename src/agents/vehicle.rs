// agents/vehicle.rs
//
// Vehicle agents: the perpetual commuter shuttling between two corners,
// plain cars roaming random destinations, and ambulances that everyone else
// pulls over for. A vehicle owns nothing but its mailbox view of the world:
// the network copy it fetched at startup, cached traffic reports, cached
// light phases and cached ambulance sightings. Every tick it re-checks its
// route against the closure set, obeys the lights ahead, and glides toward
// the next node; arrivals are reported to the coordinator and immediately
// followed by the next leg.

use crate::communication::{decode, AgentId, Mailbox, Message, MessageBus, COORDINATOR};
use crate::metrics::{MetricsEvent, MetricsSender};
use crate::network::{EdgeId, LightPhase, NodeId, Orientation, RoadNetwork};
use crate::routing::{
    first_blocked_edge, plan_route, route_cost_breakdown, LightInfo, TrafficInfo,
};
use crate::snapshot::VehicleSnapshot;
use log::{debug, info, trace, warn};
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time;

/// Distance within which any vehicle pulls over for an ambulance.
const YIELD_RADIUS: f64 = 150.0;
/// Stop short of a red light inside this distance.
const RED_STOP_DISTANCE: f64 = 60.0;
/// Stop short of a yellow light inside this distance.
const YELLOW_STOP_DISTANCE: f64 = 40.0;
/// Fast vehicles brake for yellow earlier.
const YELLOW_FAST_STOP_DISTANCE: f64 = 70.0;
const FAST_SPEED: f64 = 250.0;
/// Snap to a node once within this distance.
const ARRIVAL_EPSILON: f64 = 2.0;
/// Ambulance sightings older than this no longer force a yield.
const AMBULANCE_STALE: Duration = Duration::from_secs(1);
/// Reported delay is clamped so one jam cannot dominate the planner.
const DELAY_CAP: u64 = 100;
/// World units per tick = STEP_SCALE * speed / 60.
const STEP_SCALE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleKind {
    /// Shuttles between two fixed endpoints forever.
    Journey,
    /// Roams: picks a fresh random destination after each arrival.
    Car,
    /// Emergency vehicle: ignores lights and yields, broadcasts its position.
    Ambulance,
}

impl VehicleKind {
    pub fn is_emergency(self) -> bool {
        matches!(self, VehicleKind::Ambulance)
    }
}

#[derive(Debug, Clone, Copy)]
struct AmbulanceSighting {
    x: f64,
    y: f64,
    seen: Instant,
}

/// What put the gate into its pending state, logged when the retry runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplanReason {
    NoRoute,
    ClosuresChanged,
    ExternalRequest,
}

/// Cooldown bookkeeping for route recalculation. `next_attempt` of None
/// means a replan may run right away.
#[derive(Debug)]
struct RecalcGate {
    next_attempt: Option<Instant>,
    reason: Option<ReplanReason>,
    failures: u32,
}

impl RecalcGate {
    fn new() -> Self {
        Self {
            next_attempt: None,
            reason: None,
            failures: 0,
        }
    }

    fn ready(&self, now: Instant) -> bool {
        match self.next_attempt {
            None => true,
            Some(at) => now >= at,
        }
    }

    fn pass(&mut self) {
        self.failures = 0;
        self.next_attempt = None;
        self.reason = None;
    }

    fn fail(&mut self, now: Instant, backoff: Duration) {
        self.failures += 1;
        self.next_attempt = Some(now + backoff);
        self.reason = Some(ReplanReason::NoRoute);
    }

    /// The world changed; whatever backoff was pending no longer applies.
    fn reopen(&mut self, now: Instant, reason: ReplanReason) {
        self.next_attempt = Some(now);
        self.reason = Some(reason);
    }
}

pub struct VehicleAgent {
    pub id: AgentId,
    kind: VehicleKind,
    speed: f64,
    recalc_backoff: Duration,
    recalc_failure_limit: u32,

    network: Option<RoadNetwork>,
    x: f64,
    y: f64,
    current_node: NodeId,
    origin: NodeId,
    destination: NodeId,
    /// Planned node sequence, plan origin included; `next_index` points at
    /// the node currently driven toward.
    route: Vec<NodeId>,
    next_index: usize,

    traffic: HashMap<EdgeId, TrafficInfo>,
    lights: HashMap<(NodeId, Orientation), LightInfo>,
    blocked: HashSet<EdgeId>,
    ambulances: HashMap<AgentId, AmbulanceSighting>,

    stopped: bool,
    waiting_ticks: u64,
    travel_ticks: u64,
    /// Planner cost of the current route and base weight driven since.
    planned_cost: f64,
    traveled_cost: f64,
    /// Cost of the last invalidated route, consumed by the detour metric.
    abandoned_cost: Option<f64>,
    gate: RecalcGate,
    rng: SmallRng,
    metrics: Option<MetricsSender>,
}

impl VehicleAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: AgentId,
        kind: VehicleKind,
        start: NodeId,
        destination: NodeId,
        speed: f64,
        recalc_backoff: Duration,
        recalc_failure_limit: u32,
        rng: SmallRng,
    ) -> Self {
        Self {
            id,
            kind,
            speed,
            recalc_backoff,
            recalc_failure_limit,
            network: None,
            x: 0.0,
            y: 0.0,
            current_node: start,
            origin: start,
            destination,
            route: Vec::new(),
            next_index: 0,
            traffic: HashMap::new(),
            lights: HashMap::new(),
            blocked: HashSet::new(),
            ambulances: HashMap::new(),
            stopped: false,
            waiting_ticks: 0,
            travel_ticks: 0,
            planned_cost: 0.0,
            traveled_cost: 0.0,
            abandoned_cost: None,
            gate: RecalcGate::new(),
            rng,
            metrics: None,
        }
    }

    pub fn kind(&self) -> VehicleKind {
        self.kind
    }

    pub fn set_metrics(&mut self, sender: MetricsSender) {
        self.metrics = Some(sender);
    }

    fn emit(&self, event: MetricsEvent) {
        if let Some(sender) = &self.metrics {
            let _ = sender.send(event);
        }
    }

    fn route_active(&self) -> bool {
        self.next_index < self.route.len()
    }

    /// First closed edge on the remaining route, the segment in progress
    /// included.
    fn next_edge_blocked(&self) -> Option<EdgeId> {
        if !self.route_active() {
            return None;
        }
        let network = self.network.as_ref()?;
        let from = self.next_index.saturating_sub(1);
        first_blocked_edge(network, &self.route[from..], &self.blocked)
    }

    fn invalidate_route(&mut self) {
        if self.route_active() {
            self.abandoned_cost = Some(self.planned_cost);
        }
        self.route.clear();
        self.next_index = 0;
        self.stopped = false;
        debug!("{} dropped its route", self.id);
    }

    /// One replan attempt current node -> destination. Updates the gate and
    /// the cost ledger, and feeds the metrics sink.
    fn try_plan(&mut self, now: Instant) -> bool {
        let network = match self.network.as_ref() {
            Some(network) => network,
            None => return false,
        };

        let started = Instant::now();
        let planned = plan_route(
            network,
            self.current_node,
            self.destination,
            &self.traffic,
            &self.lights,
            &self.blocked,
        );
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.emit(MetricsEvent::RecalcLatency {
            vehicle_id: self.id.clone(),
            latency_ms,
        });

        match planned {
            Some(planned) => {
                let breakdown =
                    route_cost_breakdown(network, &planned.nodes, &self.traffic, &self.lights);
                self.emit(MetricsEvent::PenaltyBreakdown {
                    vehicle_id: self.id.clone(),
                    base_cost: breakdown.base,
                    signal_penalty: breakdown.signal_penalty,
                    traffic_penalty: breakdown.traffic_penalty,
                });
                if let Some(original_cost) = self.abandoned_cost.take() {
                    self.emit(MetricsEvent::RouteCosts {
                        vehicle_id: self.id.clone(),
                        original_cost,
                        new_cost: planned.cost,
                    });
                }
                debug!(
                    "{} planned {} nodes to {} at cost {:.1}",
                    self.id,
                    planned.nodes.len(),
                    self.destination,
                    planned.cost
                );
                self.route = planned.nodes;
                self.next_index = 1;
                self.planned_cost = planned.cost;
                self.traveled_cost = 0.0;
                self.gate.pass();
                true
            }
            None => {
                warn!(
                    "{} found no route {} -> {}",
                    self.id, self.current_node, self.destination
                );
                self.route.clear();
                self.next_index = 0;
                self.gate.fail(now, self.recalc_backoff);
                false
            }
        }
    }

    /// Picks a new goal. With `neighbor_fallback` the first choice is any
    /// adjacent node over an open edge, which is always plannable.
    fn pick_new_destination(&mut self, neighbor_fallback: bool) {
        let network = match self.network.as_ref() {
            Some(network) => network,
            None => return,
        };

        if neighbor_fallback {
            let mut open: Vec<NodeId> = network
                .neighbors(self.current_node)
                .iter()
                .filter(|(_, edge_id)| !self.blocked.contains(edge_id))
                .map(|(node, _)| *node)
                .collect();
            open.sort();
            if let Some(&next) = open.choose(&mut self.rng) {
                info!("{} rerouting to neighbor {}", self.id, next);
                self.destination = next;
                return;
            }
        }

        let mut nodes: Vec<NodeId> = network
            .nodes
            .keys()
            .copied()
            .filter(|&node| node != self.current_node)
            .collect();
        nodes.sort();
        if let Some(&choice) = nodes.choose(&mut self.rng) {
            debug!("{} new destination {}", self.id, choice);
            self.destination = choice;
        }
    }

    pub fn handle_message(&mut self, message: Message, now: Instant) {
        match message {
            Message::NetworkData { network } => {
                match network.position(self.current_node) {
                    Some((x, y)) => {
                        self.x = x;
                        self.y = y;
                    }
                    None => warn!("{} starts at unknown node {}", self.id, self.current_node),
                }
                info!(
                    "{} adopted the network ({} nodes), heading for {}",
                    self.id,
                    network.node_count(),
                    self.destination
                );
                self.network = Some(network);
                self.try_plan(now);
            }
            Message::TrafficReport {
                edge_id,
                delay,
                speed,
                ..
            } => {
                self.traffic.insert(edge_id, TrafficInfo { delay, speed });
            }
            Message::TrafficLightUpdate {
                node_id,
                orientation,
                phase,
                x,
                y,
            } => {
                self.lights
                    .insert((node_id, orientation), LightInfo { phase, x, y });
            }
            Message::AmbulancePosition { vehicle_id, x, y, .. } => {
                if vehicle_id != self.id {
                    self.ambulances
                        .insert(vehicle_id, AmbulanceSighting { x, y, seen: now });
                }
            }
            Message::BlockedEdgesUpdate { blocked_edges } => {
                self.blocked = blocked_edges.into_iter().collect();
                debug!("{} sees {} closed edges", self.id, self.blocked.len());
                if self.next_edge_blocked().is_some() {
                    self.invalidate_route();
                }
                self.gate.reopen(now, ReplanReason::ClosuresChanged);
            }
            Message::RecalculateRoute => {
                self.invalidate_route();
                self.gate.reopen(now, ReplanReason::ExternalRequest);
            }
            other => {
                debug!("{} ignoring {}", self.id, other.wire_type());
            }
        }
    }

    /// One movement step. Returns the messages this tick produces, all of
    /// them addressed to the coordinator.
    pub fn movement_tick(&mut self, now: Instant) -> Vec<Message> {
        let mut outbound = Vec::new();
        if self.network.is_none() {
            return outbound;
        }

        if !self.route_active() {
            if self.gate.ready(now) {
                if let Some(reason) = self.gate.reason.take() {
                    debug!("{} replanning after {:?}", self.id, reason);
                }
                if self.gate.failures >= self.recalc_failure_limit
                    && self.kind == VehicleKind::Car
                {
                    // This destination is not happening; try somewhere
                    // reachable instead.
                    self.pick_new_destination(true);
                    self.gate.failures = 0;
                }
                self.try_plan(now);
            }
            return outbound;
        }

        self.travel_ticks += 1;

        if let Some(edge_id) = self.next_edge_blocked() {
            debug!("{} route runs over closed edge {}", self.id, edge_id);
            self.invalidate_route();
            return outbound;
        }

        let target = self.route[self.next_index];
        let (target_x, target_y) = match self.network.as_ref().and_then(|n| n.position(target)) {
            Some(position) => position,
            None => {
                warn!("{} lost node {} from its map", self.id, target);
                self.invalidate_route();
                return outbound;
            }
        };

        if !self.kind.is_emergency() {
            if self.should_yield(now) {
                self.stopped = true;
                self.waiting_ticks += 1;
                return outbound;
            }
            if self.should_hold_at_light(target, target_x, target_y) {
                self.stopped = true;
                self.waiting_ticks += 1;
                return outbound;
            }
        }
        self.stopped = false;

        let dx = target_x - self.x;
        let dy = target_y - self.y;
        let distance = (dx.powi(2) + dy.powi(2)).sqrt();
        let step = STEP_SCALE * self.speed / 60.0;
        if distance <= ARRIVAL_EPSILON.max(step) {
            self.arrive_at(target, now, &mut outbound);
        } else {
            self.x += dx / distance * step;
            self.y += dy / distance * step;
            trace!("{} at ({:.0}, {:.0}) heading {}", self.id, self.x, self.y, target);
        }
        outbound
    }

    /// Prunes stale sightings, then yields if any live ambulance is close.
    fn should_yield(&mut self, now: Instant) -> bool {
        self.ambulances
            .retain(|_, sighting| now.duration_since(sighting.seen) <= AMBULANCE_STALE);
        for (id, sighting) in &self.ambulances {
            let distance =
                ((sighting.x - self.x).powi(2) + (sighting.y - self.y).powi(2)).sqrt();
            if distance < YIELD_RADIUS {
                debug!("{} yielding to {id}", self.id);
                return true;
            }
        }
        false
    }

    /// The head that governs this approach is the one perpendicular to the
    /// direction of travel, at the next node. Distances are measured to the
    /// position the light broadcast.
    fn should_hold_at_light(&self, target: NodeId, target_x: f64, target_y: f64) -> bool {
        let movement = Orientation::of_delta(target_x - self.x, target_y - self.y);
        let info = match self.lights.get(&(target, movement.perpendicular())) {
            Some(info) => info,
            None => return false,
        };
        let distance = ((info.x - self.x).powi(2) + (info.y - self.y).powi(2)).sqrt();
        match info.phase {
            LightPhase::Red => distance < RED_STOP_DISTANCE,
            LightPhase::Yellow => {
                distance < YELLOW_STOP_DISTANCE
                    || (self.speed > FAST_SPEED && distance < YELLOW_FAST_STOP_DISTANCE)
            }
            LightPhase::Green => false,
        }
    }

    fn arrive_at(&mut self, node: NodeId, now: Instant, outbound: &mut Vec<Message>) {
        if let Some(network) = self.network.as_ref() {
            if let Some(edge) = network.edge_between(self.current_node, node) {
                self.traveled_cost += edge.weight;
            }
            if let Some((x, y)) = network.position(node) {
                self.x = x;
                self.y = y;
            }
        }
        self.current_node = node;
        self.next_index += 1;

        if node == self.destination {
            info!(
                "{} arrived at {} after {} ticks ({} waiting)",
                self.id, node, self.travel_ticks, self.waiting_ticks
            );
            outbound.push(Message::Arrival {
                vehicle_id: self.id.clone(),
                travel_ticks: self.travel_ticks,
                waiting_ticks: self.waiting_ticks,
            });
            self.emit(MetricsEvent::LegCompleted {
                vehicle_id: self.id.clone(),
                planned_cost: self.planned_cost,
                traveled_cost: self.traveled_cost,
            });
            self.travel_ticks = 0;
            self.waiting_ticks = 0;
            self.route.clear();
            self.next_index = 0;

            match self.kind {
                VehicleKind::Journey => {
                    let home = self.origin;
                    self.origin = node;
                    self.destination = home;
                }
                VehicleKind::Car | VehicleKind::Ambulance => {
                    self.origin = node;
                    self.pick_new_destination(false);
                }
            }
            self.try_plan(now);
        } else if self.next_edge_blocked().is_some() {
            // The segment ahead was closed while we crossed the last one.
            self.invalidate_route();
        }
    }

    /// Congestion report for the edge currently being traversed.
    pub fn report_tick(&self) -> Option<Message> {
        if !self.route_active() {
            return None;
        }
        let network = self.network.as_ref()?;
        let edge = network.edge_between(self.current_node, self.route[self.next_index])?;
        Some(Message::TrafficReport {
            vehicle_id: self.id.clone(),
            edge_id: edge.id,
            delay: self.waiting_ticks.min(DELAY_CAP) as u32,
            speed: self.speed,
        })
    }

    /// Ambulances announce themselves so traffic can clear a corridor.
    pub fn broadcast_tick(&self) -> Option<Message> {
        if !self.kind.is_emergency() {
            return None;
        }
        self.network.as_ref()?;
        Some(Message::AmbulancePosition {
            vehicle_id: self.id.clone(),
            x: self.x,
            y: self.y,
            current_node: self.current_node,
            speed: self.speed,
        })
    }

    pub fn snapshot(&self) -> VehicleSnapshot {
        let mut known_blocked: Vec<EdgeId> = self.blocked.iter().copied().collect();
        known_blocked.sort();
        VehicleSnapshot {
            id: self.id.clone(),
            kind: self.kind,
            x: self.x,
            y: self.y,
            current_node: self.current_node,
            target_node: self.route.get(self.next_index).copied(),
            destination: self.destination,
            route_len: self.route.len().saturating_sub(self.next_index),
            stopped: self.stopped,
            waiting_ticks: self.waiting_ticks,
            travel_ticks: self.travel_ticks,
            known_blocked,
            planned_cost: self.planned_cost,
            traveled_cost: self.traveled_cost,
        }
    }
}

/// Drives one vehicle: a movement tick, a report tick, the ambulance
/// broadcast when applicable, and mailbox intake, all in one select loop so
/// the state never needs a lock.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    mut agent: VehicleAgent,
    bus: MessageBus,
    mut mailbox: Mailbox,
    snapshot_tx: watch::Sender<VehicleSnapshot>,
    move_period: Duration,
    report_period: Duration,
    ambulance_period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    bus.send(
        COORDINATOR,
        &agent.id,
        &Message::RequestNetwork {
            vehicle_id: agent.id.clone(),
        },
    );

    let mut move_ticker = time::interval(move_period);
    move_ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut report_ticker = time::interval(report_period);
    report_ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut ambulance_ticker = time::interval(ambulance_period);
    ambulance_ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let emergency = agent.kind().is_emergency();

    loop {
        tokio::select! {
            _ = move_ticker.tick() => {
                for message in agent.movement_tick(Instant::now()) {
                    bus.send(COORDINATOR, &agent.id, &message);
                }
                let _ = snapshot_tx.send(agent.snapshot());
            }
            _ = report_ticker.tick() => {
                if let Some(message) = agent.report_tick() {
                    bus.send(COORDINATOR, &agent.id, &message);
                }
            }
            _ = ambulance_ticker.tick(), if emergency => {
                if let Some(message) = agent.broadcast_tick() {
                    bus.send(COORDINATOR, &agent.id, &message);
                }
            }
            envelope = mailbox.recv() => {
                match envelope {
                    Some(envelope) => {
                        if let Some(message) = decode(&envelope) {
                            agent.handle_message(message, Instant::now());
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
    debug!("{} parked", agent.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Edge, RoadClass};
    use rand::SeedableRng;

    /// Three nodes in a row, 200 apart, symmetric edges of weight 10.
    fn line() -> RoadNetwork {
        let mut network = RoadNetwork::new();
        network.add_node(NodeId(0, 0), 50.0, 50.0);
        network.add_node(NodeId(0, 1), 250.0, 50.0);
        network.add_node(NodeId(0, 2), 450.0, 50.0);
        pair(&mut network, 0, NodeId(0, 0), NodeId(0, 1));
        pair(&mut network, 2, NodeId(0, 1), NodeId(0, 2));
        network
    }

    /// Four nodes in a square, two equally priced ways around.
    fn square() -> RoadNetwork {
        let mut network = RoadNetwork::new();
        network.add_node(NodeId(0, 0), 50.0, 50.0);
        network.add_node(NodeId(0, 1), 250.0, 50.0);
        network.add_node(NodeId(1, 1), 250.0, 250.0);
        network.add_node(NodeId(1, 0), 50.0, 250.0);
        pair(&mut network, 0, NodeId(0, 0), NodeId(0, 1));
        pair(&mut network, 2, NodeId(0, 1), NodeId(1, 1));
        pair(&mut network, 4, NodeId(0, 0), NodeId(1, 0));
        pair(&mut network, 6, NodeId(1, 0), NodeId(1, 1));
        network
    }

    fn pair(network: &mut RoadNetwork, id: u32, a: NodeId, b: NodeId) {
        for (edge_id, from, to) in [(id, a, b), (id + 1, b, a)] {
            network.add_edge(Edge {
                id: EdgeId(edge_id),
                from,
                to,
                weight: 10.0,
                road_class: RoadClass::Main,
            });
        }
    }

    /// Speed 12000 gives a 20-unit step, ten ticks per 200-unit edge.
    fn vehicle(kind: VehicleKind, network: RoadNetwork, destination: NodeId) -> VehicleAgent {
        let id = match kind {
            VehicleKind::Journey => "journey_0",
            VehicleKind::Car => "car_1",
            VehicleKind::Ambulance => "amb_0",
        };
        let mut agent = VehicleAgent::new(
            id.to_string(),
            kind,
            NodeId(0, 0),
            destination,
            12000.0,
            Duration::from_millis(500),
            2,
            SmallRng::seed_from_u64(9),
        );
        agent.handle_message(Message::NetworkData { network }, Instant::now());
        agent
    }

    fn set_light(agent: &mut VehicleAgent, node: NodeId, phase: LightPhase, x: f64, y: f64) {
        agent.handle_message(
            Message::TrafficLightUpdate {
                node_id: node,
                orientation: Orientation::Vertical,
                phase,
                x,
                y,
            },
            Instant::now(),
        );
    }

    #[test]
    fn adopts_network_and_plans() {
        let agent = vehicle(VehicleKind::Car, line(), NodeId(0, 2));
        let snapshot = agent.snapshot();
        assert_eq!((snapshot.x, snapshot.y), (50.0, 50.0));
        assert_eq!(snapshot.target_node, Some(NodeId(0, 1)));
        assert_eq!(snapshot.route_len, 2);
        assert!((snapshot.planned_cost - 20.0).abs() < 1e-9);
    }

    #[test]
    fn glides_snaps_and_reports_arrival() {
        let mut agent = vehicle(VehicleKind::Car, line(), NodeId(0, 2));
        let now = Instant::now();

        for _ in 0..9 {
            assert!(agent.movement_tick(now).is_empty());
        }
        assert_eq!(agent.snapshot().current_node, NodeId(0, 0));

        // Tick 10 snaps onto the middle node and accrues the edge weight.
        agent.movement_tick(now);
        let snapshot = agent.snapshot();
        assert_eq!(snapshot.current_node, NodeId(0, 1));
        assert!((snapshot.traveled_cost - 10.0).abs() < 1e-9);

        for _ in 0..9 {
            assert!(agent.movement_tick(now).is_empty());
        }
        let outbound = agent.movement_tick(now);
        match &outbound[..] {
            [Message::Arrival {
                vehicle_id,
                travel_ticks,
                waiting_ticks,
            }] => {
                assert_eq!(vehicle_id, "car_1");
                assert_eq!(*travel_ticks, 20);
                assert_eq!(*waiting_ticks, 0);
            }
            other => panic!("expected an arrival, got {other:?}"),
        }

        // A car lines up its next trip on the spot.
        let snapshot = agent.snapshot();
        assert_ne!(snapshot.destination, NodeId(0, 2));
        assert!(snapshot.route_len > 0);
        assert_eq!(snapshot.travel_ticks, 0);
    }

    #[test]
    fn stops_for_red_and_goes_on_green() {
        let mut agent = vehicle(VehicleKind::Car, line(), NodeId(0, 2));
        set_light(&mut agent, NodeId(0, 1), LightPhase::Red, 250.0, 50.0);
        let now = Instant::now();

        // Approach: 60 units out the rule is not yet under the threshold,
        // one step later it is.
        for _ in 0..8 {
            agent.movement_tick(now);
        }
        assert!(!agent.snapshot().stopped);

        agent.movement_tick(now);
        let snapshot = agent.snapshot();
        assert!(snapshot.stopped);
        assert_eq!(snapshot.waiting_ticks, 1);
        assert_eq!(snapshot.x, 210.0);

        // Held in place while red, still accruing travel ticks.
        agent.movement_tick(now);
        let snapshot = agent.snapshot();
        assert_eq!(snapshot.x, 210.0);
        assert_eq!(snapshot.waiting_ticks, 2);
        assert_eq!(snapshot.travel_ticks, 10);

        set_light(&mut agent, NodeId(0, 1), LightPhase::Green, 250.0, 50.0);
        agent.movement_tick(now);
        let snapshot = agent.snapshot();
        assert!(!snapshot.stopped);
        assert_eq!(snapshot.x, 230.0);
    }

    #[test]
    fn fast_vehicles_brake_early_for_yellow() {
        let mut agent = vehicle(VehicleKind::Car, line(), NodeId(0, 2));
        set_light(&mut agent, NodeId(0, 1), LightPhase::Yellow, 250.0, 50.0);
        let now = Instant::now();

        // At speed > 250 the yellow threshold grows to 70 units: the stop
        // comes at 190, not 210.
        for _ in 0..8 {
            agent.movement_tick(now);
        }
        let snapshot = agent.snapshot();
        assert!(snapshot.stopped);
        assert_eq!(snapshot.x, 190.0);
    }

    #[test]
    fn slow_vehicles_only_hold_close_to_yellow() {
        let mut network = RoadNetwork::new();
        network.add_node(NodeId(0, 0), 50.0, 50.0);
        network.add_node(NodeId(0, 1), 80.0, 50.0);
        pair(&mut network, 0, NodeId(0, 0), NodeId(0, 1));

        let mut agent = VehicleAgent::new(
            "car_1".to_string(),
            VehicleKind::Car,
            NodeId(0, 0),
            NodeId(0, 1),
            240.0,
            Duration::from_millis(500),
            2,
            SmallRng::seed_from_u64(9),
        );
        agent.handle_message(Message::NetworkData { network }, Instant::now());
        set_light(&mut agent, NodeId(0, 1), LightPhase::Yellow, 80.0, 50.0);

        // 30 units out: inside the plain yellow threshold even at low speed.
        agent.movement_tick(Instant::now());
        assert!(agent.snapshot().stopped);
    }

    #[test]
    fn ambulances_ignore_lights_and_sightings() {
        let mut agent = vehicle(VehicleKind::Ambulance, line(), NodeId(0, 2));
        set_light(&mut agent, NodeId(0, 1), LightPhase::Red, 250.0, 50.0);
        let now = Instant::now();
        agent.handle_message(
            Message::AmbulancePosition {
                vehicle_id: "amb_1".to_string(),
                x: 70.0,
                y: 50.0,
                current_node: NodeId(0, 0),
                speed: 560.0,
            },
            now,
        );

        for _ in 0..12 {
            agent.movement_tick(now);
        }
        let snapshot = agent.snapshot();
        assert!(!snapshot.stopped);
        assert_eq!(snapshot.waiting_ticks, 0);
        assert_eq!(snapshot.current_node, NodeId(0, 1));
    }

    #[test]
    fn yields_to_live_ambulances_only() {
        let mut agent = vehicle(VehicleKind::Car, line(), NodeId(0, 2));
        let now = Instant::now();
        agent.handle_message(
            Message::AmbulancePosition {
                vehicle_id: "amb_0".to_string(),
                x: 120.0,
                y: 50.0,
                current_node: NodeId(0, 0),
                speed: 560.0,
            },
            now,
        );

        agent.movement_tick(now);
        let snapshot = agent.snapshot();
        assert!(snapshot.stopped);
        assert_eq!(snapshot.waiting_ticks, 1);

        // The sighting ages out after a second of silence.
        let later = now + Duration::from_secs(2);
        agent.movement_tick(later);
        let snapshot = agent.snapshot();
        assert!(!snapshot.stopped);
        assert_eq!(snapshot.waiting_ticks, 1);
    }

    #[test]
    fn own_broadcast_echo_is_ignored() {
        let mut agent = vehicle(VehicleKind::Car, line(), NodeId(0, 2));
        let now = Instant::now();
        agent.handle_message(
            Message::AmbulancePosition {
                vehicle_id: "car_1".to_string(),
                x: 60.0,
                y: 50.0,
                current_node: NodeId(0, 0),
                speed: 480.0,
            },
            now,
        );
        agent.movement_tick(now);
        assert!(!agent.snapshot().stopped);
    }

    #[test]
    fn closure_invalidates_and_the_next_tick_detours() {
        let mut agent = vehicle(VehicleKind::Car, square(), NodeId(1, 1));
        let now = Instant::now();
        let first_hop = agent.snapshot().target_node.unwrap();

        // Close both directions of the first planned segment.
        let network = square();
        let out_edge = network.edge_between(NodeId(0, 0), first_hop).unwrap().id;
        let back_edge = network.edge_between(first_hop, NodeId(0, 0)).unwrap().id;
        agent.handle_message(
            Message::BlockedEdgesUpdate {
                blocked_edges: vec![out_edge, back_edge],
            },
            now,
        );

        let snapshot = agent.snapshot();
        assert_eq!(snapshot.route_len, 0);
        assert_eq!(snapshot.known_blocked.len(), 2);

        // Recovery happens on the following tick, around the other side.
        agent.movement_tick(now);
        let snapshot = agent.snapshot();
        assert!(snapshot.route_len > 0);
        assert_ne!(snapshot.target_node, Some(first_hop));
    }

    #[test]
    fn gate_backs_off_and_cars_eventually_switch_goals() {
        let mut agent = vehicle(VehicleKind::Car, line(), NodeId(0, 2));
        let now = Instant::now();

        // Sever the only link to the goal.
        agent.handle_message(
            Message::BlockedEdgesUpdate {
                blocked_edges: vec![EdgeId(2), EdgeId(3)],
            },
            now,
        );
        assert_eq!(agent.snapshot().route_len, 0);
        assert_eq!(agent.gate.reason, Some(ReplanReason::ClosuresChanged));

        // First retry fails and arms the backoff; a tick inside the window
        // does nothing.
        agent.movement_tick(now);
        assert_eq!(agent.gate.failures, 1);
        assert_eq!(agent.gate.reason, Some(ReplanReason::NoRoute));
        agent.movement_tick(now + Duration::from_millis(1));
        assert_eq!(agent.gate.failures, 1);

        // Second failure after the backoff, then the failure limit trips and
        // the car settles for the reachable neighbor.
        agent.movement_tick(now + Duration::from_millis(600));
        assert_eq!(agent.gate.failures, 2);
        agent.movement_tick(now + Duration::from_millis(1200));
        let snapshot = agent.snapshot();
        assert_eq!(snapshot.destination, NodeId(0, 1));
        assert!(snapshot.route_len > 0);
    }

    #[test]
    fn journeys_shuttle_back_and_forth() {
        let mut agent = vehicle(VehicleKind::Journey, line(), NodeId(0, 2));
        let now = Instant::now();

        let mut arrival_seen = false;
        for _ in 0..20 {
            if !agent.movement_tick(now).is_empty() {
                arrival_seen = true;
            }
        }
        assert!(arrival_seen);

        let snapshot = agent.snapshot();
        assert_eq!(snapshot.current_node, NodeId(0, 2));
        assert_eq!(snapshot.destination, NodeId(0, 0));
        assert_eq!(snapshot.target_node, Some(NodeId(0, 1)));
    }

    #[test]
    fn recalculate_nudge_clears_and_replans() {
        let mut agent = vehicle(VehicleKind::Car, line(), NodeId(0, 2));
        let now = Instant::now();
        for _ in 0..3 {
            agent.movement_tick(now);
        }

        agent.handle_message(Message::RecalculateRoute, now);
        assert_eq!(agent.snapshot().route_len, 0);

        agent.movement_tick(now);
        assert!(agent.snapshot().route_len > 0);
    }

    #[test]
    fn reports_cover_the_current_edge_with_capped_delay() {
        let mut agent = vehicle(VehicleKind::Car, line(), NodeId(0, 2));
        match agent.report_tick() {
            Some(Message::TrafficReport {
                edge_id,
                delay,
                speed,
                ..
            }) => {
                assert_eq!(edge_id, EdgeId(0));
                assert_eq!(delay, 0);
                assert_eq!(speed, 12000.0);
            }
            other => panic!("expected a traffic report, got {other:?}"),
        }

        // Park the car at a red light long enough to hit the cap.
        set_light(&mut agent, NodeId(0, 1), LightPhase::Red, 250.0, 50.0);
        let now = Instant::now();
        for _ in 0..150 {
            agent.movement_tick(now);
        }
        match agent.report_tick() {
            Some(Message::TrafficReport { delay, .. }) => assert_eq!(delay, 100),
            other => panic!("expected a traffic report, got {other:?}"),
        }
    }

    #[test]
    fn only_ambulances_broadcast() {
        let ambulance = vehicle(VehicleKind::Ambulance, line(), NodeId(0, 2));
        match ambulance.broadcast_tick() {
            Some(Message::AmbulancePosition {
                vehicle_id,
                x,
                y,
                current_node,
                ..
            }) => {
                assert_eq!(vehicle_id, "amb_0");
                assert_eq!((x, y), (50.0, 50.0));
                assert_eq!(current_node, NodeId(0, 0));
            }
            other => panic!("expected an ambulance position, got {other:?}"),
        }

        let car = vehicle(VehicleKind::Car, line(), NodeId(0, 2));
        assert!(car.broadcast_tick().is_none());
    }

    #[test]
    fn metrics_trace_plans_and_detours() {
        let (sender, mut receiver) = crate::metrics::channel();
        let mut agent = VehicleAgent::new(
            "car_1".to_string(),
            VehicleKind::Car,
            NodeId(0, 0),
            NodeId(1, 1),
            12000.0,
            Duration::from_millis(500),
            2,
            SmallRng::seed_from_u64(9),
        );
        agent.set_metrics(sender);
        let now = Instant::now();
        agent.handle_message(
            Message::NetworkData { network: square() },
            now,
        );
        let original_cost = agent.snapshot().planned_cost;
        let first_hop = agent.snapshot().target_node.unwrap();

        let network = square();
        let out_edge = network.edge_between(NodeId(0, 0), first_hop).unwrap().id;
        let back_edge = network.edge_between(first_hop, NodeId(0, 0)).unwrap().id;
        agent.handle_message(
            Message::BlockedEdgesUpdate {
                blocked_edges: vec![out_edge, back_edge],
            },
            now,
        );
        agent.movement_tick(now);

        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        let kinds: Vec<&str> = events
            .iter()
            .map(|event| match event {
                MetricsEvent::RecalcLatency { .. } => "latency",
                MetricsEvent::RouteCosts { .. } => "costs",
                MetricsEvent::PenaltyBreakdown { .. } => "breakdown",
                MetricsEvent::LegCompleted { .. } => "leg",
            })
            .collect();
        // Adoption plan, then the detour replan with its cost comparison.
        assert_eq!(kinds, vec!["latency", "breakdown", "latency", "breakdown", "costs"]);

        match &events[4] {
            MetricsEvent::RouteCosts {
                original_cost: reported,
                new_cost,
                ..
            } => {
                assert!((reported - original_cost).abs() < 1e-9);
                assert!((new_cost - 20.0).abs() < 1e-9);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
