// agents/traffic_light.rs
//
// One agent per light head, two heads per lit intersection. A head runs its
// own green/yellow/red timer and coordinates with the perpendicular head at
// the same intersection purely over messages: each phase change goes to the
// peer directly, and a head about to turn green holds red while its cached
// view of the peer still says green. Position is learned from the
// coordinator, not configured, and until it arrives the head keeps asking
// and stays silent toward traffic.

use crate::communication::{
    decode, light_address, AgentId, Mailbox, Message, MessageBus, COORDINATOR,
};
use crate::network::{LightPhase, NodeId, Orientation};
use crate::snapshot::LightSnapshot;
use log::debug;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;

/// Ticks a head holds red before retrying when the peer still shows green.
const RED_RETRY_TICKS: u32 = 3;
/// Cycle ticks between position requests while the position is unknown.
const POSITION_RETRY_TICKS: u32 = 10;

/// Draw offset of a head from its intersection corner.
fn head_offset(orientation: Orientation) -> (f64, f64) {
    match orientation {
        Orientation::Horizontal => (0.0, -25.0),
        Orientation::Vertical => (-25.0, 0.0),
    }
}

pub struct TrafficLightAgent {
    pub id: AgentId,
    node: NodeId,
    orientation: Orientation,
    phase: LightPhase,
    /// Ticks left in the current phase.
    timer: u32,
    green_time: u32,
    red_time: u32,
    yellow_time: u32,
    /// Peer phase as last announced; None until the first update arrives.
    peer_phase: Option<LightPhase>,
    position: Option<(f64, f64)>,
    ticks_without_position: u32,
}

impl TrafficLightAgent {
    /// Horizontal heads boot green and vertical heads red, so a pair never
    /// starts in conflict.
    pub fn new(
        node: NodeId,
        orientation: Orientation,
        green_time: u32,
        red_time: u32,
        yellow_time: u32,
    ) -> Self {
        let (phase, timer) = match orientation {
            Orientation::Horizontal => (LightPhase::Green, green_time),
            Orientation::Vertical => (LightPhase::Red, red_time),
        };
        Self {
            id: light_address(node, orientation),
            node,
            orientation,
            phase,
            timer,
            green_time,
            red_time,
            yellow_time,
            peer_phase: None,
            position: None,
            ticks_without_position: 0,
        }
    }

    pub fn phase(&self) -> LightPhase {
        self.phase
    }

    fn peer_address(&self) -> AgentId {
        light_address(self.node, self.orientation.perpendicular())
    }

    /// Advances the phase timer by one tick and returns the messages this
    /// tick produces.
    pub fn cycle_tick(&mut self) -> Vec<(AgentId, Message)> {
        let mut outbound = Vec::new();

        if self.position.is_none() {
            if self.ticks_without_position % POSITION_RETRY_TICKS == 0 {
                outbound.push((
                    COORDINATOR.to_string(),
                    Message::RequestPosition { node_id: self.node },
                ));
            }
            self.ticks_without_position += 1;
        }

        self.timer = self.timer.saturating_sub(1);
        let mut changed = false;
        if self.timer == 0 {
            match self.phase {
                LightPhase::Green => {
                    self.phase = LightPhase::Yellow;
                    self.timer = self.yellow_time;
                    changed = true;
                }
                LightPhase::Yellow => {
                    self.phase = LightPhase::Red;
                    self.timer = self.red_time;
                    changed = true;
                }
                LightPhase::Red => {
                    if self.peer_phase == Some(LightPhase::Green) {
                        // The crossing is still in use; hold red and retry
                        // shortly.
                        self.timer = RED_RETRY_TICKS;
                        debug!("{} holding red, peer still green", self.id);
                    } else {
                        self.phase = LightPhase::Green;
                        self.timer = self.green_time;
                        changed = true;
                    }
                }
            }
        }

        if changed {
            debug!("{} -> {:?} for {} ticks", self.id, self.phase, self.timer);
            outbound.push((
                self.peer_address(),
                Message::PairedLightUpdate {
                    node_id: self.node,
                    orientation: self.orientation,
                    phase: self.phase,
                },
            ));
        }

        // Traffic only hears from a head that knows where it stands.
        if let Some((x, y)) = self.position {
            outbound.push((
                COORDINATOR.to_string(),
                Message::TrafficLightUpdate {
                    node_id: self.node,
                    orientation: self.orientation,
                    phase: self.phase,
                    x,
                    y,
                },
            ));
        }

        outbound
    }

    pub fn handle_message(&mut self, message: Message) {
        match message {
            Message::PositionData { node_id, x, y } => {
                if node_id == self.node {
                    self.position = Some((x, y));
                    debug!("{} placed at ({x}, {y})", self.id);
                }
            }
            Message::PairedLightUpdate { phase, .. } => {
                self.peer_phase = Some(phase);
            }
            other => {
                debug!("{} ignoring {}", self.id, other.wire_type());
            }
        }
    }

    pub fn snapshot(&self) -> LightSnapshot {
        let (base_x, base_y) = self.position.unwrap_or((0.0, 0.0));
        let (dx, dy) = head_offset(self.orientation);
        LightSnapshot {
            node: self.node,
            orientation: self.orientation,
            phase: self.phase,
            x: base_x + dx,
            y: base_y + dy,
        }
    }
}

/// Drives one head: a cycle tick per period, mailbox traffic in between.
pub async fn run(
    mut agent: TrafficLightAgent,
    bus: MessageBus,
    mut mailbox: Mailbox,
    snapshot_tx: watch::Sender<LightSnapshot>,
    light_period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(light_period);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for (to, message) in agent.cycle_tick() {
                    bus.send(&to, &agent.id, &message);
                }
                let _ = snapshot_tx.send(agent.snapshot());
            }
            envelope = mailbox.recv() => {
                match envelope {
                    Some(envelope) => {
                        if let Some(message) = decode(&envelope) {
                            agent.handle_message(message);
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
    debug!("{} stopped", agent.id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_types(outbound: &[(AgentId, Message)]) -> Vec<&'static str> {
        outbound.iter().map(|(_, m)| m.wire_type()).collect()
    }

    #[test]
    fn boot_phases_never_conflict() {
        let horizontal = TrafficLightAgent::new(NodeId(2, 2), Orientation::Horizontal, 5, 5, 1);
        let vertical = TrafficLightAgent::new(NodeId(2, 2), Orientation::Vertical, 5, 5, 1);
        assert_eq!(horizontal.phase(), LightPhase::Green);
        assert_eq!(vertical.phase(), LightPhase::Red);
    }

    #[test]
    fn walks_green_yellow_red() {
        let mut agent = TrafficLightAgent::new(NodeId(1, 1), Orientation::Horizontal, 2, 2, 1);
        agent.handle_message(Message::PositionData {
            node_id: NodeId(1, 1),
            x: 250.0,
            y: 250.0,
        });

        // Tick 1: green holds (timer 2 -> 1), only the broadcast goes out.
        let out = agent.cycle_tick();
        assert_eq!(agent.phase(), LightPhase::Green);
        assert_eq!(message_types(&out), vec!["traffic_light_update"]);

        // Tick 2: green expires into yellow, peer gets notified.
        let out = agent.cycle_tick();
        assert_eq!(agent.phase(), LightPhase::Yellow);
        assert_eq!(
            message_types(&out),
            vec!["paired_light_update", "traffic_light_update"]
        );
        assert_eq!(out[0].0, light_address(NodeId(1, 1), Orientation::Vertical));

        // Tick 3: yellow expires into red.
        agent.cycle_tick();
        assert_eq!(agent.phase(), LightPhase::Red);

        // Ticks 4-5: red runs out, and with no word from the peer the head
        // goes green again.
        agent.cycle_tick();
        let out = agent.cycle_tick();
        assert_eq!(agent.phase(), LightPhase::Green);
        assert!(message_types(&out).contains(&"paired_light_update"));
    }

    #[test]
    fn holds_red_while_peer_reports_green() {
        let mut agent = TrafficLightAgent::new(NodeId(1, 1), Orientation::Vertical, 5, 1, 1);
        agent.handle_message(Message::PairedLightUpdate {
            node_id: NodeId(1, 1),
            orientation: Orientation::Horizontal,
            phase: LightPhase::Green,
        });

        // Red expires but the peer is green: stay red, no phase message.
        let out = agent.cycle_tick();
        assert_eq!(agent.phase(), LightPhase::Red);
        assert!(!message_types(&out).contains(&"paired_light_update"));

        // The hold lasts RED_RETRY_TICKS; with the peer now red the next
        // expiry flips green.
        agent.handle_message(Message::PairedLightUpdate {
            node_id: NodeId(1, 1),
            orientation: Orientation::Horizontal,
            phase: LightPhase::Red,
        });
        for _ in 0..RED_RETRY_TICKS {
            agent.cycle_tick();
        }
        assert_eq!(agent.phase(), LightPhase::Green);
    }

    #[test]
    fn silent_until_placed() {
        let mut agent = TrafficLightAgent::new(NodeId(4, 4), Orientation::Horizontal, 3, 3, 1);

        let out = agent.cycle_tick();
        assert_eq!(message_types(&out), vec!["request_position"]);
        assert_eq!(out[0].0, COORDINATOR);

        agent.handle_message(Message::PositionData {
            node_id: NodeId(4, 4),
            x: 850.0,
            y: 850.0,
        });
        let out = agent.cycle_tick();
        assert!(message_types(&out).contains(&"traffic_light_update"));
        assert!(!message_types(&out).contains(&"request_position"));
    }

    #[test]
    fn keeps_asking_for_its_position() {
        let mut agent = TrafficLightAgent::new(NodeId(4, 4), Orientation::Horizontal, 30, 30, 1);
        let mut request_ticks = Vec::new();
        for tick in 0..25 {
            let out = agent.cycle_tick();
            if message_types(&out).contains(&"request_position") {
                request_ticks.push(tick);
            }
        }
        assert_eq!(request_ticks, vec![0, 10, 20]);
    }

    #[test]
    fn ignores_position_for_another_node() {
        let mut agent = TrafficLightAgent::new(NodeId(2, 3), Orientation::Vertical, 3, 3, 1);
        agent.handle_message(Message::PositionData {
            node_id: NodeId(3, 2),
            x: 1.0,
            y: 2.0,
        });
        let out = agent.cycle_tick();
        assert!(message_types(&out).contains(&"request_position"));
    }

    #[test]
    fn snapshot_offsets_heads_apart() {
        let mut horizontal = TrafficLightAgent::new(NodeId(1, 1), Orientation::Horizontal, 3, 3, 1);
        let mut vertical = TrafficLightAgent::new(NodeId(1, 1), Orientation::Vertical, 3, 3, 1);
        for agent in [&mut horizontal, &mut vertical] {
            agent.handle_message(Message::PositionData {
                node_id: NodeId(1, 1),
                x: 250.0,
                y: 250.0,
            });
        }
        let h = horizontal.snapshot();
        let v = vertical.snapshot();
        assert_eq!((h.x, h.y), (250.0, 225.0));
        assert_eq!((v.x, v.y), (225.0, 250.0));
    }
}
