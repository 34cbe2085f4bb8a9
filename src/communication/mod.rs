// communication/mod.rs
pub mod bus;
pub mod messages;

pub use bus::{decode, AgentId, Envelope, Mailbox, MessageBus};
pub use messages::Message;

use crate::network::{NodeId, Orientation};

/// Well-known singleton addresses.
pub const COORDINATOR: &str = "coordinator";
pub const DISRUPTOR: &str = "disruptor";

/// Address of a traffic light head, e.g. `"light_2_2_h"`.
pub fn light_address(node: NodeId, orientation: Orientation) -> String {
    let suffix = match orientation {
        Orientation::Horizontal => "h",
        Orientation::Vertical => "v",
    };
    format!("light_{}_{}_{}", node.0, node.1, suffix)
}
