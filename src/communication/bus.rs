use crate::communication::messages::Message;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Stable agent address on the bus, e.g. `"coordinator"` or `"car_3"`.
pub type AgentId = String;

/// Bounded mailbox depth. A full mailbox drops new envelopes; the periodic
/// re-broadcasts make up for the rare loss.
const MAILBOX_CAPACITY: usize = 256;

/// One delivered payload: the sender's address plus the JSON-encoded message.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: AgentId,
    pub body: String,
}

/// In-process addressed router.
///
/// A registry of per-agent bounded mailboxes. Delivery is asynchronous and
/// at-most-once: envelopes to unknown addresses or full mailboxes are
/// dropped. Envelopes between one sender and one receiver arrive in send
/// order; nothing is guaranteed across senders.
#[derive(Clone, Default)]
pub struct MessageBus {
    mailboxes: Arc<Mutex<HashMap<AgentId, mpsc::Sender<Envelope>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an address and hands back its mailbox. Re-attaching an
    /// address replaces the previous mailbox.
    pub fn attach(&self, id: &str) -> Mailbox {
        let (sender, receiver) = mpsc::channel(MAILBOX_CAPACITY);
        let mut mailboxes = self.mailboxes.lock().unwrap();
        if mailboxes.insert(id.to_string(), sender).is_some() {
            debug!("mailbox for {} replaced", id);
        }
        Mailbox {
            id: id.to_string(),
            receiver,
        }
    }

    /// Removes an address from the registry. Messages already queued stay
    /// readable on the detached mailbox.
    pub fn detach(&self, id: &str) {
        self.mailboxes.lock().unwrap().remove(id);
    }

    /// Best-effort send: encodes the message and drops it into the target
    /// mailbox without waiting. Unknown addresses and full mailboxes lose
    /// the envelope.
    pub fn send(&self, to: &str, from: &str, message: &Message) {
        let body = match serde_json::to_string(message) {
            Ok(body) => body,
            Err(err) => {
                warn!("failed to encode {} message: {}", message.wire_type(), err);
                return;
            }
        };

        let sender = {
            let mailboxes = self.mailboxes.lock().unwrap();
            mailboxes.get(to).cloned()
        };
        let sender = match sender {
            Some(sender) => sender,
            None => {
                debug!("dropping {} from {}: no mailbox for {}", message.wire_type(), from, to);
                return;
            }
        };

        let envelope = Envelope {
            from: from.to_string(),
            body,
        };
        match sender.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("mailbox {} full, dropping {} from {}", to, message.wire_type(), from);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("mailbox {} closed, dropping {} from {}", to, message.wire_type(), from);
            }
        }
    }
}

/// Receiving end of one agent's mailbox.
pub struct Mailbox {
    pub id: AgentId,
    receiver: mpsc::Receiver<Envelope>,
}

impl Mailbox {
    /// Waits for the next envelope. Returns None once the mailbox is
    /// detached and drained.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }
}

/// Decodes an envelope body. A payload that does not parse is dropped with a
/// warning and the caller moves on.
pub fn decode(envelope: &Envelope) -> Option<Message> {
    match serde_json::from_str(&envelope.body) {
        Ok(message) => Some(message),
        Err(err) => {
            warn!("malformed message from {}: {}", envelope.from, err);
            None
        }
    }
}
