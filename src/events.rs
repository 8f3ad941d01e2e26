//! Observable events published by the client.

use std::net::Ipv4Addr;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::bulb::{Bulb, BulbState};
use crate::packet::Packet;
use crate::registry::Gateway;

/// Something the client learned from the network.
///
/// Every payload is an owned copy; holding an event never pins registry
/// state and changing it has no effect on the registry.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// A gateway answered discovery for the first time.
    Gateway(Gateway),
    /// A bulb name/address pair was seen for the first time.
    Bulb(Bulb),
    /// A bulb reported its light state.
    BulbState { bulb: Bulb, state: BulbState },
    /// A tag value was seen for the first time.
    Tag(u64),
    /// Any decoded frame received from a gateway.
    Packet { gateway: Ipv4Addr, packet: Packet },
}

/// Publish side of the event stream.
///
/// Cloning yields another handle to the same stream. Publishing while
/// nobody listens simply drops the event.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        EventBus { tx }
    }

    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Receive every event published from now on.
    ///
    /// A receiver that falls more than the channel capacity behind sees
    /// [`broadcast::error::RecvError::Lagged`] and skips ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
