//! Delivery modes, logical channels, and latest-wins sequencing.
//!
//! Every message kind declares how it travels, reliable-ordered or
//! reliable-sequenced, on a numbered logical channel. Sequenced channels
//! carry a 16-bit sequence number per (connection, channel); the receiver
//! delivers a message only if it is newer than the last one delivered on
//! that channel, so a stale update can never overwrite a fresh one.

use std::collections::HashMap;

/// How a message is delivered by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMethod {
    /// Arrives exactly once, in send order.
    ReliableOrdered,
    /// Only the newest message on the channel matters; older ones arriving
    /// late are discarded.
    ReliableSequenced,
}

impl DeliveryMethod {
    /// Wire representation.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::ReliableOrdered => 1,
            Self::ReliableSequenced => 2,
        }
    }

    /// Parse the wire representation.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::ReliableOrdered),
            2 => Some(Self::ReliableSequenced),
            _ => None,
        }
    }
}

/// A delivery method bound to a logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Delivery {
    /// Delivery guarantee.
    pub method: DeliveryMethod,
    /// Logical channel; sequencing is tracked per channel.
    pub channel: u8,
}

impl Delivery {
    /// Reliable, ordered delivery on `channel`.
    pub const fn ordered(channel: u8) -> Self {
        Self {
            method: DeliveryMethod::ReliableOrdered,
            channel,
        }
    }

    /// Reliable, sequenced (latest-wins) delivery on `channel`.
    pub const fn sequenced(channel: u8) -> Self {
        Self {
            method: DeliveryMethod::ReliableSequenced,
            channel,
        }
    }

    /// Whether messages on this delivery carry a sequence number.
    pub fn is_sequenced(&self) -> bool {
        self.method == DeliveryMethod::ReliableSequenced
    }
}

/// Delivery used for registry negotiation traffic.
pub const CONTROL_DELIVERY: Delivery = Delivery::ordered(0);

/// Returns `true` if sequence `a` is newer than `b`, treating the 16-bit
/// space as circular.
pub fn sequence_newer(a: u16, b: u16) -> bool {
    let diff = a.wrapping_sub(b);
    diff != 0 && diff < 0x8000
}

/// Per-channel sequence state for one connection: stamps outgoing
/// sequenced messages and filters incoming ones.
#[derive(Debug, Default)]
pub struct SequencedLink {
    next_outgoing: HashMap<u8, u16>,
    last_incoming: HashMap<u8, u16>,
}

impl SequencedLink {
    /// Create a link with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number for the next outgoing message with `delivery`.
    /// Non-sequenced deliveries always get `0`.
    pub fn stamp(&mut self, delivery: Delivery) -> u16 {
        if !delivery.is_sequenced() {
            return 0;
        }
        let next = self.next_outgoing.entry(delivery.channel).or_insert(0);
        let sequence = *next;
        *next = next.wrapping_add(1);
        sequence
    }

    /// Decide whether an incoming message should be delivered.
    ///
    /// Non-sequenced deliveries are always admitted. A sequenced message is
    /// admitted if it is the first on its channel or newer than the last
    /// admitted one.
    pub fn admit(&mut self, delivery: Delivery, sequence: u16) -> bool {
        if !delivery.is_sequenced() {
            return true;
        }
        match self.last_incoming.get(&delivery.channel) {
            Some(&last) if !sequence_newer(sequence, last) => false,
            _ => {
                self.last_incoming.insert(delivery.channel, sequence);
                true
            }
        }
    }
}
