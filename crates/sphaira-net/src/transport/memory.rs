//! In-process transport over unbounded channels.
//!
//! [`memory_network`] returns the server end and a cloneable connector;
//! every [`MemoryConnector::connect`] yields a client end. Delivery is
//! always reliable and in order, and sequenced channels still run through
//! [`SequencedLink`] so stale updates are filtered exactly as on a socket.

use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

use super::{ConnectionId, IdGenerator, Transport, TransportError, TransportEvent};
use crate::delivery::{Delivery, SequencedLink};
use crate::framing::Packet;

#[derive(Debug)]
enum Wire {
    Connect {
        id: ConnectionId,
        to_client: UnboundedSender<Wire>,
    },
    Packet {
        from: ConnectionId,
        packet: Packet,
    },
    Disconnect {
        id: ConnectionId,
    },
}

/// Create a connected server end and connector.
pub fn memory_network() -> (MemoryServerTransport, MemoryConnector) {
    let (to_server, inbound) = mpsc::unbounded_channel();
    let server = MemoryServerTransport {
        inbound,
        peers: IndexMap::new(),
    };
    let connector = MemoryConnector {
        to_server,
        id_gen: Arc::new(IdGenerator::new()),
    };
    (server, connector)
}

struct MemoryPeer {
    to_client: UnboundedSender<Wire>,
    link: SequencedLink,
}

/// Server end of an in-process network.
pub struct MemoryServerTransport {
    inbound: UnboundedReceiver<Wire>,
    peers: IndexMap<ConnectionId, MemoryPeer>,
}

impl MemoryServerTransport {
    /// Close `connection` from the server side.
    pub fn kick(&mut self, connection: ConnectionId) -> bool {
        match self.peers.shift_remove(&connection) {
            Some(peer) => {
                let _ = peer.to_client.send(Wire::Disconnect { id: connection });
                tracing::info!("Connection {connection:?} kicked");
                true
            }
            None => false,
        }
    }
}

impl Transport for MemoryServerTransport {
    fn poll(&mut self) -> Option<TransportEvent> {
        loop {
            let wire = self.inbound.try_recv().ok()?;
            match wire {
                Wire::Connect { id, to_client } => {
                    self.peers.insert(
                        id,
                        MemoryPeer {
                            to_client,
                            link: SequencedLink::new(),
                        },
                    );
                    return Some(TransportEvent::Connected(id));
                }
                Wire::Packet { from, packet } => {
                    // Traffic from a kicked connection still in flight.
                    let Some(peer) = self.peers.get_mut(&from) else {
                        continue;
                    };
                    if !peer.link.admit(packet.delivery, packet.sequence) {
                        tracing::trace!("Dropped stale packet {} from {from:?}", packet.sequence);
                        continue;
                    }
                    return Some(TransportEvent::Message {
                        from,
                        payload: packet.payload,
                    });
                }
                Wire::Disconnect { id } => {
                    if self.peers.shift_remove(&id).is_some() {
                        return Some(TransportEvent::Disconnected {
                            connection: id,
                            reason: "closed by peer".to_string(),
                        });
                    }
                }
            }
        }
    }

    fn send(
        &mut self,
        to: ConnectionId,
        delivery: Delivery,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let peer = self
            .peers
            .get_mut(&to)
            .ok_or(TransportError::UnknownConnection(to))?;
        let packet = Packet {
            delivery,
            sequence: peer.link.stamp(delivery),
            payload,
        };
        peer.to_client
            .send(Wire::Packet {
                from: ConnectionId::SERVER,
                packet,
            })
            .map_err(|_| TransportError::Closed)
    }

    fn connections(&self) -> Vec<ConnectionId> {
        self.peers.keys().copied().collect()
    }
}

/// Opens client ends of an in-process network.
#[derive(Clone)]
pub struct MemoryConnector {
    to_server: UnboundedSender<Wire>,
    id_gen: Arc<IdGenerator>,
}

impl MemoryConnector {
    /// Open a new client connection.
    pub fn connect(&self) -> Result<MemoryClientTransport, TransportError> {
        let id = self.id_gen.next_id();
        let (to_client, inbound) = mpsc::unbounded_channel();
        self.to_server
            .send(Wire::Connect { id, to_client })
            .map_err(|_| TransportError::NoListener)?;
        Ok(MemoryClientTransport {
            id,
            to_server: self.to_server.clone(),
            inbound,
            link: SequencedLink::new(),
            announced: false,
            open: true,
        })
    }
}

/// Client end of an in-process network.
pub struct MemoryClientTransport {
    id: ConnectionId,
    to_server: UnboundedSender<Wire>,
    inbound: UnboundedReceiver<Wire>,
    link: SequencedLink,
    announced: bool,
    open: bool,
}

impl MemoryClientTransport {
    /// The id the server knows this connection by.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Close the connection.
    pub fn disconnect(&mut self) {
        if self.open {
            self.open = false;
            let _ = self.to_server.send(Wire::Disconnect { id: self.id });
        }
    }

    fn lost(&mut self, reason: &str) -> TransportEvent {
        self.open = false;
        TransportEvent::Disconnected {
            connection: ConnectionId::SERVER,
            reason: reason.to_string(),
        }
    }
}

impl Transport for MemoryClientTransport {
    fn poll(&mut self) -> Option<TransportEvent> {
        if !self.announced {
            self.announced = true;
            return Some(TransportEvent::Connected(ConnectionId::SERVER));
        }
        if !self.open {
            return None;
        }
        loop {
            match self.inbound.try_recv() {
                Ok(Wire::Packet { from, packet }) => {
                    if !self.link.admit(packet.delivery, packet.sequence) {
                        tracing::trace!("Dropped stale packet {} from server", packet.sequence);
                        continue;
                    }
                    return Some(TransportEvent::Message {
                        from,
                        payload: packet.payload,
                    });
                }
                Ok(Wire::Disconnect { .. }) => return Some(self.lost("closed by server")),
                Ok(Wire::Connect { .. }) => continue,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return Some(self.lost("server gone")),
            }
        }
    }

    fn send(
        &mut self,
        to: ConnectionId,
        delivery: Delivery,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if to != ConnectionId::SERVER {
            return Err(TransportError::UnknownConnection(to));
        }
        if !self.open {
            return Err(TransportError::Closed);
        }
        let packet = Packet {
            delivery,
            sequence: self.link.stamp(delivery),
            payload,
        };
        self.to_server
            .send(Wire::Packet {
                from: self.id,
                packet,
            })
            .map_err(|_| TransportError::Closed)
    }

    fn connections(&self) -> Vec<ConnectionId> {
        if self.open {
            vec![ConnectionId::SERVER]
        } else {
            Vec::new()
        }
    }
}

impl Drop for MemoryClientTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
