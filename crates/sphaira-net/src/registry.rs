//! Message type registry and negotiation tables.
//!
//! Each side registers the message kinds it knows under string identifiers.
//! The server's registration order defines the wire code of every kind; a
//! client asks for that order with the sentinel code and rebuilds its own
//! lookup from the answer, so the two sides never have to agree on a fixed
//! schema ahead of time.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::codec::{PayloadError, PayloadReader, PayloadWriter, WirePayload};
use crate::delivery::Delivery;
use crate::transport::ConnectionId;

/// Reserved code for registry negotiation traffic.
pub const SENTINEL_CODE: u16 = 0xFFFF;

/// Largest number of kinds a registry can hold; every code below the
/// sentinel is usable.
pub const MAX_KINDS: usize = SENTINEL_CODE as usize;

/// A named message kind together with how it travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageKind {
    /// Identifier shared by both sides.
    pub ident: &'static str,
    /// Delivery method and channel used for every message of this kind.
    pub delivery: Delivery,
}

impl MessageKind {
    /// Declare a kind.
    pub const fn new(ident: &'static str, delivery: Delivery) -> Self {
        Self { ident, delivery }
    }
}

/// A message handed to a handler.
#[derive(Debug)]
pub struct IncomingMessage<'a> {
    /// Connection the message arrived on.
    pub sender: ConnectionId,
    /// Code the message was dispatched under.
    pub code: u16,
    /// Reader positioned after the code.
    pub reader: PayloadReader<'a>,
}

impl<'a> IncomingMessage<'a> {
    /// Wrap the payload following the code.
    pub fn new(sender: ConnectionId, code: u16, payload: &'a [u8]) -> Self {
        Self {
            sender,
            code,
            reader: PayloadReader::new(payload),
        }
    }

    /// Decode a typed payload from the remaining bytes.
    pub fn read<P: WirePayload>(&mut self) -> Result<P, PayloadError> {
        P::read(&mut self.reader)
    }
}

/// Error returned by a message handler. Logged at the dispatch boundary.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The payload could not be decoded.
    #[error("malformed payload: {0}")]
    Payload(#[from] PayloadError),

    /// The handler refused the message.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Trait for message handlers operating on a peer-owned context.
pub trait MessageHandler<C>: Send {
    /// Process a single incoming message.
    fn handle(&mut self, ctx: &mut C, msg: &mut IncomingMessage<'_>) -> Result<(), HandlerError>;
}

/// Blanket implementation for closures.
impl<C, F> MessageHandler<C> for F
where
    F: FnMut(&mut C, &mut IncomingMessage<'_>) -> Result<(), HandlerError> + Send,
{
    fn handle(&mut self, ctx: &mut C, msg: &mut IncomingMessage<'_>) -> Result<(), HandlerError> {
        self(ctx, msg)
    }
}

/// Errors raised while registering kinds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Every code below the sentinel is taken.
    #[error("registry is full ({MAX_KINDS} kinds)")]
    Full,
}

struct Entry<C> {
    kind: MessageKind,
    handler: Option<Box<dyn MessageHandler<C>>>,
}

/// Identifier → index → handler table owned by one peer.
///
/// Indices follow registration order and never change for an identifier
/// once assigned.
pub struct MessageRegistry<C> {
    entries: IndexMap<&'static str, Entry<C>>,
}

impl<C> MessageRegistry<C> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Register `handler` for `kind` and return its index.
    ///
    /// Registering an identifier again replaces its handler and delivery but
    /// keeps the index it was first given.
    pub fn register<H>(&mut self, kind: MessageKind, handler: H) -> Result<u16, RegistryError>
    where
        H: MessageHandler<C> + 'static,
    {
        self.insert(kind, Some(Box::new(handler)))
    }

    /// Give `kind` an index without a handler. Used for kinds this side only
    /// sends. An existing handler is kept.
    pub fn declare(&mut self, kind: MessageKind) -> Result<u16, RegistryError> {
        if let Some((index, _, entry)) = self.entries.get_full_mut(kind.ident) {
            entry.kind = kind;
            return Ok(index as u16);
        }
        self.insert(kind, None)
    }

    fn insert(
        &mut self,
        kind: MessageKind,
        handler: Option<Box<dyn MessageHandler<C>>>,
    ) -> Result<u16, RegistryError> {
        if let Some((index, _, entry)) = self.entries.get_full_mut(kind.ident) {
            entry.kind = kind;
            entry.handler = handler;
            return Ok(index as u16);
        }
        if self.entries.len() >= MAX_KINDS {
            return Err(RegistryError::Full);
        }
        let (index, _) = self.entries.insert_full(kind.ident, Entry { kind, handler });
        tracing::debug!("Registered message kind {} at index {index}", kind.ident);
        Ok(index as u16)
    }

    /// Index assigned to `ident`.
    pub fn index_of(&self, ident: &str) -> Option<u16> {
        self.entries.get_index_of(ident).map(|index| index as u16)
    }

    /// The declaration at `index`.
    pub fn kind_at(&self, index: u16) -> Option<MessageKind> {
        self.entries
            .get_index(usize::from(index))
            .map(|(_, entry)| entry.kind)
    }

    /// Whether `ident` has a handler.
    pub fn has_handler(&self, ident: &str) -> bool {
        self.entries
            .get(ident)
            .is_some_and(|entry| entry.handler.is_some())
    }

    /// The handler at `index`, if one is bound.
    pub fn handler_mut(&mut self, index: u16) -> Option<&mut (dyn MessageHandler<C> + 'static)> {
        self.entries
            .get_index_mut(usize::from(index))
            .and_then(|(_, entry)| entry.handler.as_deref_mut())
    }

    /// Identifiers in index order.
    pub fn idents(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Negotiation response body: `[u16 count][count × string]` in index order.
    pub fn encode_table(&self) -> Result<Vec<u8>, PayloadError> {
        let mut writer = PayloadWriter::new();
        writer.write_u16(self.entries.len() as u16);
        for ident in self.entries.keys() {
            writer.write_str(ident)?;
        }
        Ok(writer.into_bytes())
    }
}

impl<C> Default for MessageRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for MessageRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

/// The server's code table as learned by a client.
///
/// Code `i` is the `i`-th identifier of the server's answer. Each code is
/// bound to the client's local handler of the same identifier, if any.
#[derive(Debug, Clone, Default)]
pub struct NegotiatedTable {
    idents: Vec<String>,
    codes: HashMap<String, u16>,
    bindings: Vec<Option<u16>>,
}

impl NegotiatedTable {
    /// Decode a negotiation response body.
    pub fn decode(reader: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        let count = usize::from(reader.read_u16()?);
        let mut idents = Vec::with_capacity(count);
        let mut codes = HashMap::with_capacity(count);
        for code in 0..count {
            let ident = reader.read_string()?;
            codes.entry(ident.clone()).or_insert(code as u16);
            idents.push(ident);
        }
        Ok(Self {
            idents,
            codes,
            bindings: vec![None; count],
        })
    }

    /// Bind every code to the local registry entry with the same identifier
    /// and a handler. Returns the number of bound codes.
    pub fn bind<C>(&mut self, registry: &MessageRegistry<C>) -> usize {
        let mut bound = 0;
        for (code, ident) in self.idents.iter().enumerate() {
            let local = registry
                .index_of(ident)
                .filter(|_| registry.has_handler(ident));
            if local.is_some() {
                bound += 1;
            } else {
                tracing::debug!("Server message kind {ident} (code {code}) has no local handler");
            }
            self.bindings[code] = local;
        }
        bound
    }

    /// Server code for `ident`.
    pub fn code_of(&self, ident: &str) -> Option<u16> {
        self.codes.get(ident).copied()
    }

    /// Identifier the server assigned to `code`.
    pub fn ident_at(&self, code: u16) -> Option<&str> {
        self.idents.get(usize::from(code)).map(String::as_str)
    }

    /// Local registry index bound to `code`.
    pub fn binding(&self, code: u16) -> Option<u16> {
        self.bindings.get(usize::from(code)).copied().flatten()
    }

    /// Number of codes the server advertised.
    pub fn len(&self) -> usize {
        self.idents.len()
    }

    /// Whether the server advertised nothing.
    pub fn is_empty(&self) -> bool {
        self.idents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALPHA: MessageKind = MessageKind::new("Alpha", Delivery::ordered(0));
    const BETA: MessageKind = MessageKind::new("Beta", Delivery::sequenced(1));
    const GAMMA: MessageKind = MessageKind::new("Gamma", Delivery::ordered(0));

    fn count_into(ctx: &mut Vec<&'static str>, _: &mut IncomingMessage<'_>) -> Result<(), HandlerError> {
        ctx.push("count");
        Ok(())
    }

    fn run(registry: &mut MessageRegistry<Vec<&'static str>>, index: u16) -> Vec<&'static str> {
        let mut calls = Vec::new();
        let mut msg = IncomingMessage::new(ConnectionId(1), index, &[]);
        registry
            .handler_mut(index)
            .expect("handler bound")
            .handle(&mut calls, &mut msg)
            .unwrap();
        calls
    }

    #[test]
    fn test_indices_follow_registration_order() {
        let mut registry = MessageRegistry::<Vec<&'static str>>::new();
        assert_eq!(registry.register(ALPHA, count_into).unwrap(), 0);
        assert_eq!(registry.declare(BETA).unwrap(), 1);
        assert_eq!(registry.register(GAMMA, count_into).unwrap(), 2);
        assert_eq!(registry.idents().collect::<Vec<_>>(), vec!["Alpha", "Beta", "Gamma"]);
    }

    #[test]
    fn test_reregistration_keeps_index_and_replaces_handler() {
        let mut registry = MessageRegistry::<Vec<&'static str>>::new();
        registry.register(ALPHA, count_into).unwrap();
        registry.register(BETA, count_into).unwrap();

        let index = registry
            .register(ALPHA, |ctx: &mut Vec<&'static str>, _: &mut IncomingMessage<'_>| {
                ctx.push("replacement");
                Ok(())
            })
            .unwrap();

        assert_eq!(index, 0);
        assert_eq!(registry.len(), 2);
        assert_eq!(run(&mut registry, 0), vec!["replacement"]);
    }

    #[test]
    fn test_declared_kind_has_no_handler() {
        let mut registry = MessageRegistry::<Vec<&'static str>>::new();
        registry.declare(BETA).unwrap();
        assert!(!registry.has_handler("Beta"));
        assert!(registry.handler_mut(0).is_none());
        assert_eq!(registry.kind_at(0), Some(BETA));
    }

    #[test]
    fn test_declare_after_register_keeps_handler() {
        let mut registry = MessageRegistry::<Vec<&'static str>>::new();
        registry.register(ALPHA, count_into).unwrap();
        assert_eq!(registry.declare(ALPHA).unwrap(), 0);
        assert!(registry.has_handler("Alpha"));
    }

    #[test]
    fn test_table_encoding() {
        let mut registry = MessageRegistry::<()>::new();
        registry.declare(ALPHA).unwrap();
        registry.declare(BETA).unwrap();
        let bytes = registry.encode_table().unwrap();
        assert_eq!(
            bytes,
            vec![2, 0, 5, 0, b'A', b'l', b'p', b'h', b'a', 4, 0, b'B', b'e', b't', b'a']
        );
    }

    #[test]
    fn test_negotiated_table_uses_server_order() {
        // Server order differs from the client's registration order.
        let mut server = MessageRegistry::<()>::new();
        server.declare(GAMMA).unwrap();
        server.declare(ALPHA).unwrap();
        server.declare(BETA).unwrap();
        let bytes = server.encode_table().unwrap();

        let mut client = MessageRegistry::<Vec<&'static str>>::new();
        client.register(ALPHA, count_into).unwrap();
        client.register(BETA, count_into).unwrap();

        let mut table = NegotiatedTable::decode(&mut PayloadReader::new(&bytes)).unwrap();
        assert_eq!(table.bind(&client), 2);

        assert_eq!(table.code_of("Gamma"), Some(0));
        assert_eq!(table.code_of("Alpha"), Some(1));
        assert_eq!(table.code_of("Beta"), Some(2));
        assert_eq!(table.binding(0), None, "Gamma has no client handler");
        assert_eq!(table.binding(1), Some(0));
        assert_eq!(table.binding(2), Some(1));
        assert_eq!(table.ident_at(2), Some("Beta"));
        assert_eq!(table.binding(3), None);
    }

    #[test]
    fn test_truncated_table_rejected() {
        let bytes = [3, 0, 1, 0, b'A'];
        assert!(NegotiatedTable::decode(&mut PayloadReader::new(&bytes)).is_err());
    }

    #[test]
    fn test_rebind_picks_up_late_registration() {
        let mut server = MessageRegistry::<()>::new();
        server.declare(ALPHA).unwrap();
        let bytes = server.encode_table().unwrap();

        let mut client = MessageRegistry::<Vec<&'static str>>::new();
        let mut table = NegotiatedTable::decode(&mut PayloadReader::new(&bytes)).unwrap();
        assert_eq!(table.bind(&client), 0);

        client.register(ALPHA, count_into).unwrap();
        assert_eq!(table.bind(&client), 1);
        assert_eq!(table.binding(0), Some(0));
    }
}
