//! Application framing and handler invocation shared by both peer roles.
//!
//! Every application message is `[u16 code][payload]`. The peers decide what
//! a code means (a local index on the server, a negotiated one on the
//! client); this module splits the code off, invokes handlers, and keeps
//! handler failures from escaping the dispatch loop.

use crate::registry::{IncomingMessage, MessageHandler};
use crate::transport::ConnectionId;

/// What happened to one dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran and returned `Ok`.
    Handled {
        /// Code the message carried.
        code: u16,
    },
    /// Registry negotiation traffic.
    Control,
    /// No handler is bound to the code; the message was dropped.
    Unhandled {
        /// Code the message carried.
        code: u16,
    },
    /// The handler returned an error; it was logged.
    Failed {
        /// Code the message carried.
        code: u16,
    },
    /// Too short to carry a code, or an unreadable control message.
    Malformed,
}

/// Split the leading code from an application message.
pub fn split_code(bytes: &[u8]) -> Option<(u16, &[u8])> {
    match bytes {
        [lo, hi, rest @ ..] => Some((u16::from_le_bytes([*lo, *hi]), rest)),
        _ => None,
    }
}

/// Build an application message from a code and an encoded payload.
pub fn encode_message(code: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + payload.len());
    out.extend_from_slice(&code.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Run `handler` on one message and log a failure instead of returning it.
pub(crate) fn invoke<C>(
    handler: &mut dyn MessageHandler<C>,
    ctx: &mut C,
    sender: ConnectionId,
    code: u16,
    ident: &str,
    payload: &[u8],
) -> DispatchOutcome {
    let mut msg = IncomingMessage::new(sender, code, payload);
    match handler.handle(ctx, &mut msg) {
        Ok(()) => {
            tracing::trace!("Handled {ident} (code {code}) from {sender:?}");
            DispatchOutcome::Handled { code }
        }
        Err(e) => {
            tracing::warn!("Handler for {ident} (code {code}) from {sender:?} failed: {e}");
            DispatchOutcome::Failed { code }
        }
    }
}
