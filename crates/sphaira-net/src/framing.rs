//! Length-prefixed framing and packet headers for stream transports.
//!
//! Every transport message on a byte stream is a length-prefixed frame:
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   frame body       |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! A zero-length frame is a keepalive and carries nothing. A non-empty body
//! is a [`Packet`]:
//!
//! ```text
//! [u8 delivery method][u8 channel][u16 LE sequence][application bytes]
//! ```

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::delivery::{Delivery, DeliveryMethod};

/// Size of the packet header preceding the application bytes.
pub const PACKET_HEADER_LEN: usize = 4;

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed frame body size in bytes. Default: 1 MB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame body exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual body size.
        size: u32,
        /// The configured maximum.
        max: u32,
    },

    /// The frame body is shorter than a packet header.
    #[error("packet of {0} bytes is shorter than its header")]
    TruncatedHeader(usize),

    /// The header names a delivery method this build does not know.
    #[error("unknown delivery method {0}")]
    UnknownDeliveryMethod(u8),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One transport message: delivery header plus application bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// How the packet was sent.
    pub delivery: Delivery,
    /// Per-channel sequence number; `0` unless the delivery is sequenced.
    pub sequence: u16,
    /// Application bytes (`[u16 code][payload]`).
    pub payload: Vec<u8>,
}

impl Packet {
    /// Encode header and payload into a frame body.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PACKET_HEADER_LEN + self.payload.len());
        out.push(self.delivery.method.to_byte());
        out.push(self.delivery.channel);
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode a non-empty frame body.
    pub fn decode(body: &[u8]) -> Result<Self, FrameError> {
        if body.len() < PACKET_HEADER_LEN {
            return Err(FrameError::TruncatedHeader(body.len()));
        }
        let method =
            DeliveryMethod::from_byte(body[0]).ok_or(FrameError::UnknownDeliveryMethod(body[0]))?;
        Ok(Self {
            delivery: Delivery {
                method,
                channel: body[1],
            },
            sequence: u16::from_le_bytes([body[2], body[3]]),
            payload: body[PACKET_HEADER_LEN..].to_vec(),
        })
    }
}

/// Read a single length-prefixed frame from the stream.
///
/// Returns the frame body; an empty body is a keepalive. Returns
/// [`FrameError::ConnectionClosed`] if the peer closes the connection before
/// the frame is complete.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let body_len = u32::from_le_bytes(len_buf);
    if body_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: config.max_payload_size,
        });
    }

    let mut body = vec![0u8; body_len as usize];
    if body_len > 0 {
        reader.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FrameError::ConnectionClosed
            } else {
                FrameError::Io(e)
            }
        })?;
    }

    Ok(body)
}

/// Write a single length-prefixed frame to the stream and flush it.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    body: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
    if len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: config.max_payload_size,
        });
    }

    writer.write_all(&len.to_le_bytes()).await?;
    if !body.is_empty() {
        writer.write_all(body).await?;
    }
    writer.flush().await?;

    Ok(())
}

/// Write a [`Packet`] as one frame.
pub async fn write_packet<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    packet: &Packet,
    config: &FrameConfig,
) -> Result<(), FrameError> {
    write_frame(writer, &packet.encode(), config).await
}
