//! Little-endian payload encoding.
//!
//! Application payloads are flat sequences of fixed-width little-endian
//! fields and length-prefixed UTF-8 strings:
//!
//! ```text
//! string = [u16 byte length][UTF-8 bytes]
//! ```
//!
//! [`PayloadWriter`] appends fields, [`PayloadReader`] consumes them and
//! reports short or malformed payloads as [`PayloadError`].

/// Errors produced while reading a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// The payload ended before the field was complete.
    #[error("payload truncated: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd {
        /// Bytes the field required.
        needed: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },

    /// A string field was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// A string is too long for its u16 length prefix.
    #[error("string of {0} bytes exceeds the u16 length prefix")]
    StringTooLong(usize),
}

/// Appends little-endian fields to a byte buffer.
#[derive(Debug, Default, Clone)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `u16`.
    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append an `i32`.
    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append an `f32`.
    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append an `f64`.
    pub fn write_f64(&mut self, value: f64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) -> Result<&mut Self, PayloadError> {
        let len = u16::try_from(value.len()).map_err(|_| PayloadError::StringTooLong(value.len()))?;
        self.write_u16(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(self)
    }

    /// Consume the writer and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads little-endian fields from a borrowed payload.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    /// Start reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], PayloadError> {
        let bytes = self.take_slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn take_slice(&mut self, len: usize) -> Result<&'a [u8], PayloadError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(PayloadError::UnexpectedEnd {
                needed: len,
                remaining,
            });
        }
        let data: &'a [u8] = self.data;
        let slice = &data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a `u16`.
    pub fn read_u16(&mut self) -> Result<u16, PayloadError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    /// Read an `i32`.
    pub fn read_i32(&mut self) -> Result<i32, PayloadError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    /// Read an `f32`.
    pub fn read_f32(&mut self) -> Result<f32, PayloadError> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    /// Read an `f64`.
    pub fn read_f64(&mut self) -> Result<f64, PayloadError> {
        Ok(f64::from_le_bytes(self.take()?))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, PayloadError> {
        let len = usize::from(self.read_u16()?);
        let bytes = self.take_slice(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| PayloadError::InvalidUtf8)
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// A payload with a fixed wire layout.
pub trait WirePayload: Sized {
    /// Append this payload's fields.
    fn write(&self, writer: &mut PayloadWriter);

    /// Read this payload's fields.
    fn read(reader: &mut PayloadReader<'_>) -> Result<Self, PayloadError>;

    /// Encode into a fresh buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = PayloadWriter::new();
        self.write(&mut writer);
        writer.into_bytes()
    }
}
