//! WebSocket frames as seen by extension transforms.
//!
//! Wire parsing lives elsewhere; transforms only need the header flags and
//! the (already unmasked) payload.

use bytes::Bytes;

use crate::protocol::OpCode;

/// A WebSocket frame as defined in RFC 6455.
///
/// ```text
///  0 1 2 3 4 5 6 7
/// +-+-+-+-+-------+
/// |F|R|R|R| opcode|
/// |I|S|S|S|  (4)  |
/// |N|V|V|V|       |
/// | |1|2|3|       |
/// +-+-+-+-+-------+
/// ```
///
/// The reserved bits are owned by negotiated extensions; see
/// [`RsvBits`](crate::extensions::RsvBits).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bit 1.
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    payload: Bytes,
}

impl Frame {
    /// Create a frame with all reserved bits cleared.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            payload: payload.into(),
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, data)
    }

    /// Create a final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, data)
    }

    /// Create a continuation frame.
    #[must_use]
    pub fn continuation(fin: bool, data: impl Into<Bytes>) -> Self {
        Self::new(fin, OpCode::Continuation, data)
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, data)
    }

    /// Create a close frame with optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let mut data = code.to_be_bytes().to_vec();
                data.extend_from_slice(reason.as_bytes());
                data
            }
            None => Vec::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replace the payload, keeping header flags.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }
}
