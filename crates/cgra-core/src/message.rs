//! The wire envelope for port-to-port exchange.
//!
//! Every message names its source and destination remote ports; routing is a
//! name lookup owned by whoever owns the connection. Token moves and the
//! memory-bridge request/response traffic share the same envelope so port
//! buffers hold a single type.
//!
//! Memory payloads are big-endian: a write serializes its 32-bit word as four
//! bytes, a data-ready reply is decoded the same way.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Color, Data};

/// Process-wide message id counter.
static NEXT_MSG_ID: AtomicU64 = AtomicU64::new(1);

fn fresh_msg_id() -> u64 {
    NEXT_MSG_ID.fetch_add(1, Ordering::Relaxed)
}

/// Message payload kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgKind {
    /// One token moving between ports on a colored channel.
    Move { color: Color, data: Data },
    /// Memory-bridge read request.
    ReadReq { address: u64, byte_size: usize },
    /// Memory-bridge write request. Payload is one big-endian word.
    WriteReq { address: u64, data: [u8; 4] },
    /// Memory-bridge read reply.
    DataReady { data: Vec<u8> },
    /// Memory-bridge write acknowledgement.
    WriteDone,
}

/// One message in flight.
///
/// Immutable after construction; [`Msg::duplicate`] yields a copy with a
/// fresh message id.
#[derive(Debug, Clone, PartialEq)]
pub struct Msg {
    /// Source remote port name.
    pub src: String,
    /// Destination remote port name.
    pub dst: String,
    /// Payload.
    pub kind: MsgKind,
    /// Virtual send time, when the sender stamps one.
    pub send_time: Option<f64>,
    /// Unique message id.
    pub id: u64,
}

impl Msg {
    /// A new message with a fresh id.
    #[must_use]
    pub fn new(src: impl Into<String>, dst: impl Into<String>, kind: MsgKind) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            kind,
            send_time: None,
            id: fresh_msg_id(),
        }
    }

    /// A token move.
    #[must_use]
    pub fn move_token(
        src: impl Into<String>,
        dst: impl Into<String>,
        color: Color,
        data: Data,
    ) -> Self {
        Self::new(src, dst, MsgKind::Move { color, data })
    }

    /// Copy with a fresh message id.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            id: fresh_msg_id(),
            ..self.clone()
        }
    }

    /// Copy with the send time stamped.
    #[must_use]
    pub fn stamped(mut self, send_time: f64) -> Self {
        self.send_time = Some(send_time);
        self
    }
}

/// Serialize one 32-bit word as big-endian bytes.
#[must_use]
pub fn encode_word(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Decode a big-endian reply payload into one 32-bit word.
///
/// Short payloads are zero-extended from the high end, matching the
/// big-endian write layout.
#[must_use]
pub fn decode_word(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    let n = bytes.len().min(4);
    word[4 - n..].copy_from_slice(&bytes[..n]);
    u32::from_be_bytes(word)
}
