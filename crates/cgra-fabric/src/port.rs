//! A tile-side port with bounded incoming and outgoing buffers.
//!
//! The simulator is single-threaded, so the notification protocol of the
//! hardware (sender wakes connection, arrival wakes owner) collapses to the
//! readiness queries below: a connection polls `peek_outgoing` on its drain
//! tick, the owning tile polls `has_incoming` in its receive phase.

use std::collections::VecDeque;

use cgra_core::Msg;
use thiserror::Error;

/// Default buffer capacity per direction.
const DEFAULT_CAPACITY: usize = 1;

/// Non-fatal send failure: the buffer is full and the caller retries next
/// tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("buffer full, would block")]
    WouldBlock,
}

/// One port: a named pair of bounded FIFO buffers.
#[derive(Debug)]
pub struct Port {
    name: String,
    incoming: VecDeque<Msg>,
    outgoing: VecDeque<Msg>,
    in_capacity: usize,
    out_capacity: usize,
}

impl Port {
    /// A port with the default capacity of one message per direction.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_CAPACITY, DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(name: impl Into<String>, in_capacity: usize, out_capacity: usize) -> Self {
        Self {
            name: name.into(),
            incoming: VecDeque::new(),
            outgoing: VecDeque::new(),
            in_capacity,
            out_capacity,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the outgoing buffer has space.
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.outgoing.len() < self.out_capacity
    }

    /// Whether the incoming buffer has space.
    #[must_use]
    pub fn can_deliver(&self) -> bool {
        self.incoming.len() < self.in_capacity
    }

    /// Whether the incoming buffer holds a message.
    #[must_use]
    pub fn has_incoming(&self) -> bool {
        !self.incoming.is_empty()
    }

    /// Queue a message for the connection to pick up.
    ///
    /// # Panics
    ///
    /// Panics on wiring-policy violations: the sender's name must equal
    /// `msg.src`, `msg.dst` must be non-empty, and `msg.src` must differ
    /// from `msg.dst`. These are construction bugs, not runtime conditions.
    pub fn send(&mut self, msg: Msg) -> Result<(), SendError> {
        assert_eq!(
            msg.src, self.name,
            "port `{}` sending message with src `{}`",
            self.name, msg.src
        );
        assert!(!msg.dst.is_empty(), "port `{}` sending without dst", self.name);
        assert_ne!(msg.src, msg.dst, "port `{}` sending to itself", self.name);
        if !self.can_send() {
            tracing::trace!(port = %self.name, "send would block");
            return Err(SendError::WouldBlock);
        }
        self.outgoing.push_back(msg);
        Ok(())
    }

    /// Push a message in from the connected endpoint.
    pub fn deliver(&mut self, msg: Msg) -> Result<(), SendError> {
        if !self.can_deliver() {
            tracing::trace!(port = %self.name, "deliver would block");
            return Err(SendError::WouldBlock);
        }
        self.incoming.push_back(msg);
        Ok(())
    }

    /// Consumer side: look at the next incoming message without removing it.
    #[must_use]
    pub fn peek_incoming(&self) -> Option<&Msg> {
        self.incoming.front()
    }

    /// Consumer side: remove and return the next incoming message.
    pub fn retrieve_incoming(&mut self) -> Option<Msg> {
        self.incoming.pop_front()
    }

    /// Connection side: look at the next outgoing message without removing it.
    #[must_use]
    pub fn peek_outgoing(&self) -> Option<&Msg> {
        self.outgoing.front()
    }

    /// Connection side: remove and return the next outgoing message.
    pub fn retrieve_outgoing(&mut self) -> Option<Msg> {
        self.outgoing.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgra_core::{Color, Data};

    fn msg(src: &str, dst: &str, v: u32) -> Msg {
        Msg::move_token(src, dst, Color::R, Data::scalar(v))
    }

    #[test]
    fn send_then_retrieve_fifo() {
        let mut port = Port::with_capacity("a", 1, 2);
        port.send(msg("a", "b", 1)).expect("first send fits");
        port.send(msg("a", "b", 2)).expect("second send fits");
        let first = port.retrieve_outgoing().expect("queued");
        match first.kind {
            cgra_core::MsgKind::Move { ref data, .. } => assert_eq!(data.first(), 1),
            ref other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn full_outgoing_would_block() {
        let mut port = Port::new("a");
        port.send(msg("a", "b", 1)).expect("fits");
        assert_eq!(port.send(msg("a", "b", 2)), Err(SendError::WouldBlock));
        assert!(!port.can_send());
    }

    #[test]
    fn full_incoming_rejects_delivery() {
        let mut port = Port::new("b");
        port.deliver(msg("a", "b", 1)).expect("fits");
        assert_eq!(port.deliver(msg("a", "b", 2)), Err(SendError::WouldBlock));
        assert!(port.has_incoming());
    }

    #[test]
    fn peek_is_non_destructive() {
        let mut port = Port::new("b");
        port.deliver(msg("a", "b", 9)).expect("fits");
        assert!(port.peek_incoming().is_some());
        assert!(port.peek_incoming().is_some());
        assert!(port.retrieve_incoming().is_some());
        assert!(port.peek_incoming().is_none());
    }

    #[test]
    #[should_panic(expected = "sending message with src")]
    fn send_checks_source_name() {
        let mut port = Port::new("a");
        let _ = port.send(msg("not-a", "b", 1));
    }

    #[test]
    #[should_panic(expected = "sending to itself")]
    fn send_checks_self_loop() {
        let mut port = Port::new("a");
        let _ = port.send(msg("a", "a", 1));
    }
}
