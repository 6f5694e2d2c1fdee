//! Multi-channel port variant used at the driver boundary.
//!
//! Outgoing tokens are segregated into per-channel sub-buffers selected by
//! the sender's current channel. Retrieval serves all tokens of the lowest
//! non-empty channel before moving on, so per-channel FIFO order is kept and
//! ties break by channel id only.

use std::collections::VecDeque;

use cgra_core::Msg;

use crate::port::SendError;

/// Per-channel outgoing buffer capacity.
const CHANNEL_CAPACITY: usize = 1;

/// Incoming buffer capacity. The driver side absorbs one token per boundary
/// port per tick, same as a tile port.
const IN_CAPACITY: usize = 1;

/// A port whose outgoing side is split into prioritized channels.
#[derive(Debug)]
pub struct MultiPort {
    name: String,
    incoming: VecDeque<Msg>,
    channels: Vec<VecDeque<Msg>>,
    current: usize,
}

impl MultiPort {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            incoming: VecDeque::new(),
            channels: Vec::new(),
            current: 0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Select the channel subsequent sends go to, growing the channel set as
    /// needed.
    pub fn set_channel(&mut self, channel: usize) {
        if channel >= self.channels.len() {
            self.channels.resize_with(channel + 1, VecDeque::new);
        }
        self.current = channel;
    }

    /// Whether the current channel's sub-buffer has space.
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.channels
            .get(self.current)
            .is_none_or(|q| q.len() < CHANNEL_CAPACITY)
    }

    /// Queue a message on the current channel.
    ///
    /// # Panics
    ///
    /// Same wiring-policy checks as [`crate::Port::send`].
    pub fn send(&mut self, msg: Msg) -> Result<(), SendError> {
        assert_eq!(
            msg.src, self.name,
            "port `{}` sending message with src `{}`",
            self.name, msg.src
        );
        assert!(!msg.dst.is_empty(), "port `{}` sending without dst", self.name);
        assert_ne!(msg.src, msg.dst, "port `{}` sending to itself", self.name);
        if !self.can_send() {
            tracing::trace!(port = %self.name, channel = self.current, "send would block");
            return Err(SendError::WouldBlock);
        }
        if self.current >= self.channels.len() {
            self.channels.resize_with(self.current + 1, VecDeque::new);
        }
        self.channels[self.current].push_back(msg);
        Ok(())
    }

    #[must_use]
    pub fn can_deliver(&self) -> bool {
        self.incoming.len() < IN_CAPACITY
    }

    pub fn deliver(&mut self, msg: Msg) -> Result<(), SendError> {
        if !self.can_deliver() {
            tracing::trace!(port = %self.name, "deliver would block");
            return Err(SendError::WouldBlock);
        }
        self.incoming.push_back(msg);
        Ok(())
    }

    #[must_use]
    pub fn peek_incoming(&self) -> Option<&Msg> {
        self.incoming.front()
    }

    pub fn retrieve_incoming(&mut self) -> Option<Msg> {
        self.incoming.pop_front()
    }

    /// Look at the next outgoing message: head of the lowest non-empty
    /// channel.
    #[must_use]
    pub fn peek_outgoing(&self) -> Option<&Msg> {
        self.channels.iter().find_map(VecDeque::front)
    }

    /// Remove and return the next outgoing message, lowest channel first.
    pub fn retrieve_outgoing(&mut self) -> Option<Msg> {
        self.channels.iter_mut().find_map(VecDeque::pop_front)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgra_core::{Color, Data, MsgKind};

    fn msg(v: u32) -> Msg {
        Msg::move_token("p", "q", Color::R, Data::scalar(v))
    }

    fn value(m: &Msg) -> u32 {
        match &m.kind {
            MsgKind::Move { data, .. } => data.first(),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn lowest_channel_served_first() {
        let mut port = MultiPort::new("p");
        port.set_channel(2);
        port.send(msg(30)).expect("fits");
        port.set_channel(0);
        port.send(msg(10)).expect("fits");
        port.set_channel(1);
        port.send(msg(20)).expect("fits");

        let order: Vec<u32> = std::iter::from_fn(|| port.retrieve_outgoing())
            .map(|m| value(&m))
            .collect();
        assert_eq!(order, vec![10, 20, 30]);
    }

    #[test]
    fn per_channel_capacity() {
        let mut port = MultiPort::new("p");
        port.set_channel(1);
        port.send(msg(1)).expect("fits");
        assert!(!port.can_send());
        // Other channels still have room.
        port.set_channel(0);
        assert!(port.can_send());
    }

    #[test]
    fn incoming_behaves_like_plain_port() {
        let mut port = MultiPort::new("q");
        port.deliver(msg(5)).expect("fits");
        assert!(!port.can_deliver());
        assert_eq!(port.retrieve_incoming().map(|m| value(&m)), Some(5));
    }
}
