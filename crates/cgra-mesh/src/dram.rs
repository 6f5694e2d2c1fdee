//! Minimal DRAM controller model for the router-port memory bridge.
//!
//! The real controller is an external collaborator; this model honours its
//! request/response schema so memory-backed `LD`/`ST` are exercisable.
//! Requests wait one tick in the inbox before being serviced; payloads are
//! big-endian words.

use std::collections::VecDeque;

use cgra_core::{Msg, MsgKind, decode_word, encode_word};

/// A byte-addressed memory behind one named port.
pub struct Dram {
    name: String,
    memory: Vec<u8>,
    /// Requests waiting for service.
    inbox: VecDeque<Msg>,
    /// Responses waiting for delivery.
    ready: VecDeque<Msg>,
}

impl Dram {
    #[must_use]
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            memory: vec![0; size],
            inbox: VecDeque::new(),
            ready: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accept a request from a tile's router port.
    pub fn enqueue(&mut self, msg: Msg) {
        self.inbox.push_back(msg);
    }

    /// Service every queued request, producing responses addressed back to
    /// the requesting port. Returns whether anything was serviced.
    pub fn tick(&mut self) -> bool {
        let mut progress = false;
        while let Some(request) = self.inbox.pop_front() {
            let response = match request.kind {
                MsgKind::ReadReq { address, byte_size } => {
                    let data = self.read_bytes(address, byte_size);
                    Msg::new(self.name.clone(), request.src, MsgKind::DataReady { data })
                }
                MsgKind::WriteReq { address, data } => {
                    self.write_bytes(address, &data);
                    Msg::new(self.name.clone(), request.src, MsgKind::WriteDone)
                }
                other => {
                    tracing::warn!(kind = ?other, "non-request message at DRAM, dropped");
                    continue;
                }
            };
            self.ready.push_back(response);
            progress = true;
        }
        progress
    }

    /// Next response awaiting delivery.
    #[must_use]
    pub fn peek_response(&self) -> Option<&Msg> {
        self.ready.front()
    }

    pub fn pop_response(&mut self) -> Option<Msg> {
        self.ready.pop_front()
    }

    pub fn requeue_response(&mut self, msg: Msg) {
        self.ready.push_back(msg);
    }

    #[must_use]
    pub fn pending_responses(&self) -> usize {
        self.ready.len()
    }

    /// Preload one big-endian word.
    pub fn write_word(&mut self, address: u64, value: u32) {
        self.write_bytes(address, &encode_word(value));
    }

    /// Read one big-endian word back.
    #[must_use]
    pub fn read_word(&self, address: u64) -> u32 {
        decode_word(&self.read_bytes(address, 4))
    }

    fn read_bytes(&self, address: u64, byte_size: usize) -> Vec<u8> {
        let start = address as usize;
        (start..start + byte_size)
            .map(|i| self.memory.get(i).copied().unwrap_or(0))
            .collect()
    }

    fn write_bytes(&mut self, address: u64, bytes: &[u8]) {
        let start = address as usize;
        if start + bytes.len() > self.memory.len() {
            tracing::warn!(address, "DRAM write out of range, ignored");
            return;
        }
        self.memory[start..start + bytes.len()].copy_from_slice(bytes);
    }
}
