//! One processing element and its tick loop.
//!
//! Each tick runs three phases in fixed order:
//!
//! 1. `do_send` — queue every occupied send slot onto the local port,
//!    addressed to the installed remote port for that side. The `(Router, R)`
//!    slot instead builds a DRAM read or write request.
//! 2. `run_program` — issue the current instruction group under the tile's
//!    scheduling discipline.
//! 3. `do_recv` — drain delivered messages into the `(color, direction)`
//!    receive slots.
//!
//! The ordering is observable: a token produced in phase 2 reaches the
//! outbound wire in the next tick's phase 1, never the same tick.

use cgra_core::{
    Color, Data, ExecError, Msg, MsgKind, Observable, Operand, Side, SimError, Tickable, Value,
    decode_word, encode_word,
};
use cgra_core::{NUM_SIDES, Program};
use cgra_fabric::{Port, SendError};

use crate::operand;
use crate::scheduler::{self, StepOutcome};
use crate::state::{ExecMode, Reservation, TileState};

/// One tile of the mesh.
pub struct Tile {
    state: TileState,
    program: Option<Program>,
    ports: Vec<Port>,
    remote: Vec<Option<String>>,
}

impl Tile {
    #[must_use]
    pub fn new(x: u32, y: u32, mode: ExecMode) -> Self {
        let ports = Side::all()
            .iter()
            .map(|side| Port::new(port_name(x, y, *side)))
            .collect();
        Self {
            state: TileState::new(x, y, mode),
            program: None,
            ports,
            remote: vec![None; NUM_SIDES],
        }
    }

    #[must_use]
    pub fn x(&self) -> u32 {
        self.state.x
    }

    #[must_use]
    pub fn y(&self) -> u32 {
        self.state.y
    }

    /// The tile's architectural state, for inspection and preloading.
    #[must_use]
    pub fn state(&self) -> &TileState {
        &self.state
    }

    #[must_use]
    pub fn state_mut(&mut self) -> &mut TileState {
        &mut self.state
    }

    /// Map a program onto this tile. Control state resets to uninitialized.
    pub fn map_program(&mut self, program: Program) {
        self.program = Some(program);
        self.state.reset_control();
    }

    /// Install the remote port name messages leaving `side` are addressed to.
    pub fn set_remote_port(&mut self, side: Side, name: impl Into<String>) {
        self.remote[side.index()] = Some(name.into());
    }

    #[must_use]
    pub fn port(&self, side: Side) -> &Port {
        &self.ports[side.index()]
    }

    pub fn port_mut(&mut self, side: Side) -> &mut Port {
        &mut self.ports[side.index()]
    }

    /// Local port name for a side, as used in message envelopes.
    #[must_use]
    pub fn local_port_name(&self, side: Side) -> String {
        port_name(self.state.x, self.state.y, side)
    }

    /// Preload one word of local memory.
    pub fn write_memory(&mut self, addr: usize, value: u32) {
        self.state.memory[addr] = value;
    }

    /// Read one word of local memory.
    #[must_use]
    pub fn read_memory(&self, addr: usize) -> u32 {
        self.state.memory[addr]
    }

    /// Whether the tile's control state is uninitialized (not mid-block).
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state.pc < 0
    }

    /// Phase 1: move occupied send slots onto the local ports.
    fn do_send(&mut self) -> bool {
        let mut progress = false;
        for color in Color::all() {
            for side in Side::all() {
                let (c, s) = (color.index(), side.index());
                if !self.state.send_busy[c][s] {
                    continue;
                }
                let Some(dst) = self.remote[s].clone() else {
                    tracing::warn!(
                        x = self.state.x,
                        y = self.state.y,
                        side = %side,
                        "send on unwired side dropped"
                    );
                    self.state.send_busy[c][s] = false;
                    continue;
                };
                let src = self.ports[s].name().to_string();
                let msg = if side == Side::Router && color == Color::R {
                    // The memory bridge: the send slot is a latched request.
                    let address = self.state.addr_buf.unwrap_or(0);
                    if self.state.to_write_memory {
                        Msg::new(
                            src,
                            dst,
                            MsgKind::WriteReq {
                                address,
                                data: encode_word(self.state.send_head[c][s].first()),
                            },
                        )
                    } else {
                        Msg::new(
                            src,
                            dst,
                            MsgKind::ReadReq {
                                address,
                                byte_size: 4,
                            },
                        )
                    }
                } else {
                    Msg::move_token(src, dst, color, self.state.send_head[c][s].clone())
                };
                match self.ports[s].send(msg) {
                    Ok(()) => {
                        self.state.send_busy[c][s] = false;
                        if side == Side::Router && color == Color::R {
                            self.state.addr_buf = None;
                        }
                        progress = true;
                    }
                    Err(SendError::WouldBlock) => {
                        tracing::trace!(
                            x = self.state.x,
                            y = self.state.y,
                            side = %side,
                            color = %color,
                            "outbound port full, retrying next tick"
                        );
                    }
                }
            }
        }
        progress
    }

    /// Phase 2: issue the current instruction group.
    fn run_program(&mut self) -> Result<bool, ExecError> {
        let Some(program) = self.program.as_ref() else {
            return Ok(false);
        };
        if program.blocks.is_empty() {
            return Ok(false);
        }

        if self.state.pc < 0 {
            // First tick (or block re-entry): select the first entry block.
            self.state.block = Some(0);
            self.state.pc = 0;
            self.state.next_pc = None;
            if self.state.mode == ExecMode::Async {
                self.state.reservation =
                    program.blocks[0].groups.first().map(Reservation::for_group);
            }
        }

        let block = &program.blocks[self.state.block.unwrap_or(0)];
        if block.groups.is_empty() {
            self.state.reset_control();
            return Ok(false);
        }
        let pc = self.state.pc;
        let group = &block.groups[pc as usize];
        let outcome: StepOutcome = match self.state.mode {
            ExecMode::Sync => scheduler::sync_step(&mut self.state, group, pc)?,
            ExecMode::Async => scheduler::async_step(&mut self.state, group, pc)?,
        };

        if outcome.advance {
            let next = self
                .state
                .next_pc
                .take()
                .map_or(self.state.pc + 1, |t| t as i64);
            if next < 0 || next as usize >= block.groups.len() {
                // Ran off the end of the block: back to uninitialized.
                self.state.reset_control();
            } else {
                self.state.pc = next;
                if self.state.mode == ExecMode::Async {
                    self.state.reservation =
                        Some(Reservation::for_group(&block.groups[next as usize]));
                }
            }
        }
        Ok(outcome.progress)
    }

    /// Phase 3: drain delivered messages into the receive slots.
    fn do_recv(&mut self) -> Result<bool, ExecError> {
        let mut progress = false;
        for side in Side::all() {
            let s = side.index();
            loop {
                let Some(front) = self.ports[s].peek_incoming() else {
                    break;
                };
                // Backpressure: a message whose slot is occupied stays queued.
                let slot = match &front.kind {
                    MsgKind::Move { color, .. } => Some((color.index(), s)),
                    MsgKind::DataReady { .. } | MsgKind::WriteDone => {
                        Some((Color::R.index(), Side::Router.index()))
                    }
                    MsgKind::ReadReq { .. } | MsgKind::WriteReq { .. } => None,
                };
                if let Some((c, slot_s)) = slot {
                    if self.state.recv_ready[c][slot_s] {
                        break;
                    }
                }
                let Some(msg) = self.ports[s].retrieve_incoming() else {
                    break;
                };
                match msg.kind {
                    MsgKind::Move { color, data } => {
                        let c = color.index();
                        self.state.recv_head[c][s] = data;
                        self.state.recv_ready[c][s] = true;
                        progress = true;
                    }
                    MsgKind::DataReady { data } => {
                        let (c, r) = (Color::R.index(), Side::Router.index());
                        self.state.recv_head[c][r] = Data::scalar(decode_word(&data));
                        self.state.recv_ready[c][r] = true;
                        // Complete the LD that issued the request.
                        if !self.state.pending_load_dst.is_empty() {
                            let dsts = std::mem::take(&mut self.state.pending_load_dst);
                            let value = operand::read(
                                &mut self.state,
                                &Operand::Port {
                                    side: Side::Router,
                                    color: Color::R,
                                },
                            )?;
                            for dst in &dsts {
                                operand::write(&mut self.state, dst, value.clone())?;
                            }
                        }
                        progress = true;
                    }
                    MsgKind::WriteDone => {
                        let (c, r) = (Color::R.index(), Side::Router.index());
                        self.state.recv_head[c][r] = Data::scalar(0);
                        self.state.recv_ready[c][r] = true;
                        progress = true;
                    }
                    MsgKind::ReadReq { .. } | MsgKind::WriteReq { .. } => {
                        tracing::warn!(
                            x = self.state.x,
                            y = self.state.y,
                            side = %side,
                            "memory request delivered to a tile, dropped"
                        );
                    }
                }
            }
        }
        Ok(progress)
    }

    fn wrap_error(&self, source: ExecError) -> SimError {
        SimError::at(
            self.state.x,
            self.state.y,
            self.state.pc,
            self.state.pc.max(0) as usize,
            source,
        )
    }
}

impl Tickable for Tile {
    fn tick(&mut self) -> Result<bool, SimError> {
        let mut progress = self.do_send();
        progress |= self.run_program().map_err(|e| self.wrap_error(e))?;
        progress |= self.do_recv().map_err(|e| self.wrap_error(e))?;
        Ok(progress)
    }
}

impl Observable for Tile {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "pc" => Some(Value::I64(self.state.pc)),
            "block" => Some(Value::I64(
                self.state.block.map_or(-1, |b| b as i64),
            )),
            "mode" => Some(Value::from(match self.state.mode {
                ExecMode::Sync => "sync",
                ExecMode::Async => "async",
            })),
            _ => {
                let index: usize = path.strip_prefix("reg.")?.parse().ok()?;
                let reg = self.state.registers.get(index)?;
                Some(Value::U32(reg.first()))
            }
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &["pc", "block", "mode", "reg.N"]
    }
}

fn port_name(x: u32, y: u32, side: Side) -> String {
    format!("tile({x},{y}).{side}")
}
