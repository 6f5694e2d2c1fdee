//! Per-tile execution engine.
//!
//! A tile runs a small scheduled dataflow program. Each tick has three
//! phases in fixed order: send queued tokens out, run one instruction group,
//! receive delivered tokens in. Two scheduling disciplines exist: sync
//! (per-group barrier) and async (per-operation eligibility within the
//! group, tracked by reservation state).

pub mod alu;
mod exec;
mod operand;
mod scheduler;
mod state;
mod tile;

pub use state::{ExecMode, MEMORY_WORDS, NUM_REGISTERS, Reservation, TileState};
pub use tile::Tile;
