//! Core types and traits for tick-level CGRA simulation.
//!
//! Everything advances in discrete ticks. Tiles exchange fixed-width tokens
//! over colored, per-direction channels; all timing derives from the tick.

mod color;
mod data;
mod error;
mod message;
mod observable;
mod program;
mod side;
mod tickable;
mod ticks;

pub use color::{Color, NUM_COLORS};
pub use data::Data;
pub use error::{ExecError, ParseError, SimError};
pub use message::{Msg, MsgKind, decode_word, encode_word};
pub use observable::{Observable, Value};
pub use program::{
    EntryBlock, InstructionGroup, Opcode, Operand, Operation, Program, ProgramSet, parse_coord,
    parse_immediate,
};
pub use side::{CARDINAL_SIDES, NUM_SIDES, Side};
pub use tickable::Tickable;
pub use ticks::Ticks;
