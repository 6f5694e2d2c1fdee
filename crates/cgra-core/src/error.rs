//! Simulation error taxonomy.
//!
//! Program errors are fatal: they abort the run from the tile that detected
//! them, carrying the tile coordinate, program counter, and group index.
//! Backpressure is not an error here at all — full buffers and stale port
//! data are retried by the schedulers.

use thiserror::Error;

/// Syntax-level failures shared by operand parsing and the loaders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid side name `{0}`")]
    InvalidSide(String),
    #[error("invalid color name `{0}`")]
    InvalidColor(String),
    #[error("invalid operand `{0}`")]
    InvalidOperand(String),
    #[error("invalid immediate `{0}`")]
    InvalidImmediate(String),
    #[error("unknown opcode `{0}`")]
    UnknownOpcode(String),
    #[error("invalid tile coordinate `{0}`")]
    InvalidCoordinate(String),
}

/// Failures raised while executing one operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("register index {0} out of range")]
    RegisterOutOfRange(usize),
    #[error("memory address {0:#x} out of range")]
    MemoryOutOfRange(u64),
    #[error("integer divide by zero")]
    DivideByZero,
    #[error("float divide by zero")]
    FloatDivideByZero,
    #[error("operand `{0}` is not valid for this operation")]
    BadOperand(String),
    #[error("opcode {0} expects {1} source operand(s)")]
    MissingSource(&'static str, usize),
    #[error("opcode {0} is not executable on a tile")]
    NotExecutable(&'static str),
}

/// Run-level failures surfaced by the driver's run loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    /// A fatal program error, with the tile that detected it.
    #[error("tile ({x},{y}) pc {pc} group {group}: {source}")]
    Program {
        x: u32,
        y: u32,
        pc: i64,
        group: usize,
        source: ExecError,
    },
    /// No component made progress while driver tasks remained unfinished.
    #[error("simulation stalled at tick {0}: no progress and tasks remain")]
    Stalled(u64),
    /// The tick budget ran out before the driver tasks finished.
    #[error("tick budget of {0} exhausted before tasks finished")]
    Exhausted(u64),
}

impl SimError {
    /// Wrap an execution error with the tile context that detected it.
    #[must_use]
    pub fn at(x: u32, y: u32, pc: i64, group: usize, source: ExecError) -> Self {
        Self::Program {
            x,
            y,
            pc,
            group,
            source,
        }
    }
}
