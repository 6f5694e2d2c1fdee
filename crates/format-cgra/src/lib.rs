//! Program loaders.
//!
//! Two concrete forms produce the same in-memory programs keyed by tile
//! coordinate: a structured YAML document and a line-oriented assembly
//! listing. Operands and opcodes are fully parsed here, once; the emulator
//! only ever sees the tagged forms.

mod asm;
mod yaml;

use cgra_core::{Opcode, Operation, ParseError};
use thiserror::Error;

pub use asm::{load_asm_path, load_asm_str};
pub use yaml::{load_yaml_path, load_yaml_str};

/// Loader failures, for both program forms.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl LoadError {
    fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }
}

/// Canonicalize `STORE`/`ST` operand order to `(address, value)`.
///
/// The textual forms allow either order; a register first operand is the
/// address, otherwise the operands are swapped. Doing this once at load
/// keeps the auto-detection heuristic out of the emulator.
pub(crate) fn canonicalize_store(op: &mut Operation) {
    if !matches!(op.opcode, Opcode::Store | Opcode::St) {
        return;
    }
    if op.src.len() == 2 && !op.src[0].is_register() {
        op.src.swap(0, 1);
    }
}
