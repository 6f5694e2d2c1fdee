//! Pure opcode kernels.
//!
//! These compute values only; they never touch tile state. The result
//! predicate comes from one combiner — AND over all source predicates —
//! except where an opcode defines its own rule (`CONSTANT` is always live).
//! Shared with the verifier's dataflow simulator, which interprets the same
//! semantics without a fabric.

use cgra_core::{Data, ExecError, Opcode};

/// Bit patterns above this are plausibly IEEE-754 floats that lost their
/// type on the way through the front end; `GEP` reinterprets and truncates
/// them to integer addresses.
const FLOAT_ADDRESS_THRESHOLD: u32 = 1_000_000;

/// Result predicate: AND over all source predicates.
#[must_use]
pub fn combine_pred(srcs: &[Data]) -> bool {
    srcs.iter().all(|d| d.pred)
}

/// Decode an address operand, compensating for front-end type loss.
#[must_use]
pub fn address_from_bits(bits: u32) -> u32 {
    if bits > FLOAT_ADDRESS_THRESHOLD {
        f32::from_bits(bits) as u32
    } else {
        bits
    }
}

fn one(op: Opcode, srcs: &[Data]) -> Result<u32, ExecError> {
    srcs.first()
        .map(Data::first)
        .ok_or(ExecError::MissingSource(op.mnemonic(), 1))
}

fn two(op: Opcode, srcs: &[Data]) -> Result<(u32, u32), ExecError> {
    if srcs.len() < 2 {
        return Err(ExecError::MissingSource(op.mnemonic(), 2));
    }
    Ok((srcs[0].first(), srcs[1].first()))
}

fn three(op: Opcode, srcs: &[Data]) -> Result<(u32, u32, u32), ExecError> {
    if srcs.len() < 3 {
        return Err(ExecError::MissingSource(op.mnemonic(), 3));
    }
    Ok((srcs[0].first(), srcs[1].first(), srcs[2].first()))
}

fn float2(op: Opcode, srcs: &[Data]) -> Result<(f32, f32), ExecError> {
    let (a, b) = two(op, srcs)?;
    Ok((f32::from_bits(a), f32::from_bits(b)))
}

/// Apply one value-producing opcode to its source tokens.
///
/// Returns the result token, with the predicate computed by the combiner
/// unless the opcode defines otherwise. Opcodes with side effects (memory,
/// control, branches) are not applicable here and report `NotExecutable`.
pub fn apply(op: Opcode, srcs: &[Data]) -> Result<Data, ExecError> {
    let value = match op {
        Opcode::Add => {
            let (a, b) = two(op, srcs)?;
            (a as i32).wrapping_add(b as i32) as u32
        }
        Opcode::Sub => {
            let (a, b) = two(op, srcs)?;
            (a as i32).wrapping_sub(b as i32) as u32
        }
        Opcode::Mul => {
            let (a, b) = two(op, srcs)?;
            (a as i32).wrapping_mul(b as i32) as u32
        }
        Opcode::Div => {
            let (a, b) = two(op, srcs)?;
            if b == 0 {
                return Err(ExecError::DivideByZero);
            }
            (a as i32).wrapping_div(b as i32) as u32
        }
        Opcode::Fadd => {
            let (a, b) = float2(op, srcs)?;
            (a + b).to_bits()
        }
        Opcode::Fsub => {
            let (a, b) = float2(op, srcs)?;
            (a - b).to_bits()
        }
        Opcode::Fmul => {
            let (a, b) = float2(op, srcs)?;
            (a * b).to_bits()
        }
        Opcode::Fdiv => {
            let (a, b) = float2(op, srcs)?;
            if b == 0.0 {
                return Err(ExecError::FloatDivideByZero);
            }
            (a / b).to_bits()
        }
        Opcode::FmulFadd => {
            let (a, b, c) = three(op, srcs)?;
            (f32::from_bits(a) * f32::from_bits(b) + f32::from_bits(c)).to_bits()
        }
        Opcode::Lls => {
            let (a, b) = two(op, srcs)?;
            a.wrapping_shl(b)
        }
        Opcode::Lrs => {
            let (a, b) = two(op, srcs)?;
            a.wrapping_shr(b)
        }
        Opcode::Or => {
            let (a, b) = two(op, srcs)?;
            a | b
        }
        Opcode::Xor => {
            let (a, b) = two(op, srcs)?;
            a ^ b
        }
        Opcode::And => {
            let (a, b) = two(op, srcs)?;
            a & b
        }
        Opcode::Not => {
            // Logical, not bitwise.
            u32::from(one(op, srcs)? == 0)
        }
        Opcode::IcmpEq => {
            let (a, b) = two(op, srcs)?;
            u32::from(a as i32 == b as i32)
        }
        Opcode::IcmpSne => {
            let (a, b) = two(op, srcs)?;
            u32::from(a as i32 != b as i32)
        }
        Opcode::IcmpSgt => {
            let (a, b) = two(op, srcs)?;
            u32::from(a as i32 > b as i32)
        }
        Opcode::IcmpSlt => {
            let (a, b) = two(op, srcs)?;
            u32::from((a as i32) < (b as i32))
        }
        Opcode::IcmpSge => {
            let (a, b) = two(op, srcs)?;
            u32::from(a as i32 >= b as i32)
        }
        Opcode::IcmpSle => {
            let (a, b) = two(op, srcs)?;
            u32::from(a as i32 <= b as i32)
        }
        Opcode::CmpExport => {
            // Equality including predicate equality.
            if srcs.len() < 2 {
                return Err(ExecError::MissingSource(op.mnemonic(), 2));
            }
            u32::from(srcs[0].first() == srcs[1].first() && srcs[0].pred == srcs[1].pred)
        }
        Opcode::LtEx => {
            let (a, b) = two(op, srcs)?;
            u32::from(a < b)
        }
        Opcode::Mov | Opcode::Sext | Opcode::Zext => one(op, srcs)?,
        Opcode::CastFptosi => f32::from_bits(one(op, srcs)?) as i32 as u32,
        Opcode::Constant => {
            // Always live, regardless of how the constant was produced.
            return Ok(Data::scalar(one(op, srcs)?));
        }
        Opcode::Gep => {
            let base = address_from_bits(one(op, srcs)?);
            let index = srcs.get(1).map_or(0, Data::first);
            base.wrapping_add(index)
        }
        other => return Err(ExecError::NotExecutable(other.mnemonic())),
    };
    Ok(Data::scalar_with_pred(value, combine_pred(srcs)))
}
