//! The tile program data model.
//!
//! A program is a set of entry blocks; a block is an ordered list of
//! instruction groups; a group is the set of operations issued together in
//! one scheduled timestep. Opcodes and operands are parsed once, by the
//! loader, into the tagged forms here — the emulator dispatches on the tag
//! and never sees mnemonic strings at tick time.

use std::collections::BTreeMap;
use std::fmt;

use crate::{Color, ParseError, Side};

/// Every opcode the tile emulator understands.
///
/// Mnemonic aliases (`SHL`/`LLS`, `MOV`/`DATA_MOV`/`CTRL_MOV`, …) collapse
/// to one variant at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Integer arithmetic, signed 32-bit.
    Add,
    Sub,
    Mul,
    Div,
    // IEEE-754 binary32 on the operand bit patterns.
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    FmulFadd,
    // Bitwise and shifts.
    Lls,
    Lrs,
    Or,
    Xor,
    And,
    Not,
    // Comparisons, result 0/1.
    IcmpEq,
    IcmpSgt,
    IcmpSlt,
    IcmpSge,
    IcmpSle,
    IcmpSne,
    CmpExport,
    LtEx,
    // Data motion and no-ops.
    Mov,
    Nop,
    Idle,
    // Local tile memory.
    Load,
    Store,
    // DRAM via the router port.
    Ld,
    St,
    // Control and token discipline.
    Phi,
    PhiConst,
    Gpred,
    GrantOnce,
    Constant,
    Gep,
    // Type conversion.
    Sext,
    Zext,
    CastFptosi,
    // Branches.
    Jmp,
    Beq,
    Bne,
    Blt,
    Ret,
}

impl Opcode {
    /// Parse a mnemonic, folding aliases.
    pub fn from_mnemonic(text: &str) -> Result<Self, ParseError> {
        match text.to_ascii_uppercase().as_str() {
            "ADD" => Ok(Opcode::Add),
            "SUB" => Ok(Opcode::Sub),
            "MUL" => Ok(Opcode::Mul),
            "DIV" => Ok(Opcode::Div),
            "FADD" => Ok(Opcode::Fadd),
            "FSUB" => Ok(Opcode::Fsub),
            "FMUL" => Ok(Opcode::Fmul),
            "FDIV" => Ok(Opcode::Fdiv),
            "FMUL_FADD" => Ok(Opcode::FmulFadd),
            "LLS" | "SHL" => Ok(Opcode::Lls),
            "LRS" => Ok(Opcode::Lrs),
            "OR" => Ok(Opcode::Or),
            "XOR" => Ok(Opcode::Xor),
            "AND" => Ok(Opcode::And),
            "NOT" => Ok(Opcode::Not),
            "ICMP_EQ" => Ok(Opcode::IcmpEq),
            "ICMP_SGT" => Ok(Opcode::IcmpSgt),
            "ICMP_SLT" => Ok(Opcode::IcmpSlt),
            "ICMP_SGE" => Ok(Opcode::IcmpSge),
            "ICMP_SLE" => Ok(Opcode::IcmpSle),
            "ICMP_SNE" => Ok(Opcode::IcmpSne),
            "CMP_EXPORT" => Ok(Opcode::CmpExport),
            "LT_EX" => Ok(Opcode::LtEx),
            "MOV" | "DATA_MOV" | "CTRL_MOV" => Ok(Opcode::Mov),
            "NOP" => Ok(Opcode::Nop),
            "IDLE" => Ok(Opcode::Idle),
            "LOAD" | "LDD" => Ok(Opcode::Load),
            "STORE" | "STD" => Ok(Opcode::Store),
            "LD" | "LDW" => Ok(Opcode::Ld),
            "ST" | "STW" => Ok(Opcode::St),
            "PHI" => Ok(Opcode::Phi),
            "PHI_CONST" => Ok(Opcode::PhiConst),
            "GPRED" | "GRANT_PREDICATE" => Ok(Opcode::Gpred),
            "GRANT_ONCE" => Ok(Opcode::GrantOnce),
            "CONSTANT" => Ok(Opcode::Constant),
            "GEP" => Ok(Opcode::Gep),
            "SEXT" => Ok(Opcode::Sext),
            "ZEXT" => Ok(Opcode::Zext),
            "CAST_FPTOSI" => Ok(Opcode::CastFptosi),
            "JMP" => Ok(Opcode::Jmp),
            "BEQ" => Ok(Opcode::Beq),
            "BNE" => Ok(Opcode::Bne),
            "BLT" => Ok(Opcode::Blt),
            "RET" | "RETURN" => Ok(Opcode::Ret),
            _ => Err(ParseError::UnknownOpcode(text.to_string())),
        }
    }

    /// Canonical mnemonic, for diagnostics.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Fadd => "FADD",
            Opcode::Fsub => "FSUB",
            Opcode::Fmul => "FMUL",
            Opcode::Fdiv => "FDIV",
            Opcode::FmulFadd => "FMUL_FADD",
            Opcode::Lls => "LLS",
            Opcode::Lrs => "LRS",
            Opcode::Or => "OR",
            Opcode::Xor => "XOR",
            Opcode::And => "AND",
            Opcode::Not => "NOT",
            Opcode::IcmpEq => "ICMP_EQ",
            Opcode::IcmpSgt => "ICMP_SGT",
            Opcode::IcmpSlt => "ICMP_SLT",
            Opcode::IcmpSge => "ICMP_SGE",
            Opcode::IcmpSle => "ICMP_SLE",
            Opcode::IcmpSne => "ICMP_SNE",
            Opcode::CmpExport => "CMP_EXPORT",
            Opcode::LtEx => "LT_EX",
            Opcode::Mov => "MOV",
            Opcode::Nop => "NOP",
            Opcode::Idle => "IDLE",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Ld => "LD",
            Opcode::St => "ST",
            Opcode::Phi => "PHI",
            Opcode::PhiConst => "PHI_CONST",
            Opcode::Gpred => "GPRED",
            Opcode::GrantOnce => "GRANT_ONCE",
            Opcode::Constant => "CONSTANT",
            Opcode::Gep => "GEP",
            Opcode::Sext => "SEXT",
            Opcode::Zext => "ZEXT",
            Opcode::CastFptosi => "CAST_FPTOSI",
            Opcode::Jmp => "JMP",
            Opcode::Beq => "BEQ",
            Opcode::Bne => "BNE",
            Opcode::Blt => "BLT",
            Opcode::Ret => "RET",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// One operand, parsed from its textual `impl` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// `$N` — register index.
    Register(usize),
    /// `#K` or a plain literal — pre-parsed 32-bit pattern.
    Immediate(u32),
    /// A side name qualified by a channel color.
    Port { side: Side, color: Color },
}

impl Operand {
    /// Parse a textual operand.
    ///
    /// `color` qualifies port operands; it defaults to `R` when the program
    /// text leaves it blank.
    pub fn parse(text: &str, color: Option<Color>) -> Result<Self, ParseError> {
        let text = text.trim();
        if let Some(reg) = text.strip_prefix('$') {
            let index = reg
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidOperand(text.to_string()))?;
            return Ok(Operand::Register(index));
        }
        if let Ok(side) = Side::from_name(text) {
            return Ok(Operand::Port {
                side,
                color: color.unwrap_or_default(),
            });
        }
        parse_immediate(text).map(Operand::Immediate)
    }

    /// True for the register form.
    #[must_use]
    pub const fn is_register(&self) -> bool {
        matches!(self, Operand::Register(_))
    }

    /// True for the port form.
    #[must_use]
    pub const fn is_port(&self) -> bool {
        matches!(self, Operand::Port { .. })
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(n) => write!(f, "${n}"),
            Operand::Immediate(v) => write!(f, "#{v}"),
            Operand::Port { side, color } => write!(f, "[{side}, {color}]"),
        }
    }
}

/// Parse an immediate literal into its 32-bit pattern.
///
/// Decimal (optionally negative, stored two's-complement), `0x` hex, or a
/// float literal encoded as its IEEE-754 bit pattern. A leading `#` is
/// stripped first.
pub fn parse_immediate(text: &str) -> Result<u32, ParseError> {
    let body = text.trim().strip_prefix('#').unwrap_or(text.trim());
    if body.is_empty() {
        return Err(ParseError::InvalidImmediate(text.to_string()));
    }
    if let Some(hex) = body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        return u32::from_str_radix(hex, 16)
            .map_err(|_| ParseError::InvalidImmediate(text.to_string()));
    }
    if body.contains('.') {
        return body
            .parse::<f32>()
            .map(f32::to_bits)
            .map_err(|_| ParseError::InvalidImmediate(text.to_string()));
    }
    if let Some(neg) = body.strip_prefix('-') {
        return neg
            .parse::<i64>()
            .map(|v| (-v) as u32)
            .map_err(|_| ParseError::InvalidImmediate(text.to_string()));
    }
    body.parse::<u32>()
        .map_err(|_| ParseError::InvalidImmediate(text.to_string()))
}

/// One operation: opcode plus ordered source and destination operand lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub opcode: Opcode,
    pub src: Vec<Operand>,
    pub dst: Vec<Operand>,
}

impl Operation {
    #[must_use]
    pub fn new(opcode: Opcode, src: Vec<Operand>, dst: Vec<Operand>) -> Self {
        Self { opcode, src, dst }
    }
}

/// Operations issued together in one scheduled timestep on one tile.
///
/// Groups are the unit of atomic issue: in sync mode the whole group either
/// makes progress or stalls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstructionGroup {
    pub ops: Vec<Operation>,
}

impl InstructionGroup {
    #[must_use]
    pub fn new(ops: Vec<Operation>) -> Self {
        Self { ops }
    }

    /// A materialized no-op timestep.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// An ordered list of instruction groups sharing an entry condition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryBlock {
    pub groups: Vec<InstructionGroup>,
}

impl EntryBlock {
    #[must_use]
    pub fn new(groups: Vec<InstructionGroup>) -> Self {
        Self { groups }
    }
}

/// One tile's program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    /// Modulo-scheduling initiation interval; 0 when not modulo-scheduled.
    pub compiled_ii: u32,
    pub blocks: Vec<EntryBlock>,
}

impl Program {
    #[must_use]
    pub fn new(compiled_ii: u32, blocks: Vec<EntryBlock>) -> Self {
        Self {
            compiled_ii,
            blocks,
        }
    }

    /// A single-block program, the common kernel shape.
    #[must_use]
    pub fn single_block(groups: Vec<InstructionGroup>) -> Self {
        Self::new(0, vec![EntryBlock::new(groups)])
    }
}

/// Programs keyed by tile coordinate `(x, y)`.
///
/// Backed by an ordered map so iteration (and therefore verifier output) is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramSet {
    programs: BTreeMap<(u32, u32), Program>,
}

impl ProgramSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, x: u32, y: u32, program: Program) {
        self.programs.insert((x, y), program);
    }

    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<&Program> {
        self.programs.get(&(x, y))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(u32, u32), &Program)> {
        self.programs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

/// Parse a coordinate string of the form `(x,y)`.
pub fn parse_coord(text: &str) -> Result<(u32, u32), ParseError> {
    let bad = || ParseError::InvalidCoordinate(text.to_string());
    let inner = text
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(bad)?;
    let (x, y) = inner.split_once(',').ok_or_else(bad)?;
    Ok((
        x.trim().parse::<u32>().map_err(|_| bad())?,
        y.trim().parse::<u32>().map_err(|_| bad())?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonic_aliases_collapse() {
        assert_eq!(Opcode::from_mnemonic("SHL").ok(), Some(Opcode::Lls));
        assert_eq!(Opcode::from_mnemonic("DATA_MOV").ok(), Some(Opcode::Mov));
        assert_eq!(Opcode::from_mnemonic("ctrl_mov").ok(), Some(Opcode::Mov));
        assert_eq!(
            Opcode::from_mnemonic("GRANT_PREDICATE").ok(),
            Some(Opcode::Gpred)
        );
        assert_eq!(Opcode::from_mnemonic("RETURN").ok(), Some(Opcode::Ret));
        assert!(Opcode::from_mnemonic("FROB").is_err());
    }

    #[test]
    fn operand_forms() {
        assert_eq!(Operand::parse("$3", None).ok(), Some(Operand::Register(3)));
        assert_eq!(
            Operand::parse("#42", None).ok(),
            Some(Operand::Immediate(42))
        );
        assert_eq!(
            Operand::parse("north", Some(Color::Y)).ok(),
            Some(Operand::Port {
                side: Side::North,
                color: Color::Y
            })
        );
        // Blank color defaults to R.
        assert_eq!(
            Operand::parse("East", None).ok(),
            Some(Operand::Port {
                side: Side::East,
                color: Color::R
            })
        );
        assert!(Operand::parse("$x", None).is_err());
    }

    #[test]
    fn immediates() {
        assert_eq!(parse_immediate("42").ok(), Some(42));
        assert_eq!(parse_immediate("#42").ok(), Some(42));
        assert_eq!(parse_immediate("0x2A").ok(), Some(42));
        assert_eq!(parse_immediate("-1").ok(), Some(u32::MAX));
        assert_eq!(parse_immediate("1.5").ok(), Some(1.5f32.to_bits()));
        assert!(parse_immediate("forty-two").is_err());
    }

    #[test]
    fn coords() {
        assert_eq!(parse_coord("(1,2)").ok(), Some((1, 2)));
        assert_eq!(parse_coord(" ( 0 , 7 ) ").ok(), Some((0, 7)));
        assert!(parse_coord("1,2").is_err());
        assert!(parse_coord("(1;2)").is_err());
    }

    #[test]
    fn program_set_is_ordered() {
        let mut set = ProgramSet::new();
        set.insert(1, 0, Program::default());
        set.insert(0, 0, Program::default());
        let keys: Vec<_> = set.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![(0, 0), (1, 0)]);
    }
}
