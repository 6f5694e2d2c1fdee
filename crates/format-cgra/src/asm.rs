//! Line-oriented assembly program form.
//!
//! ```text
//! # Compiled II: 8
//! PE(0,0):
//!   {
//!     MOV, [West, R] -> [East, R] (t=0)
//!   } (idx_per_ii=0)
//! PE(1,0):
//!   loop:
//!   ADD, $0, #1 -> $0 (t=0)
//!   BNE, $0, #10, loop (t=1)
//! ```
//!
//! A `PE(x,y):` header opens a tile section. `{ ... } (idx_per_ii=K)`
//! places a whole group at timestep `K`; bare instructions are placed at
//! their `(t=T)` annotation or sequentially. Gaps between timesteps
//! materialize as empty groups (no-op timesteps). Labels name the timestep
//! of the next instruction and resolve to group-index immediates in branch
//! operands.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use cgra_core::{
    Color, InstructionGroup, Opcode, Operand, Operation, Program, ProgramSet, Side, parse_coord,
    parse_immediate,
};

use crate::{LoadError, canonicalize_store};

/// Load the assembly program form from a string.
pub fn load_asm_str(text: &str) -> Result<ProgramSet, LoadError> {
    Parser::default().parse(text)
}

/// Load the assembly program form from a file.
pub fn load_asm_path(path: impl AsRef<Path>) -> Result<ProgramSet, LoadError> {
    load_asm_str(&std::fs::read_to_string(path)?)
}

/// One instruction before operand resolution.
#[derive(Debug)]
struct RawInstr {
    opcode: String,
    srcs: Vec<String>,
    dsts: Vec<String>,
    line: usize,
    timestep: Option<usize>,
}

/// One tile section being accumulated.
#[derive(Debug)]
struct TileSection {
    coord: (u32, u32),
    ops: BTreeMap<usize, Vec<RawInstr>>,
    labels: HashMap<String, usize>,
    next_timestep: usize,
    pending_labels: Vec<String>,
}

impl TileSection {
    fn new(coord: (u32, u32)) -> Self {
        Self {
            coord,
            ops: BTreeMap::new(),
            labels: HashMap::new(),
            next_timestep: 0,
            pending_labels: Vec::new(),
        }
    }

    fn bind_labels(&mut self, timestep: usize) {
        for label in self.pending_labels.drain(..) {
            self.labels.insert(label, timestep);
        }
    }

    fn place(&mut self, instr: RawInstr) {
        let timestep = instr.timestep.unwrap_or(self.next_timestep);
        self.next_timestep = timestep + 1;
        self.bind_labels(timestep);
        self.ops.entry(timestep).or_default().push(instr);
    }

    fn place_group(&mut self, instrs: Vec<RawInstr>, index: Option<usize>) {
        let timestep = index.unwrap_or(self.next_timestep);
        self.next_timestep = timestep + 1;
        self.bind_labels(timestep);
        self.ops.entry(timestep).or_default().extend(instrs);
    }
}

#[derive(Default)]
struct Parser {
    compiled_ii: u32,
    section: Option<TileSection>,
    /// Instructions buffered inside an open `{ ... }` group.
    group: Option<Vec<RawInstr>>,
    done: Vec<((u32, u32), Program)>,
}

impl Parser {
    fn parse(mut self, text: &str) -> Result<ProgramSet, LoadError> {
        for (index, raw_line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(comment) = line.strip_prefix('#') {
                // Header comments may carry the initiation interval.
                if let Some(value) = comment.trim().strip_prefix("Compiled II:") {
                    self.compiled_ii = value.trim().parse().map_err(|_| {
                        LoadError::syntax(line_no, format!("bad Compiled II `{value}`"))
                    })?;
                }
                continue;
            }
            if let Some(header) = line.strip_prefix("PE(") {
                let Some(coord_body) = header.strip_suffix(':') else {
                    return Err(LoadError::syntax(line_no, "tile header must end with `:`"));
                };
                self.finish_section(line_no)?;
                let coord = parse_coord(&format!("({coord_body}"))?;
                self.section = Some(TileSection::new(coord));
                continue;
            }
            if line == "{" {
                if self.group.is_some() {
                    return Err(LoadError::syntax(line_no, "nested instruction group"));
                }
                self.group = Some(Vec::new());
                continue;
            }
            if let Some(rest) = line.strip_prefix('}') {
                let Some(instrs) = self.group.take() else {
                    return Err(LoadError::syntax(line_no, "`}` without open group"));
                };
                let (_, annotations) = strip_annotation(rest);
                let index = annotations.get("idx_per_ii").copied();
                self.current_section(line_no)?.place_group(instrs, index);
                continue;
            }
            if let Some(label) = label_name(line) {
                self.current_section(line_no)?
                    .pending_labels
                    .push(label.to_string());
                continue;
            }
            let instr = parse_instruction(line, line_no)?;
            if let Some(group) = self.group.as_mut() {
                group.push(instr);
            } else {
                self.current_section(line_no)?.place(instr);
            }
        }
        if self.group.is_some() {
            return Err(LoadError::syntax(text.lines().count(), "unclosed group"));
        }
        self.finish_section(text.lines().count())?;

        let mut set = ProgramSet::new();
        for ((x, y), program) in self.done {
            set.insert(x, y, program);
        }
        Ok(set)
    }

    fn current_section(&mut self, line_no: usize) -> Result<&mut TileSection, LoadError> {
        self.section
            .as_mut()
            .ok_or_else(|| LoadError::syntax(line_no, "instruction outside a PE section"))
    }

    fn finish_section(&mut self, line_no: usize) -> Result<(), LoadError> {
        let Some(section) = self.section.take() else {
            return Ok(());
        };
        if self.group.is_some() {
            return Err(LoadError::syntax(line_no, "unclosed group in section"));
        }
        let program = assemble(section, self.compiled_ii)?;
        self.done.push(program);
        Ok(())
    }
}

/// Build the final program for one tile: resolve operands (labels included)
/// and materialize empty groups for missing timesteps.
fn assemble(
    section: TileSection,
    compiled_ii: u32,
) -> Result<((u32, u32), Program), LoadError> {
    let labels = section.labels;
    let max_timestep = section.ops.keys().next_back().copied();
    let mut ops = section.ops;
    let mut groups = Vec::new();
    if let Some(max) = max_timestep {
        for timestep in 0..=max {
            let instrs = ops.remove(&timestep).unwrap_or_default();
            let mut operations = Vec::with_capacity(instrs.len());
            for instr in instrs {
                operations.push(resolve_instruction(instr, &labels)?);
            }
            groups.push(InstructionGroup::new(operations));
        }
    }
    Ok((
        section.coord,
        Program::new(compiled_ii, vec![cgra_core::EntryBlock::new(groups)]),
    ))
}

fn resolve_instruction(
    instr: RawInstr,
    labels: &HashMap<String, usize>,
) -> Result<Operation, LoadError> {
    let opcode = Opcode::from_mnemonic(&instr.opcode).map_err(|e| LoadError::Syntax {
        line: instr.line,
        message: e.to_string(),
    })?;
    let resolve_all = |texts: &[String]| -> Result<Vec<Operand>, LoadError> {
        texts
            .iter()
            .map(|t| {
                resolve_operand(t, labels).map_err(|message| LoadError::Syntax {
                    line: instr.line,
                    message,
                })
            })
            .collect()
    };
    let mut op = Operation::new(opcode, resolve_all(&instr.srcs)?, resolve_all(&instr.dsts)?);
    canonicalize_store(&mut op);
    Ok(op)
}

/// Resolve one operand text: `[$N]`, `[#K]`, `[DIR, COL]`, bare register,
/// bare side (color defaults), a label, or a bare immediate.
fn resolve_operand(
    text: &str,
    labels: &HashMap<String, usize>,
) -> Result<Operand, String> {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        let (body, color) = match inner.split_once(',') {
            Some((body, color_name)) => {
                let color = Color::from_name(color_name.trim())
                    .map_err(|e| e.to_string())?;
                (body.trim(), Some(color))
            }
            None => (inner.trim(), None),
        };
        return Operand::parse(body, color).map_err(|e| e.to_string());
    }
    if let Some(reg) = text.strip_prefix('$') {
        return reg
            .parse::<usize>()
            .map(Operand::Register)
            .map_err(|_| format!("invalid register `{text}`"));
    }
    if Side::is_side_name(text) {
        return Operand::parse(text, None).map_err(|e| e.to_string());
    }
    if let Some(&target) = labels.get(text) {
        return Ok(Operand::Immediate(target as u32));
    }
    parse_immediate(text)
        .map(Operand::Immediate)
        .map_err(|e| e.to_string())
}

/// A bare `name:` line introducing a jump target.
fn label_name(line: &str) -> Option<&str> {
    let name = line.strip_suffix(':')?;
    if name.is_empty()
        || name.contains(char::is_whitespace)
        || name.contains(',')
        || name.contains('(')
    {
        return None;
    }
    Some(name)
}

/// Parse one instruction line: `OPCODE, src... -> dst... (t=T, inv_iters=I)`.
fn parse_instruction(line: &str, line_no: usize) -> Result<RawInstr, LoadError> {
    let (body, annotations) = strip_annotation(line);
    let timestep = annotations.get("t").copied();

    let (left, right) = match body.split_once("->") {
        Some((l, r)) => (l, Some(r)),
        None => (body.as_str(), None),
    };
    let mut left_tokens = tokenize(left);
    if left_tokens.is_empty() {
        return Err(LoadError::syntax(line_no, "missing opcode"));
    }
    let opcode = left_tokens.remove(0);
    let dsts = right.map(tokenize).unwrap_or_default();
    Ok(RawInstr {
        opcode,
        srcs: left_tokens,
        dsts,
        line: line_no,
        timestep,
    })
}

/// Strip a trailing `(k=v, ...)` annotation, returning the remaining body
/// and the parsed key/value pairs.
fn strip_annotation(line: &str) -> (String, HashMap<String, usize>) {
    let trimmed = line.trim_end();
    let mut annotations = HashMap::new();
    let Some(open) = trimmed.rfind('(') else {
        return (trimmed.to_string(), annotations);
    };
    let Some(inner) = trimmed[open..].strip_prefix('(').and_then(|t| t.strip_suffix(')')) else {
        return (trimmed.to_string(), annotations);
    };
    if !inner.contains('=') {
        return (trimmed.to_string(), annotations);
    }
    for pair in inner.split(',') {
        if let Some((key, value)) = pair.split_once('=') {
            if let Ok(value) = value.trim().parse::<usize>() {
                annotations.insert(key.trim().to_string(), value);
            }
        }
    }
    (trimmed[..open].trim_end().to_string(), annotations)
}

/// Split on top-level commas and whitespace, keeping `[...]` groups intact.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in text.chars() {
        match ch {
            '[' => {
                depth += 1;
                current.push(ch);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' | ' ' | '\t' if depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
