//! Lightweight dataflow simulation.
//!
//! Interprets the same opcode semantics as the tile emulator (sharing its
//! pure kernels) but with no network delay, backpressure, or buffer
//! arbitration: a port write lands immediately in a single slot at the
//! adjacent tile, and every operation executes at most once, as soon as its
//! sources are ready. The point is to catch compiler bugs — operations that
//! can never fire — before a full tick-level run.

use std::collections::HashMap;

use cgra_core::{Color, Data, ExecError, Opcode, Operand, ProgramSet, Side};
use cgra_tile::alu;

use crate::arch::Arch;

/// Position of one operation in the program set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpRef {
    pub x: u32,
    pub y: u32,
    /// Timestep (instruction-group index).
    pub time: usize,
    /// Operation index within the group.
    pub op: usize,
}

/// Outcome of one dataflow simulation.
#[derive(Debug, Default)]
pub struct SimReport {
    /// Operations that fired.
    pub executed: usize,
    /// Operations whose sources never became ready.
    pub unexecuted: Vec<OpRef>,
    /// Operations that failed semantically (bad operand counts and the
    /// like), with the failure text.
    pub errors: Vec<(OpRef, String)>,
    /// Tokens written out of the boundary of the grid, keyed by the
    /// producing tile, side, and color.
    pub boundary: Vec<((u32, u32, Side, Color), Data)>,
}

struct TaggedOp<'p> {
    at: OpRef,
    op: &'p cgra_core::Operation,
    executed: bool,
}

/// Per-tile register files, memories, and inter-tile port slots.
#[derive(Default)]
struct Fabric {
    regs: HashMap<(u32, u32), Vec<Data>>,
    mem: HashMap<(u32, u32), Vec<u32>>,
    /// One token slot per `(tile, side, color)`, no buffering.
    slots: HashMap<(u32, u32, Side, Color), Data>,
}

impl Fabric {
    fn reg(&mut self, tile: (u32, u32), index: usize) -> Data {
        self.regs
            .entry(tile)
            .or_insert_with(|| vec![Data::default(); cgra_tile::NUM_REGISTERS])
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    fn set_reg(&mut self, tile: (u32, u32), index: usize, value: Data) {
        let regs = self
            .regs
            .entry(tile)
            .or_insert_with(|| vec![Data::default(); cgra_tile::NUM_REGISTERS]);
        if let Some(slot) = regs.get_mut(index) {
            *slot = value;
        }
    }

    fn memory(&mut self, tile: (u32, u32), capacity: usize) -> &mut Vec<u32> {
        self.mem.entry(tile).or_insert_with(|| vec![0; capacity])
    }
}

/// Run the dataflow simulation until quiescence or the step budget.
#[must_use]
pub fn simulate(programs: &ProgramSet, arch: &Arch, max_steps: usize) -> SimReport {
    let mut ops = collect_ops(programs);
    let mut fabric = Fabric::default();
    let mut report = SimReport::default();

    let mut steps = 0;
    loop {
        let mut progress = false;
        for i in 0..ops.len() {
            if ops[i].executed {
                continue;
            }
            if steps >= max_steps {
                break;
            }
            let tile = (ops[i].at.x, ops[i].at.y);
            if !sources_ready(&mut fabric, tile, ops[i].op) {
                continue;
            }
            ops[i].executed = true;
            progress = true;
            steps += 1;
            if let Err(error) = fire(&mut fabric, arch, tile, ops[i].op, &mut report) {
                report.errors.push((ops[i].at, error.to_string()));
            } else {
                report.executed += 1;
            }
        }
        if steps >= max_steps {
            tracing::debug!(steps, "dataflow step budget exhausted");
            break;
        }
        if !progress {
            break;
        }
    }

    report.unexecuted = ops
        .iter()
        .filter(|o| !o.executed)
        .map(|o| o.at)
        .collect();
    report
}

fn collect_ops(programs: &ProgramSet) -> Vec<TaggedOp<'_>> {
    let mut ops = Vec::new();
    for (&(x, y), program) in programs.iter() {
        for block in &program.blocks {
            for (time, group) in block.groups.iter().enumerate() {
                for (index, op) in group.ops.iter().enumerate() {
                    ops.push(TaggedOp {
                        at: OpRef {
                            x,
                            y,
                            time,
                            op: index,
                        },
                        op,
                        executed: false,
                    });
                }
            }
        }
    }
    // Deterministic issue order: by timestep, then coordinate, then index.
    ops.sort_by_key(|o| (o.at.time, o.at.y, o.at.x, o.at.op));
    ops
}

fn sources_ready(fabric: &mut Fabric, tile: (u32, u32), op: &cgra_core::Operation) -> bool {
    let ready = |operand: &Operand| match operand {
        Operand::Immediate(_) => true,
        Operand::Register(n) => fabric.reg(tile, *n).pred,
        Operand::Port { side, color } => {
            fabric.slots.contains_key(&(tile.0, tile.1, *side, *color))
        }
    };
    match op.opcode {
        Opcode::Phi => op.src.iter().any(ready),
        _ => op.src.iter().all(ready),
    }
}

fn read(fabric: &mut Fabric, tile: (u32, u32), operand: &Operand) -> Data {
    match operand {
        Operand::Immediate(bits) => Data::scalar(*bits),
        Operand::Register(n) => fabric.reg(tile, *n),
        Operand::Port { side, color } => fabric
            .slots
            .remove(&(tile.0, tile.1, *side, *color))
            .unwrap_or_default(),
    }
}

fn write(
    fabric: &mut Fabric,
    arch: &Arch,
    tile: (u32, u32),
    operand: &Operand,
    value: Data,
    report: &mut SimReport,
) {
    match operand {
        Operand::Register(n) => fabric.set_reg(tile, *n, value),
        Operand::Port { side, color } => {
            let Some((dx, dy)) = side.delta() else {
                report.boundary.push(((tile.0, tile.1, *side, *color), value));
                return;
            };
            let (nx, ny) = (i64::from(tile.0) + dx, i64::from(tile.1) + dy);
            if nx < 0 || ny < 0 || nx >= i64::from(arch.columns) || ny >= i64::from(arch.rows) {
                // Off the edge of the grid: observable output.
                report.boundary.push(((tile.0, tile.1, *side, *color), value));
                return;
            }
            // Zero-latency single slot at the adjacent tile.
            fabric.slots.insert(
                (nx as u32, ny as u32, side.opposite(), *color),
                value,
            );
        }
        Operand::Immediate(_) => {}
    }
}

fn fire(
    fabric: &mut Fabric,
    arch: &Arch,
    tile: (u32, u32),
    op: &cgra_core::Operation,
    report: &mut SimReport,
) -> Result<(), ExecError> {
    match op.opcode {
        Opcode::Nop
        | Opcode::Idle
        | Opcode::Ret
        | Opcode::Jmp
        | Opcode::Beq
        | Opcode::Bne
        | Opcode::Blt
        | Opcode::Ld
        | Opcode::St => Ok(()),

        Opcode::Phi => {
            if op.src.len() < 2 {
                return Err(ExecError::MissingSource("PHI", 2));
            }
            let a = read(fabric, tile, &op.src[0]);
            let b = read(fabric, tile, &op.src[1]);
            let chosen = if b.pred && !a.pred { b } else { a };
            for dst in &op.dst {
                write(fabric, arch, tile, dst, chosen.clone(), report);
            }
            Ok(())
        }

        Opcode::PhiConst | Opcode::GrantOnce => {
            // Single-shot semantics collapse to a plain forward here: every
            // operation fires at most once.
            if let Some(src) = op.src.first() {
                let value = read(fabric, tile, src);
                for dst in &op.dst {
                    write(fabric, arch, tile, dst, value.clone(), report);
                }
            }
            Ok(())
        }

        Opcode::Gpred => {
            if op.src.len() < 2 {
                return Err(ExecError::MissingSource("GPRED", 2));
            }
            let value = read(fabric, tile, &op.src[0]);
            let gate = read(fabric, tile, &op.src[1]);
            let out = value.with_pred(value.pred && gate.first() != 0);
            for dst in &op.dst {
                write(fabric, arch, tile, dst, out.clone(), report);
            }
            Ok(())
        }

        Opcode::Load => {
            if op.src.is_empty() {
                return Err(ExecError::MissingSource("LOAD", 1));
            }
            let addr = read(fabric, tile, &op.src[0]);
            let capacity = arch.mem_capacity as usize;
            let index = addr.first() as usize;
            let word = if index < capacity {
                fabric.memory(tile, capacity)[index]
            } else {
                0
            };
            let value = Data::scalar_with_pred(word, addr.pred);
            for dst in &op.dst {
                write(fabric, arch, tile, dst, value.clone(), report);
            }
            Ok(())
        }

        Opcode::Store => {
            if op.src.len() < 2 {
                return Err(ExecError::MissingSource("STORE", 2));
            }
            let addr = read(fabric, tile, &op.src[0]);
            let value = read(fabric, tile, &op.src[1]);
            if !addr.pred || !value.pred {
                return Ok(());
            }
            let capacity = arch.mem_capacity as usize;
            let index = addr.first() as usize;
            if index < capacity {
                fabric.memory(tile, capacity)[index] = value.first();
            }
            Ok(())
        }

        _ => {
            let srcs: Vec<Data> = op.src.iter().map(|s| read(fabric, tile, s)).collect();
            let result = match alu::apply(op.opcode, &srcs) {
                Ok(result) => result,
                // The pre-run checker must not abort: a poisoned division
                // yields a masked result instead.
                Err(ExecError::DivideByZero | ExecError::FloatDivideByZero) => {
                    Data::scalar_with_pred(0, false)
                }
                Err(other) => return Err(other),
            };
            for dst in &op.dst {
                write(fabric, arch, tile, dst, result.clone(), report);
            }
            Ok(())
        }
    }
}
