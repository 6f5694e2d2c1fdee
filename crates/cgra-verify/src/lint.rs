//! Static lint: structural checks and cross-tile timing feasibility.
//!
//! Timing uses the D∈{0,1} modulo-scheduling model: a cross-tile dataflow
//! edge is feasible when either the same-iteration distance `delta0` or the
//! next-iteration distance `delta1 = delta0 + ii` covers the required hop
//! latency. Checking both avoids false positives on loop-carried edges of a
//! pipelined schedule.

use cgra_core::{Color, Operand, Program, ProgramSet, Side};

use crate::arch::Arch;

/// Issue category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Struct,
    Timing,
}

/// One verifier finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub category: Category,
    /// Tile the issue is reported at (the consumer, for timing).
    pub x: u32,
    pub y: u32,
    /// Timestep (instruction-group index).
    pub time: usize,
    /// Operation index within the group.
    pub op: usize,
    pub details: Details,
}

/// Structured issue details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Details {
    /// The program is mapped outside the grid.
    CoordinateOutOfGrid { columns: u32, rows: u32 },
    /// Two operations in one group write the same `(port, color)`.
    PortWriteConflict {
        first_op: usize,
        second_op: usize,
        side: Side,
        color: Color,
    },
    /// A cross-tile edge is infeasible under the D∈{0,1} model.
    Timing {
        producer: (u32, u32),
        consumer: (u32, u32),
        t_producer: usize,
        t_consumer: usize,
        required: i64,
        delta0: i64,
        delta1: i64,
        ii: i64,
    },
}

/// Run the static lint over a program set.
///
/// Issues come out in deterministic order (tiles by coordinate, groups and
/// operations in program order), so repeated runs yield identical lists.
#[must_use]
pub fn lint(programs: &ProgramSet, arch: &Arch) -> Vec<Issue> {
    let mut issues = Vec::new();
    check_struct(programs, arch, &mut issues);
    check_timing(programs, arch, &mut issues);
    issues
}

fn check_struct(programs: &ProgramSet, arch: &Arch, issues: &mut Vec<Issue>) {
    for (&(x, y), program) in programs.iter() {
        if !arch.contains(x, y) {
            issues.push(Issue {
                category: Category::Struct,
                x,
                y,
                time: 0,
                op: 0,
                details: Details::CoordinateOutOfGrid {
                    columns: arch.columns,
                    rows: arch.rows,
                },
            });
            continue;
        }
        for block in &program.blocks {
            for (time, group) in block.groups.iter().enumerate() {
                let mut writers: Vec<((Side, Color), usize)> = Vec::new();
                for (op_index, op) in group.ops.iter().enumerate() {
                    for dst in &op.dst {
                        let Operand::Port { side, color } = dst else {
                            continue;
                        };
                        if let Some(&(_, first_op)) =
                            writers.iter().find(|(key, _)| *key == (*side, *color))
                        {
                            issues.push(Issue {
                                category: Category::Struct,
                                x,
                                y,
                                time,
                                op: op_index,
                                details: Details::PortWriteConflict {
                                    first_op,
                                    second_op: op_index,
                                    side: *side,
                                    color: *color,
                                },
                            });
                        } else {
                            writers.push(((*side, *color), op_index));
                        }
                    }
                }
            }
        }
    }
}

fn check_timing(programs: &ProgramSet, arch: &Arch, issues: &mut Vec<Issue>) {
    for (&(x, y), consumer) in programs.iter() {
        for block in &consumer.blocks {
            for (t_consumer, group) in block.groups.iter().enumerate() {
                for (op_index, op) in group.ops.iter().enumerate() {
                    for src in &op.src {
                        let Operand::Port { side, color } = src else {
                            continue;
                        };
                        check_edge(
                            programs,
                            arch,
                            (x, y),
                            *side,
                            *color,
                            t_consumer,
                            op_index,
                            consumer,
                            issues,
                        );
                    }
                }
            }
        }
    }
}

/// Check every producer matching one consumer-side port operand.
fn check_edge(
    programs: &ProgramSet,
    arch: &Arch,
    consumer_at: (u32, u32),
    side: Side,
    color: Color,
    t_consumer: usize,
    op_index: usize,
    consumer: &Program,
    issues: &mut Vec<Issue>,
) {
    let Some((dx, dy)) = side.delta() else {
        return;
    };
    let (x, y) = consumer_at;
    let (px, py) = (i64::from(x) + dx, i64::from(y) + dy);
    if px < 0 || py < 0 || px >= i64::from(arch.columns) || py >= i64::from(arch.rows) {
        return;
    }
    let producer_at = (px as u32, py as u32);
    let Some(producer) = programs.get(producer_at.0, producer_at.1) else {
        return;
    };

    // One Manhattan hop between cardinal neighbours.
    let required = i64::from(arch.hop_latency);
    let ii = i64::from(consumer.compiled_ii);

    for block in &producer.blocks {
        for (t_producer, group) in block.groups.iter().enumerate() {
            for op in &group.ops {
                let writes_back = op.dst.iter().any(|dst| {
                    matches!(dst, Operand::Port { side: s, color: c }
                        if *s == side.opposite() && *c == color)
                });
                if !writes_back {
                    continue;
                }
                let delta0 = t_consumer as i64 - t_producer as i64;
                let delta1 = delta0 + ii;
                if delta0 < required && delta1 < required {
                    issues.push(Issue {
                        category: Category::Timing,
                        x,
                        y,
                        time: t_consumer,
                        op: op_index,
                        details: Details::Timing {
                            producer: producer_at,
                            consumer: consumer_at,
                            t_producer,
                            t_consumer,
                            required,
                            delta0,
                            delta1,
                            ii,
                        },
                    });
                }
            }
        }
    }
}
