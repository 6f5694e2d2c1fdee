//! Instruction-group scheduling disciplines.
//!
//! Sync mode is a per-group barrier: every operation's flags must pass
//! before any of them executes, and the PC advances by one group per
//! successful tick. Async mode gives each operation its own eligibility,
//! tracked by the group's reservation state; the PC advances when the last
//! pending operation retires.

use cgra_core::{ExecError, InstructionGroup, Opcode, Operand, Operation};

use crate::exec::{OpCtx, execute, grant_once_done};
use crate::state::TileState;

/// What one scheduling step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StepOutcome {
    /// Whether any operation executed (or an empty group advanced).
    pub progress: bool,
    /// Whether the PC should advance past this group.
    pub advance: bool,
}

fn src_ready(state: &TileState, operand: &Operand) -> bool {
    match operand {
        // Out-of-range indices pass so execution raises the fatal error.
        Operand::Register(n) => state.registers.get(*n).is_none_or(|d| d.pred),
        Operand::Immediate(_) => true,
        Operand::Port { side, color } => {
            let (c, s) = (color.index(), side.index());
            state.recv_ready[c][s] && state.recv_head[c][s].pred
        }
    }
}

fn dst_free(state: &TileState, operand: &Operand) -> bool {
    match operand {
        Operand::Port { side, color } => !state.send_busy[color.index()][side.index()],
        Operand::Register(_) | Operand::Immediate(_) => true,
    }
}

/// Whether one operation is eligible to execute this tick.
pub(crate) fn check_flags(state: &TileState, op: &Operation, ctx: OpCtx) -> bool {
    let dsts_free = op.dst.iter().all(|d| dst_free(state, d));
    match op.opcode {
        // PHI selects among partially-valid sources: one ready source is
        // enough.
        Opcode::Phi => dsts_free && op.src.iter().any(|s| src_ready(state, s)),
        // An empty-source GRANT_ONCE waits on any boundary arrival; once
        // spent it is a standing no-op.
        Opcode::GrantOnce if op.src.is_empty() => {
            grant_once_done(state, ctx) || (dsts_free && any_recv_ready(state))
        }
        _ => dsts_free && op.src.iter().all(|s| src_ready(state, s)),
    }
}

fn any_recv_ready(state: &TileState) -> bool {
    state
        .recv_ready
        .iter()
        .zip(&state.recv_head)
        .any(|(ready_row, head_row)| {
            ready_row
                .iter()
                .zip(head_row)
                .any(|(ready, head)| *ready && head.pred)
        })
}

/// One sync-mode step over the current group.
pub(crate) fn sync_step(
    state: &mut TileState,
    group: &InstructionGroup,
    pc: i64,
) -> Result<StepOutcome, ExecError> {
    if group.is_empty() {
        // Materialized no-op timestep.
        return Ok(StepOutcome {
            progress: true,
            advance: true,
        });
    }

    let all_pass = group.ops.iter().enumerate().all(|(i, op)| {
        check_flags(
            state,
            op,
            OpCtx {
                pc,
                op_index: i,
            },
        )
    });

    if all_pass {
        for (i, op) in group.ops.iter().enumerate() {
            execute(state, op, OpCtx { pc, op_index: i })?;
        }
        return Ok(StepOutcome {
            progress: true,
            advance: true,
        });
    }

    // The group stalls, but a pending empty-source GRANT_ONCE still makes
    // progress on its own when boundary data is waiting.
    let mut progress = false;
    for (i, op) in group.ops.iter().enumerate() {
        if op.opcode != Opcode::GrantOnce || !op.src.is_empty() {
            continue;
        }
        let ctx = OpCtx { pc, op_index: i };
        if grant_once_done(state, ctx) || !check_flags(state, op, ctx) {
            continue;
        }
        execute(state, op, ctx)?;
        progress |= grant_once_done(state, ctx);
    }
    Ok(StepOutcome {
        progress,
        advance: false,
    })
}

/// One async-mode step over the current group.
///
/// The PC advances only when `ops_left` reaches zero from a strictly
/// positive count at the start of the tick, so a mis-initialized reservation
/// cannot advance it spuriously. Empty groups advance directly.
pub(crate) fn async_step(
    state: &mut TileState,
    group: &InstructionGroup,
    pc: i64,
) -> Result<StepOutcome, ExecError> {
    if group.is_empty() {
        return Ok(StepOutcome {
            progress: true,
            advance: true,
        });
    }

    let positive_before = state
        .reservation
        .as_ref()
        .is_some_and(|r| r.ops_left > 0);

    let mut progress = false;
    for (i, op) in group.ops.iter().enumerate() {
        let pending = state
            .reservation
            .as_ref()
            .is_some_and(|r| r.pending.get(i).copied().unwrap_or(false));
        if !pending {
            continue;
        }
        let ctx = OpCtx { pc, op_index: i };
        if !check_flags(state, op, ctx) {
            continue;
        }
        if let Some(reservation) = state.reservation.as_mut() {
            reservation.pending[i] = false;
            reservation.ops_left -= 1;
        }
        execute(state, op, ctx)?;
        progress = true;
    }

    let drained = state
        .reservation
        .as_ref()
        .is_some_and(|r| r.ops_left == 0);
    Ok(StepOutcome {
        progress,
        advance: positive_before && drained,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ExecMode, Reservation};
    use cgra_core::{Color, Data, Side};

    fn reg(n: usize) -> Operand {
        Operand::Register(n)
    }

    fn port(side: Side, color: Color) -> Operand {
        Operand::Port { side, color }
    }

    fn add_group() -> InstructionGroup {
        InstructionGroup::new(vec![
            Operation::new(Opcode::Add, vec![reg(0), reg(1)], vec![reg(2)]),
            Operation::new(Opcode::Mov, vec![reg(0)], vec![reg(3)]),
        ])
    }

    #[test]
    fn sync_barrier_all_or_nothing() {
        let mut state = TileState::new(0, 0, ExecMode::Sync);
        state.registers[0] = Data::scalar(1);
        // registers[1] is still masked: the whole group stalls.
        let group = add_group();
        let out = sync_step(&mut state, &group, 0).expect("step");
        assert!(!out.progress);
        assert!(!out.advance);
        assert!(!state.registers[3].pred, "MOV did not run either");

        state.registers[1] = Data::scalar(2);
        let out = sync_step(&mut state, &group, 0).expect("step");
        assert!(out.progress);
        assert!(out.advance);
        assert_eq!(state.registers[2].first(), 3);
        assert_eq!(state.registers[3].first(), 1);
    }

    #[test]
    fn sync_stalls_on_busy_destination_port() {
        let mut state = TileState::new(0, 0, ExecMode::Sync);
        state.registers[0] = Data::scalar(1);
        let (c, s) = (Color::R.index(), Side::East.index());
        state.send_busy[c][s] = true;
        let group = InstructionGroup::new(vec![Operation::new(
            Opcode::Mov,
            vec![reg(0)],
            vec![port(Side::East, Color::R)],
        )]);
        let out = sync_step(&mut state, &group, 0).expect("step");
        assert!(!out.advance);
    }

    #[test]
    fn sync_stalls_on_masked_port_token() {
        let mut state = TileState::new(0, 0, ExecMode::Sync);
        let (c, s) = (Color::R.index(), Side::West.index());
        state.recv_head[c][s] = Data::scalar_with_pred(5, false);
        state.recv_ready[c][s] = true;
        let group = InstructionGroup::new(vec![Operation::new(
            Opcode::Mov,
            vec![port(Side::West, Color::R)],
            vec![reg(0)],
        )]);
        // Stale/invalid data blocks the group.
        let out = sync_step(&mut state, &group, 0).expect("step");
        assert!(!out.advance);
    }

    #[test]
    fn empty_group_advances_both_modes() {
        let group = InstructionGroup::empty();
        let mut state = TileState::new(0, 0, ExecMode::Sync);
        assert!(sync_step(&mut state, &group, 0).expect("step").advance);
        let mut state = TileState::new(0, 0, ExecMode::Async);
        assert!(async_step(&mut state, &group, 0).expect("step").advance);
    }

    #[test]
    fn grant_once_progresses_inside_stalled_group() {
        let mut state = TileState::new(0, 0, ExecMode::Sync);
        let (c, s) = (Color::R.index(), Side::North.index());
        state.recv_head[c][s] = Data::scalar(11);
        state.recv_ready[c][s] = true;

        let group = InstructionGroup::new(vec![
            // Blocked: register 0 is masked.
            Operation::new(Opcode::Mov, vec![reg(0)], vec![reg(1)]),
            Operation::new(Opcode::GrantOnce, vec![], vec![reg(2)]),
        ]);
        let out = sync_step(&mut state, &group, 0).expect("step");
        assert!(out.progress, "grant fired independently");
        assert!(!out.advance, "group itself still stalled");
        assert_eq!(state.registers[2].first(), 11);

        // Second stalled tick: the spent grant no longer reports progress.
        let out = sync_step(&mut state, &group, 0).expect("step");
        assert!(!out.progress);
    }

    #[test]
    fn async_retires_operations_independently() {
        let mut state = TileState::new(0, 0, ExecMode::Async);
        let group = add_group();
        state.reservation = Some(Reservation::for_group(&group));
        state.registers[0] = Data::scalar(4);
        // ADD blocked on masked register 1; MOV can retire now.
        let out = async_step(&mut state, &group, 0).expect("step");
        assert!(out.progress);
        assert!(!out.advance);
        assert_eq!(state.registers[3].first(), 4);
        assert_eq!(state.reservation.as_ref().map(|r| r.ops_left), Some(1));

        state.registers[1] = Data::scalar(6);
        let out = async_step(&mut state, &group, 0).expect("step");
        assert!(out.advance, "last retirement drains the group");
        assert_eq!(state.registers[2].first(), 10);
    }

    #[test]
    fn async_zero_from_zero_does_not_advance() {
        let mut state = TileState::new(0, 0, ExecMode::Async);
        let group = add_group();
        let mut reservation = Reservation::for_group(&group);
        reservation.pending = vec![false, false];
        reservation.ops_left = 0;
        state.reservation = Some(reservation);
        let out = async_step(&mut state, &group, 0).expect("step");
        assert!(!out.advance, "mis-initialized state cannot advance the PC");
    }

    #[test]
    fn phi_flags_need_one_ready_source() {
        let state = {
            let mut s = TileState::new(0, 0, ExecMode::Sync);
            s.registers[0] = Data::scalar(5);
            s
        };
        let op = Operation::new(Opcode::Phi, vec![reg(0), reg(1)], vec![reg(2)]);
        assert!(check_flags(&state, &op, OpCtx { pc: 0, op_index: 0 }));

        let empty = TileState::new(0, 0, ExecMode::Sync);
        assert!(!check_flags(&empty, &op, OpCtx { pc: 0, op_index: 0 }));
    }
}
