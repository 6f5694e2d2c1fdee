//! Stateful opcode execution.
//!
//! Value-producing opcodes delegate to the pure kernels in [`crate::alu`];
//! this module owns everything that touches tile state beyond the operand
//! choke points: local memory, the DRAM split-phase pair, token-discipline
//! control (`PHI`, `GRANT_ONCE`, …) and branches.

use cgra_core::{Color, Data, ExecError, Opcode, Operand, Operation, Side};

use crate::alu;
use crate::operand::{read, write};
use crate::state::{MEMORY_WORDS, TileState};

/// `STORE` bins below this address accumulate instead of overwrite when both
/// sources are registers (histogram kernels).
pub(crate) const STORE_ACCUM_BINS: u64 = 64;

/// Position of an operation within its tile program, for once-flags and
/// diagnostics.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OpCtx {
    pub pc: i64,
    pub op_index: usize,
}

pub(crate) fn grant_once_key(ctx: OpCtx) -> String {
    format!("grant_once@{}:{}", ctx.pc, ctx.op_index)
}

pub(crate) fn grant_once_done(state: &TileState, ctx: OpCtx) -> bool {
    state
        .states
        .get(&grant_once_key(ctx))
        .copied()
        .unwrap_or(false)
}

fn read_all(state: &mut TileState, operands: &[Operand]) -> Result<Vec<Data>, ExecError> {
    operands.iter().map(|o| read(state, o)).collect()
}

fn write_all(state: &mut TileState, operands: &[Operand], value: &Data) -> Result<(), ExecError> {
    for dst in operands {
        write(state, dst, value.clone())?;
    }
    Ok(())
}

fn src(op: &Operation, index: usize) -> Result<&Operand, ExecError> {
    op.src
        .get(index)
        .ok_or(ExecError::MissingSource(op.opcode.mnemonic(), index + 1))
}

fn memory_index(address: u32) -> Result<usize, ExecError> {
    let index = address as usize;
    if index < MEMORY_WORDS {
        Ok(index)
    } else {
        Err(ExecError::MemoryOutOfRange(u64::from(address)))
    }
}

/// Execute one operation against the tile state.
///
/// The caller has already decided eligibility (`check_flags`); execution
/// itself never stalls, though a few opcodes (`FDIV` on masked sources,
/// `GRANT_ONCE` waiting for boundary data) return without effect.
pub(crate) fn execute(
    state: &mut TileState,
    op: &Operation,
    ctx: OpCtx,
) -> Result<(), ExecError> {
    match op.opcode {
        Opcode::Nop | Opcode::Idle | Opcode::Ret => Ok(()),

        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Fadd
        | Opcode::Fsub
        | Opcode::Fmul
        | Opcode::Fdiv
        | Opcode::FmulFadd
        | Opcode::Lls
        | Opcode::Lrs
        | Opcode::Or
        | Opcode::Xor
        | Opcode::And
        | Opcode::Not
        | Opcode::IcmpEq
        | Opcode::IcmpSgt
        | Opcode::IcmpSlt
        | Opcode::IcmpSge
        | Opcode::IcmpSle
        | Opcode::IcmpSne
        | Opcode::CmpExport
        | Opcode::LtEx
        | Opcode::Mov
        | Opcode::Sext
        | Opcode::Zext
        | Opcode::CastFptosi
        | Opcode::Constant
        | Opcode::Gep => {
            let srcs = read_all(state, &op.src)?;
            if op.opcode == Opcode::Fdiv && !alu::combine_pred(&srcs) {
                // Masked divisor or dividend: leave the destination alone.
                return Ok(());
            }
            let result = alu::apply(op.opcode, &srcs)?;
            write_all(state, &op.dst, &result)
        }

        Opcode::Load => {
            let addr_tok = read(state, src(op, 0)?)?;
            let index = memory_index(addr_tok.first())?;
            let value = Data::scalar_with_pred(state.memory[index], addr_tok.pred);
            write_all(state, &op.dst, &value)
        }

        Opcode::Store => {
            // Operand order is canonicalized to (address, value) at load.
            let addr_tok = read(state, src(op, 0)?)?;
            let val_tok = read(state, src(op, 1)?)?;
            if !addr_tok.pred || !val_tok.pred {
                return Ok(());
            }
            let index = memory_index(addr_tok.first())?;
            let both_registers = op.src[0].is_register() && op.src[1].is_register();
            if both_registers && (index as u64) < STORE_ACCUM_BINS {
                state.memory[index] = state.memory[index].wrapping_add(1);
            } else {
                state.memory[index] = val_tok.first();
            }
            Ok(())
        }

        Opcode::Ld => {
            let addr_tok = read(state, src(op, 0)?)?;
            state.addr_buf = Some(u64::from(addr_tok.first()));
            state.to_write_memory = false;
            state.pending_load_dst = op.dst.clone();
            write(
                state,
                &Operand::Port {
                    side: Side::Router,
                    color: Color::R,
                },
                addr_tok,
            )
        }

        Opcode::St => {
            let addr_tok = read(state, src(op, 0)?)?;
            let val_tok = read(state, src(op, 1)?)?;
            state.addr_buf = Some(u64::from(addr_tok.first()));
            state.to_write_memory = true;
            write(
                state,
                &Operand::Port {
                    side: Side::Router,
                    color: Color::R,
                },
                val_tok,
            )
        }

        Opcode::Phi => {
            let a = read(state, src(op, 0)?)?;
            let b = read(state, src(op, 1)?)?;
            // Exactly one valid source selects it; otherwise prefer src[0].
            let choose_second = b.pred && !a.pred;
            let (chosen, chosen_index) = if choose_second { (b, 1) } else { (a, 0) };
            // Loop-carried discipline: the chosen register source is spent,
            // so the next iteration picks up the freshly-written value.
            if let Operand::Register(n) = &op.src[chosen_index] {
                if let Some(slot) = state.registers.get_mut(*n) {
                    slot.pred = false;
                }
            }
            write_all(state, &op.dst, &chosen)
        }

        Opcode::PhiConst => {
            let key = format!("phi_const@{}:{}", ctx.pc, ctx.op_index);
            let first_time = !state.states.get(&key).copied().unwrap_or(false);
            let selected = if first_time {
                src(op, 0)?
            } else {
                src(op, 1)?
            }
            .clone();
            state.states.insert(key, true);
            let value = read(state, &selected)?;
            write_all(state, &op.dst, &value)
        }

        Opcode::Gpred => {
            let value = read(state, src(op, 0)?)?;
            let gate = read(state, src(op, 1)?)?;
            let out = value.with_pred(value.pred && gate.first() != 0);
            write_all(state, &op.dst, &out)
        }

        Opcode::GrantOnce => {
            if grant_once_done(state, ctx) {
                return Ok(());
            }
            let token = if op.src.is_empty() {
                // Grant whatever boundary data has arrived.
                match take_any_ready(state) {
                    Some(token) => token,
                    None => return Ok(()),
                }
            } else {
                read(state, &op.src[0])?
            };
            write_all(state, &op.dst, &token)?;
            state.states.insert(grant_once_key(ctx), true);
            Ok(())
        }

        Opcode::Jmp => {
            let target = read(state, src(op, 0)?)?;
            state.next_pc = Some(target.first() as usize);
            Ok(())
        }

        Opcode::Beq | Opcode::Bne | Opcode::Blt => {
            let a = read(state, src(op, 0)?)?;
            let b = read(state, src(op, 1)?)?;
            let target = read(state, src(op, 2)?)?;
            let taken = match op.opcode {
                Opcode::Beq => a.first() as i32 == b.first() as i32,
                Opcode::Bne => a.first() as i32 != b.first() as i32,
                _ => (a.first() as i32) < (b.first() as i32),
            };
            if taken {
                state.next_pc = Some(target.first() as usize);
            }
            Ok(())
        }
    }
}

/// Consume the first live token waiting on any `(color, direction)`.
fn take_any_ready(state: &mut TileState) -> Option<Data> {
    for color in Color::all() {
        for side in Side::all() {
            let (c, s) = (color.index(), side.index());
            if state.recv_ready[c][s] && state.recv_head[c][s].pred {
                return read(state, &Operand::Port { side, color }).ok();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ExecMode;
    use cgra_core::Operation;

    fn ctx() -> OpCtx {
        OpCtx { pc: 0, op_index: 0 }
    }

    fn reg(n: usize) -> Operand {
        Operand::Register(n)
    }

    fn state() -> TileState {
        TileState::new(0, 0, ExecMode::Sync)
    }

    #[test]
    fn store_accumulates_small_register_bins() {
        // Histogram discipline: register-addressed small bins count up.
        let mut st = state();
        st.registers[0] = Data::scalar(3);
        st.registers[1] = Data::scalar(3);
        let op = Operation::new(Opcode::Store, vec![reg(0), reg(1)], vec![]);
        for _ in 0..5 {
            execute(&mut st, &op, ctx()).expect("store");
        }
        assert_eq!(st.memory[3], 5);
    }

    #[test]
    fn store_overwrites_beyond_accum_bins() {
        let mut st = state();
        st.registers[0] = Data::scalar(200);
        st.registers[1] = Data::scalar(99);
        let op = Operation::new(Opcode::Store, vec![reg(0), reg(1)], vec![]);
        execute(&mut st, &op, ctx()).expect("store");
        execute(&mut st, &op, ctx()).expect("store");
        assert_eq!(st.memory[200], 99);
    }

    #[test]
    fn store_overwrites_with_immediate_value() {
        let mut st = state();
        st.registers[0] = Data::scalar(3);
        let op = Operation::new(
            Opcode::Store,
            vec![reg(0), Operand::Immediate(7)],
            vec![],
        );
        execute(&mut st, &op, ctx()).expect("store");
        assert_eq!(st.memory[3], 7, "non-register value overwrites");
    }

    #[test]
    fn store_skips_masked_sources() {
        let mut st = state();
        st.registers[0] = Data::scalar(3);
        st.registers[1] = Data::scalar_with_pred(9, false);
        st.memory[3] = 123;
        let op = Operation::new(Opcode::Store, vec![reg(0), reg(1)], vec![]);
        execute(&mut st, &op, ctx()).expect("store");
        assert_eq!(st.memory[3], 123, "masked store skipped");
    }

    #[test]
    fn load_forwards_value_with_address_predicate() {
        let mut st = state();
        st.memory[10] = 77;
        st.registers[0] = Data::scalar(10);
        let op = Operation::new(Opcode::Load, vec![reg(0)], vec![reg(1), reg(2)]);
        execute(&mut st, &op, ctx()).expect("load");
        assert_eq!(st.registers[1].first(), 77);
        assert_eq!(st.registers[2].first(), 77);
        assert!(st.registers[1].pred);
    }

    #[test]
    fn memory_out_of_range_is_fatal() {
        let mut st = state();
        st.registers[0] = Data::scalar(MEMORY_WORDS as u32);
        let op = Operation::new(Opcode::Load, vec![reg(0)], vec![reg(1)]);
        assert!(matches!(
            execute(&mut st, &op, ctx()),
            Err(ExecError::MemoryOutOfRange(_))
        ));
    }

    #[test]
    fn phi_selects_the_valid_source() {
        // Loop-carried PHI: valid initial value wins, its register is spent.
        let mut st = state();
        st.registers[0] = Data::scalar(5);
        st.registers[1] = Data::scalar_with_pred(17, false);
        let op = Operation::new(Opcode::Phi, vec![reg(0), reg(1)], vec![reg(2)]);
        execute(&mut st, &op, ctx()).expect("phi");
        assert_eq!(st.registers[2].values, vec![5]);
        assert!(st.registers[2].pred);
        assert!(!st.registers[0].pred, "chosen register source is spent");
    }

    #[test]
    fn phi_prefers_first_when_both_valid() {
        let mut st = state();
        st.registers[0] = Data::scalar(1);
        st.registers[1] = Data::scalar(2);
        let op = Operation::new(Opcode::Phi, vec![reg(0), reg(1)], vec![reg(2)]);
        execute(&mut st, &op, ctx()).expect("phi");
        assert_eq!(st.registers[2].first(), 1);
        assert!(!st.registers[0].pred);
        assert!(st.registers[1].pred, "unchosen source keeps its predicate");
    }

    #[test]
    fn phi_const_switches_after_first_execution() {
        let mut st = state();
        let op = Operation::new(
            Opcode::PhiConst,
            vec![Operand::Immediate(10), Operand::Immediate(20)],
            vec![reg(0)],
        );
        execute(&mut st, &op, ctx()).expect("phi_const");
        assert_eq!(st.registers[0].first(), 10);
        execute(&mut st, &op, ctx()).expect("phi_const");
        assert_eq!(st.registers[0].first(), 20);
        execute(&mut st, &op, ctx()).expect("phi_const");
        assert_eq!(st.registers[0].first(), 20);
    }

    #[test]
    fn gpred_gates_the_predicate() {
        let mut st = state();
        st.registers[0] = Data::scalar(42);
        st.registers[1] = Data::scalar(0);
        let op = Operation::new(Opcode::Gpred, vec![reg(0), reg(1)], vec![reg(2)]);
        execute(&mut st, &op, ctx()).expect("gpred");
        assert_eq!(st.registers[2].first(), 42);
        assert!(!st.registers[2].pred, "zero gate masks");

        st.registers[1] = Data::scalar(1);
        execute(&mut st, &op, ctx()).expect("gpred");
        assert!(st.registers[2].pred);
    }

    #[test]
    fn grant_once_fires_exactly_once() {
        let mut st = state();
        st.registers[0] = Data::scalar(5);
        let op = Operation::new(Opcode::GrantOnce, vec![reg(0)], vec![reg(1)]);
        execute(&mut st, &op, ctx()).expect("grant");
        assert_eq!(st.registers[1].first(), 5);

        st.registers[0] = Data::scalar(9);
        execute(&mut st, &op, ctx()).expect("grant");
        assert_eq!(st.registers[1].first(), 5, "subsequent invocations no-op");
    }

    #[test]
    fn grant_once_empty_source_takes_boundary_data() {
        let mut st = state();
        let (c, s) = (Color::R.index(), Side::North.index());
        let op = Operation::new(Opcode::GrantOnce, vec![], vec![reg(0)]);

        // Nothing waiting: no effect, still armed.
        execute(&mut st, &op, ctx()).expect("grant");
        assert!(!grant_once_done(&st, ctx()));

        st.recv_head[c][s] = Data::scalar(31);
        st.recv_ready[c][s] = true;
        execute(&mut st, &op, ctx()).expect("grant");
        assert_eq!(st.registers[0].first(), 31);
        assert!(grant_once_done(&st, ctx()));
        assert!(!st.recv_ready[c][s], "boundary token consumed");
    }

    #[test]
    fn branch_sets_next_pc() {
        let mut st = state();
        st.registers[0] = Data::scalar(1);
        st.registers[1] = Data::scalar(2);
        let op = Operation::new(
            Opcode::Blt,
            vec![reg(0), reg(1), Operand::Immediate(7)],
            vec![],
        );
        execute(&mut st, &op, ctx()).expect("blt");
        assert_eq!(st.next_pc, Some(7));

        // Not taken: no override.
        let mut st = state();
        st.registers[0] = Data::scalar(2);
        st.registers[1] = Data::scalar(2);
        execute(&mut st, &op, ctx()).expect("blt");
        assert_eq!(st.next_pc, None);
    }

    #[test]
    fn ld_latches_request_state() {
        let mut st = state();
        st.registers[0] = Data::scalar(0x40);
        let op = Operation::new(Opcode::Ld, vec![reg(0)], vec![reg(1)]);
        execute(&mut st, &op, ctx()).expect("ld");
        assert_eq!(st.addr_buf, Some(0x40));
        assert!(!st.to_write_memory);
        assert_eq!(st.pending_load_dst, vec![reg(1)]);
        let (c, s) = (Color::R.index(), Side::Router.index());
        assert!(st.send_busy[c][s]);
    }

    #[test]
    fn st_latches_write_request() {
        let mut st = state();
        st.registers[0] = Data::scalar(0x80);
        st.registers[1] = Data::scalar(0xDEAD);
        let op = Operation::new(Opcode::St, vec![reg(0), reg(1)], vec![]);
        execute(&mut st, &op, ctx()).expect("st");
        assert_eq!(st.addr_buf, Some(0x80));
        assert!(st.to_write_memory);
        let (c, s) = (Color::R.index(), Side::Router.index());
        assert_eq!(st.send_head[c][s].first(), 0xDEAD);
    }

    #[test]
    fn fdiv_on_masked_source_leaves_destination() {
        let mut st = state();
        st.registers[0] = Data::scalar_with_pred(2.0f32.to_bits(), false);
        st.registers[1] = Data::scalar(1.0f32.to_bits());
        st.registers[2] = Data::scalar(111);
        let op = Operation::new(Opcode::Fdiv, vec![reg(0), reg(1)], vec![reg(2)]);
        execute(&mut st, &op, ctx()).expect("fdiv");
        assert_eq!(st.registers[2].first(), 111, "destination untouched");
    }
}
