use tracing::trace;

use crate::optimizer::OptimizerPass;
use crate::vm::{Opcode, Operand, Program};

/// Drops every `NOP`. Jumps that targeted one move to the next survivor.
pub struct RemoveNops;

impl OptimizerPass for RemoveNops {
    fn name(&self) -> &'static str {
        "remove-nops"
    }

    fn run(&self, program: &mut Program) -> usize {
        let keep: Vec<bool> = program
            .instructions()
            .iter()
            .map(|instruction| instruction.opcode != Opcode::Nop)
            .collect();
        retain(program, &keep)
    }
}

/// Drops `MOVSP 0`.
pub struct RemoveZeroMoves;

impl OptimizerPass for RemoveZeroMoves {
    fn name(&self) -> &'static str {
        "remove-zero-moves"
    }

    fn run(&self, program: &mut Program) -> usize {
        let keep: Vec<bool> = program
            .instructions()
            .iter()
            .map(|instruction| {
                !(instruction.opcode == Opcode::MovSp && instruction.operand == Operand::Int(0))
            })
            .collect();
        retain(program, &keep)
    }
}

/// Drops instructions no execution path reaches.
///
/// Control enters at instruction 0. Besides fall-through and jump edges, a
/// `JSR` returns to the next instruction and a `STORE_STATE` makes the
/// code after its `JMP` reachable, since the engine runs that code later.
pub struct RemoveUnreachable;

impl OptimizerPass for RemoveUnreachable {
    fn name(&self) -> &'static str {
        "remove-unreachable"
    }

    fn run(&self, program: &mut Program) -> usize {
        let keep = reachable(program);
        retain(program, &keep)
    }
}

/// Marks the instructions reachable from instruction 0.
pub(crate) fn reachable(program: &Program) -> Vec<bool> {
    let instructions = program.instructions();
    let mut seen = vec![false; instructions.len()];
    let mut pending = vec![0];
    while let Some(index) = pending.pop() {
        if index >= instructions.len() || seen[index] {
            continue;
        }
        seen[index] = true;
        let instruction = &instructions[index];
        if instruction.opcode.falls_through() {
            pending.push(index + 1);
        }
        if let Some(target) = program.jump_target_of(instruction) {
            pending.push(target);
        }
        if instruction.opcode == Opcode::StoreState {
            pending.push(index + 2);
        }
    }
    seen
}

/// Points jumps whose target is an unconditional `JMP` at that jump's
/// final destination.
pub struct ThreadJumps;

impl OptimizerPass for ThreadJumps {
    fn name(&self) -> &'static str {
        "thread-jumps"
    }

    fn run(&self, program: &mut Program) -> usize {
        let mut changed = 0;
        for index in 0..program.len() {
            let Some(current) = program.jump_target_of(&program.instructions()[index]) else {
                continue;
            };
            let mut target = current;
            let mut visited = vec![index];
            while let Some(next) = program.instructions().get(target)
                && next.opcode == Opcode::Jmp
                && !visited.contains(&target)
            {
                visited.push(target);
                match program.jump_target_of(next) {
                    Some(further) => target = further,
                    None => break,
                }
            }
            if target != current {
                trace!(index, from = current, to = target, "Threading jump");
                program.retarget(index, target);
                changed += 1;
            }
        }
        changed
    }
}

/// Drops a `JMP` to the instruction right after it.
pub struct RemoveJumpToNext;

impl OptimizerPass for RemoveJumpToNext {
    fn name(&self) -> &'static str {
        "remove-jump-to-next"
    }

    fn run(&self, program: &mut Program) -> usize {
        let keep: Vec<bool> = program
            .instructions()
            .iter()
            .enumerate()
            .map(|(index, instruction)| {
                instruction.opcode != Opcode::Jmp
                    || program.jump_target_of(instruction) != Some(index + 1)
            })
            .collect();
        retain(program, &keep)
    }
}

fn retain(program: &mut Program, keep: &[bool]) -> usize {
    let removed = keep.iter().filter(|kept| !**kept).count();
    if removed > 0 {
        program.retain(keep);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Instruction;
    use pretty_assertions::assert_eq;

    fn opcodes(program: &Program) -> Vec<Opcode> {
        program.instructions().iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn test_remove_nops_retargets_jumps() {
        let mut p = Program::new();
        let target = p.new_label();
        p.push(Instruction::jump(Opcode::Jmp, target));
        p.push(Instruction::const_int(1));
        p.bind(target);
        p.push(Instruction::bare(Opcode::Nop));
        p.push(Instruction::bare(Opcode::Retn));

        assert_eq!(RemoveNops.run(&mut p), 1);
        assert_eq!(opcodes(&p), vec![Opcode::Jmp, Opcode::Const, Opcode::Retn]);
        assert_eq!(p.jump_target_of(&p.instructions()[0]), Some(2));
        assert_eq!(RemoveNops.run(&mut p), 0);
    }

    #[test]
    fn test_remove_zero_moves() {
        let mut p = Program::new();
        p.push(Instruction::move_sp(0));
        p.push(Instruction::move_sp(-4));
        assert_eq!(RemoveZeroMoves.run(&mut p), 1);
        assert_eq!(p.instructions(), &[Instruction::move_sp(-4)]);
    }

    #[test]
    fn test_remove_unreachable_keeps_subroutines_and_actions() {
        let mut p = Program::new();
        let sub = p.new_label();
        let resume = p.new_label();
        p.push(Instruction::jump(Opcode::Jsr, sub));
        p.push(Instruction::bare(Opcode::Retn));
        p.push(Instruction::const_int(99)); // dead
        p.bind(sub);
        p.push(Instruction::store_state(0, 0));
        p.push(Instruction::jump(Opcode::Jmp, resume));
        p.push(Instruction::action(9, 0));
        p.push(Instruction::bare(Opcode::Retn));
        p.bind(resume);
        p.push(Instruction::bare(Opcode::Retn));
        p.push(Instruction::const_int(98)); // dead

        assert_eq!(RemoveUnreachable.run(&mut p), 2);
        assert_eq!(
            opcodes(&p),
            vec![
                Opcode::Jsr,
                Opcode::Retn,
                Opcode::StoreState,
                Opcode::Jmp,
                Opcode::Action,
                Opcode::Retn,
                Opcode::Retn,
            ]
        );
        assert_eq!(p.jump_target_of(&p.instructions()[0]), Some(2));
        assert_eq!(p.jump_target_of(&p.instructions()[3]), Some(6));
    }

    #[test]
    fn test_thread_jumps_follows_chains() {
        let mut p = Program::new();
        let first = p.new_label();
        let second = p.new_label();
        let end = p.new_label();
        p.push(Instruction::const_int(0));
        p.push(Instruction::jump(Opcode::Jz, first));
        p.push(Instruction::bare(Opcode::Retn));
        p.bind(first);
        p.push(Instruction::jump(Opcode::Jmp, second));
        p.bind(second);
        p.push(Instruction::jump(Opcode::Jmp, end));
        p.push(Instruction::bare(Opcode::Nop));
        p.bind(end);
        p.push(Instruction::bare(Opcode::Retn));

        assert_eq!(ThreadJumps.run(&mut p), 2);
        assert_eq!(p.jump_target_of(&p.instructions()[1]), Some(6));
        assert_eq!(p.jump_target_of(&p.instructions()[3]), Some(6));
        assert_eq!(ThreadJumps.run(&mut p), 0);
    }

    #[test]
    fn test_thread_jumps_terminates_on_cycles() {
        let mut p = Program::new();
        let a = p.new_label();
        let b = p.new_label();
        p.bind(a);
        p.push(Instruction::jump(Opcode::Jmp, b));
        p.bind(b);
        p.push(Instruction::jump(Opcode::Jmp, a));
        assert_eq!(ThreadJumps.run(&mut p), 1);
        let targets: Vec<Option<usize>> = p
            .instructions()
            .iter()
            .map(|instruction| p.jump_target_of(instruction))
            .collect();
        assert_eq!(targets, vec![Some(0), Some(0)]);
        assert_eq!(ThreadJumps.run(&mut p), 0);
    }

    #[test]
    fn test_remove_jump_to_next() {
        let mut p = Program::new();
        let next = p.new_label();
        p.push(Instruction::jump(Opcode::Jmp, next));
        p.bind(next);
        p.push(Instruction::bare(Opcode::Retn));
        assert_eq!(RemoveJumpToNext.run(&mut p), 1);
        assert_eq!(opcodes(&p), vec![Opcode::Retn]);
    }
}
