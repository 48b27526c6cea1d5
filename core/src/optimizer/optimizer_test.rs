use indoc::indoc;
use pretty_assertions::assert_eq;

use crate::api::ExecutionOptions;
use crate::compiler::BytecodeCompiler;
use crate::optimizer::{OptimizerPass, RemoveNops, default_pipeline, optimize};
use crate::parser::{self, MemoryLoader};
use crate::types::Game;
use crate::vm::{Instruction, Opcode, Program, Vm, VmResult};

fn compile(source: &str) -> Program {
    let unit = parser::parse(source, &mut MemoryLoader::new()).unwrap();
    BytecodeCompiler::compile(&unit, Game::K1, false).unwrap()
}

fn execute(program: &Program) -> VmResult {
    Vm::new(program, &ExecutionOptions::default()).run()
}

fn assert_same_behavior(a: &Program, b: &Program) {
    let (left, right) = (execute(a), execute(b));
    assert_eq!(left.outcome, right.outcome);
    assert_eq!(left.snapshots, right.snapshots);
    assert_eq!(left.result, right.result);
}

/// A hand-written stream with padding, a jump chain and dead code.
fn padded() -> Program {
    let mut p = Program::new();
    let body = p.new_label();
    let hop = p.new_label();
    let out = p.new_label();
    p.push(Instruction::bare(Opcode::Nop));
    p.push(Instruction::jump(Opcode::Jsr, body));
    p.push(Instruction::bare(Opcode::Retn));
    p.bind(body);
    p.push(Instruction::const_int(1));
    p.push(Instruction::move_sp(0));
    p.push(Instruction::jump(Opcode::Jnz, hop));
    p.push(Instruction::const_int(5));
    p.push(Instruction::action(4, 1));
    p.bind(hop);
    p.push(Instruction::jump(Opcode::Jmp, out));
    p.push(Instruction::const_int(6)); // dead
    p.push(Instruction::action(4, 1)); // dead
    p.bind(out);
    p.push(Instruction::bare(Opcode::Nop));
    p.push(Instruction::const_int(7));
    p.push(Instruction::action(4, 1));
    p.push(Instruction::bare(Opcode::Retn));
    p
}

#[test]
fn test_default_pipeline_shrinks_and_preserves_behavior() {
    let original = padded();
    let optimized = optimize(original.clone(), &default_pipeline());
    assert_eq!(
        optimized
            .instructions()
            .iter()
            .map(|i| i.opcode)
            .collect::<Vec<_>>(),
        vec![
            Opcode::Jsr,
            Opcode::Retn,
            Opcode::Const,
            Opcode::Jnz,
            Opcode::Const,
            Opcode::Action,
            Opcode::Const,
            Opcode::Action,
            Opcode::Retn,
        ]
    );
    assert_same_behavior(&original, &optimized);
    assert!(execute(&optimized).cycles < execute(&original).cycles);
}

#[test]
fn test_optimize_is_idempotent() {
    let passes = default_pipeline();
    let once = optimize(padded(), &passes);
    let twice = optimize(once.clone(), &passes);
    assert_eq!(once, twice);
}

#[test]
fn test_single_pass_pipeline() {
    let passes: Vec<Box<dyn OptimizerPass>> = vec![Box::new(RemoveNops)];
    let optimized = optimize(padded(), &passes);
    assert_eq!(optimized.len(), padded().len() - 2);
    assert!(
        optimized
            .instructions()
            .iter()
            .all(|i| i.opcode != Opcode::Nop)
    );
}

#[test]
fn test_compiled_scripts_keep_behavior() {
    let sources = [
        indoc! {"
            void main() {
                int i;
                for (i = 0; i < 3; i++) {
                    if (i == 1) continue;
                    PrintInteger(i);
                }
            }
        "},
        indoc! {"
            int g = 2;
            int Twice(int n) { return n * 2; }
            int StartingConditional() {
                switch (g) {
                    case 1: return 10;
                    case 2: PrintString(\"two\"); break;
                    default: break;
                }
                return Twice(g);
            }
        "},
        indoc! {"
            void main() {
                int n = 0;
                do { n += 1; } while (n < 4 && n != 2);
                PrintInteger(n);
            }
        "},
    ];
    for source in sources {
        let program = compile(source);
        let optimized = optimize(program.clone(), &default_pipeline());
        assert!(optimized.len() <= program.len());
        assert_same_behavior(&program, &optimized);
        assert_eq!(optimize(optimized.clone(), &default_pipeline()), optimized);
    }
}
