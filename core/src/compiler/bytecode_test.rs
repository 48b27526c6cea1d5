//! Tests for the bytecode compiler.

use indoc::indoc;
use pretty_assertions::assert_eq;

use crate::{
    compiler::BytecodeCompiler,
    parser::{self, CompileError, CompileErrorKind, MemoryLoader},
    api::ExecutionOptions,
    types::Game,
    vm::{Argument, Opcode, Program, Value, Vm, disasm::disassemble},
};

/// Helper function to compile a source script for the K1 dialect.
fn compile(source: &str) -> Result<Program, CompileError> {
    let unit = parser::parse(source, &mut MemoryLoader::new())?;
    BytecodeCompiler::compile(&unit, Game::K1, false)
}

/// Compiles and returns the pretty listing.
fn listing(source: &str) -> String {
    disassemble(&compile(source).unwrap(), true)
}

fn error_kind(source: &str) -> CompileErrorKind {
    compile(source).unwrap_err().kind
}

#[test]
fn test_compile_engine_call() {
    assert_eq!(
        listing("void main() { PrintInteger(42); }"),
        indoc! {"
            ; ---- subroutine @0 ----
                JSR L0
                RETN

            ; ---- subroutine @2 ----
            L0:
                CONSTI 42
                ACTION 4, 1
                RETN
        "}
    );
}

#[test]
fn test_compile_local_and_postfix_increment() {
    assert_eq!(
        listing("void main() { int i = 3; i++; }"),
        indoc! {"
            ; ---- subroutine @0 ----
                JSR L0
                RETN

            ; ---- subroutine @2 ----
            L0:
                RSADDI
                CONSTI 3
                CPDOWNSP -8, 4
                MOVSP -4
                CPTOPSP -4, 4
                INCISP -8
                MOVSP -4
                MOVSP -4
                RETN
        "}
    );
}

#[test]
fn test_compile_user_call_and_return() {
    let source = indoc! {"
        int Add(int a, int b) { return a + b; }
        void main() { int x = Add(1, 2); }
    "};
    assert_eq!(
        listing(source),
        indoc! {"
            ; ---- subroutine @0 ----
                JSR L1
                RETN

            ; ---- subroutine @2 ----
            L0:
                CPTOPSP -8, 4
                CPTOPSP -8, 4
                ADDII
                CPDOWNSP -16, 4
                MOVSP -12
                RETN

            ; ---- subroutine @8 ----
            L1:
                RSADDI
                RSADDI
                CONSTI 1
                CONSTI 2
                JSR L0
                CPDOWNSP -8, 4
                MOVSP -4
                MOVSP -4
                RETN
        "}
    );
}

#[test]
fn test_early_return_keeps_frame_offsets() {
    let program = compile(indoc! {"
        int Clamp(int v, int lo) {
            if (v < lo) {
                return lo;
            }
            return v;
        }

        int Next(int v) {
            if (v > 100) {
                return 0;
            }
            int w = v + 1;
            return w;
        }

        void main() {
            PrintInteger(Clamp(5, 2));
            PrintInteger(Clamp(1, 2));
            PrintInteger(Next(7));
            PrintInteger(Next(200));
        }
    "})
    .unwrap();
    let result = Vm::new(&program, &ExecutionOptions::default()).run();
    assert!(result.is_halted(), "{:?}", result.outcome);
    let args: Vec<Vec<Argument>> = result.snapshots.into_iter().map(|c| c.args).collect();
    assert_eq!(
        args,
        [5, 2, 8, 0]
            .into_iter()
            .map(|v| vec![Argument::Scalar(Value::Int(v))])
            .collect::<Vec<_>>()
    );
}

#[test]
fn test_compile_globals_routine() {
    let source = indoc! {"
        int g = 5;
        void main() { g = g + 1; }
    "};
    assert_eq!(
        listing(source),
        indoc! {"
            ; ---- subroutine @0 ----
                JSR L0
                RETN

            ; ---- subroutine @2 ----
            L0:
                RSADDI
                CONSTI 5
                CPDOWNSP -8, 4
                MOVSP -4
                SAVEBP
                JSR L1
                RESTOREBP
                MOVSP -4
                RETN

            ; ---- subroutine @11 ----
            L1:
                CPTOPBP -8, 4
                CONSTI 1
                ADDII
                CPDOWNBP -8, 4
                MOVSP -4
                RETN
        "}
    );
}

#[test]
fn test_compile_starting_conditional() {
    assert_eq!(
        listing("int StartingConditional() { return 1; }"),
        indoc! {"
            ; ---- subroutine @0 ----
                RSADDI
                JSR L0
                RETN

            ; ---- subroutine @3 ----
            L0:
                CONSTI 1
                CPDOWNSP -8, 4
                MOVSP -4
                RETN
        "}
    );
}

#[test]
fn test_compile_if_else() {
    let source = indoc! {"
        void main() {
            int a = 1;
            if (a) PrintInteger(1); else PrintInteger(2);
        }
    "};
    assert_eq!(
        listing(source),
        indoc! {"
            ; ---- subroutine @0 ----
                JSR L0
                RETN

            ; ---- subroutine @2 ----
            L0:
                RSADDI
                CONSTI 1
                CPDOWNSP -8, 4
                MOVSP -4
                CPTOPSP -4, 4
                JZ L1
                CONSTI 1
                ACTION 4, 1
                JMP L2
            L1:
                CONSTI 2
                ACTION 4, 1
            L2:
                MOVSP -4
                RETN
        "}
    );
}

#[test]
fn test_compile_switch() {
    let source = indoc! {"
        void main() {
            int n = 2;
            switch (n) {
                case 1: PrintInteger(1); break;
                default: PrintInteger(0);
            }
        }
    "};
    assert_eq!(
        listing(source),
        indoc! {"
            ; ---- subroutine @0 ----
                JSR L0
                RETN

            ; ---- subroutine @2 ----
            L0:
                RSADDI
                CONSTI 2
                CPDOWNSP -8, 4
                MOVSP -4
                CPTOPSP -4, 4
                CPTOPSP -4, 4
                CONSTI 1
                EQUALII
                JNZ L1
                JMP L2
            L1:
                CONSTI 1
                ACTION 4, 1
                JMP L3
            L2:
                CONSTI 0
                ACTION 4, 1
            L3:
                MOVSP -4
                MOVSP -4
                RETN
        "}
    );
}

#[test]
fn test_compile_deferred_action() {
    assert_eq!(
        listing("void main() { DelayCommand(1.0, PrintInteger(7)); }"),
        indoc! {"
            ; ---- subroutine @0 ----
                JSR L0
                RETN

            ; ---- subroutine @2 ----
            L0:
                STORE_STATE 0, 0
                JMP L1
                CONSTI 7
                ACTION 4, 1
                RETN
            L1:
                CONSTF 1.0
                ACTION 7, 2
                RETN
        "}
    );
}

#[test]
fn test_compile_short_circuit() {
    let program = compile("void main() { int a = 1; int b = a && 0; }").unwrap();
    let opcodes: Vec<Opcode> = program
        .instructions()
        .iter()
        .map(|instruction| instruction.opcode)
        .collect();
    let and = opcodes.iter().position(|op| *op == Opcode::LogAnd).unwrap();
    assert_eq!(
        &opcodes[and - 4..=and],
        &[
            Opcode::CpTopSp,
            Opcode::CpTopSp,
            Opcode::Jz,
            Opcode::Const,
            Opcode::LogAnd,
        ]
    );
    // The JZ skips to just past the combining instruction.
    let jz = &program.instructions()[and - 2];
    assert_eq!(program.jump_target_of(jz), Some(and + 1));
}

#[test]
fn test_unreachable_functions_are_dropped() {
    let source = indoc! {"
        void Unused() { PrintInteger(9); }
        void main() { }
    "};
    assert_eq!(
        listing(source),
        indoc! {"
            ; ---- subroutine @0 ----
                JSR L0
                RETN

            ; ---- subroutine @2 ----
            L0:
                RETN
        "}
    );
}

#[test]
fn test_main_preferred_over_starting_conditional() {
    let source = indoc! {"
        int StartingConditional() { return 0; }
        void main() { }
    "};
    let program = compile(source).unwrap();
    // No return slot is reserved and StartingConditional is dropped.
    assert_eq!(program.instructions()[0].opcode, Opcode::Jsr);
    assert_eq!(program.len(), 3);
}

#[test]
fn test_debug_build_records_origins() {
    let unit = parser::parse(
        "void main() {\n    PrintInteger(1);\n}\n",
        &mut MemoryLoader::new(),
    )
    .unwrap();
    let program = BytecodeCompiler::compile(&unit, Game::K1, true).unwrap();
    let call = program
        .instructions()
        .iter()
        .find(|instruction| instruction.opcode == Opcode::Action)
        .unwrap();
    assert_eq!(call.origin.map(|span| span.line), Some(2));

    let plain = compile("void main() { PrintInteger(1); }").unwrap();
    assert!(plain.instructions().iter().all(|i| i.origin.is_none()));
}

#[test]
fn test_compile_errors() {
    assert_eq!(
        error_kind("int f() { } void main() { }"),
        CompileErrorKind::MissingReturn("f".to_string())
    );
    assert_eq!(error_kind("void helper() { }"), CompileErrorKind::MissingEntryPoint);
    assert_eq!(
        error_kind("void main() { break; }"),
        CompileErrorKind::MisplacedJump("break")
    );
    assert_eq!(
        error_kind("void main() { switch (1) { case 1: int x; } }"),
        CompileErrorKind::DeclarationInSwitch
    );
    assert_eq!(
        error_kind("void main() { int x = 1; const int y = x; }"),
        CompileErrorKind::NotConstant("y".to_string())
    );
    assert!(matches!(
        error_kind("void main() { PrintInteger(); }"),
        CompileErrorKind::ArityMismatch { found: 0, .. }
    ));
    assert!(matches!(
        error_kind("void main() { int x = \"text\"; }"),
        CompileErrorKind::TypeMismatch { .. }
    ));
    assert_eq!(
        error_kind("void f(); void main() { f(); }"),
        CompileErrorKind::MissingDefinition("f".to_string())
    );
}

#[test]
fn test_errors_name_the_include_file() {
    let mut loader = MemoryLoader::new().with("lib", "void helper() { int x = \"s\"; }");
    let unit = parser::parse(
        "#include \"lib\"\nvoid main() { helper(); }",
        &mut loader,
    )
    .unwrap();
    let err = BytecodeCompiler::compile(&unit, Game::K1, false).unwrap_err();
    assert_eq!(err.file, "lib");
}
