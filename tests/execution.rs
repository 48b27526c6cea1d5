mod cases;

use cases::{CORPUS, calls, compile_ok, render_call};
use indoc::indoc;
use nwscript::{
    Argument, CompileOptions, ExecutionOptions, FaultKind, Game, MemoryLoader, Outcome, Value,
    compile_with_loader, execute,
};
use pretty_assertions::assert_eq;

fn ints(program: &nwscript::Program) -> Vec<i32> {
    calls(program)
        .into_iter()
        .flat_map(|call| call.args)
        .filter_map(|arg| match arg {
            Argument::Scalar(Value::Int(v)) => Some(v),
            _ => None,
        })
        .collect()
}

#[test]
fn test_countdown_records_three_calls() {
    let program = compile_ok(indoc! {"
        void main() {
            int value = 3;
            while (value > 0) {
                if (value > 0) {
                    PrintInteger(value);
                    value -= 1;
                }
            }
        }
    "});
    let snapshots = calls(&program);
    assert_eq!(snapshots.len(), 3);
    assert!(snapshots.iter().all(|call| call.name == "PrintInteger"));
    assert_eq!(ints(&program), vec![3, 2, 1]);
}

#[test]
fn test_corpus_scripts_make_expected_calls() {
    for script in CORPUS.iter() {
        let program = compile_ok(script.source);
        let rendered: Vec<String> = calls(&program).iter().map(render_call).collect();
        assert_eq!(rendered, script.expected, "{}", script.name);
    }
}

#[test]
fn test_starting_conditional_result() {
    let program = compile_ok(indoc! {"
        int gLimit = 4;

        int StartingConditional() {
            return gLimit * 2 == 8;
        }
    "});
    let result = execute(&program, &ExecutionOptions::default());
    assert!(result.is_halted());
    assert_eq!(result.result, Some(Value::Int(1)));
}

#[test]
fn test_switch_fall_through() {
    let program = compile_ok(indoc! {"
        void main() {
            int i;
            for (i = 0; i < 4; i++) {
                switch (i) {
                    case 0:
                        PrintInteger(100);
                    case 1:
                        PrintInteger(i);
                        break;
                    default:
                        PrintInteger(-i);
                }
            }
        }
    "});
    assert_eq!(ints(&program), vec![100, 0, 1, -2, -3]);
}

#[test]
fn test_include_through_loader() {
    let mut loader = MemoryLoader::new().with(
        "util",
        "int Twice(int n) { return n * 2; }",
    );
    let program = compile_with_loader(
        "#include \"util\"\nvoid main() { PrintInteger(Twice(21)); }",
        &CompileOptions::default(),
        &mut loader,
    )
    .unwrap();
    assert_eq!(ints(&program), vec![42]);
}

#[test]
fn test_division_by_zero_faults_with_partial_log() {
    let program = compile_ok(indoc! {"
        void main() {
            int zero = 0;
            PrintInteger(1);
            PrintInteger(10 / zero);
        }
    "});
    let result = execute(&program, &ExecutionOptions::default());
    let Outcome::Faulted(fault) = &result.outcome else {
        panic!("expected a fault, got {:?}", result.outcome);
    };
    assert_eq!(fault.kind, FaultKind::DivisionByZero);
    assert_eq!(result.snapshots.len(), 1);
}

#[test]
fn test_cycle_budget_bounds_infinite_loops() {
    let program = compile_ok("void main() { while (1) { } }");
    let options = ExecutionOptions {
        cycle_budget: 500,
        ..ExecutionOptions::default()
    };
    let result = execute(&program, &options);
    assert!(matches!(
        &result.outcome,
        Outcome::Faulted(fault) if fault.kind == FaultKind::BudgetExceeded(500)
    ));
}

#[test]
fn test_dialects_resolve_their_own_routines() {
    let source = "void main() { PrintInteger(GetScriptParameter(1)); }";
    assert!(nwscript::compile(source, &CompileOptions::default()).is_err());
    let options = CompileOptions {
        dialect: Game::Tsl,
        ..CompileOptions::default()
    };
    let program = nwscript::compile(source, &options).unwrap();
    let result = execute(
        &program,
        &ExecutionOptions {
            dialect: Game::Tsl,
            ..ExecutionOptions::default()
        },
    );
    assert!(result.is_halted());
    assert_eq!(result.snapshots[0].name, "GetScriptParameter");
}
