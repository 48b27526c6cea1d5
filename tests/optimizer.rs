mod cases;

use cases::{CORPUS, compile_ok, render_call};
use nwscript::{ExecutionOptions, default_pipeline, execute, optimize};
use pretty_assertions::assert_eq;

#[test]
fn test_optimizer_preserves_behavior() {
    for script in CORPUS.iter() {
        let program = compile_ok(script.source);
        let optimized = optimize(program.clone(), &default_pipeline());
        assert!(optimized.len() <= program.len(), "{}", script.name);

        let options = ExecutionOptions::default();
        let (before, after) = (execute(&program, &options), execute(&optimized, &options));
        assert!(after.is_halted(), "{}: {:?}", script.name, after.outcome);
        let rendered: Vec<String> = after.snapshots.iter().map(render_call).collect();
        assert_eq!(rendered, script.expected, "{}", script.name);
        assert_eq!(after.outcome, before.outcome, "{}", script.name);
        assert_eq!(after.snapshots, before.snapshots, "{}", script.name);
        assert_eq!(after.result, before.result, "{}", script.name);
        assert!(after.cycles <= before.cycles, "{}", script.name);
    }
}

#[test]
fn test_optimizer_is_idempotent() {
    for script in CORPUS.iter() {
        let once = optimize(compile_ok(script.source), &default_pipeline());
        let twice = optimize(once.clone(), &default_pipeline());
        assert_eq!(twice, once, "{}", script.name);
    }
}

#[test]
fn test_optimized_program_survives_container() {
    for script in CORPUS.iter() {
        let optimized = optimize(compile_ok(script.source), &default_pipeline());
        let bytes = nwscript::write_container(&optimized).unwrap();
        assert_eq!(nwscript::read_container(&bytes).unwrap(), optimized, "{}", script.name);
    }
}
