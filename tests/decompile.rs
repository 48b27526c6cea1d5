mod cases;

use cases::{CORPUS, calls, compile_ok};
use nwscript::{Decompiler, Game, read_container, write_container};
use pretty_assertions::assert_eq;

#[test]
fn test_decompiled_corpus_recompiles_to_same_calls() {
    for script in CORPUS.iter() {
        let program = compile_ok(script.source);
        let decompiler = Decompiler::new(&program, Game::K1);
        assert!(
            decompiler.ambiguities().is_empty(),
            "{}: {:?}\n{}",
            script.name,
            decompiler.ambiguities(),
            decompiler.source()
        );

        let rebuilt = compile_ok(decompiler.source());
        assert_eq!(calls(&rebuilt), calls(&program), "{}", script.name);
    }
}

#[test]
fn test_decompiling_a_decoded_container() {
    let script = &CORPUS[0];
    let program = compile_ok(script.source);
    let decoded = read_container(&write_container(&program).unwrap()).unwrap();
    assert_eq!(
        nwscript::decompile(&decoded, Game::K1),
        nwscript::decompile(&program, Game::K1)
    );
}
