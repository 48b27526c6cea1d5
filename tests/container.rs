mod cases;

use cases::{CORPUS, compile_ok};
use nwscript::{Error, Opcode, read_container, write_container};
use pretty_assertions::assert_eq;

#[test]
fn test_corpus_round_trips_through_container() {
    for script in CORPUS.iter() {
        let program = compile_ok(script.source);
        let bytes = write_container(&program).unwrap();
        let decoded = read_container(&bytes).unwrap();
        assert_eq!(decoded, program, "{}", script.name);
        assert_eq!(write_container(&decoded).unwrap(), bytes, "{}", script.name);
    }
}

#[test]
fn test_header_records_file_size() {
    let program = compile_ok("void main() { PrintInteger(1); }");
    let bytes = write_container(&program).unwrap();
    assert_eq!(&bytes[..8], b"NCS V1.0");
    assert_eq!(bytes[8], 0x42);
    let size = u32::from_be_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]);
    assert_eq!(size as usize, bytes.len());
    // JSR +8 is the first instruction.
    assert_eq!(&bytes[13..19], &[0x1E, 0x00, 0x00, 0x00, 0x00, 0x08]);
}

#[test]
fn test_truncated_container_is_rejected() {
    let program = compile_ok("void main() { PrintString(\"abc\"); }");
    let mut bytes = write_container(&program).unwrap();
    bytes.truncate(bytes.len() - 1);
    let len = bytes.len() as u32;
    bytes[9..13].copy_from_slice(&len.to_be_bytes());
    let err = read_container(&bytes).unwrap_err();
    assert!(matches!(err, Error::Decode(_)), "{:?}", err);
    assert_eq!(err.diagnostics()[0].code.as_deref(), Some("D003"));
}

#[test]
fn test_jumps_are_resolved_to_instructions() {
    let program = compile_ok("void main() { int i = 0; while (i < 2) { i++; } PrintInteger(i); }");
    let decoded = read_container(&write_container(&program).unwrap()).unwrap();
    for instruction in decoded.instructions() {
        if matches!(instruction.opcode, Opcode::Jmp | Opcode::Jz | Opcode::Jnz | Opcode::Jsr) {
            assert!(decoded.jump_target_of(instruction).is_some());
        }
    }
}
