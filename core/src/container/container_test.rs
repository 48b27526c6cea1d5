use pretty_assertions::assert_eq;

use crate::container::{
    DecodeError, DecodeErrorKind, EncodeError, HEADER_LEN, read_container, write_container,
};
use crate::vm::{Instruction, Label, Opcode, Operand, Program, TypeQualifier};

fn sample() -> Program {
    let mut p = Program::new();
    let sub = p.new_label();
    let end = p.new_label();
    p.push(Instruction::jump(Opcode::Jsr, sub));
    p.push(Instruction::bare(Opcode::Retn));
    p.bind(sub);
    p.push(Instruction::const_string("caf\u{e9}"));
    p.push(Instruction::const_float(1.5));
    p.push(Instruction::const_int(-7));
    p.push(Instruction::jump(Opcode::Jz, end));
    p.push(Instruction::action(1, 1));
    p.push(Instruction::copy(Opcode::CpDownSp, -8, 4));
    p.push(Instruction::new(
        Opcode::Destruct,
        TypeQualifier::STACK,
        Operand::Destruct {
            size: 12,
            offset: 4,
            keep: 4,
        },
    ));
    p.push(Instruction::new(
        Opcode::Equal,
        TypeQualifier::STRUCT_STRUCT,
        Operand::Size(12),
    ));
    p.push(Instruction::store_state(8, 16));
    p.push(Instruction::move_sp(-4));
    p.bind(end);
    p.push(Instruction::bare(Opcode::Retn));
    p
}

#[test]
fn test_header_and_size_record() {
    let bytes = write_container(&sample()).unwrap();
    assert_eq!(&bytes[..8], b"NCS V1.0");
    assert_eq!(bytes[8], 0x42);
    let declared = u32::from_be_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]);
    assert_eq!(declared as usize, bytes.len());
}

#[test]
fn test_round_trip_is_byte_identical() {
    let program = sample();
    let bytes = write_container(&program).unwrap();
    let decoded = read_container(&bytes).unwrap();
    assert_eq!(decoded, program);
    assert_eq!(write_container(&decoded).unwrap(), bytes);
}

#[test]
fn test_exact_encoding() {
    let mut p = Program::new();
    let top = p.new_label();
    p.bind(top);
    p.push(Instruction::const_int(3));
    p.push(Instruction::jump(Opcode::Jmp, top));
    let bytes = write_container(&p).unwrap();
    assert_eq!(
        &bytes[HEADER_LEN..],
        &[
            0x04, 0x03, 0x00, 0x00, 0x00, 0x03, // CONSTI 3
            0x1D, 0x00, 0xFF, 0xFF, 0xFF, 0xFA, // JMP -6
        ]
    );
}

#[test]
fn test_labels_numbered_by_target() {
    let mut p = Program::new();
    let late = p.new_label();
    let early = p.new_label();
    p.bind(early);
    p.push(Instruction::jump(Opcode::Jmp, late));
    p.push(Instruction::jump(Opcode::Jmp, early));
    p.bind(late);
    p.push(Instruction::bare(Opcode::Retn));

    let decoded = read_container(&write_container(&p).unwrap()).unwrap();
    assert_eq!(decoded.instructions()[0].operand, Operand::Jump(Label(1)));
    assert_eq!(decoded.instructions()[1].operand, Operand::Jump(Label(0)));
    assert_eq!(decoded.target(Label(0)), Some(0));
    assert_eq!(decoded.target(Label(1)), Some(2));
}

#[test]
fn test_jump_to_end_of_stream() {
    let mut p = Program::new();
    let end = p.new_label();
    p.push(Instruction::jump(Opcode::Jmp, end));
    p.bind(end);
    let decoded = read_container(&write_container(&p).unwrap()).unwrap();
    assert_eq!(decoded.jump_target_of(&decoded.instructions()[0]), Some(1));
}

#[test]
fn test_decode_errors_name_offsets() {
    let bytes = write_container(&sample()).unwrap();

    let mut bad = bytes.clone();
    bad[0] = b'X';
    assert_eq!(
        read_container(&bad),
        Err(DecodeError::new(0, DecodeErrorKind::BadMagic))
    );

    let mut bad = bytes.clone();
    bad[5] = b'2';
    assert_eq!(
        read_container(&bad).unwrap_err().kind,
        DecodeErrorKind::BadVersion
    );

    let truncated = &bytes[..bytes.len() - 1];
    assert!(matches!(
        read_container(truncated).unwrap_err().kind,
        DecodeErrorKind::SizeMismatch { .. }
    ));

    let mut bad = bytes.clone();
    bad[HEADER_LEN] = 0x7F;
    assert_eq!(
        read_container(&bad),
        Err(DecodeError::new(HEADER_LEN, DecodeErrorKind::UnknownOpcode(0x7F)))
    );
}

#[test]
fn test_truncated_operand() {
    let mut bytes = write_container(&Program::new()).unwrap();
    bytes.extend_from_slice(&[0x04, 0x03, 0x00]);
    let len = bytes.len() as u32;
    bytes[9..13].copy_from_slice(&len.to_be_bytes());
    assert_eq!(
        read_container(&bytes),
        Err(DecodeError::new(HEADER_LEN + 2, DecodeErrorKind::Truncated))
    );
}

#[test]
fn test_invalid_qualifier_and_jump() {
    let mut bytes = write_container(&Program::new()).unwrap();
    // ADD with a string/int qualifier.
    bytes.extend_from_slice(&[0x14, 0x05]);
    let len = bytes.len() as u32;
    bytes[9..13].copy_from_slice(&len.to_be_bytes());
    assert!(matches!(
        read_container(&bytes).unwrap_err().kind,
        DecodeErrorKind::InvalidQualifier { opcode: "ADD", qualifier: 0x05 }
    ));

    let mut bytes = write_container(&Program::new()).unwrap();
    // JMP +3 lands inside its own operand.
    bytes.extend_from_slice(&[0x1D, 0x00, 0x00, 0x00, 0x00, 0x03]);
    let len = bytes.len() as u32;
    bytes[9..13].copy_from_slice(&len.to_be_bytes());
    assert_eq!(
        read_container(&bytes),
        Err(DecodeError::new(HEADER_LEN, DecodeErrorKind::BadJumpTarget(3)))
    );
}

#[test]
fn test_encode_errors() {
    let mut p = Program::new();
    let nowhere = p.new_label();
    p.push(Instruction::jump(Opcode::Jmp, nowhere));
    assert_eq!(
        write_container(&p),
        Err(EncodeError::UnboundLabel {
            index: 0,
            label: nowhere,
        })
    );

    let mut p = Program::new();
    p.push(Instruction::const_string("\u{263a}"));
    assert_eq!(
        write_container(&p),
        Err(EncodeError::NonLatin1 {
            index: 0,
            ch: '\u{263a}',
        })
    );
}
