//! Human-readable listings of a [`Program`].
//!
//! The plain listing shows one instruction per line, prefixed with its file
//! offset (header included), with jump operands printed as absolute file
//! offsets. The pretty listing replaces offsets with labels, separates
//! subroutines and, when debug origins are present, annotates source lines.

use core::fmt::Write;

use hashbrown::{HashMap, HashSet};

use crate::container::HEADER_LEN;
use crate::vm::{Opcode, Operand, Program};

pub fn disassemble(program: &Program, pretty: bool) -> String {
    if pretty {
        pretty_listing(program)
    } else {
        plain_listing(program)
    }
}

fn plain_listing(program: &Program) -> String {
    let offsets = program.byte_offsets();
    let mut out = String::new();
    for (index, instruction) in program.instructions().iter().enumerate() {
        let at = offsets[index] + HEADER_LEN;
        let _ = match (&instruction.operand, program.jump_target_of(instruction)) {
            (Operand::Jump(_), Some(target)) => writeln!(
                out,
                "{:08X}  {} {:08X}",
                at,
                instruction.mnemonic(),
                offsets[target.min(offsets.len() - 1)] + HEADER_LEN
            ),
            _ => writeln!(out, "{:08X}  {}", at, instruction),
        };
    }
    out
}

fn pretty_listing(program: &Program) -> String {
    let targets = program.jump_targets();
    let names: HashMap<usize, usize> = targets
        .iter()
        .enumerate()
        .map(|(n, &target)| (target, n))
        .collect();
    let mut subroutines: HashSet<usize> = program
        .instructions()
        .iter()
        .filter(|instruction| instruction.opcode == Opcode::Jsr)
        .filter_map(|instruction| program.jump_target_of(instruction))
        .collect();
    subroutines.insert(0);

    let mut out = String::new();
    let mut last_line = None;
    for (index, instruction) in program.instructions().iter().enumerate() {
        if subroutines.contains(&index) {
            if index > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "; ---- subroutine @{} ----", index);
        }
        if let Some(n) = names.get(&index) {
            let _ = writeln!(out, "L{}:", n);
        }

        let text = match program.jump_target_of(instruction) {
            Some(target) => match names.get(&target) {
                Some(n) => format!("{} L{}", instruction.mnemonic(), n),
                None => instruction.to_string(),
            },
            None => instruction.to_string(),
        };
        match instruction.origin {
            Some(span) if last_line != Some(span.line) => {
                last_line = Some(span.line);
                let _ = writeln!(out, "    {:<32}; line {}", text, span.line);
            }
            _ => {
                let _ = writeln!(out, "    {}", text);
            }
        }
    }
    if let Some(n) = names.get(&program.len()) {
        let _ = writeln!(out, "L{}:", n);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{FileId, Span};
    use crate::vm::Instruction;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn program() -> Program {
        let mut p = Program::new();
        let sub = p.new_label();
        let end = p.new_label();
        p.push(Instruction::jump(Opcode::Jsr, sub));
        p.push(Instruction::bare(Opcode::Retn));
        p.bind(sub);
        p.push(Instruction::const_int(1));
        p.push(Instruction::jump(Opcode::Jz, end));
        p.push(Instruction::action(1, 1));
        p.bind(end);
        p
    }

    #[test]
    fn test_plain_listing_uses_file_offsets() {
        assert_eq!(
            disassemble(&program(), false),
            indoc! {"
                0000000D  JSR 00000015
                00000013  RETN
                00000015  CONSTI 1
                0000001B  JZ 00000026
                00000021  ACTION 1, 1
            "}
        );
    }

    #[test]
    fn test_pretty_listing_labels_and_subroutines() {
        assert_eq!(
            disassemble(&program(), true),
            indoc! {"
                ; ---- subroutine @0 ----
                    JSR L0
                    RETN

                ; ---- subroutine @2 ----
                L0:
                    CONSTI 1
                    JZ L1
                    ACTION 1, 1
                L1:
            "}
        );
    }

    #[test]
    fn test_pretty_listing_annotates_lines() {
        let span = |line| Span::new(FileId(0), 0, 1, line, 1);
        let mut p = Program::new();
        p.push(Instruction::const_int(1).with_origin(Some(span(3))));
        p.push(Instruction::move_sp(-4).with_origin(Some(span(3))));
        p.push(Instruction::bare(Opcode::Retn).with_origin(Some(span(4))));
        let listing = disassemble(&p, true);
        assert!(listing.contains("CONSTI 1"));
        assert_eq!(listing.matches("; line 3").count(), 1);
        assert_eq!(listing.matches("; line 4").count(), 1);
    }
}
