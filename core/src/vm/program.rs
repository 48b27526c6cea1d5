use core::fmt;

use crate::vm::{Instruction, Label, Operand};

/// An ordered instruction sequence plus its symbolic label table.
///
/// Labels map to instruction indices. A label may point one past the last
/// instruction, which is how a jump to the end of the stream is expressed.
/// Byte offsets only exist once the program is written to a container.
#[derive(Clone, Default)]
pub struct Program {
    instructions: Vec<Instruction>,
    labels: Vec<Option<usize>>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(instructions: Vec<Instruction>, labels: Vec<Option<usize>>) -> Self {
        Self {
            instructions,
            labels,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instructions_mut(&mut self) -> &mut [Instruction] {
        &mut self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Appends an instruction and returns its index.
    pub fn push(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    /// Allocates a label that is not bound to any position yet.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Binds `label` to the position of the next pushed instruction.
    pub fn bind(&mut self, label: Label) {
        let here = self.instructions.len();
        self.bind_at(label, here);
    }

    pub fn bind_at(&mut self, label: Label, index: usize) {
        if let Some(slot) = self.labels.get_mut(label.0 as usize) {
            *slot = Some(index);
        }
    }

    /// Returns a label bound to `index`, reusing an existing one.
    pub fn label_at(&mut self, index: usize) -> Label {
        if let Some(existing) = self.labels.iter().position(|slot| *slot == Some(index)) {
            return Label(existing as u32);
        }
        let label = self.new_label();
        self.bind_at(label, index);
        label
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn target(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    /// Instruction index a jump instruction transfers control to.
    pub fn jump_target_of(&self, instruction: &Instruction) -> Option<usize> {
        instruction.jump_target().and_then(|label| self.target(label))
    }

    /// Byte offset of every instruction relative to the first one, plus the
    /// offset just past the end as the final element.
    pub fn byte_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.instructions.len() + 1);
        let mut offset = 0;
        for instruction in &self.instructions {
            offsets.push(offset);
            offset += instruction.encoded_len();
        }
        offsets.push(offset);
        offsets
    }

    /// First jump whose label is unbound or points outside the stream.
    pub fn dangling_jump(&self) -> Option<usize> {
        self.instructions.iter().position(|instruction| {
            instruction.jump_target().is_some()
                && self
                    .jump_target_of(instruction)
                    .is_none_or(|target| target > self.instructions.len())
        })
    }

    /// Keeps the instructions whose `keep` flag is set. Labels that pointed at
    /// a removed instruction move to the next surviving one.
    pub fn retain(&mut self, keep: &[bool]) {
        let mut new_index = Vec::with_capacity(self.instructions.len() + 1);
        let mut next = 0;
        for &kept in keep.iter().take(self.instructions.len()) {
            new_index.push(next);
            if kept {
                next += 1;
            }
        }
        new_index.push(next);

        for slot in self.labels.iter_mut() {
            if let Some(target) = slot {
                *target = new_index[(*target).min(new_index.len() - 1)];
            }
        }

        let old = core::mem::take(&mut self.instructions);
        self.instructions = old
            .into_iter()
            .zip(keep.iter().chain(core::iter::repeat(&true)))
            .filter_map(|(instruction, &kept)| kept.then_some(instruction))
            .collect();
    }

    /// Points the jump at `index` to instruction `to`.
    pub fn retarget(&mut self, index: usize, to: usize) {
        let label = self.label_at(to);
        if let Some(instruction) = self.instructions.get_mut(index) {
            if let Operand::Jump(target) = &mut instruction.operand {
                *target = label;
            }
        }
    }

    /// Indices targeted by at least one jump, ascending.
    pub fn jump_targets(&self) -> Vec<usize> {
        let mut targets: Vec<usize> = self
            .instructions
            .iter()
            .filter_map(|instruction| self.jump_target_of(instruction))
            .collect();
        targets.sort_unstable();
        targets.dedup();
        targets
    }
}

/// Two programs are equal when their instructions are, with jump labels
/// compared by the instruction index they resolve to.
impl PartialEq for Program {
    fn eq(&self, other: &Self) -> bool {
        self.instructions.len() == other.instructions.len()
            && self
                .instructions
                .iter()
                .zip(&other.instructions)
                .all(|(a, b)| match (a.jump_target(), b.jump_target()) {
                    (Some(_), Some(_)) => {
                        a.opcode == b.opcode
                            && a.qualifier == b.qualifier
                            && self.jump_target_of(a) == other.jump_target_of(b)
                    }
                    _ => a == b,
                })
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::vm::disasm::disassemble(self, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Opcode;
    use pretty_assertions::assert_eq;

    fn looped() -> Program {
        let mut program = Program::new();
        let top = program.new_label();
        program.bind(top);
        program.push(Instruction::bare(Opcode::Nop));
        program.push(Instruction::const_int(1));
        program.push(Instruction::jump(Opcode::Jnz, top));
        program.push(Instruction::bare(Opcode::Retn));
        program
    }

    #[test]
    fn test_equality_resolves_labels() {
        let a = looped();
        let mut b = Program::new();
        let unused = b.new_label();
        b.bind_at(unused, 3);
        let top = b.new_label();
        b.bind(top);
        b.push(Instruction::bare(Opcode::Nop));
        b.push(Instruction::const_int(1));
        b.push(Instruction::jump(Opcode::Jnz, top));
        b.push(Instruction::bare(Opcode::Retn));
        assert_eq!(a, b);
    }

    #[test]
    fn test_retain_moves_labels_forward() {
        let mut program = looped();
        program.retain(&[false, true, true, true]);
        assert_eq!(program.len(), 3);
        assert_eq!(program.jump_target_of(&program.instructions()[1]), Some(0));
    }

    #[test]
    fn test_byte_offsets() {
        let program = looped();
        assert_eq!(program.byte_offsets(), vec![0, 2, 8, 14, 16]);
    }

    #[test]
    fn test_dangling_jump() {
        let mut program = Program::new();
        let label = program.new_label();
        program.push(Instruction::jump(Opcode::Jmp, label));
        assert_eq!(program.dangling_jump(), Some(0));
        program.bind(label);
        assert_eq!(program.dangling_jump(), None);
    }
}
