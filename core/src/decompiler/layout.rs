//! Subroutine boundaries and stack-depth analysis.
//!
//! Every subroutine starts at instruction 0 or at a `JSR` target and runs up
//! to the next start. Walking each one from its entry gives the stack depth
//! (in bytes, relative to the depth at entry) before every reachable
//! instruction, and from the depths at `RETN` and at return-slot writes the
//! number of parameter and return bytes.

use core::ops::Range;

use hashbrown::HashMap;

use crate::compiler::operators::operand_types;
use crate::decompiler::AmbiguityKind;
use crate::types::{DataType, Dialect};
use crate::vm::{Instruction, Opcode, Operand, Program};

/// The subroutine ranges of a program, in address order.
#[derive(Debug, Clone)]
pub(crate) struct Partition {
    pub ranges: Vec<Range<usize>>,
    by_start: HashMap<usize, usize>,
}

impl Partition {
    pub fn new(program: &Program) -> Self {
        let mut starts: Vec<usize> = program
            .instructions()
            .iter()
            .filter(|instruction| instruction.opcode == Opcode::Jsr)
            .filter_map(|instruction| program.jump_target_of(instruction))
            .filter(|target| *target < program.len())
            .collect();
        starts.push(0);
        starts.sort_unstable();
        starts.dedup();

        let ranges: Vec<Range<usize>> = starts
            .iter()
            .enumerate()
            .map(|(n, &start)| start..starts.get(n + 1).copied().unwrap_or(program.len()))
            .collect();
        let by_start = starts.iter().enumerate().map(|(n, &s)| (s, n)).collect();
        Self { ranges, by_start }
    }

    /// The subroutine starting at `start`.
    pub fn index_of(&self, start: usize) -> Option<usize> {
        self.by_start.get(&start).copied()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }
}

/// Stack shape of one subroutine.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Layout {
    /// Depth before each instruction of the range; `None` where unreachable.
    pub depth: Vec<Option<i32>>,
    /// Bytes of arguments the caller pushed.
    pub params: usize,
    /// Bytes of return value the caller reserved below the arguments.
    pub ret: usize,
}

impl Layout {
    pub fn depth_at(&self, start: usize, index: usize) -> Option<i32> {
        self.depth.get(index.checked_sub(start)?).copied().flatten()
    }
}

/// What a caller needs to know to call a subroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interface {
    pub params: usize,
    pub ret: usize,
}

/// Layouts of every subroutine, plus the calling interface of each one
/// whose walk reached a `RETN` even if the walk failed later.
#[derive(Debug, Clone)]
pub(crate) struct Layouts {
    pub results: Vec<Result<Layout, AmbiguityKind>>,
    pub interfaces: Vec<Option<Interface>>,
}

/// Lays out every subroutine of `partition`.
pub(crate) fn analyze(program: &Program, dialect: &Dialect, partition: &Partition) -> Layouts {
    let mut analyzer = Analyzer {
        program,
        dialect,
        partition,
        results: vec![None; partition.len()],
        interfaces: vec![None; partition.len()],
        busy: vec![false; partition.len()],
    };
    for sub in 0..partition.len() {
        let _ = analyzer.layout(sub);
    }
    Layouts {
        results: analyzer
            .results
            .into_iter()
            .map(|result| result.unwrap_or(Err(AmbiguityKind::Recursion)))
            .collect(),
        interfaces: analyzer.interfaces,
    }
}

struct Analyzer<'a> {
    program: &'a Program,
    dialect: &'a Dialect,
    partition: &'a Partition,
    results: Vec<Option<Result<Layout, AmbiguityKind>>>,
    interfaces: Vec<Option<Interface>>,
    busy: Vec<bool>,
}

/// Frame facts collected while walking one subroutine.
#[derive(Default)]
struct Walk {
    /// Depth at the first `RETN`.
    returns: Option<i32>,
    /// Target depth and size of every `CPDOWNSP`.
    copies: Vec<(i32, u16)>,
}

impl Walk {
    fn interface(&self) -> Option<Interface> {
        let params = self.returns.unwrap_or(0).checked_neg()?;
        if params < 0 || params % 4 != 0 {
            return None;
        }
        let ret = self
            .copies
            .iter()
            .filter_map(|(position, _)| position.checked_neg()?.checked_sub(params))
            .filter(|ret| *ret > 0)
            .max()
            .unwrap_or(0);
        Some(Interface {
            params: params as usize,
            ret: ret as usize,
        })
    }
}

impl Analyzer<'_> {
    fn layout(&mut self, sub: usize) -> Result<&Layout, AmbiguityKind> {
        if self.results[sub].is_none() {
            if self.busy[sub] {
                return Err(AmbiguityKind::Recursion);
            }
            self.busy[sub] = true;
            let result = self.compute(sub);
            self.busy[sub] = false;
            self.results[sub] = Some(result);
        }
        match &self.results[sub] {
            Some(Ok(layout)) => Ok(layout),
            Some(Err(kind)) => Err(kind.clone()),
            None => Err(AmbiguityKind::Recursion),
        }
    }

    /// Parameter bytes of `callee`. A callee that cannot be laid out still
    /// has a usable interface once its walk has seen a `RETN`.
    fn params_of(&mut self, callee: usize) -> Result<usize, AmbiguityKind> {
        match self.layout(callee).map(|layout| layout.params) {
            Ok(params) => Ok(params),
            Err(kind) => self.interfaces[callee].map(|i| i.params).ok_or(kind),
        }
    }

    fn compute(&mut self, sub: usize) -> Result<Layout, AmbiguityKind> {
        let start = self.partition.ranges[sub].start;
        let mut walk = Walk::default();
        let depth = self.walk(sub, &mut walk);
        let interface = match depth {
            Err(_) if walk.returns.is_none() => None,
            _ => walk.interface(),
        };
        self.interfaces[sub] = interface;
        let depth = depth?;
        let Interface { params, ret } = interface.ok_or(AmbiguityKind::StackShape(start))?;
        Ok(Layout { depth, params, ret })
    }

    /// Depth before every reachable instruction of `sub`.
    fn walk(&mut self, sub: usize, walk: &mut Walk) -> Result<Vec<Option<i32>>, AmbiguityKind> {
        let program = self.program;
        let range = self.partition.ranges[sub].clone();
        let mut depth = vec![None; range.len()];

        let mut pending = vec![(range.start, 0i32, false)];
        while let Some((index, d, in_action)) = pending.pop() {
            if !range.contains(&index) {
                return Err(AmbiguityKind::EscapingJump(index));
            }
            match depth[index - range.start] {
                Some(seen) if seen == d => continue,
                Some(_) => return Err(AmbiguityKind::InconsistentDepth(index)),
                None => depth[index - range.start] = Some(d),
            }

            let instruction = &program.instructions()[index];
            let after = match instruction.opcode {
                Opcode::Jsr => {
                    let callee = program
                        .jump_target_of(instruction)
                        .and_then(|target| self.partition.index_of(target))
                        .ok_or(AmbiguityKind::EscapingJump(index))?;
                    d - self.params_of(callee)? as i32
                }
                _ => d
                    .checked_add(self.delta(instruction)?)
                    .ok_or(AmbiguityKind::StackShape(index))?,
            };

            match (instruction.opcode, &instruction.operand) {
                (Opcode::CpDownSp, Operand::Stack { offset, size }) if !in_action => {
                    walk.copies.push((d.saturating_add(*offset), *size));
                }
                (Opcode::Retn, _) if !in_action => match walk.returns {
                    None => walk.returns = Some(d),
                    Some(seen) if seen != d => {
                        return Err(AmbiguityKind::InconsistentDepth(index));
                    }
                    Some(_) => {}
                },
                _ => {}
            }

            if instruction.opcode.falls_through() {
                pending.push((index + 1, after, in_action));
            }
            if matches!(instruction.opcode, Opcode::Jmp | Opcode::Jz | Opcode::Jnz) {
                let target = program
                    .jump_target_of(instruction)
                    .ok_or(AmbiguityKind::EscapingJump(index))?;
                pending.push((target, after, in_action));
            }
            if instruction.opcode == Opcode::StoreState {
                pending.push((index + 2, d, true));
            }
        }
        Ok(depth)
    }

    /// Stack effect of every instruction except `JSR`.
    fn delta(&self, instruction: &Instruction) -> Result<i32, AmbiguityKind> {
        use Opcode::*;
        let delta = match (instruction.opcode, &instruction.operand) {
            (CpTopSp | CpTopBp, Operand::Stack { size, .. }) => *size as i32,
            (RsAdd | Const | SaveBp, _) => 4,
            (RestoreBp, _) => -4,
            (Action, Operand::Action { routine, argc }) => {
                let signature = self
                    .dialect
                    .routine(*routine)
                    .ok_or(AmbiguityKind::UnknownRoutine(*routine))?;
                let pushed: usize = signature
                    .params
                    .iter()
                    .take(*argc as usize)
                    .map(|param| param.ty.size())
                    .sum();
                signature.ret.size() as i32 - pushed as i32
            }
            (Equal | NEqual, Operand::Size(size)) => 4 - 2 * *size as i32,
            (
                LogAnd | LogOr | IncOr | ExcOr | BoolAnd | Equal | NEqual | Geq | Gt | Lt | Leq
                | ShLeft | ShRight | UShRight | Mod,
                _,
            ) => -4,
            (Add | Sub | Mul | Div, _) => {
                let (left, right) = operand_types(instruction.qualifier)
                    .ok_or(AmbiguityKind::StackShape(0))?;
                let result = if left == DataType::Vector || right == DataType::Vector {
                    12
                } else {
                    4
                };
                result - left.size() as i32 - right.size() as i32
            }
            (MovSp, Operand::Int(delta)) => *delta,
            (Jz | Jnz, _) => -4,
            (Destruct, Operand::Destruct { size, keep, .. }) => *keep as i32 - *size as i32,
            _ => 0,
        };
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Game;
    use crate::vm::Instruction;
    use pretty_assertions::assert_eq;

    /// `int Add(int a, int b) { return a + b; }` called from `main`.
    fn two_subroutines() -> Program {
        let mut p = Program::new();
        let main = p.new_label();
        let add = p.new_label();
        p.push(Instruction::jump(Opcode::Jsr, main));
        p.push(Instruction::bare(Opcode::Retn));
        p.bind(main);
        p.push(Instruction::typed(Opcode::RsAdd, crate::vm::TypeQualifier::INT));
        p.push(Instruction::const_int(1));
        p.push(Instruction::const_int(2));
        p.push(Instruction::jump(Opcode::Jsr, add));
        p.push(Instruction::action(4, 1));
        p.push(Instruction::bare(Opcode::Retn));
        p.bind(add);
        p.push(Instruction::copy(Opcode::CpTopSp, -8, 4));
        p.push(Instruction::copy(Opcode::CpTopSp, -8, 4));
        p.push(Instruction::typed(Opcode::Add, crate::vm::TypeQualifier::INT_INT));
        p.push(Instruction::copy(Opcode::CpDownSp, -16, 4));
        p.push(Instruction::move_sp(-12));
        p.push(Instruction::bare(Opcode::Retn));
        p
    }

    #[test]
    fn test_partition_ranges() {
        let partition = Partition::new(&two_subroutines());
        assert_eq!(partition.ranges, vec![0..2, 2..8, 8..14]);
        assert_eq!(partition.index_of(8), Some(2));
        assert_eq!(partition.index_of(3), None);
    }

    #[test]
    fn test_parameter_and_return_sizes() {
        let program = two_subroutines();
        let partition = Partition::new(&program);
        let layouts = analyze(&program, Game::K1.dialect(), &partition).results;
        let add = layouts[2].as_ref().unwrap();
        assert_eq!((add.params, add.ret), (8, 4));
        assert_eq!(add.depth[3], Some(4));
        let main = layouts[1].as_ref().unwrap();
        assert_eq!((main.params, main.ret), (0, 0));
        assert_eq!(main.depth_at(2, 5), Some(12));
        assert_eq!(main.depth_at(2, 6), Some(4));
    }

    #[test]
    fn test_recursion_is_ambiguous() {
        let mut p = Program::new();
        let sub = p.new_label();
        p.push(Instruction::jump(Opcode::Jsr, sub));
        p.push(Instruction::bare(Opcode::Retn));
        p.bind(sub);
        p.push(Instruction::jump(Opcode::Jsr, sub));
        p.push(Instruction::bare(Opcode::Retn));
        let partition = Partition::new(&p);
        let layouts = analyze(&p, Game::K1.dialect(), &partition).results;
        assert_eq!(layouts[1], Err(AmbiguityKind::Recursion));
    }

    #[test]
    fn test_conflicting_depths_are_ambiguous() {
        let mut p = Program::new();
        let join = p.new_label();
        p.push(Instruction::const_int(1));
        p.push(Instruction::jump(Opcode::Jz, join));
        p.push(Instruction::const_int(2));
        p.bind(join);
        p.push(Instruction::bare(Opcode::Retn));
        let partition = Partition::new(&p);
        let layouts = analyze(&p, Game::K1.dialect(), &partition).results;
        assert_eq!(layouts[0], Err(AmbiguityKind::InconsistentDepth(3)));
    }

    #[test]
    fn test_ambiguous_callee_keeps_caller_layout() {
        let mut p = Program::new();
        let main = p.new_label();
        let callee = p.new_label();
        let join = p.new_label();
        p.push(Instruction::jump(Opcode::Jsr, main));
        p.push(Instruction::bare(Opcode::Retn));
        p.bind(main);
        p.push(Instruction::const_int(1));
        p.push(Instruction::jump(Opcode::Jsr, callee));
        p.push(Instruction::const_int(7));
        p.push(Instruction::action(4, 1));
        p.push(Instruction::bare(Opcode::Retn));
        p.bind(callee);
        p.push(Instruction::const_int(0));
        p.push(Instruction::jump(Opcode::Jz, join));
        p.push(Instruction::const_int(5));
        p.bind(join);
        p.push(Instruction::move_sp(-4));
        p.push(Instruction::bare(Opcode::Retn));

        let partition = Partition::new(&p);
        let layouts = analyze(&p, Game::K1.dialect(), &partition);
        assert_eq!(layouts.results[2], Err(AmbiguityKind::InconsistentDepth(10)));
        assert_eq!(layouts.interfaces[2], Some(Interface { params: 4, ret: 0 }));
        let main = layouts.results[1].as_ref().unwrap();
        assert_eq!(main.depth_at(2, 4), Some(0));
    }

    #[test]
    fn test_extreme_offsets_do_not_overflow() {
        let mut p = Program::new();
        p.push(Instruction::copy(Opcode::CpDownSp, i32::MIN, 4));
        p.push(Instruction::move_sp(i32::MIN));
        p.push(Instruction::move_sp(i32::MIN));
        p.push(Instruction::bare(Opcode::Retn));
        let partition = Partition::new(&p);
        let layouts = analyze(&p, Game::K1.dialect(), &partition);
        assert_eq!(layouts.results[0], Err(AmbiguityKind::StackShape(2)));
    }
}
