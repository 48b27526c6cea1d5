//! Symbolic execution of straight-line code.
//!
//! The builder mirrors the VM stack with one [`Entry`] per slot. Values that
//! are computed but not yet stored are temporaries holding the expression
//! that produced them; stores, discards and calls turn them into statements
//! of the current block.

use core::ops::Range;

use crate::compiler::operators::{binary_op_of, operand_types};
use crate::decompiler::AmbiguityKind;
use crate::decompiler::layout::{Interface, Layout, Layouts, Partition};
use crate::decompiler::nodes::{Expr, NodeId, NodeKind, Piece, Tree, VarId};
use crate::decompiler::vars::{Vars, consecutive};
use crate::parser::{BinaryOp, IncDec, UnaryOp};
use crate::types::{DataType, Dialect};
use crate::vm::{Instruction, Opcode, Operand, Program, TypeQualifier};

pub(super) type Result<T> = core::result::Result<T, AmbiguityKind>;

/// Read-only inputs shared by every subroutine.
pub(crate) struct Inputs<'a> {
    pub program: &'a Program,
    pub dialect: &'a Dialect,
    pub partition: &'a Partition,
    pub layouts: &'a Layouts,
}

/// What has been learnt about the whole program so far.
#[derive(Debug, Default)]
pub(crate) struct Analysis {
    pub vars: Vars,
    /// One slot per global, in stack order.
    pub globals: Vec<VarId>,
    /// Parameter slots of each subroutine, deepest first.
    pub params: Vec<Vec<VarId>>,
    /// Return slot types, as reserved by the first call site seen.
    pub ret_slots: Vec<Vec<DataType>>,
    /// One returned expression per subroutine.
    pub returns: Vec<Option<Expr>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Entry {
    Local(VarId),
    Temp { id: usize, part: usize },
    /// A slot whose value has already been used.
    Spent,
}

#[derive(Debug, Clone)]
pub(super) struct Temp {
    pub expr: Expr,
    pub ty: DataType,
    pub parts: usize,
    /// Instruction that produced it.
    pub origin: usize,
}

/// An enclosing loop or switch.
#[derive(Debug, Clone)]
pub(super) struct Context {
    pub brk: usize,
    /// Targets a `continue` jumps to directly.
    pub restart: Vec<usize>,
    /// Start of a `for` step that a `continue` runs before looping.
    pub tail: Option<usize>,
    /// Head of a `while (1)` loop, whose body starts at the head.
    pub reentry: Option<usize>,
    pub is_loop: bool,
    pub placeholders: Vec<NodeId>,
}

/// A subroutine rebuilt as a tree.
#[derive(Debug)]
pub(crate) struct Built {
    pub tree: Tree,
    pub root: NodeId,
}

pub(crate) struct Builder<'a> {
    pub(super) inputs: &'a Inputs<'a>,
    pub(super) analysis: &'a mut Analysis,
    pub(super) sub: usize,
    pub(super) range: Range<usize>,
    pub(super) layout: &'a Layout,
    /// Distance from BP to the first global, when globals exist.
    bp_base: i32,
    pub(super) in_globals: bool,
    base: usize,
    pub(super) tree: Tree,
    pub(super) stack: Vec<Entry>,
    pub(super) temps: Vec<Temp>,
    pub(super) pending_return: Option<Expr>,
    pub(super) pending_actions: Vec<Expr>,
    pub(super) contexts: Vec<Context>,
    last_load: Option<(usize, VarId)>,
}

impl<'a> Builder<'a> {
    pub fn new(
        inputs: &'a Inputs<'a>,
        analysis: &'a mut Analysis,
        sub: usize,
        layout: &'a Layout,
        globals_size: i32,
        in_globals: bool,
    ) -> Self {
        let stack: Vec<Entry> = analysis.params[sub].iter().map(|v| Entry::Local(*v)).collect();
        Self {
            inputs,
            analysis,
            sub,
            range: inputs.partition.ranges[sub].clone(),
            layout,
            bp_base: globals_size + 4,
            in_globals,
            base: stack.len(),
            tree: Tree::new(),
            stack,
            temps: Vec::new(),
            pending_return: None,
            pending_actions: Vec::new(),
            contexts: Vec::new(),
            last_load: None,
        }
    }

    /// Rebuilds the whole subroutine.
    pub fn subroutine(mut self) -> Result<Built> {
        let root = self.tree.block();
        self.region(self.range.start, self.range.end, root)?;
        Ok(Built {
            tree: self.tree,
            root,
        })
    }

    /// Rebuilds the global declarations that precede `SAVEBP` at `savebp`.
    pub fn globals(mut self, savebp: usize) -> Result<Built> {
        let root = self.tree.block();
        self.region(self.range.start, savebp, root)?;
        let only_decls = self
            .tree
            .children(root)
            .iter()
            .all(|node| matches!(self.tree.kind(*node), NodeKind::Decl { .. }));
        if !only_decls || self.stack.iter().any(|e| matches!(e, Entry::Temp { .. })) {
            return Err(AmbiguityKind::StackShape(savebp));
        }
        Ok(Built {
            tree: self.tree,
            root,
        })
    }

    pub(super) fn instruction(&self, index: usize) -> &'a Instruction {
        &self.inputs.program.instructions()[index]
    }

    pub(super) fn opcode(&self, index: usize) -> Option<Opcode> {
        self.inputs
            .program
            .instructions()
            .get(index)
            .map(|instruction| instruction.opcode)
    }

    pub(super) fn target(&self, index: usize) -> Option<usize> {
        let instruction = self.inputs.program.instructions().get(index)?;
        self.inputs.program.jump_target_of(instruction)
    }

    pub(super) fn depth(&self, index: usize) -> Option<i32> {
        self.layout.depth_at(self.range.start, index)
    }

    /// Current depth relative to the frame, in bytes.
    pub(super) fn current_depth(&self) -> i32 {
        (self.stack.len() as i32 - self.base as i32) * 4
    }

    pub(super) fn check_depth(&self, index: usize) -> Result<()> {
        match self.depth(index) {
            Some(depth) if depth == self.current_depth() => Ok(()),
            _ => Err(AmbiguityKind::StackShape(index)),
        }
    }

    pub(super) fn top_is_temp(&self) -> bool {
        matches!(self.stack.last(), Some(Entry::Temp { .. }))
    }

    /// Fails while a computed value waits on the stack.
    pub(super) fn ensure_settled(&self, index: usize) -> Result<()> {
        if self.stack.iter().any(|e| matches!(e, Entry::Temp { .. })) {
            return Err(AmbiguityKind::StackShape(index));
        }
        Ok(())
    }

    // === Stack values ===

    pub(super) fn push_temp(&mut self, expr: Expr, ty: DataType, parts: usize, origin: usize) {
        let id = self.temps.len();
        self.temps.push(Temp {
            expr,
            ty,
            parts,
            origin,
        });
        for part in 0..parts {
            self.stack.push(Entry::Temp { id, part });
        }
    }

    /// The value in the top `slots` entries, without popping it.
    fn peek_value(&self, slots: usize, index: usize) -> Result<(Expr, DataType)> {
        let shape = AmbiguityKind::StackShape(index);
        if slots == 0 || slots > self.stack.len() {
            return Err(shape);
        }
        let entries = &self.stack[self.stack.len() - slots..];
        if let Entry::Temp { id, part: 0 } = entries[0] {
            let temp = &self.temps[id];
            let whole = temp.parts == slots
                && entries
                    .iter()
                    .enumerate()
                    .all(|(n, e)| *e == Entry::Temp { id, part: n });
            if whole {
                return Ok((temp.expr.clone(), temp.ty.clone()));
            }
        }
        if slots == 3 {
            let mut parts = Vec::with_capacity(3);
            for entry in entries {
                match entry {
                    Entry::Temp { id, part: 0 } if self.temps[*id].parts == 1 => {
                        parts.push(self.temps[*id].expr.clone());
                    }
                    _ => return Err(shape),
                }
            }
            if let Ok(parts) = <[Expr; 3]>::try_from(parts) {
                return Ok((Expr::Vector(Box::new(parts)), DataType::Vector));
            }
        }
        Err(shape)
    }

    pub(super) fn take_value(&mut self, slots: usize, index: usize) -> Result<(Expr, DataType)> {
        let value = self.peek_value(slots, index)?;
        if let (Expr::Vector(parts), DataType::Vector) = &value {
            for part in parts.iter() {
                self.hint_expr(part, &DataType::Float);
            }
        }
        self.stack.truncate(self.stack.len() - slots);
        Ok(value)
    }

    /// Pops `count` entries; discarded values with effects become statements.
    fn discard(&mut self, count: usize, index: usize, block: NodeId) -> Result<()> {
        if count > self.stack.len() {
            return Err(AmbiguityKind::StackShape(index));
        }
        let popped = self.stack.split_off(self.stack.len() - count);
        let mut at = 0;
        while at < popped.len() {
            match popped[at] {
                Entry::Temp { id, part: 0 } => {
                    let parts = self.temps[id].parts;
                    let whole = at + parts <= popped.len()
                        && (0..parts).all(|n| popped[at + n] == Entry::Temp { id, part: n });
                    if !whole {
                        return Err(AmbiguityKind::StackShape(index));
                    }
                    let expr = self.temps[id].expr.clone();
                    if expr.has_effects() {
                        self.tree.append(block, NodeKind::Expr(expr));
                    }
                    at += parts;
                }
                Entry::Temp { .. } => return Err(AmbiguityKind::StackShape(index)),
                Entry::Local(_) | Entry::Spent => at += 1,
            }
        }
        Ok(())
    }

    /// Marks the top `slots` entries as consumed.
    fn spend(&mut self, slots: usize) {
        let len = self.stack.len();
        for entry in &mut self.stack[len - slots..] {
            *entry = Entry::Spent;
        }
    }

    // === Variables ===

    /// Stack index addressed by an SP-relative byte offset.
    fn sp_index(&self, offset: i32, index: usize) -> Result<usize> {
        if offset >= 0 || offset % 4 != 0 {
            return Err(AmbiguityKind::StackShape(index));
        }
        self.stack
            .len()
            .checked_sub((offset.unsigned_abs() / 4) as usize)
            .ok_or(AmbiguityKind::StackShape(index))
    }

    /// The variables held in `count` entries from stack index `at`.
    fn locals_at(&self, at: usize, count: usize, index: usize) -> Result<VarId> {
        let ids: Vec<VarId> = self
            .stack
            .get(at..at + count)
            .ok_or(AmbiguityKind::StackShape(index))?
            .iter()
            .map(|entry| match entry {
                Entry::Local(var) => Ok(*var),
                _ => Err(AmbiguityKind::StackShape(index)),
            })
            .collect::<Result<_>>()?;
        consecutive(&ids).ok_or(AmbiguityKind::StackShape(index))
    }

    /// The globals addressed by a BP-relative byte offset.
    fn globals_at(&self, offset: i32, count: usize, index: usize) -> Result<VarId> {
        let position = offset
            .checked_add(self.bp_base)
            .ok_or(AmbiguityKind::StackShape(index))?;
        if position < 0 || position % 4 != 0 {
            return Err(AmbiguityKind::StackShape(index));
        }
        let at = (position / 4) as usize;
        let ids = self
            .analysis
            .globals
            .get(at..at + count)
            .ok_or(AmbiguityKind::StackShape(index))?;
        consecutive(ids).ok_or(AmbiguityKind::StackShape(index))
    }

    /// The variables an SP or BP copy addresses.
    fn addressed(&self, instruction: &Instruction, index: usize) -> Result<(VarId, usize)> {
        let Operand::Stack { offset, size } = instruction.operand else {
            return Err(AmbiguityKind::StackShape(index));
        };
        if size == 0 || size % 4 != 0 {
            return Err(AmbiguityKind::StackShape(index));
        }
        let count = size as usize / 4;
        let first = match instruction.opcode {
            Opcode::CpTopBp | Opcode::CpDownBp => self.globals_at(offset, count, index)?,
            _ => self.locals_at(self.sp_index(offset, index)?, count, index)?,
        };
        Ok((first, count))
    }

    fn touch(&mut self, first: VarId, count: usize) {
        self.analysis.vars.merge(first, count);
        for var in first..first + count {
            self.analysis.vars.slot_mut(var).used = true;
        }
    }

    /// Records that `expr` is used where a `ty` is expected.
    pub(super) fn hint_expr(&mut self, expr: &Expr, ty: &DataType) {
        match expr {
            Expr::Var { first, count } | Expr::Assign { first, count, .. } => {
                self.analysis.vars.hint(*first, *count, ty);
            }
            Expr::IncDec { var, .. } => self.analysis.vars.hint(*var, 1, &DataType::Int),
            _ => {}
        }
    }

    // === Straight-line instructions ===

    /// Applies one instruction without control flow; returns the next index.
    pub(super) fn step(&mut self, index: usize, block: NodeId) -> Result<usize> {
        let instruction = self.instruction(index);
        let unsupported = || AmbiguityKind::Unsupported {
            opcode: instruction.opcode.name(),
            index,
        };
        match instruction.opcode {
            Opcode::Nop => {}
            Opcode::RsAdd => {
                let ty = DataType::from_qualifier(instruction.qualifier).ok_or_else(unsupported)?;
                let var = if self.in_globals {
                    *self
                        .analysis
                        .globals
                        .get(self.stack.len())
                        .ok_or(AmbiguityKind::StackShape(index))?
                } else {
                    self.analysis.vars.add(ty.clone())
                };
                self.analysis.vars.hint(var, 1, &ty);
                let decl = self.tree.append(block, NodeKind::Decl { var, init: None });
                self.analysis.vars.slot_mut(var).decl = Some(decl);
                self.stack.push(Entry::Local(var));
            }
            Opcode::Const => {
                let (expr, ty) = match (&instruction.operand, instruction.qualifier) {
                    (Operand::Int(v), TypeQualifier::INT) => (Expr::Int(*v), DataType::Int),
                    (Operand::Float(v), _) => (Expr::Float(*v), DataType::Float),
                    (Operand::String(s), _) => (Expr::Str(s.clone()), DataType::String),
                    (Operand::Int(v), TypeQualifier::OBJECT) => (Expr::Object(*v), DataType::Object),
                    _ => return Err(unsupported()),
                };
                self.push_temp(expr, ty, 1, index);
            }
            Opcode::CpTopSp | Opcode::CpTopBp => {
                if instruction.opcode == Opcode::CpTopSp && self.top_is_temp() {
                    let Operand::Stack { offset, .. } = instruction.operand else {
                        return Err(unsupported());
                    };
                    if offset == -4 {
                        return Err(AmbiguityKind::StackShape(index));
                    }
                }
                let (first, count) = self.addressed(instruction, index)?;
                self.touch(first, count);
                let ty = self.analysis.vars.run_type(first, count);
                self.push_temp(Expr::Var { first, count }, ty, count, index);
                self.last_load = Some((index, first));
            }
            Opcode::CpDownSp | Opcode::CpDownBp => self.copy_down(index, block)?,
            Opcode::MovSp => {
                let Operand::Int(delta) = instruction.operand else {
                    return Err(unsupported());
                };
                if delta > 0 || delta % 4 != 0 {
                    return Err(AmbiguityKind::StackShape(index));
                }
                self.discard((-delta / 4) as usize, index, block)?;
            }
            Opcode::IncISp | Opcode::DecISp | Opcode::IncIBp | Opcode::DecIBp => {
                return self.increment(index, block);
            }
            Opcode::Neg | Opcode::Comp | Opcode::NotI => {
                let (operand, ty) = self.take_value(1, index)?;
                let op = match instruction.opcode {
                    Opcode::Neg => UnaryOp::Neg,
                    Opcode::Comp => UnaryOp::BitNot,
                    _ => UnaryOp::Not,
                };
                let ty = match op {
                    UnaryOp::Neg => {
                        let ty = DataType::from_qualifier(instruction.qualifier).unwrap_or(ty);
                        self.hint_expr(&operand, &ty);
                        ty
                    }
                    _ => {
                        self.hint_expr(&operand, &DataType::Int);
                        DataType::Int
                    }
                };
                let expr = match (op, operand) {
                    (UnaryOp::Neg, Expr::Int(v)) if v != i32::MIN => Expr::Int(-v),
                    (op, operand) => Expr::Unary(op, Box::new(operand)),
                };
                self.push_temp(expr, ty, 1, index);
            }
            Opcode::Destruct => {
                let Operand::Destruct { size, offset, keep } = instruction.operand else {
                    return Err(unsupported());
                };
                if size % 4 != 0 || keep % 4 != 0 || offset < 0 || offset % 4 != 0 || keep == 0 {
                    return Err(AmbiguityKind::StackShape(index));
                }
                let (base, base_ty) = self.take_value(size as usize / 4, index)?;
                let count = keep as usize / 4;
                let ty = match (&base_ty, count) {
                    (DataType::Vector, 1) => DataType::Float,
                    _ => DataType::Unknown,
                };
                let expr = Expr::Member {
                    base: Box::new(base),
                    offset: offset as usize / 4,
                    count,
                };
                self.push_temp(expr, ty, count, index);
            }
            Opcode::Action => self.engine_call(index, block)?,
            Opcode::Jsr => self.user_call(index, block)?,
            opcode => {
                if let Some(op) = binary_op_of(opcode) {
                    self.binary(op, index)?;
                } else {
                    return Err(unsupported());
                }
            }
        }
        Ok(index + 1)
    }

    fn binary(&mut self, op: BinaryOp, index: usize) -> Result<()> {
        let instruction = self.instruction(index);
        let (left_ty, right_ty) = match (&instruction.operand, operand_types(instruction.qualifier)) {
            (Operand::Size(size), _) => {
                let ty = match size {
                    12 => DataType::Vector,
                    _ => DataType::Unknown,
                };
                let slots = *size as usize / 4;
                let (right, _) = self.take_value(slots, index)?;
                let (left, _) = self.take_value(slots, index)?;
                self.hint_expr(&left, &ty);
                self.hint_expr(&right, &ty);
                self.push_temp(Expr::Binary(op, Box::new(left), Box::new(right)), DataType::Int, 1, index);
                return Ok(());
            }
            (_, Some(pair)) => pair,
            (_, None) => return Err(AmbiguityKind::StackShape(index)),
        };
        let (right, _) = self.take_value(right_ty.size() / 4, index)?;
        let (left, _) = self.take_value(left_ty.size() / 4, index)?;
        self.hint_expr(&left, &left_ty);
        self.hint_expr(&right, &right_ty);
        let ty = if op.is_comparison() || matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr) {
            DataType::Int
        } else if left_ty == DataType::Vector || right_ty == DataType::Vector {
            DataType::Vector
        } else if left_ty == DataType::Float || right_ty == DataType::Float {
            DataType::Float
        } else {
            left_ty
        };
        let parts = ty.size() / 4;
        self.push_temp(Expr::Binary(op, Box::new(left), Box::new(right)), ty, parts, index);
        Ok(())
    }

    fn copy_down(&mut self, index: usize, block: NodeId) -> Result<()> {
        let instruction = self.instruction(index);
        let Operand::Stack { offset, size } = instruction.operand else {
            return Err(AmbiguityKind::StackShape(index));
        };
        let count = size as usize / 4;

        // A write below the parameters is the return value.
        if instruction.opcode == Opcode::CpDownSp && !self.in_globals {
            let position = self
                .current_depth()
                .checked_add(offset)
                .ok_or(AmbiguityKind::StackShape(index))?;
            let params = self.layout.params as i32;
            if position < -params {
                let ret = self.layout.ret as i32;
                if position != -(params + ret) || size as i32 != ret {
                    return Err(AmbiguityKind::StackShape(index));
                }
                let (value, _) = self.peek_value(count, index)?;
                self.spend(count);
                if self.analysis.returns[self.sub].is_none() {
                    self.analysis.returns[self.sub] = Some(value.clone());
                }
                self.pending_return = Some(value);
                return Ok(());
            }
        }

        let (first, count) = self.addressed(instruction, index)?;
        let (value, ty) = self.peek_value(count, index)?;
        self.analysis.vars.merge(first, count);
        self.analysis.vars.hint(first, count, &ty);
        let target_ty = self.analysis.vars.run_type(first, count);
        self.hint_expr(&value, &target_ty);

        if self.initializes(first, count, block) {
            if let Some(decl) = self.analysis.vars.slot(first).decl
                && let NodeKind::Decl { init, .. } = self.tree.kind_mut(decl)
            {
                *init = Some(value);
            }
            self.touch(first, count);
            self.spend(count);
            return Ok(());
        }

        self.touch(first, count);
        self.stack.truncate(self.stack.len() - count);
        let expr = Expr::Assign {
            first,
            count,
            value: Box::new(value),
        };
        self.push_temp(expr, ty, count, index);
        Ok(())
    }

    /// Whether a store into `first..first + count` is the initializer of
    /// declarations that end `block`.
    fn initializes(&self, first: VarId, count: usize, block: NodeId) -> bool {
        let children = self.tree.children(block);
        if children.len() < count {
            return false;
        }
        let tail = &children[children.len() - count..];
        tail.iter().enumerate().all(|(n, node)| {
            let var = first + n;
            let slot = self.analysis.vars.slot(var);
            slot.decl == Some(*node)
                && !slot.used
                && matches!(self.tree.kind(*node), NodeKind::Decl { init: None, .. })
        })
    }

    fn increment(&mut self, index: usize, block: NodeId) -> Result<usize> {
        let instruction = self.instruction(index);
        let Operand::Int(offset) = instruction.operand else {
            return Err(AmbiguityKind::StackShape(index));
        };
        let (op, global) = match instruction.opcode {
            Opcode::IncISp => (IncDec::Increment, false),
            Opcode::DecISp => (IncDec::Decrement, false),
            Opcode::IncIBp => (IncDec::Increment, true),
            _ => (IncDec::Decrement, true),
        };
        let var = if global {
            self.globals_at(offset, 1, index)?
        } else {
            self.locals_at(self.sp_index(offset, index)?, 1, index)?
        };
        self.touch(var, 1);
        self.analysis.vars.hint(var, 1, &DataType::Int);

        // Postfix: the old value was loaded just before.
        if let Some((load, loaded)) = self.last_load
            && load + 1 == index
            && loaded == var
            && let Some(Entry::Temp { id, part: 0 }) = self.stack.last().copied()
            && self.temps[id].origin == load
            && self.temps[id].parts == 1
        {
            self.temps[id].expr = Expr::IncDec {
                op,
                prefix: false,
                var,
            };
            self.temps[id].ty = DataType::Int;
            return Ok(index + 1);
        }

        // Prefix: the new value is loaded right after.
        if index + 1 < self.range.end {
            let next = self.instruction(index + 1);
            let reloads = match (next.opcode, &next.operand) {
                (Opcode::CpTopSp, Operand::Stack { offset, size: 4 }) if !global => self
                    .sp_index(*offset, index + 1)
                    .and_then(|at| self.locals_at(at, 1, index + 1))
                    .is_ok_and(|v| v == var),
                (Opcode::CpTopBp, Operand::Stack { offset, size: 4 }) if global => self
                    .globals_at(*offset, 1, index + 1)
                    .is_ok_and(|v| v == var),
                _ => false,
            };
            if reloads {
                let expr = Expr::IncDec {
                    op,
                    prefix: true,
                    var,
                };
                self.push_temp(expr, DataType::Int, 1, index + 1);
                return Ok(index + 2);
            }
        }

        let expr = Expr::IncDec {
            op,
            prefix: false,
            var,
        };
        self.tree.append(block, NodeKind::Expr(expr));
        Ok(index + 1)
    }

    fn engine_call(&mut self, index: usize, block: NodeId) -> Result<()> {
        let Operand::Action { routine, argc } = self.instruction(index).operand else {
            return Err(AmbiguityKind::StackShape(index));
        };
        let signature = self
            .inputs
            .dialect
            .routine(routine)
            .ok_or(AmbiguityKind::UnknownRoutine(routine))?;
        let mut args = Vec::with_capacity(argc as usize);
        for param in signature.params.iter().take(argc as usize) {
            let arg = if param.ty == DataType::Action {
                self.pending_actions
                    .pop()
                    .ok_or(AmbiguityKind::StackShape(index))?
            } else {
                let (arg, _) = self.take_value(param.ty.size() / 4, index)?;
                self.hint_expr(&arg, &param.ty);
                arg
            };
            args.push(arg);
        }
        let call = Expr::Engine { routine, args };
        match &signature.ret {
            DataType::Void => {
                self.tree.append(block, NodeKind::Expr(call));
            }
            ret => {
                let parts = ret.size() / 4;
                self.push_temp(call, ret.clone(), parts, index);
            }
        }
        Ok(())
    }

    fn user_call(&mut self, index: usize, block: NodeId) -> Result<()> {
        let callee = self
            .target(index)
            .and_then(|target| self.inputs.partition.index_of(target))
            .ok_or(AmbiguityKind::EscapingJump(index))?;
        let Interface { params, ret } = self.inputs.layouts.interfaces[callee]
            .ok_or(AmbiguityKind::StackShape(index))?;
        let (params, ret) = (params / 4, ret / 4);
        if params + ret > self.stack.len() {
            return Err(AmbiguityKind::StackShape(index));
        }

        // Arguments, deepest first.
        let entries = self.stack.split_off(self.stack.len() - params);
        let mut pieces = Vec::new();
        let mut at = 0;
        while at < entries.len() {
            let Entry::Temp { id, part: 0 } = entries[at] else {
                return Err(AmbiguityKind::StackShape(index));
            };
            let parts = self.temps[id].parts;
            let whole = at + parts <= entries.len()
                && (0..parts).all(|n| entries[at + n] == Entry::Temp { id, part: n });
            if !whole {
                return Err(AmbiguityKind::StackShape(index));
            }
            self.bind_argument(callee, at, id);
            pieces.push(Piece {
                expr: self.temps[id].expr.clone(),
                parts,
            });
            at += parts;
        }

        // The return slots reserved before the arguments.
        let reserved = self.stack.split_off(self.stack.len() - ret);
        let mut slot_types = Vec::with_capacity(ret);
        for entry in &reserved {
            let Entry::Local(var) = *entry else {
                return Err(AmbiguityKind::StackShape(index));
            };
            let slot = self.analysis.vars.slot(var);
            if slot.used {
                return Err(AmbiguityKind::StackShape(index));
            }
            slot_types.push(slot.ty.clone());
            if let Some(decl) = slot.decl {
                self.tree.detach(decl);
            }
            self.analysis.vars.slot_mut(var).decl = None;
        }
        if self.analysis.ret_slots[callee].is_empty() {
            self.analysis.ret_slots[callee] = slot_types.clone();
        }

        let call = Expr::User {
            sub: callee,
            args: pieces,
        };
        match ret {
            0 => {
                self.tree.append(block, NodeKind::Expr(call));
            }
            1 => self.push_temp(call, slot_types[0].clone(), 1, index),
            3 if slot_types.iter().all(|ty| *ty == DataType::Float) => {
                self.push_temp(call, DataType::Vector, 3, index)
            }
            parts => self.push_temp(call, DataType::Unknown, parts, index),
        }
        Ok(())
    }

    /// Passes what the caller knows about an argument to the callee's
    /// parameter slots starting at `slot`, and back.
    fn bind_argument(&mut self, callee: usize, slot: usize, temp: usize) {
        let Temp { expr, ty, parts, .. } = self.temps[temp].clone();
        let Some(params) = self.analysis.params[callee].get(slot..slot + parts) else {
            return;
        };
        let Some(first) = consecutive(params) else {
            return;
        };
        self.analysis.vars.merge(first, parts);
        if let Expr::Var { first: source, count } = expr
            && count == parts
        {
            for n in 0..parts {
                let ty = self.analysis.vars.slot(source + n).ty.clone();
                self.analysis.vars.hint(first + n, 1, &ty);
                let known = self.analysis.vars.slot(first + n).ty.clone();
                self.analysis.vars.hint(source + n, 1, &known);
            }
            return;
        }
        self.analysis.vars.hint(first, parts, &ty);
        let known = self.analysis.vars.run_type(first, parts);
        self.hint_expr(&expr, &known);
    }
}
