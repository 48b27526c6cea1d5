//! Control-flow recovery.
//!
//! A region is a range of instructions rebuilt into one block. Jumps are
//! matched against the shapes the code generator produces for loops, `if`,
//! `switch`, short-circuit operators and deferred actions; a jump that fits
//! none of them makes the subroutine ambiguous.

use crate::decompiler::AmbiguityKind;
use crate::decompiler::nodes::{Arm, CaseLabel, Expr, NodeId, NodeKind};
use crate::decompiler::symbolic::{Builder, Context, Entry, Result};
use crate::parser::BinaryOp;
use crate::types::DataType;
use crate::vm::{Opcode, Operand};

impl Builder<'_> {
    pub(super) fn region(&mut self, start: usize, end: usize, block: NodeId) -> Result<()> {
        let mut index = start;
        while index < end {
            self.check_depth(index)?;
            if let Some(back) = self.back_edge(index, end) {
                index = self.structure_loop(index, back, block)?;
                continue;
            }
            let instruction = self.instruction(index);
            index = match instruction.opcode {
                Opcode::Jz | Opcode::Jnz => self.structure_if(index, end, block)?,
                Opcode::Jmp if self.top_is_temp() => self.structure_switch(index, end, block)?,
                Opcode::Jmp => self.structure_jump(index, block)?,
                Opcode::Retn => {
                    let value = self.pending_return.take();
                    if value.is_none() && self.layout.ret > 0 {
                        return Err(AmbiguityKind::StackShape(index));
                    }
                    self.tree.append(block, NodeKind::Return(value));
                    index + 1
                }
                Opcode::StoreState => self.deferred_action(index)?,
                Opcode::CpTopSp
                    if self.top_is_temp()
                        && instruction.operand == (Operand::Stack { offset: -4, size: 4 }) =>
                {
                    self.structure_duplicate(index, end, block)?
                }
                _ => self.step(index, block)?,
            };
        }
        Ok(())
    }

    /// The last jump in `index..end` back to `index`.
    fn back_edge(&self, index: usize, end: usize) -> Option<usize> {
        if self.contexts.iter().any(|c| c.reentry == Some(index)) {
            return None;
        }
        (index..end).rev().find(|&j| {
            matches!(self.opcode(j), Some(Opcode::Jmp | Opcode::Jnz)) && self.target(j) == Some(index)
        })
    }

    /// Rebuilds the value left on the stack by `start..end`.
    fn expression(&mut self, start: usize, end: usize) -> Result<Expr> {
        let before = self.stack.len();
        let scratch = self.tree.block();
        self.region(start, end, scratch)?;
        if !self.tree.children(scratch).is_empty() || self.stack.len() != before + 1 {
            return Err(AmbiguityKind::StackShape(start));
        }
        Ok(self.take_value(1, end)?.0)
    }

    /// Runs `start..end` into `block` and puts the stack back afterwards.
    fn branch(&mut self, start: usize, end: usize, block: NodeId) -> Result<()> {
        let snapshot = self.stack.clone();
        self.region(start, end, block)?;
        let falls_through = end > start
            && self
                .opcode(end - 1)
                .is_some_and(|opcode| opcode.falls_through());
        if (falls_through || end == start) && self.stack.len() != snapshot.len() {
            return Err(AmbiguityKind::StackShape(end));
        }
        self.stack = snapshot;
        Ok(())
    }

    fn structure_loop(&mut self, head: usize, back: usize, block: NodeId) -> Result<usize> {
        self.ensure_settled(head)?;
        let depth = self.depth(head).ok_or(AmbiguityKind::StackShape(head))?;
        let brk = back + 1;
        let snapshot = self.stack.clone();

        if self.opcode(back) == Some(Opcode::Jnz) {
            let cond_start = (head..back)
                .rev()
                .find(|&k| self.depth(k) == Some(depth))
                .ok_or(AmbiguityKind::UnstructuredJump(back))?;
            let body = self.tree.block();
            self.contexts.push(Context {
                brk,
                restart: vec![cond_start],
                tail: None,
                reentry: None,
                is_loop: true,
                placeholders: Vec::new(),
            });
            let built = self.region(head, cond_start, body);
            self.contexts.pop();
            built?;
            if self.stack.len() != snapshot.len() {
                return Err(AmbiguityKind::StackShape(cond_start));
            }
            let cond = self.expression(cond_start, back)?;
            self.stack = snapshot;
            self.tree.append(block, NodeKind::DoWhile { body, cond });
            return Ok(brk);
        }

        let test = (head..back).find(|&q| {
            self.opcode(q) == Some(Opcode::Jz)
                && self.target(q) == Some(brk)
                && (head + 1..=q).all(|k| self.depth(k).is_some_and(|d| d > depth))
        });
        let (cond, body_start) = match test {
            Some(q) => (self.expression(head, q)?, q + 1),
            None => (Expr::Int(1), head),
        };
        let cont = self.continue_point(head, body_start, back);

        let body = self.tree.block();
        let tail = self.tree.block();
        self.contexts.push(Context {
            brk,
            restart: if cont == back { vec![head, back] } else { vec![head] },
            tail: (cont != back).then_some(cont),
            reentry: (body_start == head).then_some(head),
            is_loop: true,
            placeholders: Vec::new(),
        });
        let mut built = self.region(body_start, cont, body);
        if built.is_ok() && cont != back {
            built = self.region(cont, back, tail);
        }
        let context = self.contexts.pop();
        built?;
        if self.stack.len() != snapshot.len() {
            return Err(AmbiguityKind::StackShape(back));
        }
        self.stack = snapshot;

        let placeholders = context.map(|c| c.placeholders).unwrap_or_default();
        let steps = self.tree.children(tail).to_vec();
        let jumps_to_head = (body_start..back)
            .any(|p| self.opcode(p) == Some(Opcode::Jmp) && self.target(p) == Some(head));
        let for_loop = match steps.as_slice() {
            [single]
                if !placeholders.is_empty()
                    && !jumps_to_head
                    && self.depth(cont) == Some(depth) =>
            {
                match self.tree.kind(*single) {
                    NodeKind::Expr(step) => Some(step.clone()),
                    _ => None,
                }
            }
            _ => None,
        };

        let kind = match for_loop {
            Some(step) => {
                for placeholder in placeholders {
                    *self.tree.kind_mut(placeholder) = NodeKind::Continue;
                }
                NodeKind::For { cond, step, body }
            }
            None => {
                for placeholder in placeholders {
                    let mut copies = Vec::with_capacity(steps.len() + 1);
                    for step in &steps {
                        copies.push(self.tree.clone_subtree(*step));
                    }
                    for copy in &copies {
                        self.tree.get_mut(*copy).parent = Some(placeholder);
                    }
                    *self.tree.kind_mut(placeholder) = NodeKind::Block(copies);
                    self.tree.append(placeholder, NodeKind::Continue);
                }
                for step in steps {
                    self.tree.adopt(body, step);
                }
                NodeKind::While { cond, body }
            }
        };
        self.tree.append(block, kind);
        Ok(brk)
    }

    /// Where a `continue` inside a `while`-shaped loop lands: the furthest
    /// forward jump target in the body that is not inside a nested loop.
    fn continue_point(&self, head: usize, body_start: usize, back: usize) -> usize {
        let nested: Vec<(usize, usize)> = (body_start..back)
            .filter(|&q| matches!(self.opcode(q), Some(Opcode::Jmp | Opcode::Jnz)))
            .filter_map(|q| {
                let t = self.target(q)?;
                (t >= body_start && t <= q && t != head).then_some((t, q))
            })
            .collect();
        (body_start..back)
            .filter(|&p| self.opcode(p) == Some(Opcode::Jmp))
            .filter_map(|p| self.target(p).map(|t| (p, t)))
            .filter(|&(p, t)| t > p + 1 && t > body_start && t <= back)
            .filter(|&(_, t)| !nested.iter().any(|&(h, q)| h < t && t <= q))
            .map(|(_, t)| t)
            .max()
            .unwrap_or(back)
    }

    /// The statement a jump to `target` stands for inside the open contexts.
    fn jump_kind(&self, target: usize) -> Option<(NodeKind, bool)> {
        let innermost = self.contexts.last()?;
        if innermost.brk == target {
            return Some((NodeKind::Break, false));
        }
        let lp = self.contexts.iter().rev().find(|c| c.is_loop)?;
        if lp.restart.contains(&target) {
            return Some((NodeKind::Continue, false));
        }
        if lp.tail == Some(target) {
            return Some((NodeKind::ContinueTail, true));
        }
        None
    }

    /// Appends the statement for a jump; placeholders are registered with
    /// their loop.
    fn append_jump(&mut self, block: NodeId, kind: NodeKind, placeholder: bool) -> NodeId {
        let node = self.tree.append(block, kind);
        if placeholder && let Some(lp) = self.contexts.iter_mut().rev().find(|c| c.is_loop) {
            lp.placeholders.push(node);
        }
        node
    }

    fn structure_jump(&mut self, index: usize, block: NodeId) -> Result<usize> {
        let target = self.target(index).ok_or(AmbiguityKind::UnstructuredJump(index))?;
        let (kind, placeholder) = self
            .jump_kind(target)
            .ok_or(AmbiguityKind::UnstructuredJump(index))?;
        self.append_jump(block, kind, placeholder);
        Ok(index + 1)
    }

    fn structure_if(&mut self, index: usize, end: usize, block: NodeId) -> Result<usize> {
        let jump_if_zero = self.opcode(index) == Some(Opcode::Jz);
        let t = self.target(index).ok_or(AmbiguityKind::UnstructuredJump(index))?;
        let (value, _) = self.take_value(1, index)?;
        self.hint_expr(&value, &DataType::Int);

        if t <= index || t > end {
            let (kind, placeholder) = self
                .jump_kind(t)
                .ok_or(AmbiguityKind::UnstructuredJump(index))?;
            let cond = if jump_if_zero { value.not() } else { value };
            let then = self.tree.block();
            self.append_jump(then, kind, placeholder);
            self.tree.append(block, NodeKind::If { cond, then, els: None });
            return Ok(index + 1);
        }
        self.ensure_settled(index)?;
        let cond = if jump_if_zero { value } else { value.not() };
        let then = self.tree.block();

        let join = match t.checked_sub(1) {
            Some(j) if j > index && self.opcode(j) == Some(Opcode::Jmp) => self
                .target(j)
                .filter(|&e| e >= t && e <= end)
                // A branch holding only a loop jump is `if (..) continue;`.
                .filter(|&e| j > index + 1 || self.jump_kind(e).is_none()),
            _ => None,
        };
        if let Some(join) = join {
            self.branch(index + 1, t - 1, then)?;
            let els = self.tree.block();
            self.branch(t, join, els)?;
            self.tree.append(
                block,
                NodeKind::If {
                    cond,
                    then,
                    els: Some(els),
                },
            );
            return Ok(join);
        }

        self.branch(index + 1, t, then)?;
        self.tree.append(block, NodeKind::If { cond, then, els: None });
        Ok(t)
    }

    /// `CPTOPSP -4, 4` over a computed value: a short-circuit operator or
    /// the dispatch of a `switch`.
    fn structure_duplicate(&mut self, index: usize, end: usize, block: NodeId) -> Result<usize> {
        match self.opcode(index + 1) {
            Some(opcode @ (Opcode::Jz | Opcode::Jnz)) => {
                let t = self
                    .target(index + 1)
                    .ok_or(AmbiguityKind::UnstructuredJump(index + 1))?;
                let (op, combine) = match opcode {
                    Opcode::Jz => (BinaryOp::LogicalAnd, Opcode::LogAnd),
                    _ => (BinaryOp::LogicalOr, Opcode::LogOr),
                };
                if t < index + 3 || t > end || self.opcode(t - 1) != Some(combine) {
                    return Err(AmbiguityKind::UnstructuredJump(index + 1));
                }
                let right = self.expression(index + 2, t - 1)?;
                let (left, _) = self.take_value(1, index)?;
                self.hint_expr(&left, &DataType::Int);
                self.hint_expr(&right, &DataType::Int);
                let expr = Expr::Binary(op, Box::new(left), Box::new(right));
                self.push_temp(expr, DataType::Int, 1, t - 1);
                Ok(t)
            }
            Some(Opcode::Const) => self.structure_switch(index, end, block),
            _ => Err(AmbiguityKind::StackShape(index)),
        }
    }

    fn is_case_test(&self, k: usize) -> bool {
        self.instruction_is_dup(k)
            && self.opcode(k + 1) == Some(Opcode::Const)
            && self.opcode(k + 2) == Some(Opcode::Equal)
            && self.opcode(k + 3) == Some(Opcode::Jnz)
    }

    fn instruction_is_dup(&self, k: usize) -> bool {
        self.opcode(k) == Some(Opcode::CpTopSp)
            && self.instruction(k).operand == (Operand::Stack { offset: -4, size: 4 })
    }

    fn structure_switch(&mut self, index: usize, end: usize, block: NodeId) -> Result<usize> {
        let value_depth = self.current_depth();
        let (value, _) = self.take_value(1, index)?;
        self.stack.push(Entry::Spent);
        self.ensure_settled(index)?;

        let mut cases = Vec::new();
        let mut k = index;
        while self.is_case_test(k) {
            let label = match &self.instruction(k + 1).operand {
                Operand::Int(v) => CaseLabel::Int(*v),
                Operand::String(s) => CaseLabel::Str(s.clone()),
                _ => return Err(AmbiguityKind::StackShape(k + 1)),
            };
            let target = self.target(k + 3).ok_or(AmbiguityKind::UnstructuredJump(k + 3))?;
            cases.push((target, label));
            k += 4;
        }
        if self.opcode(k) != Some(Opcode::Jmp) {
            return Err(AmbiguityKind::UnstructuredJump(k));
        }
        let dispatch = k;
        let fallback = self.target(dispatch).ok_or(AmbiguityKind::UnstructuredJump(dispatch))?;
        match cases.first().map(|(_, label)| label) {
            Some(CaseLabel::Str(_)) => self.hint_expr(&value, &DataType::String),
            Some(_) => self.hint_expr(&value, &DataType::Int),
            None => {}
        }

        let last_label = cases
            .iter()
            .map(|(t, _)| *t)
            .chain([fallback])
            .max()
            .unwrap_or(fallback);
        let finish = (last_label.max(dispatch + 1)..=end)
            .find(|&p| self.is_switch_end(p, value_depth, end))
            .ok_or(AmbiguityKind::UnstructuredJump(dispatch))?;

        let mut positions: Vec<(usize, CaseLabel)> = cases;
        if fallback != finish {
            positions.push((fallback, CaseLabel::Default));
        }
        if positions.iter().any(|(p, _)| *p <= dispatch || *p > finish) {
            return Err(AmbiguityKind::UnstructuredJump(dispatch));
        }
        positions.sort_by_key(|(p, _)| *p);
        let mut groups: Vec<(usize, Vec<CaseLabel>)> = Vec::new();
        for (position, label) in positions {
            match groups.last_mut() {
                Some((at, labels)) if *at == position => labels.push(label),
                _ => groups.push((position, vec![label])),
            }
        }
        if groups.first().is_some_and(|(first, _)| *first != dispatch + 1) {
            return Err(AmbiguityKind::UnstructuredJump(dispatch));
        }

        self.contexts.push(Context {
            brk: finish,
            restart: Vec::new(),
            tail: None,
            reentry: None,
            is_loop: false,
            placeholders: Vec::new(),
        });
        let mut arms = Vec::with_capacity(groups.len());
        let mut built = Ok(());
        for (n, (position, labels)) in groups.iter().enumerate() {
            let segment_end = groups.get(n + 1).map_or(finish, |(next, _)| *next);
            let body = self.tree.block();
            built = self.branch(*position, segment_end, body);
            if built.is_err() {
                break;
            }
            arms.push(Arm {
                labels: labels.clone(),
                body,
            });
        }
        self.contexts.pop();
        built?;
        self.tree.append(block, NodeKind::Switch { value, arms });
        Ok(finish)
    }

    /// The `MOVSP -4` that drops a switch value pushed at `value_depth`.
    /// The same instruction also unwinds the value before a `return` or a
    /// jump out of an arm; those only qualify at the end of the region.
    fn is_switch_end(&self, p: usize, value_depth: i32, end: usize) -> bool {
        if p >= self.range.end
            || self.opcode(p) != Some(Opcode::MovSp)
            || self.instruction(p).operand != Operand::Int(-4)
            || self.depth(p) != Some(value_depth)
        {
            return false;
        }
        match self.opcode(p + 1) {
            Some(Opcode::Retn) => p + 2 == self.range.end,
            Some(Opcode::Jmp) => {
                p + 1 == end
                    || !self.target(p + 1).is_some_and(|t| {
                        self.contexts
                            .iter()
                            .any(|c| c.brk == t || c.restart.contains(&t) || c.tail == Some(t))
                    })
            }
            _ => true,
        }
    }

    /// `STORE_STATE; JMP resume; <action>; RETN; resume:`
    fn deferred_action(&mut self, index: usize) -> Result<usize> {
        if self.opcode(index + 1) != Some(Opcode::Jmp) {
            return Err(AmbiguityKind::UnstructuredJump(index));
        }
        let resume = self
            .target(index + 1)
            .ok_or(AmbiguityKind::UnstructuredJump(index + 1))?;
        if resume < index + 4 || self.opcode(resume - 1) != Some(Opcode::Retn) {
            return Err(AmbiguityKind::UnstructuredJump(index + 1));
        }
        let snapshot = self.stack.clone();
        let contexts = core::mem::take(&mut self.contexts);
        let scratch = self.tree.block();
        let built = self.region(index + 2, resume - 1, scratch);
        self.contexts = contexts;
        built?;
        self.stack = snapshot;
        let action = match self.tree.children(scratch) {
            [only] => match self.tree.kind(*only) {
                NodeKind::Expr(expr) => expr.clone(),
                _ => return Err(AmbiguityKind::StackShape(index)),
            },
            _ => return Err(AmbiguityKind::StackShape(index)),
        };
        self.pending_actions.push(action);
        Ok(resume)
    }
}
