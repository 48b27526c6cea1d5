//! Script text from rebuilt trees.

use core::fmt::Write;

use hashbrown::HashMap;

use crate::decompiler::AmbiguityKind;
use crate::decompiler::nodes::{CaseLabel, Expr, NodeId, NodeKind, Tree, VarId};
use crate::decompiler::symbolic::Analysis;
use crate::decompiler::vars::Structs;
use crate::parser::{BinaryOp, UnaryOp};
use crate::types::{DataType, Dialect};

type Result<T> = core::result::Result<T, AmbiguityKind>;

const INDENT: &str = "    ";

/// Precedence of atoms, calls and postfix forms.
const ATOM: u8 = 12;
/// Precedence of prefix operators and negative literals.
const PREFIX: u8 = 11;
const ASSIGN: u8 = 0;

/// Names and signatures every printed body refers to.
pub(crate) struct Symbols {
    pub sub_names: Vec<String>,
    /// Parameter groups of each subroutine as (first slot, slot count).
    pub params: Vec<Vec<(VarId, usize)>>,
    pub returns: Vec<DataType>,
    pub names: HashMap<VarId, String>,
}

pub(crate) struct Printer<'a> {
    analysis: &'a Analysis,
    dialect: &'a Dialect,
    structs: &'a mut Structs,
    symbols: &'a Symbols,
    locals: HashMap<VarId, String>,
    out: String,
}

impl<'a> Printer<'a> {
    pub fn new(
        analysis: &'a Analysis,
        dialect: &'a Dialect,
        structs: &'a mut Structs,
        symbols: &'a Symbols,
    ) -> Self {
        Self {
            analysis,
            dialect,
            structs,
            symbols,
            locals: HashMap::new(),
            out: String::new(),
        }
    }

    pub fn finish(self) -> String {
        self.out
    }

    /// Statements of a top-level block, without a trailing bare `return`.
    pub fn body(&mut self, tree: &Tree, root: NodeId, depth: usize) -> Result<()> {
        let mut children = tree.children(root);
        if let Some((last, rest)) = children.split_last()
            && matches!(tree.kind(*last), NodeKind::Return(None))
        {
            children = rest;
        }
        for child in children {
            self.statement(tree, *child, depth)?;
        }
        Ok(())
    }

    /// `type name[ = init];` for a global or local declaration.
    pub fn declaration(&mut self, var: VarId, init: Option<&Expr>, depth: usize) -> Result<()> {
        if !self.analysis.vars.is_group_start(var) {
            return Ok(());
        }
        let ty = self.analysis.vars.group_type(var, self.structs);
        let name = self.name_of(var);
        let line = match init {
            Some(init) => format!("{} {} = {};", ty, name, self.expr(init)?.0),
            None => format!("{} {};", ty, name),
        };
        self.line(depth, &line);
        Ok(())
    }

    fn line(&mut self, depth: usize, text: &str) {
        for _ in 0..depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn name_of(&mut self, var: VarId) -> String {
        let (start, _) = self.analysis.vars.group(var);
        if let Some(name) = self.symbols.names.get(&start) {
            return name.clone();
        }
        let next = self.locals.len() + 1;
        self.locals
            .entry(start)
            .or_insert_with(|| format!("v{}", next))
            .clone()
    }

    fn block(&mut self, tree: &Tree, block: NodeId, depth: usize) -> Result<()> {
        for child in tree.children(block) {
            self.statement(tree, *child, depth)?;
        }
        Ok(())
    }

    fn statement(&mut self, tree: &Tree, node: NodeId, depth: usize) -> Result<()> {
        match tree.kind(node) {
            NodeKind::Block(_) => {
                self.line(depth, "{");
                self.block(tree, node, depth + 1)?;
                self.line(depth, "}");
            }
            NodeKind::Decl { var, init } => self.declaration(*var, init.as_ref(), depth)?,
            NodeKind::Expr(expr) => {
                let text = self.expr(expr)?.0;
                self.line(depth, &format!("{};", text));
            }
            NodeKind::If { cond, then, els } => self.if_chain(tree, cond, *then, *els, depth, "")?,
            NodeKind::While { cond, body } => {
                let cond = self.expr(cond)?.0;
                self.line(depth, &format!("while ({}) {{", cond));
                self.block(tree, *body, depth + 1)?;
                self.line(depth, "}");
            }
            NodeKind::DoWhile { body, cond } => {
                self.line(depth, "do {");
                self.block(tree, *body, depth + 1)?;
                let cond = self.expr(cond)?.0;
                self.line(depth, &format!("}} while ({});", cond));
            }
            NodeKind::For { cond, step, body } => {
                let cond = self.expr(cond)?.0;
                let step = self.expr(step)?.0;
                self.line(depth, &format!("for (; {}; {}) {{", cond, step));
                self.block(tree, *body, depth + 1)?;
                self.line(depth, "}");
            }
            NodeKind::Switch { value, arms } => {
                let value = self.expr(value)?.0;
                self.line(depth, &format!("switch ({}) {{", value));
                for arm in arms {
                    for label in &arm.labels {
                        let text = match label {
                            CaseLabel::Int(v) => format!("case {}:", int_literal(*v).0),
                            CaseLabel::Str(s) => format!("case {}:", string_literal(s)),
                            CaseLabel::Default => "default:".to_string(),
                        };
                        self.line(depth + 1, &text);
                    }
                    self.block(tree, arm.body, depth + 2)?;
                }
                self.line(depth, "}");
            }
            NodeKind::Break => self.line(depth, "break;"),
            NodeKind::Continue | NodeKind::ContinueTail => self.line(depth, "continue;"),
            NodeKind::Return(None) => self.line(depth, "return;"),
            NodeKind::Return(Some(value)) => {
                let value = self.expr(value)?.0;
                self.line(depth, &format!("return {};", value));
            }
            NodeKind::Empty => {}
        }
        Ok(())
    }

    fn if_chain(
        &mut self,
        tree: &Tree,
        cond: &Expr,
        then: NodeId,
        els: Option<NodeId>,
        depth: usize,
        prefix: &str,
    ) -> Result<()> {
        // `if (c) {} else { x }` reads better inverted.
        if let Some(els) = els
            && tree.children(then).is_empty()
        {
            let inverted = cond.clone().not();
            let text = self.expr(&inverted)?.0;
            self.line(depth, &format!("{}if ({}) {{", prefix, text));
            self.block(tree, els, depth + 1)?;
            self.line(depth, "}");
            return Ok(());
        }

        let text = self.expr(cond)?.0;
        self.line(depth, &format!("{}if ({}) {{", prefix, text));
        self.block(tree, then, depth + 1)?;
        let Some(els) = els else {
            self.line(depth, "}");
            return Ok(());
        };
        if let [only] = tree.children(els)
            && let NodeKind::If {
                cond,
                then,
                els: nested,
            } = tree.kind(*only)
        {
            return self.if_chain(tree, cond, *then, *nested, depth, "} else ");
        }
        self.line(depth, "} else {");
        self.block(tree, els, depth + 1)?;
        self.line(depth, "}");
        Ok(())
    }

    // === Expressions ===

    /// Text of `expr` and the precedence of its outermost operator.
    fn expr(&mut self, expr: &Expr) -> Result<(String, u8)> {
        let printed = match expr {
            Expr::Int(v) => int_literal(*v),
            Expr::Float(v) => {
                let text = float_literal(*v)?;
                let prec = if text.starts_with('-') { PREFIX } else { ATOM };
                (text, prec)
            }
            Expr::Str(s) => (string_literal(s), ATOM),
            Expr::Object(0) => ("OBJECT_SELF".to_string(), ATOM),
            Expr::Object(1) => ("OBJECT_INVALID".to_string(), ATOM),
            Expr::Object(id) => {
                return Err(AmbiguityKind::Unprintable(format!("object id {}", id)));
            }
            Expr::Var { first, count } => (self.var(*first, *count)?, ATOM),
            Expr::Vector(parts) => {
                let mut texts = Vec::with_capacity(3);
                for part in parts.iter() {
                    texts.push(self.expr(part)?.0);
                }
                (format!("[{}]", texts.join(", ")), ATOM)
            }
            Expr::Member {
                base,
                offset,
                count,
            } => {
                let ty = self.expr_type(base);
                let path = self.member_path(&ty, *offset, *count)?;
                let base = self.operand(base, ATOM)?;
                (format!("{}{}", base, path), ATOM)
            }
            Expr::Unary(op, operand) => {
                let inner = self.operand(operand, PREFIX)?;
                let nested = matches!(**operand, Expr::Unary(..))
                    || (inner.starts_with('-') || inner.starts_with('+'));
                let inner = if nested && !inner.starts_with('(') {
                    format!("({})", inner)
                } else {
                    inner
                };
                (format!("{}{}", op.symbol(), inner), PREFIX)
            }
            Expr::Binary(op, left, right) => {
                let prec = op.precedence();
                let left = self.operand(left, prec)?;
                let right = self.operand(right, prec + 1)?;
                (format!("{} {} {}", left, op.symbol(), right), prec)
            }
            Expr::Assign {
                first,
                count,
                value,
            } => {
                let target = self.var(*first, *count)?;
                if let Expr::Binary(op, left, right) = &**value
                    && compound(*op)
                    && matches!(**left, Expr::Var { first: f, count: c } if f == *first && c == *count)
                {
                    let right = self.operand(right, ASSIGN)?;
                    (format!("{} {}= {}", target, op.symbol(), right), ASSIGN)
                } else {
                    let value = self.operand(value, ASSIGN)?;
                    (format!("{} = {}", target, value), ASSIGN)
                }
            }
            Expr::IncDec { op, prefix, var } => {
                let name = self.var(*var, 1)?;
                if *prefix {
                    (format!("{}{}", op.symbol(), name), PREFIX)
                } else {
                    (format!("{}{}", name, op.symbol()), ATOM)
                }
            }
            Expr::Engine { routine, args } => {
                let signature = self
                    .dialect
                    .routine(*routine)
                    .ok_or(AmbiguityKind::UnknownRoutine(*routine))?;
                let mut texts = Vec::with_capacity(args.len());
                for arg in args {
                    texts.push(self.operand(arg, ASSIGN + 1)?);
                }
                (format!("{}({})", signature.name, texts.join(", ")), ATOM)
            }
            Expr::User { sub, args } => {
                let groups = &self.symbols.params[*sub];
                let mut texts = Vec::with_capacity(groups.len());
                let mut pieces = args.iter();
                for &(_, len) in groups {
                    let piece = pieces.next().ok_or_else(argument_shape)?;
                    if piece.parts == len {
                        texts.push(self.operand(&piece.expr, ASSIGN + 1)?);
                    } else if len == 3 && piece.parts == 1 {
                        let (Some(y), Some(z)) = (pieces.next(), pieces.next()) else {
                            return Err(argument_shape());
                        };
                        if y.parts != 1 || z.parts != 1 {
                            return Err(argument_shape());
                        }
                        let parts = [&piece.expr, &y.expr, &z.expr];
                        let mut components = Vec::with_capacity(3);
                        for part in parts {
                            components.push(self.expr(part)?.0);
                        }
                        texts.push(format!("[{}]", components.join(", ")));
                    } else {
                        return Err(argument_shape());
                    }
                }
                if pieces.next().is_some() {
                    return Err(argument_shape());
                }
                (
                    format!("{}({})", self.symbols.sub_names[*sub], texts.join(", ")),
                    ATOM,
                )
            }
        };
        Ok(printed)
    }

    /// `expr`, parenthesized when it binds looser than `min`.
    fn operand(&mut self, expr: &Expr, min: u8) -> Result<String> {
        let (text, prec) = self.expr(expr)?;
        Ok(if prec < min { format!("({})", text) } else { text })
    }

    /// A run of variable slots: a whole variable or one of its members.
    fn var(&mut self, first: VarId, count: usize) -> Result<String> {
        let (start, len) = self.analysis.vars.group(first);
        let name = self.name_of(start);
        if first == start && count == len {
            return Ok(name);
        }
        let ty = self.analysis.vars.group_type(start, self.structs);
        let path = self.member_path(&ty, first - start, count)?;
        Ok(format!("{}{}", name, path))
    }

    /// Member access selecting `count` slots at slot `offset` of a `ty`.
    fn member_path(&self, ty: &DataType, offset: usize, count: usize) -> Result<String> {
        match ty {
            DataType::Vector if count == 1 && offset < 3 => Ok(format!(".{}", ["x", "y", "z"][offset])),
            DataType::Struct(st) => {
                let mut at = 0;
                for member in &st.members {
                    let size = member.ty.size() / 4;
                    if at == offset && size == count {
                        return Ok(format!(".{}", member.name));
                    }
                    if offset >= at && offset + count <= at + size {
                        let inner = self.member_path(&member.ty, offset - at, count)?;
                        return Ok(format!(".{}{}", member.name, inner));
                    }
                    at += size;
                }
                Err(member_shape())
            }
            _ => Err(member_shape()),
        }
    }

    fn expr_type(&mut self, expr: &Expr) -> DataType {
        match expr {
            Expr::Int(_) | Expr::IncDec { .. } => DataType::Int,
            Expr::Float(_) => DataType::Float,
            Expr::Str(_) => DataType::String,
            Expr::Object(_) => DataType::Object,
            Expr::Vector(_) => DataType::Vector,
            Expr::Var { first, count } | Expr::Assign { first, count, .. } => {
                let (start, len) = self.analysis.vars.group(*first);
                if *first == start && *count == len {
                    self.analysis.vars.group_type(start, self.structs)
                } else {
                    self.analysis.vars.run_type(*first, *count)
                }
            }
            Expr::Member {
                base,
                offset,
                count,
            } => match self.expr_type(base) {
                DataType::Vector if *count == 1 => DataType::Float,
                DataType::Struct(st) => {
                    let mut at = 0;
                    for member in &st.members {
                        if at == *offset {
                            return member.ty.clone();
                        }
                        at += member.ty.size() / 4;
                    }
                    DataType::Unknown
                }
                _ => DataType::Unknown,
            },
            Expr::Unary(UnaryOp::Neg, operand) => self.expr_type(operand),
            Expr::Unary(..) => DataType::Int,
            Expr::Binary(op, left, right) => {
                if op.is_comparison() || matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr) {
                    return DataType::Int;
                }
                let (left, right) = (self.expr_type(left), self.expr_type(right));
                if left == DataType::Vector || right == DataType::Vector {
                    DataType::Vector
                } else if left == DataType::Float || right == DataType::Float {
                    DataType::Float
                } else {
                    left
                }
            }
            Expr::Engine { routine, .. } => self
                .dialect
                .routine(*routine)
                .map_or(DataType::Unknown, |signature| signature.ret.clone()),
            Expr::User { sub, .. } => self.symbols.returns[*sub].clone(),
        }
    }

    /// Writes a function header line.
    pub fn signature(&mut self, sub: usize, terminator: &str) {
        let mut params = Vec::new();
        for &(start, _) in &self.symbols.params[sub] {
            let ty = self.analysis.vars.group_type(start, self.structs);
            params.push(format!("{} {}", ty, self.name_of(start)));
        }
        let _ = writeln!(
            self.out,
            "{} {}({}){}",
            self.symbols.returns[sub],
            self.symbols.sub_names[sub],
            params.join(", "),
            terminator
        );
    }

    pub fn raw(&mut self, text: &str) {
        self.out.push_str(text);
    }
}

fn argument_shape() -> AmbiguityKind {
    AmbiguityKind::Unprintable("arguments do not match the parameters".to_string())
}

fn member_shape() -> AmbiguityKind {
    AmbiguityKind::Unprintable("access to part of a variable".to_string())
}

/// Operators with a compound assignment form.
fn compound(op: BinaryOp) -> bool {
    !op.is_comparison() && !matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
}

fn int_literal(v: i32) -> (String, u8) {
    match v {
        i32::MIN => ("(-2147483647 - 1)".to_string(), ATOM),
        v if v < 0 => (v.to_string(), PREFIX),
        v => (v.to_string(), ATOM),
    }
}

/// Shortest text that reads back as the same `f32`, always with a point.
pub(crate) fn float_literal(v: f32) -> Result<String> {
    if !v.is_finite() {
        return Err(AmbiguityKind::Unprintable(format!("float {}", v)));
    }
    let mut text = format!("{:?}", v);
    if !text.contains('.') {
        match text.find('e') {
            Some(exponent) => text.insert_str(exponent, ".0"),
            None => text.push_str(".0"),
        }
    }
    Ok(text)
}

pub(crate) fn string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_float_literals_keep_a_point() {
        assert_eq!(float_literal(1.0).unwrap(), "1.0");
        assert_eq!(float_literal(0.1).unwrap(), "0.1");
        assert_eq!(float_literal(-2.5).unwrap(), "-2.5");
        assert_eq!(float_literal(1e20).unwrap(), "1.0e20");
        assert!(float_literal(f32::NAN).is_err());
    }

    #[test]
    fn test_string_literal_escapes() {
        assert_eq!(string_literal("a\"b\\c\n\t"), r#""a\"b\\c\n\t""#);
    }

    #[test]
    fn test_int_literals() {
        assert_eq!(int_literal(7), ("7".to_string(), ATOM));
        assert_eq!(int_literal(-7), ("-7".to_string(), PREFIX));
        assert_eq!(int_literal(i32::MIN).0, "(-2147483647 - 1)");
    }
}
