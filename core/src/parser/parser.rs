use hashbrown::HashSet;

use crate::parser::ast::*;
use crate::parser::error::{CompileError, CompileErrorKind};
use crate::parser::include::{SourceFile, SourceLoader};
use crate::parser::lexer::{SpannedToken, Token, tokenize};
use crate::parser::syntax::{AssignOp, BinaryOp, FileId, IncDec, Span, UnaryOp};
use crate::vm::EngineType;

/// Default nesting limit for statements and expressions.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// A parsed script plus every source file that went into it. `files[0]` is
/// the root source; `FileId(n)` in a span indexes this list.
#[derive(Debug, Clone)]
pub struct ParsedUnit {
    pub script: Script,
    pub files: Vec<SourceFile>,
}

pub fn parse(source: &str, loader: &mut dyn SourceLoader) -> Result<ParsedUnit> {
    parse_with_max_depth(source, loader, DEFAULT_MAX_DEPTH)
}

pub fn parse_with_max_depth(
    source: &str,
    loader: &mut dyn SourceLoader,
    max_depth: usize,
) -> Result<ParsedUnit> {
    let mut unit = Unit {
        loader,
        files: vec![SourceFile {
            name: "<input>".to_string(),
            text: source.to_string(),
        }],
        included: HashSet::new(),
        max_depth,
    };
    let items = parse_file(&mut unit, FileId(0))?;
    Ok(ParsedUnit {
        script: Script { items },
        files: unit.files,
    })
}

struct Unit<'l> {
    loader: &'l mut dyn SourceLoader,
    files: Vec<SourceFile>,
    included: HashSet<String>,
    max_depth: usize,
}

fn parse_file(unit: &mut Unit<'_>, file: FileId) -> Result<Vec<Item>> {
    let source = &unit.files[file.0 as usize];
    let name = source.name.clone();
    let tokens = tokenize(&source.text, file).map_err(|e| CompileError::from(e).in_file(&name))?;
    let end = source.text.len() as u32;
    let eof = tokens.last().map_or(Span::new(file, end, end, 1, 1), |t| Span {
        start: end,
        end,
        ..t.span
    });

    let mut parser = Parser {
        unit,
        tokens,
        pos: 0,
        file_name: name,
        depth: 0,
        eof,
    };
    let mut items = Vec::new();
    while parser.peek().is_some() {
        parser.parse_item(&mut items)?;
    }
    Ok(items)
}

struct Parser<'u, 'l> {
    unit: &'u mut Unit<'l>,
    tokens: Vec<SpannedToken>,
    pos: usize,
    file_name: String,
    depth: usize,
    eof: Span,
}

type Result<T> = core::result::Result<T, CompileError>;

impl Parser<'_, '_> {
    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|t| &t.token)
    }

    fn span(&self) -> Span {
        self.tokens.get(self.pos).map_or(self.eof, |t| t.span)
    }

    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(self.eof, |t| t.span)
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<Span> {
        if self.check(token) {
            let span = self.span();
            self.pos += 1;
            Ok(span)
        } else {
            Err(self.unexpected(&format!("'{}'", token)))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span)> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                let span = self.span();
                self.pos += 1;
                Ok((name, span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn error(&self, kind: CompileErrorKind, span: Span) -> CompileError {
        CompileError::new(kind, span).in_file(&self.file_name)
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        let found = self
            .peek()
            .map_or_else(|| "end of input".to_string(), Token::describe);
        self.error(
            CompileErrorKind::UnexpectedToken {
                expected: expected.to_string(),
                found,
            },
            self.span(),
        )
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.unit.max_depth {
            return Err(self.error(
                CompileErrorKind::MaxDepthExceeded {
                    max_depth: self.unit.max_depth,
                },
                self.span(),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    fn parse_item(&mut self, items: &mut Vec<Item>) -> Result<()> {
        if self.check(&Token::Include) {
            return self.parse_include(items);
        }

        if self.check(&Token::KwStruct)
            && matches!(self.peek_at(1), Some(Token::Ident(_)))
            && self.peek_at(2) == Some(&Token::LBrace)
        {
            let def = self.parse_struct_def()?;
            items.push(Item::Struct(def));
            return Ok(());
        }

        let start = self.span();
        let is_const = self.eat(&Token::KwConst);
        let ty = self.parse_type()?;
        let (name, name_span) = self.expect_ident()?;

        if !is_const && self.check(&Token::LParen) {
            let function = self.parse_function(ty, name, start)?;
            items.push(Item::Function(function));
        } else {
            let decl = self.parse_declarators(is_const, ty, name, name_span, start)?;
            items.push(Item::Global(decl));
        }
        Ok(())
    }

    fn parse_include(&mut self, items: &mut Vec<Item>) -> Result<()> {
        let start = self.span();
        self.pos += 1;
        let Some(Token::StrLit(name)) = self.peek().cloned() else {
            return Err(self.unexpected("include name string"));
        };
        let span = start.to(self.span());
        self.pos += 1;

        if !self.unit.included.insert(name.to_ascii_lowercase()) {
            return Ok(());
        }
        let Some(file) = self.unit.loader.load(&name) else {
            return Err(self.error(CompileErrorKind::MissingInclude(name), span));
        };
        let id = FileId(self.unit.files.len() as u16);
        self.unit.files.push(file);
        items.extend(parse_file(self.unit, id)?);
        Ok(())
    }

    fn parse_struct_def(&mut self) -> Result<StructDef> {
        let start = self.expect(&Token::KwStruct)?;
        let (name, _) = self.expect_ident()?;
        self.expect(&Token::LBrace)?;
        let mut members = Vec::new();
        while !self.eat(&Token::RBrace) {
            let ty = self.parse_type()?;
            loop {
                let (member, span) = self.expect_ident()?;
                members.push((ty.clone(), member, span));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::Semicolon)?;
        }
        self.expect(&Token::Semicolon)?;
        Ok(StructDef {
            name,
            members,
            span: start.to(self.prev_span()),
        })
    }

    fn is_type_start(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                Token::KwInt
                    | Token::KwFloat
                    | Token::KwString
                    | Token::KwObject
                    | Token::KwVector
                    | Token::KwVoid
                    | Token::KwAction
                    | Token::KwEffect
                    | Token::KwEvent
                    | Token::KwLocation
                    | Token::KwTalent
                    | Token::KwStruct
            )
        )
    }

    fn parse_type(&mut self) -> Result<TypeRef> {
        let span = self.span();
        let name = match self.peek() {
            Some(Token::KwInt) => TypeName::Int,
            Some(Token::KwFloat) => TypeName::Float,
            Some(Token::KwString) => TypeName::String,
            Some(Token::KwObject) => TypeName::Object,
            Some(Token::KwVector) => TypeName::Vector,
            Some(Token::KwVoid) => TypeName::Void,
            Some(Token::KwAction) => TypeName::Action,
            Some(Token::KwEffect) => TypeName::Engine(EngineType::Effect),
            Some(Token::KwEvent) => TypeName::Engine(EngineType::Event),
            Some(Token::KwLocation) => TypeName::Engine(EngineType::Location),
            Some(Token::KwTalent) => TypeName::Engine(EngineType::Talent),
            Some(Token::KwStruct) => {
                self.pos += 1;
                let (name, name_span) = self.expect_ident()?;
                return Ok(TypeRef {
                    name: TypeName::Struct(name),
                    span: span.to(name_span),
                });
            }
            _ => return Err(self.unexpected("type")),
        };
        self.pos += 1;
        Ok(TypeRef { name, span })
    }

    fn parse_function(&mut self, ret: TypeRef, name: String, start: Span) -> Result<FunctionDef> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if self.check(&Token::KwVoid) && self.peek_at(1) == Some(&Token::RParen) {
            self.pos += 1;
        }
        if !self.check(&Token::RParen) {
            loop {
                let ty = self.parse_type()?;
                let (param, span) = self.expect_ident()?;
                let default = if self.eat(&Token::Assign) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                params.push(ParamDecl {
                    ty,
                    name: param,
                    default,
                    span,
                });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;

        let body = if self.eat(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_block()?)
        };
        Ok(FunctionDef {
            ret,
            name,
            params,
            body,
            span: start.to(self.prev_span()),
        })
    }

    /// Parses the rest of a declaration whose first name was already read.
    fn parse_declarators(
        &mut self,
        is_const: bool,
        ty: TypeRef,
        first: String,
        first_span: Span,
        start: Span,
    ) -> Result<VarDecl> {
        let mut declarators = Vec::new();
        let (mut name, mut span) = (first, first_span);
        loop {
            let init = if self.eat(&Token::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            declarators.push(Declarator { name, init, span });
            if !self.eat(&Token::Comma) {
                break;
            }
            (name, span) = self.expect_ident()?;
        }
        self.expect(&Token::Semicolon)?;
        Ok(VarDecl {
            is_const,
            ty,
            declarators,
            span: start.to(self.prev_span()),
        })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_block(&mut self) -> Result<Block> {
        let start = self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.unexpected("'}'"));
            }
            stmts.push(self.parse_stmt()?);
        }
        let end = self.expect(&Token::RBrace)?;
        Ok(Block {
            stmts,
            span: start.to(end),
        })
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        self.enter()?;
        let stmt = self.parse_stmt_inner()?;
        self.leave();
        Ok(stmt)
    }

    fn parse_stmt_inner(&mut self) -> Result<Stmt> {
        let start = self.span();
        let kind = match self.peek() {
            Some(Token::LBrace) => StmtKind::Block(self.parse_block()?),
            Some(Token::KwIf) => {
                self.pos += 1;
                let cond = self.parse_paren_expr()?;
                let then_branch = Box::new(self.parse_stmt()?);
                let else_branch = if self.eat(&Token::KwElse) {
                    Some(Box::new(self.parse_stmt()?))
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then_branch,
                    else_branch,
                }
            }
            Some(Token::KwWhile) => {
                self.pos += 1;
                let cond = self.parse_paren_expr()?;
                let body = Box::new(self.parse_stmt()?);
                StmtKind::While { cond, body }
            }
            Some(Token::KwDo) => {
                self.pos += 1;
                let body = Box::new(self.parse_stmt()?);
                self.expect(&Token::KwWhile)?;
                let cond = self.parse_paren_expr()?;
                self.expect(&Token::Semicolon)?;
                StmtKind::DoWhile { body, cond }
            }
            Some(Token::KwFor) => {
                self.pos += 1;
                self.expect(&Token::LParen)?;
                let init = self.parse_optional_expr(&Token::Semicolon)?;
                self.expect(&Token::Semicolon)?;
                let cond = self.parse_optional_expr(&Token::Semicolon)?;
                self.expect(&Token::Semicolon)?;
                let step = self.parse_optional_expr(&Token::RParen)?;
                self.expect(&Token::RParen)?;
                let body = Box::new(self.parse_stmt()?);
                StmtKind::For {
                    init,
                    cond,
                    step,
                    body,
                }
            }
            Some(Token::KwSwitch) => {
                self.pos += 1;
                let value = self.parse_paren_expr()?;
                let body = self.parse_block()?;
                StmtKind::Switch { value, body }
            }
            Some(Token::KwCase) => {
                self.pos += 1;
                let label = self.parse_expr()?;
                self.expect(&Token::Colon)?;
                StmtKind::Case(label)
            }
            Some(Token::KwDefault) => {
                self.pos += 1;
                self.expect(&Token::Colon)?;
                StmtKind::Default
            }
            Some(Token::KwBreak) => {
                self.pos += 1;
                self.expect(&Token::Semicolon)?;
                StmtKind::Break
            }
            Some(Token::KwContinue) => {
                self.pos += 1;
                self.expect(&Token::Semicolon)?;
                StmtKind::Continue
            }
            Some(Token::KwReturn) => {
                self.pos += 1;
                let value = self.parse_optional_expr(&Token::Semicolon)?;
                self.expect(&Token::Semicolon)?;
                StmtKind::Return(value)
            }
            Some(Token::Semicolon) => {
                self.pos += 1;
                StmtKind::Empty
            }
            Some(Token::KwConst) => {
                self.pos += 1;
                let ty = self.parse_type()?;
                let (name, span) = self.expect_ident()?;
                StmtKind::Decl(self.parse_declarators(true, ty, name, span, start)?)
            }
            _ if self.is_type_start() => {
                let ty = self.parse_type()?;
                let (name, span) = self.expect_ident()?;
                StmtKind::Decl(self.parse_declarators(false, ty, name, span, start)?)
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(&Token::Semicolon)?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt {
            kind,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_paren_expr(&mut self) -> Result<Expr> {
        self.expect(&Token::LParen)?;
        let expr = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        Ok(expr)
    }

    fn parse_optional_expr(&mut self, terminator: &Token) -> Result<Option<Expr>> {
        if self.check(terminator) {
            Ok(None)
        } else {
            self.parse_expr().map(Some)
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.enter()?;
        let expr = self.parse_assignment()?;
        self.leave();
        Ok(expr)
    }

    fn assign_op(&self) -> Option<AssignOp> {
        let op = match self.peek()? {
            Token::Assign => return Some(AssignOp::Assign),
            Token::PlusAssign => BinaryOp::Add,
            Token::MinusAssign => BinaryOp::Sub,
            Token::StarAssign => BinaryOp::Mul,
            Token::SlashAssign => BinaryOp::Div,
            Token::PercentAssign => BinaryOp::Mod,
            Token::AmpAssign => BinaryOp::BitAnd,
            Token::PipeAssign => BinaryOp::BitOr,
            Token::CaretAssign => BinaryOp::BitXor,
            Token::ShlAssign => BinaryOp::Shl,
            Token::ShrAssign => BinaryOp::Shr,
            Token::UShrAssign => BinaryOp::UShr,
            _ => return None,
        };
        Some(AssignOp::Compound(op))
    }

    fn binary_op(&self) -> Option<BinaryOp> {
        Some(match self.peek()? {
            Token::OrOr => BinaryOp::LogicalOr,
            Token::AndAnd => BinaryOp::LogicalAnd,
            Token::Pipe => BinaryOp::BitOr,
            Token::Caret => BinaryOp::BitXor,
            Token::Amp => BinaryOp::BitAnd,
            Token::EqEq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            Token::Shl => BinaryOp::Shl,
            Token::Shr => BinaryOp::Shr,
            Token::UShr => BinaryOp::UShr,
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Percent => BinaryOp::Mod,
            _ => return None,
        })
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let target = self.parse_binary(1)?;
        let Some(op) = self.assign_op() else {
            return Ok(target);
        };
        if !target.is_lvalue() {
            return Err(self.error(CompileErrorKind::NotAssignable, target.span));
        }
        self.pos += 1;
        let value = self.parse_expr()?;
        let span = target.span.to(value.span);
        Ok(Expr::new(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        ))
    }

    /// Precedence climbing over the left-associative binary operators.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.binary_op() {
            if op.precedence() < min_prec {
                break;
            }
            self.pos += 1;
            let right = self.parse_binary(op.precedence() + 1)?;
            let span = left.span.to(right.span);
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.enter()?;
        let start = self.span();
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Bang) => Some(UnaryOp::Not),
            Some(Token::Tilde) => Some(UnaryOp::BitNot),
            _ => None,
        };
        let expr = if let Some(op) = op {
            self.pos += 1;
            let operand = self.parse_unary()?;
            let span = start.to(operand.span);
            Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            )
        } else if let Some(op) = self.inc_dec() {
            self.pos += 1;
            let target = self.parse_unary()?;
            if !target.is_lvalue() {
                return Err(self.error(CompileErrorKind::NotAssignable, target.span));
            }
            let span = start.to(target.span);
            Expr::new(
                ExprKind::IncDec {
                    op,
                    prefix: true,
                    target: Box::new(target),
                },
                span,
            )
        } else {
            self.parse_postfix()?
        };
        self.leave();
        Ok(expr)
    }

    fn inc_dec(&self) -> Option<IncDec> {
        match self.peek() {
            Some(Token::PlusPlus) => Some(IncDec::Increment),
            Some(Token::MinusMinus) => Some(IncDec::Decrement),
            _ => None,
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let (member, span) = self.expect_ident()?;
                let full = expr.span.to(span);
                expr = Expr::new(
                    ExprKind::Member {
                        base: Box::new(expr),
                        member,
                    },
                    full,
                );
            } else if let Some(op) = self.inc_dec() {
                if !expr.is_lvalue() {
                    return Err(self.error(CompileErrorKind::NotAssignable, expr.span));
                }
                let span = expr.span.to(self.span());
                self.pos += 1;
                expr = Expr::new(
                    ExprKind::IncDec {
                        op,
                        prefix: false,
                        target: Box::new(expr),
                    },
                    span,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let start = self.span();
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("expression"));
        };
        let kind = match token {
            Token::IntLit(v) => {
                self.pos += 1;
                ExprKind::Int(v)
            }
            Token::FloatLit(v) => {
                self.pos += 1;
                ExprKind::Float(v)
            }
            Token::StrLit(s) => {
                self.pos += 1;
                ExprKind::Str(s)
            }
            Token::Ident(name) => {
                self.pos += 1;
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.check(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&Token::RParen)?;
                    ExprKind::Call { name, args }
                } else {
                    ExprKind::Ident(name)
                }
            }
            Token::LParen => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                return Ok(Expr::new(inner.kind, start.to(self.prev_span())));
            }
            Token::LBracket => {
                self.pos += 1;
                let x = self.parse_expr()?;
                self.expect(&Token::Comma)?;
                let y = self.parse_expr()?;
                self.expect(&Token::Comma)?;
                let z = self.parse_expr()?;
                self.expect(&Token::RBracket)?;
                ExprKind::Vector(Box::new([x, y, z]))
            }
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr::new(kind, start.to(self.prev_span())))
    }
}
