use crate::parser::syntax::{AssignOp, BinaryOp, IncDec, Span, UnaryOp};
use crate::vm::EngineType;

/// A whole compilation unit with every include spliced in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Struct(StructDef),
    Global(VarDecl),
    /// A definition, or a prototype when `body` is `None`.
    Function(FunctionDef),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeName {
    Void,
    Int,
    Float,
    String,
    Object,
    Vector,
    Action,
    Engine(EngineType),
    Struct(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeRef {
    pub name: TypeName,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub members: Vec<(TypeRef, String, Span)>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub is_const: bool,
    pub ty: TypeRef,
    pub declarators: Vec<Declarator>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub ret: TypeRef,
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub body: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub ty: TypeRef,
    pub name: String,
    pub default: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Block(Block),
    Decl(VarDecl),
    Expr(Expr),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Option<Expr>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    /// `case` and `default` labels appear as statements inside `body`.
    Switch {
        value: Expr,
        body: Block,
    },
    Case(Expr),
    Default,
    Break,
    Continue,
    Return(Option<Expr>),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i32),
    Float(f32),
    Str(String),
    Ident(String),
    Vector(Box<[Expr; 3]>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Member {
        base: Box<Expr>,
        member: String,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    IncDec {
        op: IncDec,
        prefix: bool,
        target: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Whether the expression denotes a storage location.
    pub fn is_lvalue(&self) -> bool {
        match &self.kind {
            ExprKind::Ident(_) => true,
            ExprKind::Member { base, .. } => base.is_lvalue(),
            _ => false,
        }
    }
}
