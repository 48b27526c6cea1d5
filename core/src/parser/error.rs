use thiserror::Error;

use crate::api::{Diagnostic, Severity};
use crate::parser::Span;

/// Specific kinds of lexical errors
#[derive(Debug, Clone, PartialEq, Eq, Default, Error)]
pub enum LexErrorKind {
    #[default]
    #[error("unexpected character")]
    UnexpectedCharacter,
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unterminated block comment")]
    UnterminatedComment,
    #[error("malformed number literal")]
    MalformedNumber,
    #[error("invalid escape sequence '\\{0}'")]
    InvalidEscape(char),
    #[error("character '{0}' cannot be encoded in Latin-1")]
    NonLatin1(char),
}

/// A lexical error at a source position. Aborts the compilation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}:{}: {kind}", span.line, span.column)]
pub struct LexError {
    pub kind: LexErrorKind,
    pub span: Span,
}

/// Specific kinds of compile errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileErrorKind {
    #[error("{0}")]
    Lex(LexErrorKind),

    #[error("expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },

    #[error("undefined symbol '{0}'")]
    UndefinedSymbol(String),

    #[error("undefined struct '{0}'")]
    UndefinedStruct(String),

    #[error("type {ty} has no member '{member}'")]
    UnknownMember { ty: String, member: String },

    #[error("'{name}' expects {expected} argument(s), found {found}")]
    ArityMismatch {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("operator '{op}' cannot be applied to {left} and {right}")]
    InvalidOperands {
        op: String,
        left: String,
        right: String,
    },

    #[error("'{0}' is already declared in this scope")]
    Redeclaration(String),

    #[error("declaration of '{0}' does not match its prototype")]
    SignatureMismatch(String),

    #[error("function '{0}' is declared but never defined")]
    MissingDefinition(String),

    #[error("cannot resolve include \"{0}\"")]
    MissingInclude(String),

    #[error("no entry point: expected 'void main()' or 'int StartingConditional()'")]
    MissingEntryPoint,

    #[error("function '{0}' must return a value")]
    MissingReturn(String),

    #[error("expression is not assignable")]
    NotAssignable,

    #[error("'{0}' outside of a loop or switch")]
    MisplacedJump(&'static str),

    #[error("case label must be an integer or string constant")]
    InvalidCaseLabel,

    #[error("action values can only be passed to engine routines")]
    InvalidAction,

    #[error("'{0}' requires a constant expression")]
    NotConstant(String),

    #[error("declarations are not allowed directly inside a switch block")]
    DeclarationInSwitch,

    #[error("stack offset {0} exceeds the addressable range")]
    StackOverflow(i64),

    #[error("nesting depth exceeds maximum of {max_depth} levels")]
    MaxDepthExceeded { max_depth: usize },
}

/// A compile error with the file and position it was detected at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{file}:{}:{}: {kind}", span.line, span.column)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    /// Name of the source file, `<input>` for the root source.
    pub file: String,
    pub span: Span,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, span: Span) -> Self {
        Self {
            kind,
            file: String::from("<input>"),
            span,
        }
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    /// Convert to a Diagnostic for API boundary
    pub fn to_diagnostic(&self) -> Diagnostic {
        let (code, help) = match &self.kind {
            CompileErrorKind::Lex(kind) => (
                match kind {
                    LexErrorKind::UnexpectedCharacter => "L001",
                    LexErrorKind::UnterminatedString => "L002",
                    LexErrorKind::UnterminatedComment => "L003",
                    LexErrorKind::MalformedNumber => "L004",
                    LexErrorKind::InvalidEscape(_) => "L005",
                    LexErrorKind::NonLatin1(_) => "L006",
                },
                None,
            ),
            CompileErrorKind::UnexpectedToken { .. } => ("C001", None),
            CompileErrorKind::UndefinedSymbol(_) => (
                "C002",
                Some("Check the spelling or declare it before use"),
            ),
            CompileErrorKind::UndefinedStruct(_) => ("C003", None),
            CompileErrorKind::UnknownMember { .. } => ("C004", None),
            CompileErrorKind::ArityMismatch { .. } => ("C005", None),
            CompileErrorKind::TypeMismatch { .. } => ("C006", None),
            CompileErrorKind::InvalidOperands { .. } => ("C007", None),
            CompileErrorKind::Redeclaration(_) => ("C008", None),
            CompileErrorKind::SignatureMismatch(_) => ("C009", None),
            CompileErrorKind::MissingDefinition(_) => ("C010", None),
            CompileErrorKind::MissingInclude(_) => (
                "C011",
                Some("Add the directory containing the file to the include path"),
            ),
            CompileErrorKind::MissingEntryPoint => ("C012", None),
            CompileErrorKind::MissingReturn(_) => ("C013", None),
            CompileErrorKind::NotAssignable => ("C014", None),
            CompileErrorKind::MisplacedJump(_) => ("C015", None),
            CompileErrorKind::InvalidCaseLabel => ("C016", None),
            CompileErrorKind::InvalidAction => ("C017", None),
            CompileErrorKind::NotConstant(_) => ("C020", None),
            CompileErrorKind::DeclarationInSwitch => (
                "C021",
                Some("Wrap the case body in braces"),
            ),
            CompileErrorKind::StackOverflow(_) => ("C018", None),
            CompileErrorKind::MaxDepthExceeded { .. } => (
                "C019",
                Some("Reduce nesting or split the code into functions"),
            ),
        };

        Diagnostic {
            severity: Severity::Error,
            message: self.kind.to_string(),
            span: self.span,
            file: self.file.clone(),
            help: help.map(String::from),
            code: Some(code.to_string()),
        }
    }
}

impl From<LexError> for CompileError {
    fn from(err: LexError) -> Self {
        CompileError::new(CompileErrorKind::Lex(err.kind), err.span)
    }
}
