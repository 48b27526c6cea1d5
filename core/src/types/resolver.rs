//! Symbol and type resolution.
//!
//! The resolver owns every table a compilation consults: the dialect's
//! engine routines and constants, user structs, user functions, globals and
//! the lexical scopes of the function being compiled. Locals are bound to a
//! byte position relative to the frame base; the code generator turns that
//! into an SP-relative offset using its current stack depth.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::parser::{CompileError, CompileErrorKind, Span, TypeName, TypeRef};
use crate::scope_stack::{BindError, Scope, ScopeStack};
use crate::types::{
    ConstantValue, DataType, Dialect, ScriptFunctionSignature, StructMember, StructType,
};
use crate::vm::Label;

/// A variable slot inside the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVar {
    pub ty: DataType,
    /// Byte position relative to the frame base; parameters are negative.
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocalSymbol {
    Var(LocalVar),
    Const(ConstantValue),
}

/// A global variable, addressed relative to the globals block.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVar {
    pub ty: DataType,
    /// Byte position from the start of the globals block.
    pub position: i64,
}

#[derive(Debug, Clone)]
pub struct UserFunction {
    pub signature: ScriptFunctionSignature,
    pub label: Label,
    pub defined: bool,
    pub span: Span,
}

/// What a name denotes at a use site.
#[derive(Debug, Clone)]
pub enum Symbol {
    Local(LocalVar),
    Global(GlobalVar),
    Constant(ConstantValue),
}

/// What a called name denotes.
#[derive(Debug, Clone)]
pub enum Callee<'r> {
    Builtin(&'r ScriptFunctionSignature),
    User(&'r UserFunction),
}

impl Callee<'_> {
    pub fn signature(&self) -> &ScriptFunctionSignature {
        match self {
            Callee::Builtin(signature) => signature,
            Callee::User(function) => &function.signature,
        }
    }
}

pub struct Resolver {
    dialect: &'static Dialect,
    structs: HashMap<String, Arc<StructType>>,
    functions: HashMap<String, UserFunction>,
    function_order: Vec<String>,
    globals: HashMap<String, GlobalVar>,
    global_consts: HashMap<String, ConstantValue>,
    globals_size: i64,
    locals: ScopeStack<LocalSymbol>,
}

type Result<T> = core::result::Result<T, CompileError>;

fn err(kind: CompileErrorKind, span: Span) -> CompileError {
    CompileError::new(kind, span)
}

impl Resolver {
    pub fn new(dialect: &'static Dialect) -> Self {
        Self {
            dialect,
            structs: HashMap::new(),
            functions: HashMap::new(),
            function_order: Vec::new(),
            globals: HashMap::new(),
            global_consts: HashMap::new(),
            globals_size: 0,
            locals: ScopeStack::new(),
        }
    }

    pub fn dialect(&self) -> &'static Dialect {
        self.dialect
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    pub fn resolve_type(&self, ty: &TypeRef) -> Result<DataType> {
        Ok(match &ty.name {
            TypeName::Void => DataType::Void,
            TypeName::Int => DataType::Int,
            TypeName::Float => DataType::Float,
            TypeName::String => DataType::String,
            TypeName::Object => DataType::Object,
            TypeName::Vector => DataType::Vector,
            TypeName::Action => DataType::Action,
            TypeName::Engine(kind) => DataType::Engine(*kind),
            TypeName::Struct(name) => DataType::Struct(
                self.structs
                    .get(name)
                    .cloned()
                    .ok_or_else(|| err(CompileErrorKind::UndefinedStruct(name.clone()), ty.span))?,
            ),
        })
    }

    pub fn define_struct(&mut self, name: &str, members: Vec<StructMember>, span: Span) -> Result<()> {
        if self.structs.contains_key(name) {
            return Err(err(CompileErrorKind::Redeclaration(name.to_string()), span));
        }
        for (i, member) in members.iter().enumerate() {
            if members[..i].iter().any(|m| m.name == member.name) {
                return Err(err(CompileErrorKind::Redeclaration(member.name.clone()), span));
            }
        }
        let st = StructType {
            name: name.to_string(),
            members,
        };
        if st.size() > u16::MAX as usize {
            return Err(err(CompileErrorKind::StackOverflow(st.size() as i64), span));
        }
        self.structs.insert(name.to_string(), Arc::new(st));
        Ok(())
    }

    /// Checks that a value of type `found` may be stored where `expected` is.
    pub fn check_assignable(&self, expected: &DataType, found: &DataType, span: Span) -> Result<()> {
        if expected == found {
            Ok(())
        } else {
            Err(err(
                CompileErrorKind::TypeMismatch {
                    expected: expected.to_string(),
                    found: found.to_string(),
                },
                span,
            ))
        }
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    /// Declares a user function (prototype or definition). Redeclarations
    /// must repeat the same signature.
    pub fn declare_function(
        &mut self,
        signature: ScriptFunctionSignature,
        label: impl FnOnce() -> Label,
        is_definition: bool,
        span: Span,
    ) -> Result<Label> {
        if self.dialect.function(&signature.name).is_some() {
            return Err(err(CompileErrorKind::Redeclaration(signature.name.clone()), span));
        }
        if let Some(existing) = self.functions.get_mut(&signature.name) {
            if existing.signature.ret != signature.ret
                || existing.signature.params.len() != signature.params.len()
                || existing
                    .signature
                    .params
                    .iter()
                    .zip(&signature.params)
                    .any(|(a, b)| a.ty != b.ty)
            {
                return Err(err(CompileErrorKind::SignatureMismatch(signature.name), span));
            }
            if is_definition {
                if existing.defined {
                    return Err(err(CompileErrorKind::Redeclaration(signature.name), span));
                }
                existing.defined = true;
                existing.span = span;
            }
            return Ok(existing.label);
        }
        let label = label();
        self.function_order.push(signature.name.clone());
        self.functions.insert(
            signature.name.clone(),
            UserFunction {
                signature,
                label,
                defined: is_definition,
                span,
            },
        );
        Ok(label)
    }

    pub fn user_function(&self, name: &str) -> Option<&UserFunction> {
        self.functions.get(name)
    }

    /// User functions in declaration order.
    pub fn user_functions(&self) -> impl Iterator<Item = &UserFunction> {
        self.function_order.iter().filter_map(|n| self.functions.get(n))
    }

    pub fn callee(&self, name: &str, span: Span) -> Result<Callee<'_>> {
        if let Some(function) = self.functions.get(name) {
            return Ok(Callee::User(function));
        }
        self.dialect
            .function(name)
            .map(Callee::Builtin)
            .ok_or_else(|| err(CompileErrorKind::UndefinedSymbol(name.to_string()), span))
    }

    // ------------------------------------------------------------------
    // Globals
    // ------------------------------------------------------------------

    pub fn declare_global(&mut self, name: &str, ty: DataType, span: Span) -> Result<GlobalVar> {
        self.check_global_name(name, span)?;
        let var = GlobalVar {
            ty,
            position: self.globals_size,
        };
        self.globals_size += var.ty.size() as i64;
        self.globals.insert(name.to_string(), var.clone());
        Ok(var)
    }

    pub fn declare_global_const(&mut self, name: &str, value: ConstantValue, span: Span) -> Result<()> {
        self.check_global_name(name, span)?;
        self.global_consts.insert(name.to_string(), value);
        Ok(())
    }

    fn check_global_name(&self, name: &str, span: Span) -> Result<()> {
        if self.globals.contains_key(name)
            || self.global_consts.contains_key(name)
            || self.dialect.constant(name).is_some()
        {
            return Err(err(CompileErrorKind::Redeclaration(name.to_string()), span));
        }
        Ok(())
    }

    /// Total size in bytes of all global variables.
    pub fn globals_size(&self) -> i64 {
        self.globals_size
    }

    // ------------------------------------------------------------------
    // Locals
    // ------------------------------------------------------------------

    pub fn enter_scope(&mut self) {
        self.locals.push();
    }

    /// Leaves the innermost scope and returns the bytes its variables used.
    pub fn exit_scope(&mut self) -> i64 {
        self.locals.pop().map_or(0, |scope| scope_bytes(&scope))
    }

    /// Number of open scopes.
    pub fn scope_depth(&self) -> usize {
        self.locals.depth()
    }

    pub fn declare_local(&mut self, name: &str, symbol: LocalSymbol, span: Span) -> Result<()> {
        self.locals
            .bind_in_current(name, symbol)
            .map_err(|e| match e {
                BindError::AlreadyBound(name) => err(CompileErrorKind::Redeclaration(name), span),
                BindError::NoScope => err(CompileErrorKind::UndefinedSymbol(name.to_string()), span),
            })
    }

    pub fn lookup(&self, name: &str, span: Span) -> Result<Symbol> {
        if let Some(symbol) = self.locals.lookup(name) {
            return Ok(match symbol {
                LocalSymbol::Var(var) => Symbol::Local(var.clone()),
                LocalSymbol::Const(value) => Symbol::Constant(value.clone()),
            });
        }
        if let Some(value) = self.global_consts.get(name) {
            return Ok(Symbol::Constant(value.clone()));
        }
        if let Some(var) = self.globals.get(name) {
            return Ok(Symbol::Global(var.clone()));
        }
        if let Some(value) = self.dialect.constant(name) {
            return Ok(Symbol::Constant(value.clone()));
        }
        Err(err(CompileErrorKind::UndefinedSymbol(name.to_string()), span))
    }
}

fn scope_bytes(scope: &Scope<LocalSymbol>) -> i64 {
    scope
        .bindings()
        .map(|(_, symbol)| match symbol {
            LocalSymbol::Var(var) if var.position >= 0 => var.ty.size() as i64,
            _ => 0,
        })
        .sum()
}
