//! Bytecode compiler implementation.

use tracing::debug;

use crate::compiler::operators::binary_instruction;
use crate::parser::{
    AssignOp, BinaryOp, Block, CompileError, CompileErrorKind, Expr, ExprKind, FunctionDef,
    IncDec, Item, ParsedUnit, Script, Span, Stmt, StmtKind, StructDef, TypeRef, UnaryOp, VarDecl,
};
use crate::types::{
    Callee, ConstantValue, DataType, Game, LocalSymbol, LocalVar, ParamSignature, Resolver,
    ScriptFunctionSignature, StructMember, Symbol,
};
use crate::vm::{Instruction, Label, Opcode, Operand, Program, TypeQualifier};

type Result<T> = core::result::Result<T, CompileError>;

fn err<T>(kind: CompileErrorKind, span: Span) -> Result<T> {
    Err(CompileError::new(kind, span))
}

/// Compiles a parsed unit into an NCS instruction stream.
///
/// Every value on the VM stack occupies whole 4-byte slots, and every
/// local lives at a fixed byte position relative to the base of its frame.
/// The compiler tracks how many bytes the current routine has pushed above
/// that base (`depth`) so that it can turn a position into the SP-relative
/// offset the copy instructions expect.
///
/// Layout of the generated stream:
///
/// ```text
/// [RSADDI]  JSR start  RETN      entry stub
/// <globals> SAVEBP ... RETN      only when the script has globals
/// <functions>                    in declaration order, unreachable ones dropped
/// ```
pub struct BytecodeCompiler {
    program: Program,
    resolver: Resolver,

    /// Bytes pushed above the frame base at the current instruction.
    depth: i64,

    /// The routine being compiled.
    frame: Frame,

    /// Innermost loop or switch last.
    jumps: Vec<JumpContext>,

    /// Attach statement spans to the emitted instructions.
    debug: bool,
    origin: Option<Span>,

    /// Instruction range of every compiled function, in emission order.
    functions: Vec<FunctionRange>,
}

#[derive(Debug, Clone)]
struct Frame {
    name: String,
    ret: DataType,
    param_bytes: i64,
    /// The globals initializer addresses globals through SP, not BP.
    globals: bool,
}

impl Frame {
    fn stub() -> Self {
        Self {
            name: String::new(),
            ret: DataType::Void,
            param_bytes: 0,
            globals: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct JumpContext {
    break_label: Label,
    /// `None` for a switch; `continue` looks further out.
    continue_label: Option<Label>,
    depth: i64,
}

#[derive(Debug, Clone, Copy)]
struct FunctionRange {
    start: usize,
    end: usize,
}

/// A storage location, as a byte position in its frame.
#[derive(Debug, Clone, Copy)]
enum Place {
    Local(i64),
    Global(i64),
}

impl Place {
    fn shifted(self, offset: i64) -> Place {
        match self {
            Place::Local(position) => Place::Local(position + offset),
            Place::Global(position) => Place::Global(position + offset),
        }
    }
}

impl BytecodeCompiler {
    pub fn new(game: Game, debug: bool) -> Self {
        Self {
            program: Program::new(),
            resolver: Resolver::new(game.dialect()),
            depth: 0,
            frame: Frame::stub(),
            jumps: Vec::new(),
            debug,
            origin: None,
            functions: Vec::new(),
        }
    }

    /// Convenience method to compile a unit in one call. Errors carry the
    /// name of the file they were found in.
    pub fn compile(unit: &ParsedUnit, game: Game, debug: bool) -> Result<Program> {
        let mut compiler = Self::new(game, debug);
        compiler.compile_script(&unit.script).map_err(|e| {
            match unit.files.get(e.span.file.0 as usize) {
                Some(file) => e.in_file(&file.name),
                None => e,
            }
        })?;
        Ok(compiler.finalize())
    }

    pub fn finalize(mut self) -> Program {
        self.prune_unreachable();
        self.program
    }

    // === Instruction Emission ===

    /// Emit an instruction that changes the stack depth by `delta` bytes.
    fn emit(&mut self, instruction: Instruction, delta: i64) -> usize {
        self.depth += delta;
        let origin = if self.debug { self.origin } else { None };
        self.program.push(instruction.with_origin(origin))
    }

    fn emit_move(&mut self, delta: i64, span: Span) -> Result<()> {
        if delta != 0 {
            let operand = to_i32(delta, span)?;
            self.emit(Instruction::move_sp(operand), delta);
        }
        Ok(())
    }

    /// Unwind `bytes` before a jump. Control does not fall through, so the
    /// tracked depth is left alone.
    fn emit_unwind(&mut self, bytes: i64, span: Span) -> Result<()> {
        if bytes > 0 {
            let operand = to_i32(-bytes, span)?;
            self.emit(Instruction::move_sp(operand), 0);
        }
        Ok(())
    }

    /// Reserve default-initialised slots for a value of type `ty`.
    fn reserve(&mut self, ty: &DataType) {
        for qualifier in ty.slot_qualifiers() {
            self.emit(Instruction::typed(Opcode::RsAdd, qualifier), 4);
        }
    }

    fn push_constant(&mut self, value: &ConstantValue) -> DataType {
        match value {
            ConstantValue::Int(v) => {
                self.emit(Instruction::const_int(*v), 4);
            }
            ConstantValue::Float(v) => {
                self.emit(Instruction::const_float(*v), 4);
            }
            ConstantValue::String(s) => {
                self.emit(Instruction::const_string(s.clone()), 4);
            }
            ConstantValue::Object(id) => {
                self.emit(Instruction::const_object(*id), 4);
            }
            ConstantValue::Vector(parts) => {
                for part in parts {
                    self.emit(Instruction::const_float(*part), 4);
                }
            }
        }
        value.data_type()
    }

    // === Addressing ===

    fn sp_offset(&self, position: i64, span: Span) -> Result<i32> {
        to_i32(position - self.depth, span)
    }

    /// BP points just past the globals block and the saved BP slot.
    fn bp_offset(&self, position: i64, span: Span) -> Result<i32> {
        to_i32(position - self.resolver.globals_size() - 4, span)
    }

    fn uses_sp(&self, place: Place) -> bool {
        matches!(place, Place::Local(_)) || self.frame.globals
    }

    fn position_of(place: Place) -> i64 {
        match place {
            Place::Local(position) | Place::Global(position) => position,
        }
    }

    fn load(&mut self, place: Place, size: usize, span: Span) -> Result<()> {
        let position = Self::position_of(place);
        let instruction = if self.uses_sp(place) {
            Instruction::copy(Opcode::CpTopSp, self.sp_offset(position, span)?, size as u16)
        } else {
            Instruction::copy(Opcode::CpTopBp, self.bp_offset(position, span)?, size as u16)
        };
        self.emit(instruction, size as i64);
        Ok(())
    }

    /// Copy the value on top of the stack into `place`, keeping it on top.
    fn store(&mut self, place: Place, size: usize, span: Span) -> Result<()> {
        let position = Self::position_of(place);
        let instruction = if self.uses_sp(place) {
            Instruction::copy(Opcode::CpDownSp, self.sp_offset(position, span)?, size as u16)
        } else {
            Instruction::copy(Opcode::CpDownBp, self.bp_offset(position, span)?, size as u16)
        };
        self.emit(instruction, 0);
        Ok(())
    }

    fn step(&mut self, place: Place, op: IncDec, span: Span) -> Result<()> {
        let position = Self::position_of(place);
        let instruction = match (self.uses_sp(place), op) {
            (true, IncDec::Increment) => {
                Instruction::step(Opcode::IncISp, self.sp_offset(position, span)?)
            }
            (true, IncDec::Decrement) => {
                Instruction::step(Opcode::DecISp, self.sp_offset(position, span)?)
            }
            (false, IncDec::Increment) => {
                Instruction::step(Opcode::IncIBp, self.bp_offset(position, span)?)
            }
            (false, IncDec::Decrement) => {
                Instruction::step(Opcode::DecIBp, self.bp_offset(position, span)?)
            }
        };
        self.emit(instruction, 0);
        Ok(())
    }

    /// Resolves an lvalue. `None` when the expression names no storage.
    fn place_of(&self, expr: &Expr) -> Result<Option<(Place, DataType)>> {
        match &expr.kind {
            ExprKind::Ident(name) => Ok(match self.resolver.lookup(name, expr.span)? {
                Symbol::Local(var) => Some((Place::Local(var.position), var.ty)),
                Symbol::Global(var) => Some((Place::Global(var.position), var.ty)),
                Symbol::Constant(_) => None,
            }),
            ExprKind::Member { base, member } => {
                let Some((place, ty)) = self.place_of(base)? else {
                    return Ok(None);
                };
                let (offset, member_ty) = member_of(&ty, member, expr.span)?;
                Ok(Some((place.shifted(offset), member_ty)))
            }
            _ => Ok(None),
        }
    }

    // === Declarations ===

    fn compile_script(&mut self, script: &Script) -> Result<()> {
        let mut globals = Vec::new();
        let mut bodies = Vec::new();

        for item in &script.items {
            match item {
                Item::Struct(def) => self.define_struct(def)?,
                Item::Global(decl) if decl.is_const => self.declare_constants(decl)?,
                Item::Global(decl) => globals.push(decl),
                Item::Function(def) => {
                    let label = self.declare_function(def)?;
                    if def.body.is_some() {
                        bodies.push((def, label));
                    }
                }
            }
        }

        let (entry, conditional) = self.entry_point()?;
        let start = if globals.is_empty() {
            entry
        } else {
            self.program.new_label()
        };

        // Entry stub
        self.depth = 0;
        if conditional {
            self.reserve(&DataType::Int);
        }
        self.emit(Instruction::jump(Opcode::Jsr, start), 0);
        self.emit(Instruction::bare(Opcode::Retn), 0);

        if !globals.is_empty() {
            self.program.bind(start);
            self.compile_globals(&globals, entry, conditional)?;
        }

        for (def, label) in bodies {
            self.compile_function(def, label)?;
        }
        Ok(())
    }

    fn define_struct(&mut self, def: &StructDef) -> Result<()> {
        let mut members = Vec::with_capacity(def.members.len());
        for (ty_ref, name, span) in &def.members {
            let ty = self.resolve_storage_type(ty_ref, *span)?;
            members.push(StructMember {
                name: name.clone(),
                ty,
            });
        }
        self.resolver.define_struct(&def.name, members, def.span)
    }

    /// Type of a variable, parameter or member. `void` and `action` have no
    /// storage.
    fn resolve_storage_type(&self, ty_ref: &TypeRef, span: Span) -> Result<DataType> {
        match self.resolver.resolve_type(ty_ref)? {
            DataType::Action => err(CompileErrorKind::InvalidAction, span),
            DataType::Void => err(
                CompileErrorKind::TypeMismatch {
                    expected: "a value type".to_string(),
                    found: "void".to_string(),
                },
                span,
            ),
            ty => Ok(ty),
        }
    }

    fn declare_function(&mut self, def: &FunctionDef) -> Result<Label> {
        let ret = self.resolver.resolve_type(&def.ret)?;
        if ret == DataType::Action {
            return err(CompileErrorKind::InvalidAction, def.ret.span);
        }

        let mut params = Vec::with_capacity(def.params.len());
        for param in &def.params {
            let ty = self.resolve_storage_type(&param.ty, param.span)?;
            let default = match &param.default {
                Some(expr) => {
                    let value = self.const_eval(expr).ok_or_else(|| {
                        CompileError::new(
                            CompileErrorKind::NotConstant(param.name.clone()),
                            expr.span,
                        )
                    })?;
                    self.resolver
                        .check_assignable(&ty, &value.data_type(), expr.span)?;
                    Some(value)
                }
                None => None,
            };
            params.push(ParamSignature {
                name: param.name.clone(),
                ty,
                default,
            });
        }

        let signature = ScriptFunctionSignature {
            name: def.name.clone(),
            routine: None,
            ret,
            params,
        };
        let program = &mut self.program;
        self.resolver
            .declare_function(signature, || program.new_label(), def.body.is_some(), def.span)
    }

    /// `void main()` wins over `int StartingConditional()`.
    fn entry_point(&self) -> Result<(Label, bool)> {
        if let Some(main) = self.resolver.user_function("main")
            && main.defined
            && main.signature.ret == DataType::Void
            && main.signature.params.is_empty()
        {
            return Ok((main.label, false));
        }
        if let Some(cond) = self.resolver.user_function("StartingConditional")
            && cond.defined
            && cond.signature.ret == DataType::Int
            && cond.signature.params.is_empty()
        {
            return Ok((cond.label, true));
        }
        err(CompileErrorKind::MissingEntryPoint, Span::default())
    }

    /// Builds the routine that allocates and initialises the globals, calls
    /// the entry point with BP pointing at them and tears them down again.
    fn compile_globals(&mut self, globals: &[&VarDecl], entry: Label, conditional: bool) -> Result<()> {
        self.depth = 0;
        self.frame = Frame {
            name: "<globals>".to_string(),
            ret: DataType::Void,
            param_bytes: 0,
            globals: true,
        };

        for decl in globals {
            self.origin = Some(decl.span);
            self.compile_declaration(decl)?;
        }

        let size = self.resolver.globals_size();
        let span = Span::default();
        self.emit(Instruction::bare(Opcode::SaveBp), 4);
        if conditional {
            self.reserve(&DataType::Int);
        }
        self.emit(Instruction::jump(Opcode::Jsr, entry), 0);
        if conditional {
            // The stub's return slot sits just below the globals block.
            let offset = self.sp_offset(-4, span)?;
            self.emit(Instruction::copy(Opcode::CpDownSp, offset, 4), 0);
            self.emit_move(-4, span)?;
        }
        self.emit(Instruction::bare(Opcode::RestoreBp), -4);
        self.emit_move(-size, span)?;
        self.emit(Instruction::bare(Opcode::Retn), 0);
        self.frame = Frame::stub();
        Ok(())
    }

    fn compile_function(&mut self, def: &FunctionDef, label: Label) -> Result<()> {
        let Some(body) = &def.body else {
            return Ok(());
        };
        let Some(signature) = self
            .resolver
            .user_function(&def.name)
            .map(|f| f.signature.clone())
        else {
            return err(CompileErrorKind::UndefinedSymbol(def.name.clone()), def.span);
        };
        debug!(function = %def.name, "Compiling function");

        if signature.ret != DataType::Void && !always_returns(&body.stmts) {
            return err(CompileErrorKind::MissingReturn(def.name.clone()), def.span);
        }

        let start = self.program.len();
        self.program.bind(label);
        self.depth = 0;
        self.jumps.clear();
        let param_bytes = signature.param_bytes() as i64;
        self.frame = Frame {
            name: def.name.clone(),
            ret: signature.ret.clone(),
            param_bytes,
            globals: false,
        };

        // Arguments are pushed first to last, so the first one is deepest.
        self.resolver.enter_scope();
        let mut position = -param_bytes;
        for (param, decl) in signature.params.iter().zip(&def.params) {
            self.resolver.declare_local(
                &param.name,
                LocalSymbol::Var(LocalVar {
                    ty: param.ty.clone(),
                    position,
                }),
                decl.span,
            )?;
            position += param.ty.size() as i64;
        }

        self.compile_block(body)?;
        if !always_returns(&body.stmts) {
            self.origin = Some(body.span);
            self.emit_unwind(param_bytes, body.span)?;
            self.emit(Instruction::bare(Opcode::Retn), 0);
        }
        self.resolver.exit_scope();

        self.functions.push(FunctionRange {
            start,
            end: self.program.len(),
        });
        Ok(())
    }

    /// A declaration in the current frame: reserve, bind, then initialise.
    fn compile_declaration(&mut self, decl: &VarDecl) -> Result<()> {
        if decl.is_const {
            return self.declare_constants(decl);
        }
        let ty = self.resolve_storage_type(&decl.ty, decl.span)?;
        for declarator in &decl.declarators {
            let place = if self.frame.globals {
                let var = self
                    .resolver
                    .declare_global(&declarator.name, ty.clone(), declarator.span)?;
                Place::Global(var.position)
            } else {
                let position = self.depth;
                self.resolver.declare_local(
                    &declarator.name,
                    LocalSymbol::Var(LocalVar {
                        ty: ty.clone(),
                        position,
                    }),
                    declarator.span,
                )?;
                Place::Local(position)
            };
            self.reserve(&ty);

            if let Some(init) = &declarator.init {
                let found = self.compile_expr(init)?;
                self.resolver.check_assignable(&ty, &found, init.span)?;
                self.store(place, ty.size(), init.span)?;
                self.emit_move(-(ty.size() as i64), init.span)?;
            }
        }
        Ok(())
    }

    fn declare_constants(&mut self, decl: &VarDecl) -> Result<()> {
        let ty = self.resolve_storage_type(&decl.ty, decl.span)?;
        for declarator in &decl.declarators {
            let value = declarator
                .init
                .as_ref()
                .and_then(|init| self.const_eval(init))
                .ok_or_else(|| {
                    CompileError::new(
                        CompileErrorKind::NotConstant(declarator.name.clone()),
                        declarator.span,
                    )
                })?;
            self.resolver
                .check_assignable(&ty, &value.data_type(), declarator.span)?;
            if self.resolver.scope_depth() == 0 {
                self.resolver
                    .declare_global_const(&declarator.name, value, declarator.span)?;
            } else {
                self.resolver.declare_local(
                    &declarator.name,
                    LocalSymbol::Const(value),
                    declarator.span,
                )?;
            }
        }
        Ok(())
    }

    /// Folds literals, named constants, negation and vector literals.
    fn const_eval(&self, expr: &Expr) -> Option<ConstantValue> {
        match &expr.kind {
            ExprKind::Int(v) => Some(ConstantValue::Int(*v)),
            ExprKind::Float(v) => Some(ConstantValue::Float(*v)),
            ExprKind::Str(s) => Some(ConstantValue::String(s.clone())),
            ExprKind::Ident(name) => match self.resolver.lookup(name, expr.span).ok()? {
                Symbol::Constant(value) => Some(value),
                _ => None,
            },
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } => match self.const_eval(operand)? {
                ConstantValue::Int(v) => Some(ConstantValue::Int(v.wrapping_neg())),
                ConstantValue::Float(v) => Some(ConstantValue::Float(-v)),
                _ => None,
            },
            ExprKind::Vector(parts) => {
                let mut out = [0.0; 3];
                for (slot, part) in out.iter_mut().zip(parts.iter()) {
                    match self.const_eval(part)? {
                        ConstantValue::Float(v) => *slot = v,
                        _ => return None,
                    }
                }
                Some(ConstantValue::Vector(out))
            }
            _ => None,
        }
    }

    // === Statements ===

    fn compile_block(&mut self, block: &Block) -> Result<()> {
        self.resolver.enter_scope();
        for stmt in &block.stmts {
            self.compile_stmt(stmt)?;
        }
        self.close_scope(ends_in_jump(&block.stmts), block.span)
    }

    /// Pops the innermost scope and releases its locals. After a jump the
    /// release is unreachable and not emitted.
    fn close_scope(&mut self, dead_end: bool, span: Span) -> Result<()> {
        let bytes = self.resolver.exit_scope();
        if dead_end {
            self.depth -= bytes;
            Ok(())
        } else {
            self.emit_move(-bytes, span)
        }
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        self.origin = Some(stmt.span);
        match &stmt.kind {
            StmtKind::Block(block) => self.compile_block(block),
            StmtKind::Decl(decl) => self.compile_declaration(decl),
            StmtKind::Expr(expr) => self.compile_discarded(expr),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.compile_condition(cond)?;
                let else_label = self.program.new_label();
                self.emit(Instruction::jump(Opcode::Jz, else_label), -4);
                self.compile_stmt(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let end = self.program.new_label();
                        self.emit(Instruction::jump(Opcode::Jmp, end), 0);
                        self.program.bind(else_label);
                        self.compile_stmt(else_branch)?;
                        self.program.bind(end);
                    }
                    None => self.program.bind(else_label),
                }
                Ok(())
            }
            StmtKind::While { cond, body } => {
                let top = self.program.new_label();
                let end = self.program.new_label();
                self.program.bind(top);
                self.compile_condition(cond)?;
                self.emit(Instruction::jump(Opcode::Jz, end), -4);
                self.compile_loop_body(body, end, top)?;
                self.emit(Instruction::jump(Opcode::Jmp, top), 0);
                self.program.bind(end);
                Ok(())
            }
            StmtKind::DoWhile { body, cond } => {
                let top = self.program.new_label();
                let next = self.program.new_label();
                let end = self.program.new_label();
                self.program.bind(top);
                self.compile_loop_body(body, end, next)?;
                self.program.bind(next);
                self.compile_condition(cond)?;
                self.emit(Instruction::jump(Opcode::Jnz, top), -4);
                self.program.bind(end);
                Ok(())
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                if let Some(init) = init {
                    self.compile_discarded(init)?;
                }
                let top = self.program.new_label();
                let next = self.program.new_label();
                let end = self.program.new_label();
                self.program.bind(top);
                if let Some(cond) = cond {
                    self.compile_condition(cond)?;
                    self.emit(Instruction::jump(Opcode::Jz, end), -4);
                }
                self.compile_loop_body(body, end, next)?;
                self.program.bind(next);
                if let Some(step) = step {
                    self.compile_discarded(step)?;
                }
                self.emit(Instruction::jump(Opcode::Jmp, top), 0);
                self.program.bind(end);
                Ok(())
            }
            StmtKind::Switch { value, body } => self.compile_switch(value, body),
            StmtKind::Case(_) => err(CompileErrorKind::MisplacedJump("case"), stmt.span),
            StmtKind::Default => err(CompileErrorKind::MisplacedJump("default"), stmt.span),
            StmtKind::Break => {
                let Some(context) = self.jumps.last().copied() else {
                    return err(CompileErrorKind::MisplacedJump("break"), stmt.span);
                };
                self.emit_unwind(self.depth - context.depth, stmt.span)?;
                self.emit(Instruction::jump(Opcode::Jmp, context.break_label), 0);
                Ok(())
            }
            StmtKind::Continue => {
                let Some((label, depth)) = self
                    .jumps
                    .iter()
                    .rev()
                    .find_map(|c| c.continue_label.map(|label| (label, c.depth)))
                else {
                    return err(CompileErrorKind::MisplacedJump("continue"), stmt.span);
                };
                self.emit_unwind(self.depth - depth, stmt.span)?;
                self.emit(Instruction::jump(Opcode::Jmp, label), 0);
                Ok(())
            }
            StmtKind::Return(value) => self.compile_return(value.as_ref(), stmt.span),
            StmtKind::Empty => Ok(()),
        }
    }

    fn compile_loop_body(&mut self, body: &Stmt, break_label: Label, continue_label: Label) -> Result<()> {
        self.jumps.push(JumpContext {
            break_label,
            continue_label: Some(continue_label),
            depth: self.depth,
        });
        let result = self.compile_stmt(body);
        self.jumps.pop();
        result
    }

    /// Pushes the switch value once and dispatches with one comparison per
    /// case; the value is popped at the end label, which `break` targets.
    fn compile_switch(&mut self, value: &Expr, body: &Block) -> Result<()> {
        let ty = self.compile_expr(value)?;
        let equal = match ty {
            DataType::Int => TypeQualifier::INT_INT,
            DataType::String => TypeQualifier::STRING_STRING,
            other => {
                return err(
                    CompileErrorKind::TypeMismatch {
                        expected: "int or string".to_string(),
                        found: other.to_string(),
                    },
                    value.span,
                );
            }
        };

        let end = self.program.new_label();
        let mut default = None;
        let mut labels = Vec::with_capacity(body.stmts.len());
        for stmt in &body.stmts {
            match &stmt.kind {
                StmtKind::Case(label_expr) => {
                    let constant = self
                        .const_eval(label_expr)
                        .filter(|c| c.data_type() == ty)
                        .ok_or_else(|| {
                            CompileError::new(CompileErrorKind::InvalidCaseLabel, label_expr.span)
                        })?;
                    let label = self.program.new_label();
                    self.origin = Some(stmt.span);
                    self.emit(Instruction::copy(Opcode::CpTopSp, -4, 4), 4);
                    self.push_constant(&constant);
                    self.emit(Instruction::typed(Opcode::Equal, equal), -4);
                    self.emit(Instruction::jump(Opcode::Jnz, label), -4);
                    labels.push(Some(label));
                }
                StmtKind::Default => {
                    if default.is_some() {
                        return err(CompileErrorKind::Redeclaration("default".to_string()), stmt.span);
                    }
                    let label = self.program.new_label();
                    default = Some(label);
                    labels.push(Some(label));
                }
                StmtKind::Decl(_) => {
                    return err(CompileErrorKind::DeclarationInSwitch, stmt.span);
                }
                _ => labels.push(None),
            }
        }
        self.emit(Instruction::jump(Opcode::Jmp, default.unwrap_or(end)), 0);

        self.jumps.push(JumpContext {
            break_label: end,
            continue_label: None,
            depth: self.depth,
        });
        self.resolver.enter_scope();
        let mut result = Ok(());
        for (stmt, label) in body.stmts.iter().zip(labels) {
            match label {
                Some(label) => self.program.bind(label),
                None => {
                    result = self.compile_stmt(stmt);
                    if result.is_err() {
                        break;
                    }
                }
            }
        }
        self.resolver.exit_scope();
        self.jumps.pop();
        result?;

        self.program.bind(end);
        self.emit_move(-4, body.span)
    }

    fn compile_return(&mut self, value: Option<&Expr>, span: Span) -> Result<()> {
        let ret = self.frame.ret.clone();
        let depth = self.depth;
        match value {
            Some(expr) => {
                let found = self.compile_expr(expr)?;
                if ret == DataType::Void {
                    return err(
                        CompileErrorKind::TypeMismatch {
                            expected: "void".to_string(),
                            found: found.to_string(),
                        },
                        expr.span,
                    );
                }
                self.resolver.check_assignable(&ret, &found, expr.span)?;
                // The caller reserved the return slot below the arguments.
                let slot = -(self.frame.param_bytes + ret.size() as i64);
                let offset = self.sp_offset(slot, expr.span)?;
                self.emit(Instruction::copy(Opcode::CpDownSp, offset, ret.size() as u16), 0);
            }
            None if ret != DataType::Void => {
                return err(CompileErrorKind::MissingReturn(self.frame.name.clone()), span);
            }
            None => {}
        }
        self.emit_unwind(self.depth + self.frame.param_bytes, span)?;
        self.emit(Instruction::bare(Opcode::Retn), 0);
        // Code after an early return still sees the frame as it was.
        self.depth = depth;
        Ok(())
    }

    fn compile_condition(&mut self, cond: &Expr) -> Result<()> {
        let ty = self.compile_expr(cond)?;
        if ty != DataType::Int {
            return err(
                CompileErrorKind::TypeMismatch {
                    expected: "int".to_string(),
                    found: ty.to_string(),
                },
                cond.span,
            );
        }
        Ok(())
    }

    /// An expression whose value is not used.
    fn compile_discarded(&mut self, expr: &Expr) -> Result<()> {
        let ty = self.compile_expr(expr)?;
        self.emit_move(-(ty.size() as i64), expr.span)
    }

    // === Expressions ===

    fn compile_expr(&mut self, expr: &Expr) -> Result<DataType> {
        match &expr.kind {
            ExprKind::Int(v) => Ok(self.push_constant(&ConstantValue::Int(*v))),
            ExprKind::Float(v) => Ok(self.push_constant(&ConstantValue::Float(*v))),
            ExprKind::Str(s) => Ok(self.push_constant(&ConstantValue::String(s.clone()))),
            ExprKind::Ident(name) => match self.resolver.lookup(name, expr.span)? {
                Symbol::Local(var) => {
                    self.load(Place::Local(var.position), var.ty.size(), expr.span)?;
                    Ok(var.ty)
                }
                Symbol::Global(var) => {
                    self.load(Place::Global(var.position), var.ty.size(), expr.span)?;
                    Ok(var.ty)
                }
                Symbol::Constant(value) => Ok(self.push_constant(&value)),
            },
            ExprKind::Vector(parts) => {
                for part in parts.iter() {
                    let ty = self.compile_expr(part)?;
                    self.resolver.check_assignable(&DataType::Float, &ty, part.span)?;
                }
                Ok(DataType::Vector)
            }
            ExprKind::Call { name, args } => self.compile_call(name, args, expr.span),
            ExprKind::Member { base, member } => {
                if let Some((place, ty)) = self.place_of(expr)? {
                    self.load(place, ty.size(), expr.span)?;
                    return Ok(ty);
                }
                // An rvalue: compute it whole, then keep only the member.
                let base_ty = self.compile_expr(base)?;
                let (offset, member_ty) = member_of(&base_ty, member, expr.span)?;
                let size = base_ty.size();
                self.emit(
                    Instruction::new(
                        Opcode::Destruct,
                        TypeQualifier::STACK,
                        Operand::Destruct {
                            size: size as u16,
                            offset: offset as i16,
                            keep: member_ty.size() as u16,
                        },
                    ),
                    member_ty.size() as i64 - size as i64,
                );
                Ok(member_ty)
            }
            ExprKind::Unary { op, operand } => self.compile_unary(*op, operand, expr.span),
            ExprKind::Binary { op, left, right } => match op {
                BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                    self.compile_short_circuit(*op, left, right)
                }
                _ => {
                    let left_ty = self.compile_expr(left)?;
                    let right_ty = self.compile_expr(right)?;
                    self.emit_binary(*op, &left_ty, &right_ty, expr.span)
                }
            },
            ExprKind::Assign { op, target, value } => {
                let (place, ty) = self
                    .place_of(target)?
                    .ok_or_else(|| CompileError::new(CompileErrorKind::NotAssignable, target.span))?;
                match op {
                    AssignOp::Assign => {
                        let found = self.compile_expr(value)?;
                        self.resolver.check_assignable(&ty, &found, value.span)?;
                    }
                    AssignOp::Compound(op) => {
                        self.load(place, ty.size(), target.span)?;
                        let right_ty = self.compile_expr(value)?;
                        let result = self.emit_binary(*op, &ty, &right_ty, expr.span)?;
                        self.resolver.check_assignable(&ty, &result, expr.span)?;
                    }
                }
                self.store(place, ty.size(), expr.span)?;
                Ok(ty)
            }
            ExprKind::IncDec { op, prefix, target } => {
                let (place, ty) = self
                    .place_of(target)?
                    .ok_or_else(|| CompileError::new(CompileErrorKind::NotAssignable, target.span))?;
                self.resolver.check_assignable(&DataType::Int, &ty, target.span)?;
                if *prefix {
                    self.step(place, *op, expr.span)?;
                    self.load(place, 4, expr.span)?;
                } else {
                    self.load(place, 4, expr.span)?;
                    self.step(place, *op, expr.span)?;
                }
                Ok(DataType::Int)
            }
        }
    }

    fn emit_binary(&mut self, op: BinaryOp, left: &DataType, right: &DataType, span: Span) -> Result<DataType> {
        let Some((instruction, result)) = binary_instruction(op, left, right) else {
            return err(
                CompileErrorKind::InvalidOperands {
                    op: op.symbol().to_string(),
                    left: left.to_string(),
                    right: right.to_string(),
                },
                span,
            );
        };
        let delta = result.size() as i64 - left.size() as i64 - right.size() as i64;
        self.emit(instruction, delta);
        Ok(result)
    }

    fn compile_unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> Result<DataType> {
        // Negative literals are folded into the constant.
        if op == UnaryOp::Neg {
            match &operand.kind {
                ExprKind::Int(v) => return Ok(self.push_constant(&ConstantValue::Int(v.wrapping_neg()))),
                ExprKind::Float(v) => return Ok(self.push_constant(&ConstantValue::Float(-v))),
                _ => {}
            }
        }
        let ty = self.compile_expr(operand)?;
        let instruction = match (op, &ty) {
            (UnaryOp::Neg, DataType::Int) => Instruction::typed(Opcode::Neg, TypeQualifier::INT),
            (UnaryOp::Neg, DataType::Float) => Instruction::typed(Opcode::Neg, TypeQualifier::FLOAT),
            (UnaryOp::Not, DataType::Int) => Instruction::typed(Opcode::NotI, TypeQualifier::INT),
            (UnaryOp::BitNot, DataType::Int) => Instruction::typed(Opcode::Comp, TypeQualifier::INT),
            _ => {
                return err(
                    CompileErrorKind::TypeMismatch {
                        expected: if op == UnaryOp::Neg { "int or float" } else { "int" }.to_string(),
                        found: ty.to_string(),
                    },
                    span,
                );
            }
        };
        self.emit(instruction, 0);
        Ok(ty)
    }

    /// `a && b` keeps a copy of `a` as the result when it decides the
    /// outcome, and combines both operands otherwise.
    fn compile_short_circuit(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<DataType> {
        let left_ty = self.compile_expr(left)?;
        if left_ty != DataType::Int {
            return err(invalid_operands(op, &left_ty, &DataType::Int), left.span);
        }
        let end = self.program.new_label();
        let decided = if op == BinaryOp::LogicalAnd {
            Opcode::Jz
        } else {
            Opcode::Jnz
        };
        self.emit(Instruction::copy(Opcode::CpTopSp, -4, 4), 4);
        self.emit(Instruction::jump(decided, end), -4);
        let right_ty = self.compile_expr(right)?;
        if right_ty != DataType::Int {
            return err(invalid_operands(op, &left_ty, &right_ty), right.span);
        }
        let combine = if op == BinaryOp::LogicalAnd {
            Opcode::LogAnd
        } else {
            Opcode::LogOr
        };
        self.emit(Instruction::typed(combine, TypeQualifier::INT_INT), -4);
        self.program.bind(end);
        Ok(DataType::Int)
    }

    // === Calls ===

    fn compile_call(&mut self, name: &str, args: &[Expr], span: Span) -> Result<DataType> {
        let (signature, label) = match self.resolver.callee(name, span)? {
            Callee::Builtin(signature) => (signature.clone(), None),
            Callee::User(function) => {
                if !function.defined {
                    return err(CompileErrorKind::MissingDefinition(name.to_string()), span);
                }
                (function.signature.clone(), Some(function.label))
            }
        };

        let required = signature.required_params();
        let total = signature.params.len();
        if args.len() < required || args.len() > total {
            let expected = if required == total {
                total.to_string()
            } else {
                format!("{} to {}", required, total)
            };
            return err(
                CompileErrorKind::ArityMismatch {
                    name: name.to_string(),
                    expected,
                    found: args.len(),
                },
                span,
            );
        }

        let param_bytes = signature.param_bytes() as i64;
        match label {
            Some(label) => {
                // Return slot first, then the arguments in order.
                self.reserve(&signature.ret);
                for (i, param) in signature.params.iter().enumerate() {
                    self.compile_argument(param, args.get(i))?;
                }
                self.emit(Instruction::jump(Opcode::Jsr, label), -param_bytes);
            }
            None => {
                // The engine pops the first argument first.
                for (i, param) in signature.params.iter().enumerate().rev() {
                    self.compile_argument(param, args.get(i))?;
                }
                let routine = signature.routine.unwrap_or_default();
                let delta = signature.ret.size() as i64 - param_bytes;
                self.emit(Instruction::action(routine, total as u8), delta);
            }
        }
        Ok(signature.ret)
    }

    fn compile_argument(&mut self, param: &ParamSignature, arg: Option<&Expr>) -> Result<()> {
        match arg {
            Some(expr) if param.ty == DataType::Action => self.compile_action(expr),
            Some(expr) => {
                let found = self.compile_expr(expr)?;
                self.resolver.check_assignable(&param.ty, &found, expr.span)
            }
            None => {
                if let Some(value) = &param.default {
                    self.push_constant(value);
                }
                Ok(())
            }
        }
    }

    /// A deferred statement: `STORE_STATE` captures the frame, and the
    /// statement's code is skipped over until the engine runs it.
    fn compile_action(&mut self, expr: &Expr) -> Result<()> {
        let bp = to_i32(self.resolver.globals_size(), expr.span)?;
        let sp = to_i32(self.depth + self.frame.param_bytes, expr.span)?;
        let resume = self.program.new_label();
        self.emit(Instruction::store_state(bp, sp), 0);
        self.emit(Instruction::jump(Opcode::Jmp, resume), 0);

        let depth = self.depth;
        let jumps = core::mem::take(&mut self.jumps);
        let result = self.compile_discarded(expr);
        self.jumps = jumps;
        result?;
        self.emit(Instruction::bare(Opcode::Retn), 0);
        self.depth = depth;

        self.program.bind(resume);
        Ok(())
    }

    // === Finalization ===

    /// Drops every function that no `JSR` reachable from the entry stub
    /// calls.
    fn prune_unreachable(&mut self) {
        let instructions = self.program.instructions();
        let first = self.functions.first().map_or(instructions.len(), |f| f.start);
        let mut keep = vec![false; instructions.len()];
        let mut pending = vec![FunctionRange {
            start: 0,
            end: first,
        }];

        while let Some(range) = pending.pop() {
            if range.start >= range.end || keep[range.start] {
                continue;
            }
            for index in range.start..range.end {
                keep[index] = true;
                let instruction = &instructions[index];
                if instruction.opcode != Opcode::Jsr {
                    continue;
                }
                if let Some(target) = self.program.jump_target_of(instruction)
                    && let Some(callee) = self.functions.iter().find(|f| f.start == target)
                {
                    pending.push(*callee);
                }
            }
        }

        let removed = keep.iter().filter(|kept| !**kept).count();
        if removed > 0 {
            debug!(removed, "Dropping unreachable functions");
            self.program.retain(&keep);
        }
    }
}

impl Default for BytecodeCompiler {
    fn default() -> Self {
        Self::new(Game::default(), false)
    }
}

fn to_i32(value: i64, span: Span) -> Result<i32> {
    i32::try_from(value).map_err(|_| CompileError::new(CompileErrorKind::StackOverflow(value), span))
}

fn invalid_operands(op: BinaryOp, left: &DataType, right: &DataType) -> CompileErrorKind {
    CompileErrorKind::InvalidOperands {
        op: op.symbol().to_string(),
        left: left.to_string(),
        right: right.to_string(),
    }
}

/// Byte offset and type of `member` inside a vector or struct.
fn member_of(ty: &DataType, member: &str, span: Span) -> Result<(i64, DataType)> {
    let found = match ty {
        DataType::Vector => match member {
            "x" => Some((0, DataType::Float)),
            "y" => Some((4, DataType::Float)),
            "z" => Some((8, DataType::Float)),
            _ => None,
        },
        DataType::Struct(st) => st
            .member(member)
            .map(|(offset, ty)| (offset as i64, ty.clone())),
        _ => None,
    };
    found.ok_or_else(|| {
        CompileError::new(
            CompileErrorKind::UnknownMember {
                ty: ty.to_string(),
                member: member.to_string(),
            },
            span,
        )
    })
}

/// Whether control cannot fall off the end of `stmts`.
pub(crate) fn always_returns(stmts: &[Stmt]) -> bool {
    stmts.last().is_some_and(|stmt| stmt_returns(stmt))
}

fn stmt_returns(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return(_) => true,
        StmtKind::Block(block) => always_returns(&block.stmts),
        StmtKind::If {
            then_branch,
            else_branch: Some(else_branch),
            ..
        } => stmt_returns(then_branch) && stmt_returns(else_branch),
        _ => false,
    }
}

/// Whether the last statement transfers control unconditionally.
fn ends_in_jump(stmts: &[Stmt]) -> bool {
    stmts.last().is_some_and(|stmt| {
        matches!(
            stmt.kind,
            StmtKind::Return(_) | StmtKind::Break | StmtKind::Continue
        )
    })
}
