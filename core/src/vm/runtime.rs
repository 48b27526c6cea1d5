use core::fmt;

use tracing::{debug, trace};

use crate::api::ExecutionOptions;
use crate::types::{DataType, Dialect, Game};
use crate::vm::{
    FaultKind, Instruction, Opcode, Operand, Program, SLOT, Stack, TypeQualifier, Value, VmFault,
};

/// Execution state of a [`Vm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Running,
    Halted,
    Faulted,
}

/// One argument of a recorded engine call.
#[derive(Clone, PartialEq)]
pub enum Argument {
    Scalar(Value),
    Vector([f32; 3]),
    /// A deferred statement; its code is not run.
    Action,
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Scalar(value) => write!(f, "{:?}", value),
            Argument::Vector([x, y, z]) => write!(f, "[{:?}, {:?}, {:?}]", x, y, z),
            Argument::Action => f.write_str("<action>"),
        }
    }
}

/// An engine call the VM intercepted instead of executing.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSnapshot {
    pub routine: u16,
    pub name: String,
    /// Arguments in declaration order.
    pub args: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Halted,
    Faulted(VmFault),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VmResult {
    pub outcome: Outcome,
    /// Every engine call up to the halt or fault.
    pub snapshots: Vec<CallSnapshot>,
    /// Value left in the bottom stack slot, e.g. a `StartingConditional`
    /// result.
    pub result: Option<Value>,
    pub cycles: u64,
}

impl VmResult {
    pub fn is_halted(&self) -> bool {
        self.outcome == Outcome::Halted
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    return_ip: usize,
    /// Stack pointer in bytes right after the call.
    saved_sp: usize,
}

enum Flow {
    Next,
    Jump(usize),
    Halt,
}

/// A stack machine over one program.
///
/// Engine routines are never executed: each `ACTION` pops its arguments,
/// records a [`CallSnapshot`] and pushes the default value of the return
/// type.
pub struct Vm<'p> {
    program: &'p Program,
    dialect: &'static Dialect,
    game: Game,
    stack: Stack,
    ip: usize,
    /// Base pointer in bytes from the bottom of the stack.
    bp: usize,
    frames: Vec<Frame>,
    state: VmState,
    fault: Option<VmFault>,
    snapshots: Vec<CallSnapshot>,
    cycles: u64,
    budget: u64,
}

impl<'p> Vm<'p> {
    pub fn new(program: &'p Program, options: &ExecutionOptions) -> Self {
        Self {
            program,
            dialect: options.dialect.dialect(),
            game: options.dialect,
            stack: Stack::new(options.max_stack_bytes),
            ip: 0,
            bp: 0,
            frames: Vec::new(),
            state: VmState::Running,
            fault: None,
            snapshots: Vec::new(),
            cycles: 0,
            budget: options.cycle_budget,
        }
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn snapshots(&self) -> &[CallSnapshot] {
        &self.snapshots
    }

    /// Runs until the machine halts or faults.
    pub fn run(mut self) -> VmResult {
        while self.step() == VmState::Running {}
        let outcome = match self.fault.take() {
            Some(fault) => Outcome::Faulted(fault),
            None => Outcome::Halted,
        };
        let result = if self.stack.is_empty() {
            None
        } else {
            self.stack.get_absolute(0).ok().cloned()
        };
        VmResult {
            outcome,
            snapshots: self.snapshots,
            result,
            cycles: self.cycles,
        }
    }

    /// Executes a single instruction.
    pub fn step(&mut self) -> VmState {
        if self.state != VmState::Running {
            return self.state;
        }
        if self.ip >= self.program.len() {
            self.state = VmState::Halted;
            return self.state;
        }
        if self.cycles >= self.budget {
            return self.fail(FaultKind::BudgetExceeded(self.budget));
        }
        self.cycles += 1;

        let program = self.program;
        let instruction = &program.instructions()[self.ip];
        trace!(ip = self.ip, sp = self.stack.sp(), %instruction, "step");
        match self.execute(instruction) {
            Ok(Flow::Next) => self.ip += 1,
            Ok(Flow::Jump(target)) => self.ip = target,
            Ok(Flow::Halt) => self.state = VmState::Halted,
            Err(kind) => return self.fail(kind),
        }
        self.state
    }

    fn fail(&mut self, kind: FaultKind) -> VmState {
        let fault = VmFault {
            index: self.ip,
            kind,
        };
        debug!(%fault, "VM faulted");
        self.fault = Some(fault);
        self.state = VmState::Faulted;
        self.state
    }

    fn jump_target(&self, instruction: &Instruction) -> Result<usize, FaultKind> {
        self.program
            .jump_target_of(instruction)
            .filter(|&target| target <= self.program.len())
            .ok_or(FaultKind::InvalidJump)
    }

    fn execute(&mut self, instruction: &Instruction) -> Result<Flow, FaultKind> {
        use Opcode::*;
        let q = instruction.qualifier;
        match (instruction.opcode, &instruction.operand) {
            (CpDownSp, &Operand::Stack { offset, size }) => {
                self.stack.copy_down(offset, size as usize)?;
            }
            (CpTopSp, &Operand::Stack { offset, size }) => {
                self.stack.copy_top(offset, size as usize)?;
            }
            (CpDownBp, &Operand::Stack { offset, size }) => {
                let target = self.bp_position(offset)?;
                let count = size as usize / SLOT as usize;
                for i in 0..count {
                    let value = self.stack.peek(-(size as i32) + i as i32 * SLOT)?.clone();
                    self.stack.set_absolute(target + i * SLOT as usize, value)?;
                }
            }
            (CpTopBp, &Operand::Stack { offset, size }) => {
                let source = self.bp_position(offset)?;
                let count = size as usize / SLOT as usize;
                for i in 0..count {
                    let value = self.stack.get_absolute(source + i * SLOT as usize)?.clone();
                    self.stack.push(value)?;
                }
            }
            (RsAdd, _) => {
                let value = Value::default_for(q)
                    .ok_or_else(|| FaultKind::InvalidOperands(instruction.mnemonic()))?;
                self.stack.push(value)?;
            }
            (Const, operand) => {
                let value = match (q, operand) {
                    (TypeQualifier::INT, &Operand::Int(v)) => Value::Int(v),
                    (TypeQualifier::FLOAT, &Operand::Float(v)) => Value::Float(v),
                    (TypeQualifier::STRING, Operand::String(s)) => Value::String(s.clone()),
                    (TypeQualifier::OBJECT, &Operand::Int(id)) => Value::Object(id),
                    _ => return Err(FaultKind::InvalidOperands(instruction.mnemonic())),
                };
                self.stack.push(value)?;
            }
            (Action, &Operand::Action { routine, argc }) => self.call_engine(routine, argc)?,
            (LogAnd | LogOr | IncOr | ExcOr | BoolAnd | ShLeft | ShRight | UShRight | Mod, _) => {
                let b = self.stack.pop_int()?;
                let a = self.stack.pop_int()?;
                let value = match instruction.opcode {
                    LogAnd => (a != 0 && b != 0) as i32,
                    LogOr => (a != 0 || b != 0) as i32,
                    IncOr => a | b,
                    ExcOr => a ^ b,
                    BoolAnd => a & b,
                    ShLeft => a.wrapping_shl(b as u32),
                    ShRight => a.wrapping_shr(b as u32),
                    UShRight => (a as u32).wrapping_shr(b as u32) as i32,
                    _ => {
                        if b == 0 {
                            return Err(FaultKind::DivisionByZero);
                        }
                        a.wrapping_rem(b)
                    }
                };
                self.stack.push(Value::Int(value))?;
            }
            (Equal | NEqual, operand) => {
                let equal = match operand {
                    &Operand::Size(size) => {
                        let b = self.pop_bytes(size as usize)?;
                        let a = self.pop_bytes(size as usize)?;
                        a == b
                    }
                    _ => {
                        let b = self.stack.pop()?;
                        let a = self.stack.pop()?;
                        if a.kind_name() != b.kind_name() {
                            return Err(FaultKind::TypeMismatch {
                                expected: a.kind_name(),
                                found: b.kind_name(),
                            });
                        }
                        a == b
                    }
                };
                let result = if instruction.opcode == Equal { equal } else { !equal };
                self.stack.push(Value::Int(result as i32))?;
            }
            (Geq | Gt | Lt | Leq, _) => {
                let ordering = if q == TypeQualifier::FLOAT_FLOAT {
                    let b = self.stack.pop_float()?;
                    let a = self.stack.pop_float()?;
                    a.partial_cmp(&b)
                } else {
                    let b = self.stack.pop_int()?;
                    let a = self.stack.pop_int()?;
                    Some(a.cmp(&b))
                };
                let result = ordering.is_some_and(|o| match instruction.opcode {
                    Geq => o.is_ge(),
                    Gt => o.is_gt(),
                    Lt => o.is_lt(),
                    _ => o.is_le(),
                });
                self.stack.push(Value::Int(result as i32))?;
            }
            (Add | Sub | Mul | Div, _) => self.arithmetic(instruction)?,
            (Neg, _) => {
                let value = match self.stack.pop()? {
                    Value::Int(v) => Value::Int(v.wrapping_neg()),
                    Value::Float(v) => Value::Float(-v),
                    other => return Err(mismatch("int or float", &other)),
                };
                self.stack.push(value)?;
            }
            (Comp, _) => {
                let v = self.stack.pop_int()?;
                self.stack.push(Value::Int(!v))?;
            }
            (NotI, _) => {
                let v = self.stack.pop_int()?;
                self.stack.push(Value::Int((v == 0) as i32))?;
            }
            (MovSp, &Operand::Int(delta)) => self.stack.move_sp(delta)?,
            (StoreStateAll, _) => {
                if !self.game.supports_store_state_all() {
                    return Err(FaultKind::UnsupportedOpcode("STORE_STATEALL"));
                }
            }
            (Jmp, _) => return Ok(Flow::Jump(self.jump_target(instruction)?)),
            (Jsr, _) => {
                let target = self.jump_target(instruction)?;
                self.frames.push(Frame {
                    return_ip: self.ip + 1,
                    saved_sp: self.stack.sp(),
                });
                return Ok(Flow::Jump(target));
            }
            (Jz | Jnz, _) => {
                let value = self.stack.pop_int()?;
                if (value == 0) == (instruction.opcode == Jz) {
                    return Ok(Flow::Jump(self.jump_target(instruction)?));
                }
            }
            (Retn, _) => {
                let Some(frame) = self.frames.pop() else {
                    return Ok(Flow::Halt);
                };
                if self.stack.sp() > frame.saved_sp {
                    return Err(FaultKind::FrameImbalance {
                        extra: self.stack.sp() - frame.saved_sp,
                    });
                }
                return Ok(Flow::Jump(frame.return_ip));
            }
            (Destruct, &Operand::Destruct { size, offset, keep }) => {
                let values = self.pop_bytes(size as usize)?;
                let start = offset.max(0) as usize / SLOT as usize;
                let end = start + keep as usize / SLOT as usize;
                let kept = values
                    .get(start..end)
                    .ok_or_else(|| FaultKind::InvalidOperands(instruction.to_string()))?;
                for value in kept {
                    self.stack.push(value.clone())?;
                }
            }
            (DecISp | IncISp, &Operand::Int(offset)) => {
                let step = if instruction.opcode == IncISp { 1 } else { -1 };
                match self.stack.peek_mut(offset)? {
                    Value::Int(v) => *v = v.wrapping_add(step),
                    other => return Err(mismatch("int", other)),
                }
            }
            (DecIBp | IncIBp, &Operand::Int(offset)) => {
                let step = if instruction.opcode == IncIBp { 1 } else { -1 };
                let position = self.bp_position(offset)?;
                let value = match self.stack.get_absolute(position)? {
                    Value::Int(v) => Value::Int(v.wrapping_add(step)),
                    other => return Err(mismatch("int", other)),
                };
                self.stack.set_absolute(position, value)?;
            }
            (SaveBp, _) => {
                self.stack.push(Value::Int(self.bp as i32))?;
                self.bp = self.stack.sp();
            }
            (RestoreBp, _) => {
                let saved = self.stack.pop_int()?;
                self.bp = usize::try_from(saved).map_err(|_| FaultKind::StackUnderflow)?;
            }
            // The deferred code after the following JMP only runs when the
            // engine schedules it.
            (StoreState, _) | (Nop, _) => {}
            _ => return Err(FaultKind::InvalidOperands(instruction.to_string())),
        }
        Ok(Flow::Next)
    }

    fn bp_position(&self, offset: i32) -> Result<usize, FaultKind> {
        let position = self.bp as i64 + offset as i64;
        usize::try_from(position).map_err(|_| FaultKind::StackUnderflow)
    }

    /// Pops `size` bytes and returns the slots bottom first.
    fn pop_bytes(&mut self, size: usize) -> Result<Vec<Value>, FaultKind> {
        let mut values = Vec::with_capacity(size / SLOT as usize);
        for _ in 0..size / SLOT as usize {
            values.push(self.stack.pop()?);
        }
        values.reverse();
        Ok(values)
    }

    fn arithmetic(&mut self, instruction: &Instruction) -> Result<(), FaultKind> {
        let op = instruction.opcode;
        match instruction.qualifier {
            TypeQualifier::INT_INT => {
                let b = self.stack.pop_int()?;
                let a = self.stack.pop_int()?;
                let value = match op {
                    Opcode::Add => a.wrapping_add(b),
                    Opcode::Sub => a.wrapping_sub(b),
                    Opcode::Mul => a.wrapping_mul(b),
                    _ => {
                        if b == 0 {
                            return Err(FaultKind::DivisionByZero);
                        }
                        a.wrapping_div(b)
                    }
                };
                self.stack.push(Value::Int(value))
            }
            TypeQualifier::INT_FLOAT | TypeQualifier::FLOAT_INT | TypeQualifier::FLOAT_FLOAT => {
                let b = self.pop_number()?;
                let a = self.pop_number()?;
                let value = match op {
                    Opcode::Add => a + b,
                    Opcode::Sub => a - b,
                    Opcode::Mul => a * b,
                    _ => {
                        if b == 0.0 {
                            return Err(FaultKind::DivisionByZero);
                        }
                        a / b
                    }
                };
                self.stack.push(Value::Float(value))
            }
            TypeQualifier::STRING_STRING if op == Opcode::Add => {
                let b = self.pop_string()?;
                let a = self.pop_string()?;
                self.stack.push(Value::String(a + &b))
            }
            TypeQualifier::VECTOR_VECTOR if matches!(op, Opcode::Add | Opcode::Sub) => {
                let b = self.stack.pop_vector()?;
                let a = self.stack.pop_vector()?;
                let sign = if op == Opcode::Add { 1.0 } else { -1.0 };
                self.stack
                    .push_vector([a[0] + sign * b[0], a[1] + sign * b[1], a[2] + sign * b[2]])
            }
            TypeQualifier::VECTOR_FLOAT if matches!(op, Opcode::Mul | Opcode::Div) => {
                let b = self.stack.pop_float()?;
                let a = self.stack.pop_vector()?;
                if op == Opcode::Div && b == 0.0 {
                    return Err(FaultKind::DivisionByZero);
                }
                let scale = if op == Opcode::Mul { b } else { 1.0 / b };
                self.stack.push_vector(a.map(|c| c * scale))
            }
            TypeQualifier::FLOAT_VECTOR if op == Opcode::Mul => {
                let b = self.stack.pop_vector()?;
                let a = self.stack.pop_float()?;
                self.stack.push_vector(b.map(|c| c * a))
            }
            _ => Err(FaultKind::InvalidOperands(instruction.mnemonic())),
        }
    }

    fn pop_number(&mut self) -> Result<f32, FaultKind> {
        match self.stack.pop()? {
            Value::Int(v) => Ok(v as f32),
            Value::Float(v) => Ok(v),
            other => Err(mismatch("int or float", &other)),
        }
    }

    fn pop_string(&mut self) -> Result<String, FaultKind> {
        match self.stack.pop()? {
            Value::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }

    /// Pops the arguments of an engine routine, first parameter on top,
    /// records the call and pushes a default return value.
    fn call_engine(&mut self, routine: u16, argc: u8) -> Result<(), FaultKind> {
        let signature = self
            .dialect
            .routine(routine)
            .ok_or(FaultKind::UnknownRoutine(routine))?;
        if argc as usize > signature.params.len() {
            return Err(FaultKind::InvalidOperands(format!(
                "{} takes {} arguments, called with {}",
                signature.name,
                signature.params.len(),
                argc
            )));
        }

        let mut args = Vec::with_capacity(argc as usize);
        for param in signature.params.iter().take(argc as usize) {
            let arg = match &param.ty {
                DataType::Action => Argument::Action,
                DataType::Vector => Argument::Vector(self.stack.pop_vector()?),
                ty => {
                    let value = self.stack.pop()?;
                    let expected = ty.qualifier().and_then(Value::default_for);
                    if let Some(expected) = expected
                        && expected.kind_name() != value.kind_name()
                    {
                        return Err(FaultKind::TypeMismatch {
                            expected: expected.kind_name(),
                            found: value.kind_name(),
                        });
                    }
                    Argument::Scalar(value)
                }
            };
            args.push(arg);
        }
        trace!(routine, name = %signature.name, ?args, "engine call");
        self.snapshots.push(CallSnapshot {
            routine,
            name: signature.name.clone(),
            args,
        });

        for qualifier in signature.ret.slot_qualifiers() {
            let value = Value::default_for(qualifier)
                .ok_or_else(|| FaultKind::InvalidOperands(signature.name.clone()))?;
            self.stack.push(value)?;
        }
        Ok(())
    }
}

fn mismatch(expected: &'static str, found: &Value) -> FaultKind {
    FaultKind::TypeMismatch {
        expected,
        found: found.kind_name(),
    }
}
