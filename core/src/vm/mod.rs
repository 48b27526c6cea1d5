//! The NCS instruction model and a stack machine that executes it.

pub mod disasm;
mod error;
mod instruction_set;
mod program;
mod runtime;
mod stack;
mod value;

pub use error::{FaultKind, VmFault};
pub use instruction_set::{EngineType, Instruction, Label, Opcode, Operand, TypeQualifier};
pub use program::Program;
pub use runtime::{Argument, CallSnapshot, Outcome, Vm, VmResult, VmState};
pub use stack::{SLOT, Stack};
pub use value::{OBJECT_INVALID, OBJECT_SELF, Value};
