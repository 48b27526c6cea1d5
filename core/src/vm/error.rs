use thiserror::Error;

/// Why the virtual machine stopped in the `Faulted` state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FaultKind {
    #[error("stack underflow")]
    StackUnderflow,

    #[error("stack overflow (limit {limit} bytes)")]
    StackOverflow { limit: usize },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("unknown engine routine {0}")]
    UnknownRoutine(u16),

    #[error("division by zero")]
    DivisionByZero,

    #[error("instruction budget of {0} cycles exceeded")]
    BudgetExceeded(u64),

    #[error("{0} is not supported by this dialect")]
    UnsupportedOpcode(&'static str),

    #[error("jump to an invalid instruction")]
    InvalidJump,

    #[error("stack offset {0} is not a negative multiple of 4")]
    Misaligned(i32),

    #[error("subroutine returned with {extra} bytes left on its frame")]
    FrameImbalance { extra: usize },

    #[error("invalid operands for {0}")]
    InvalidOperands(String),
}

/// A runtime failure at a specific instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fault at instruction {index}: {kind}")]
pub struct VmFault {
    pub index: usize,
    pub kind: FaultKind,
}
