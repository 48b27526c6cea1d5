use thiserror::Error;

use crate::vm::Label;

/// Specific kinds of container decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeErrorKind {
    #[error("not an NCS file (bad file-type tag)")]
    BadMagic,

    #[error("unsupported container version")]
    BadVersion,

    #[error("unexpected end of data")]
    Truncated,

    #[error("declared size {declared} does not match actual size {actual}")]
    SizeMismatch { declared: u32, actual: usize },

    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("qualifier {qualifier:#04x} is not valid for {opcode}")]
    InvalidQualifier { opcode: &'static str, qualifier: u8 },

    #[error("jump to byte offset {0}, which is not an instruction boundary")]
    BadJumpTarget(i64),
}

impl DecodeErrorKind {
    /// Stable diagnostic code.
    pub fn code(&self) -> &'static str {
        match self {
            DecodeErrorKind::BadMagic => "D001",
            DecodeErrorKind::BadVersion => "D002",
            DecodeErrorKind::Truncated => "D003",
            DecodeErrorKind::SizeMismatch { .. } => "D004",
            DecodeErrorKind::UnknownOpcode(_) => "D005",
            DecodeErrorKind::InvalidQualifier { .. } => "D006",
            DecodeErrorKind::BadJumpTarget(_) => "D007",
        }
    }
}

/// A corrupt container, with the file offset the problem was found at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("offset {offset:#x}: {kind}")]
pub struct DecodeError {
    pub offset: usize,
    pub kind: DecodeErrorKind,
}

impl DecodeError {
    pub fn new(offset: usize, kind: DecodeErrorKind) -> Self {
        Self { offset, kind }
    }
}

/// A program that cannot be represented in a container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("instruction {index} jumps to unbound label {label}")]
    UnboundLabel { index: usize, label: Label },

    #[error("instruction {index}: string of {len} characters exceeds 65535")]
    StringTooLong { index: usize, len: usize },

    #[error("instruction {index}: character {ch:?} cannot be encoded in Latin-1")]
    NonLatin1 { index: usize, ch: char },

    #[error("program of {0} bytes exceeds the container size limit")]
    TooLarge(usize),
}
