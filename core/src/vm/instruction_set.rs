//! NWScript VM Instructions
//!
//! This module defines the instruction vocabulary of the NCS stack machine.
//! It is shared by the container codec, the code generator, the optimizer,
//! the virtual machine and the decompiler.
//!
//! # Instruction Format
//!
//! Every instruction starts with a two byte prefix followed by operand bytes
//! whose layout depends on the opcode (and for `CONST` on the qualifier):
//! ```text
//! ┌────────────┬────────────┬───────────────────────┐
//! │   Opcode   │ Qualifier  │  Operands (0..n bytes) │
//! │  (8 bits)  │  (8 bits)  │      big-endian        │
//! └────────────┴────────────┴───────────────────────┘
//! ```
//!
//! # Stack Discipline
//!
//! The stack is addressed in bytes. Every scalar occupies one 4-byte slot,
//! vectors occupy three and structs one per member. Offsets are always
//! negative and relative to the current stack pointer.
//!
//! Stack effect notation: `[..., operand1, operand2] -> [..., result]`

use core::fmt;

use crate::parser::Span;

/// Operation codes of the NCS instruction set.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    // ========================================================================
    // Stack copies & reservation (0x01 - 0x05)
    // ========================================================================
    /// Copy the top `size` bytes down to `offset`, keeping the top.
    /// Operand: i32 offset, u16 size | Stack: unchanged depth
    CpDownSp = 0x01,

    /// Reserve one default-initialised slot of the qualifier's type.
    /// Stack: [...] -> [..., default]
    RsAdd = 0x02,

    /// Push a copy of `size` bytes found at `offset`.
    /// Operand: i32 offset, u16 size | Stack: [...] -> [..., copy]
    CpTopSp = 0x03,

    /// Push an immediate.
    /// Operand: i32 | f32 | u16 len + Latin-1 bytes | i32 object id
    Const = 0x04,

    /// Call engine routine `routine` with `argc` arguments.
    /// Operand: u16 routine, u8 argc | Stack: [..., argN..arg1] -> [..., ret]
    Action = 0x05,

    // ========================================================================
    // Logical & bitwise (0x06 - 0x0A)
    // ========================================================================
    LogAnd = 0x06,
    LogOr = 0x07,
    IncOr = 0x08,
    ExcOr = 0x09,
    BoolAnd = 0x0A,

    // ========================================================================
    // Comparison (0x0B - 0x10)
    // ========================================================================
    /// Operand (TT only): u16 size | Stack: [..., a, b] -> [..., a == b]
    Equal = 0x0B,
    NEqual = 0x0C,
    Geq = 0x0D,
    Gt = 0x0E,
    Lt = 0x0F,
    Leq = 0x10,

    // ========================================================================
    // Shifts & arithmetic (0x11 - 0x1A)
    // ========================================================================
    ShLeft = 0x11,
    ShRight = 0x12,
    UShRight = 0x13,
    Add = 0x14,
    Sub = 0x15,
    Mul = 0x16,
    Div = 0x17,
    Mod = 0x18,
    Neg = 0x19,
    Comp = 0x1A,

    // ========================================================================
    // Stack pointer & control transfer (0x1B - 0x25)
    // ========================================================================
    /// Move the stack pointer by a (negative) byte delta.
    /// Operand: i32 delta
    MovSp = 0x1B,

    /// Legacy state capture. The qualifier byte is the only operand.
    StoreStateAll = 0x1C,

    /// Operand: i32 delta relative to this instruction.
    Jmp = 0x1D,
    /// Push a return frame and jump. Operand: i32 delta
    Jsr = 0x1E,
    /// Pop an int, jump when zero. Operand: i32 delta
    Jz = 0x1F,
    /// Return from the current frame, halting at the outermost one.
    Retn = 0x20,

    /// Discard `size` bytes except `keep` bytes found at `offset`.
    /// Operand: u16 size, i16 offset, u16 keep
    Destruct = 0x21,

    NotI = 0x22,
    /// Decrement the int at offset in place. Operand: i32 offset
    DecISp = 0x23,
    /// Increment the int at offset in place. Operand: i32 offset
    IncISp = 0x24,
    /// Pop an int, jump when non-zero. Operand: i32 delta
    Jnz = 0x25,

    // ========================================================================
    // Base pointer addressing (0x26 - 0x2B)
    // ========================================================================
    CpDownBp = 0x26,
    CpTopBp = 0x27,
    DecIBp = 0x28,
    IncIBp = 0x29,
    SaveBp = 0x2A,
    RestoreBp = 0x2B,

    // ========================================================================
    // Deferred actions & padding (0x2C - 0x2D)
    // ========================================================================
    /// Capture the frame for the deferred action that starts two
    /// instructions later. Operand: i32 bp bytes, i32 sp bytes
    StoreState = 0x2C,

    Nop = 0x2D,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        let opcode = match byte {
            0x01 => CpDownSp,
            0x02 => RsAdd,
            0x03 => CpTopSp,
            0x04 => Const,
            0x05 => Action,
            0x06 => LogAnd,
            0x07 => LogOr,
            0x08 => IncOr,
            0x09 => ExcOr,
            0x0A => BoolAnd,
            0x0B => Equal,
            0x0C => NEqual,
            0x0D => Geq,
            0x0E => Gt,
            0x0F => Lt,
            0x10 => Leq,
            0x11 => ShLeft,
            0x12 => ShRight,
            0x13 => UShRight,
            0x14 => Add,
            0x15 => Sub,
            0x16 => Mul,
            0x17 => Div,
            0x18 => Mod,
            0x19 => Neg,
            0x1A => Comp,
            0x1B => MovSp,
            0x1C => StoreStateAll,
            0x1D => Jmp,
            0x1E => Jsr,
            0x1F => Jz,
            0x20 => Retn,
            0x21 => Destruct,
            0x22 => NotI,
            0x23 => DecISp,
            0x24 => IncISp,
            0x25 => Jnz,
            0x26 => CpDownBp,
            0x27 => CpTopBp,
            0x28 => DecIBp,
            0x29 => IncIBp,
            0x2A => SaveBp,
            0x2B => RestoreBp,
            0x2C => StoreState,
            0x2D => Nop,
            _ => return None,
        };
        Some(opcode)
    }

    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            CpDownSp => "CPDOWNSP",
            RsAdd => "RSADD",
            CpTopSp => "CPTOPSP",
            Const => "CONST",
            Action => "ACTION",
            LogAnd => "LOGAND",
            LogOr => "LOGOR",
            IncOr => "INCOR",
            ExcOr => "EXCOR",
            BoolAnd => "BOOLAND",
            Equal => "EQUAL",
            NEqual => "NEQUAL",
            Geq => "GEQ",
            Gt => "GT",
            Lt => "LT",
            Leq => "LEQ",
            ShLeft => "SHLEFT",
            ShRight => "SHRIGHT",
            UShRight => "USHRIGHT",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Neg => "NEG",
            Comp => "COMP",
            MovSp => "MOVSP",
            StoreStateAll => "STORE_STATEALL",
            Jmp => "JMP",
            Jsr => "JSR",
            Jz => "JZ",
            Retn => "RETN",
            Destruct => "DESTRUCT",
            NotI => "NOT",
            DecISp => "DECISP",
            IncISp => "INCISP",
            Jnz => "JNZ",
            CpDownBp => "CPDOWNBP",
            CpTopBp => "CPTOPBP",
            DecIBp => "DECIBP",
            IncIBp => "INCIBP",
            SaveBp => "SAVEBP",
            RestoreBp => "RESTOREBP",
            StoreState => "STORE_STATE",
            Nop => "NOP",
        }
    }

    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Jsr | Opcode::Jz | Opcode::Jnz)
    }

    /// Whether control can reach the following instruction.
    pub fn falls_through(self) -> bool {
        !matches!(self, Opcode::Jmp | Opcode::Retn)
    }

    /// Whether the qualifier is part of the printed mnemonic.
    fn shows_qualifier(self) -> bool {
        !matches!(
            self,
            Opcode::CpDownSp
                | Opcode::CpTopSp
                | Opcode::CpDownBp
                | Opcode::CpTopBp
                | Opcode::Action
                | Opcode::MovSp
                | Opcode::StoreStateAll
                | Opcode::Jmp
                | Opcode::Jsr
                | Opcode::Jz
                | Opcode::Jnz
                | Opcode::Retn
                | Opcode::Destruct
                | Opcode::SaveBp
                | Opcode::RestoreBp
                | Opcode::StoreState
                | Opcode::Nop
                | Opcode::NotI
                | Opcode::DecISp
                | Opcode::IncISp
                | Opcode::DecIBp
                | Opcode::IncIBp
        )
    }
}

/// The engine-defined opaque handle kinds, numbered as in the qualifier byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EngineType {
    Effect = 0,
    Event = 1,
    Location = 2,
    Talent = 3,
}

impl EngineType {
    pub const ALL: [EngineType; 4] = [
        EngineType::Effect,
        EngineType::Event,
        EngineType::Location,
        EngineType::Talent,
    ];

    pub fn from_index(index: u8) -> Option<EngineType> {
        EngineType::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn keyword(self) -> &'static str {
        match self {
            EngineType::Effect => "effect",
            EngineType::Event => "event",
            EngineType::Location => "location",
            EngineType::Talent => "talent",
        }
    }
}

/// The type-qualifier byte. Kept as a raw byte so that decoding can report
/// the exact value it rejected.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeQualifier(pub u8);

impl TypeQualifier {
    pub const NONE: TypeQualifier = TypeQualifier(0x00);
    pub const STACK: TypeQualifier = TypeQualifier(0x01);
    pub const INT: TypeQualifier = TypeQualifier(0x03);
    pub const FLOAT: TypeQualifier = TypeQualifier(0x04);
    pub const STRING: TypeQualifier = TypeQualifier(0x05);
    pub const OBJECT: TypeQualifier = TypeQualifier(0x06);
    pub const STATE: TypeQualifier = TypeQualifier(0x10);
    pub const INT_INT: TypeQualifier = TypeQualifier(0x20);
    pub const FLOAT_FLOAT: TypeQualifier = TypeQualifier(0x21);
    pub const OBJECT_OBJECT: TypeQualifier = TypeQualifier(0x22);
    pub const STRING_STRING: TypeQualifier = TypeQualifier(0x23);
    pub const STRUCT_STRUCT: TypeQualifier = TypeQualifier(0x24);
    pub const INT_FLOAT: TypeQualifier = TypeQualifier(0x25);
    pub const FLOAT_INT: TypeQualifier = TypeQualifier(0x26);
    pub const VECTOR_VECTOR: TypeQualifier = TypeQualifier(0x3A);
    pub const VECTOR_FLOAT: TypeQualifier = TypeQualifier(0x3B);
    pub const FLOAT_VECTOR: TypeQualifier = TypeQualifier(0x3C);

    pub fn engine(kind: EngineType) -> TypeQualifier {
        TypeQualifier(0x10 + kind.index())
    }

    pub fn engine_pair(kind: EngineType) -> TypeQualifier {
        TypeQualifier(0x30 + kind.index())
    }

    /// The engine type of a single-operand engine qualifier.
    pub fn as_engine(self) -> Option<EngineType> {
        match self.0 {
            0x10..=0x13 => EngineType::from_index(self.0 - 0x10),
            _ => None,
        }
    }

    /// The engine type of an engine-pair qualifier.
    pub fn as_engine_pair(self) -> Option<EngineType> {
        match self.0 {
            0x30..=0x33 => EngineType::from_index(self.0 - 0x30),
            _ => None,
        }
    }

    /// Textual suffix used in mnemonics, e.g. `II` in `ADDII`.
    pub fn suffix(self) -> String {
        match self {
            TypeQualifier::INT => "I".to_string(),
            TypeQualifier::FLOAT => "F".to_string(),
            TypeQualifier::STRING => "S".to_string(),
            TypeQualifier::OBJECT => "O".to_string(),
            TypeQualifier::INT_INT => "II".to_string(),
            TypeQualifier::FLOAT_FLOAT => "FF".to_string(),
            TypeQualifier::OBJECT_OBJECT => "OO".to_string(),
            TypeQualifier::STRING_STRING => "SS".to_string(),
            TypeQualifier::STRUCT_STRUCT => "TT".to_string(),
            TypeQualifier::INT_FLOAT => "IF".to_string(),
            TypeQualifier::FLOAT_INT => "FI".to_string(),
            TypeQualifier::VECTOR_VECTOR => "VV".to_string(),
            TypeQualifier::VECTOR_FLOAT => "VF".to_string(),
            TypeQualifier::FLOAT_VECTOR => "FV".to_string(),
            other => {
                if let Some(kind) = other.as_engine() {
                    format!("E{}", kind.index())
                } else if let Some(kind) = other.as_engine_pair() {
                    format!("E{0}E{0}", kind.index())
                } else {
                    format!("<{:#04x}>", other.0)
                }
            }
        }
    }

    /// Whether `opcode` may carry this qualifier in a well-formed stream.
    pub fn accepted_by(self, opcode: Opcode) -> bool {
        use Opcode::*;
        let q = self;
        let arith = [
            TypeQualifier::INT_INT,
            TypeQualifier::INT_FLOAT,
            TypeQualifier::FLOAT_INT,
            TypeQualifier::FLOAT_FLOAT,
        ];
        match opcode {
            CpDownSp | CpTopSp | CpDownBp | CpTopBp | Destruct => q == TypeQualifier::STACK,
            RsAdd => {
                matches!(
                    q,
                    TypeQualifier::INT
                        | TypeQualifier::FLOAT
                        | TypeQualifier::STRING
                        | TypeQualifier::OBJECT
                ) || q.as_engine().is_some()
            }
            Const => matches!(
                q,
                TypeQualifier::INT
                    | TypeQualifier::FLOAT
                    | TypeQualifier::STRING
                    | TypeQualifier::OBJECT
            ),
            Action | MovSp | Jmp | Jsr | Jz | Jnz | Retn | SaveBp | RestoreBp | Nop => {
                q == TypeQualifier::NONE
            }
            StoreStateAll => true,
            StoreState => q == TypeQualifier::STATE,
            LogAnd | LogOr | IncOr | ExcOr | BoolAnd | ShLeft | ShRight | UShRight | Mod => {
                q == TypeQualifier::INT_INT
            }
            Equal | NEqual => {
                matches!(
                    q,
                    TypeQualifier::INT_INT
                        | TypeQualifier::FLOAT_FLOAT
                        | TypeQualifier::OBJECT_OBJECT
                        | TypeQualifier::STRING_STRING
                        | TypeQualifier::STRUCT_STRUCT
                ) || q.as_engine_pair().is_some()
            }
            Geq | Gt | Lt | Leq => {
                q == TypeQualifier::INT_INT || q == TypeQualifier::FLOAT_FLOAT
            }
            Add => {
                arith.contains(&q)
                    || q == TypeQualifier::STRING_STRING
                    || q == TypeQualifier::VECTOR_VECTOR
            }
            Sub => arith.contains(&q) || q == TypeQualifier::VECTOR_VECTOR,
            Mul => {
                arith.contains(&q)
                    || q == TypeQualifier::VECTOR_FLOAT
                    || q == TypeQualifier::FLOAT_VECTOR
            }
            Div => arith.contains(&q) || q == TypeQualifier::VECTOR_FLOAT,
            Neg => q == TypeQualifier::INT || q == TypeQualifier::FLOAT,
            Comp | NotI | DecISp | IncISp | DecIBp | IncIBp => q == TypeQualifier::INT,
        }
    }
}

impl fmt::Debug for TypeQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeQualifier({:#04x})", self.0)
    }
}

/// Symbolic jump target, resolved to a byte delta only when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Opcode-specific operand payload.
#[derive(Debug, Clone)]
pub enum Operand {
    None,
    /// `CONSTI`, `CONSTO`, `MOVSP` and the in-place increments.
    Int(i32),
    Float(f32),
    /// Latin-1 text; every char is at most U+00FF.
    String(String),
    /// Stack copies: offset from SP (or BP) and byte count.
    Stack { offset: i32, size: u16 },
    Jump(Label),
    Action { routine: u16, argc: u8 },
    Destruct { size: u16, offset: i16, keep: u16 },
    StoreState { bp: i32, sp: i32 },
    /// Byte count of a struct comparison (`EQUALTT`/`NEQUALTT`).
    Size(u16),
}

impl PartialEq for Operand {
    fn eq(&self, other: &Self) -> bool {
        use Operand::*;
        match (self, other) {
            (None, None) => true,
            (Int(a), Int(b)) => a == b,
            // Bitwise, so that NaN constants survive a round trip.
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (Stack { offset: o1, size: s1 }, Stack { offset: o2, size: s2 }) => {
                o1 == o2 && s1 == s2
            }
            (Jump(a), Jump(b)) => a == b,
            (
                Action { routine: r1, argc: a1 },
                Action { routine: r2, argc: a2 },
            ) => r1 == r2 && a1 == a2,
            (
                Destruct { size: s1, offset: o1, keep: k1 },
                Destruct { size: s2, offset: o2, keep: k2 },
            ) => s1 == s2 && o1 == o2 && k1 == k2,
            (StoreState { bp: b1, sp: s1 }, StoreState { bp: b2, sp: s2 }) => {
                b1 == b2 && s1 == s2
            }
            (Size(a), Size(b)) => a == b,
            _ => false,
        }
    }
}

impl Operand {
    /// Number of operand bytes in the container encoding.
    pub fn encoded_len(&self) -> usize {
        match self {
            Operand::None => 0,
            Operand::Int(_) | Operand::Float(_) | Operand::Jump(_) => 4,
            Operand::String(text) => 2 + text.chars().count(),
            Operand::Stack { .. } => 6,
            Operand::Action { .. } => 3,
            Operand::Destruct { .. } => 6,
            Operand::StoreState { .. } => 8,
            Operand::Size(_) => 2,
        }
    }
}

/// A single instruction plus the source position that produced it.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    pub qualifier: TypeQualifier,
    pub operand: Operand,
    /// Only set when compiling with debug information.
    pub origin: Option<Span>,
}

/// Debug origins never take part in equality.
impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        self.opcode == other.opcode
            && self.qualifier == other.qualifier
            && self.operand == other.operand
    }
}

impl Instruction {
    pub fn new(opcode: Opcode, qualifier: TypeQualifier, operand: Operand) -> Self {
        Self {
            opcode,
            qualifier,
            operand,
            origin: None,
        }
    }

    /// An instruction without qualifier or operands (`RETN`, `NOP`, `SAVEBP` ...).
    pub fn bare(opcode: Opcode) -> Self {
        Self::new(opcode, TypeQualifier::NONE, Operand::None)
    }

    pub fn typed(opcode: Opcode, qualifier: TypeQualifier) -> Self {
        Self::new(opcode, qualifier, Operand::None)
    }

    pub fn const_int(value: i32) -> Self {
        Self::new(Opcode::Const, TypeQualifier::INT, Operand::Int(value))
    }

    pub fn const_float(value: f32) -> Self {
        Self::new(Opcode::Const, TypeQualifier::FLOAT, Operand::Float(value))
    }

    pub fn const_string(value: impl Into<String>) -> Self {
        Self::new(
            Opcode::Const,
            TypeQualifier::STRING,
            Operand::String(value.into()),
        )
    }

    pub fn const_object(id: i32) -> Self {
        Self::new(Opcode::Const, TypeQualifier::OBJECT, Operand::Int(id))
    }

    pub fn jump(opcode: Opcode, target: Label) -> Self {
        Self::new(opcode, TypeQualifier::NONE, Operand::Jump(target))
    }

    pub fn move_sp(delta: i32) -> Self {
        Self::new(Opcode::MovSp, TypeQualifier::NONE, Operand::Int(delta))
    }

    /// `CPTOPSP`, `CPDOWNSP`, `CPTOPBP` or `CPDOWNBP`.
    pub fn copy(opcode: Opcode, offset: i32, size: u16) -> Self {
        Self::new(opcode, TypeQualifier::STACK, Operand::Stack { offset, size })
    }

    /// `INCISP`, `DECISP`, `INCIBP` or `DECIBP`.
    pub fn step(opcode: Opcode, offset: i32) -> Self {
        Self::new(opcode, TypeQualifier::INT, Operand::Int(offset))
    }

    pub fn action(routine: u16, argc: u8) -> Self {
        Self::new(
            Opcode::Action,
            TypeQualifier::NONE,
            Operand::Action { routine, argc },
        )
    }

    pub fn store_state(bp: i32, sp: i32) -> Self {
        Self::new(
            Opcode::StoreState,
            TypeQualifier::STATE,
            Operand::StoreState { bp, sp },
        )
    }

    pub fn with_origin(mut self, origin: Option<Span>) -> Self {
        self.origin = origin;
        self
    }

    /// The label this instruction transfers control to, if any.
    pub fn jump_target(&self) -> Option<Label> {
        match self.operand {
            Operand::Jump(label) => Some(label),
            _ => None,
        }
    }

    /// Size in bytes of this instruction inside a container.
    pub fn encoded_len(&self) -> usize {
        2 + self.operand.encoded_len()
    }

    /// Opcode name plus qualifier suffix, e.g. `CONSTI` or `EQUALTT`.
    pub fn mnemonic(&self) -> String {
        if self.opcode.shows_qualifier() {
            format!("{}{}", self.opcode.name(), self.qualifier.suffix())
        } else {
            self.opcode.name().to_string()
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        match &self.operand {
            Operand::None => {
                if self.opcode == Opcode::StoreStateAll {
                    write!(f, " {}", self.qualifier.0)?;
                }
                Ok(())
            }
            Operand::Int(value) => write!(f, " {}", value),
            Operand::Float(value) => write!(f, " {:?}", value),
            Operand::String(text) => write!(f, " {:?}", text),
            Operand::Stack { offset, size } => write!(f, " {}, {}", offset, size),
            Operand::Jump(label) => write!(f, " {}", label),
            Operand::Action { routine, argc } => write!(f, " {}, {}", routine, argc),
            Operand::Destruct { size, offset, keep } => {
                write!(f, " {}, {}, {}", size, offset, keep)
            }
            Operand::StoreState { bp, sp } => write!(f, " {}, {}", bp, sp),
            Operand::Size(size) => write!(f, " {}", size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_opcode_byte_round_trip() {
        for byte in 0..=u8::MAX {
            if let Some(opcode) = Opcode::from_byte(byte) {
                assert_eq!(opcode as u8, byte);
            }
        }
        assert_eq!(Opcode::from_byte(0x00), None);
        assert_eq!(Opcode::from_byte(0x2E), None);
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(Instruction::const_int(3).to_string(), "CONSTI 3");
        assert_eq!(
            Instruction::typed(Opcode::Add, TypeQualifier::INT_FLOAT).mnemonic(),
            "ADDIF"
        );
        assert_eq!(Instruction::copy(Opcode::CpTopSp, -4, 4).to_string(), "CPTOPSP -4, 4");
        assert_eq!(
            Instruction::typed(Opcode::RsAdd, TypeQualifier::engine(EngineType::Location))
                .mnemonic(),
            "RSADDE2"
        );
        assert_eq!(Instruction::bare(Opcode::Retn).to_string(), "RETN");
    }

    #[test]
    fn test_qualifier_validity() {
        assert!(TypeQualifier::INT_INT.accepted_by(Opcode::Mod));
        assert!(!TypeQualifier::FLOAT_FLOAT.accepted_by(Opcode::Mod));
        assert!(TypeQualifier::VECTOR_FLOAT.accepted_by(Opcode::Div));
        assert!(!TypeQualifier::FLOAT_VECTOR.accepted_by(Opcode::Div));
        assert!(TypeQualifier::engine_pair(EngineType::Talent).accepted_by(Opcode::Equal));
        assert!(!TypeQualifier::INT.accepted_by(Opcode::Jmp));
    }

    #[test]
    fn test_encoded_lengths() {
        assert_eq!(Instruction::bare(Opcode::Retn).encoded_len(), 2);
        assert_eq!(Instruction::const_string("abc").encoded_len(), 7);
        assert_eq!(Instruction::action(1, 1).encoded_len(), 5);
        assert_eq!(Instruction::store_state(0, 0).encoded_len(), 10);
        assert_eq!(Instruction::jump(Opcode::Jmp, Label(0)).encoded_len(), 6);
    }

    #[test]
    fn test_equality_ignores_origin() {
        let plain = Instruction::const_int(1);
        let with_origin = Instruction::const_int(1).with_origin(Some(Span::default()));
        assert_eq!(plain, with_origin);
        assert_eq!(
            Instruction::const_float(f32::NAN),
            Instruction::const_float(f32::NAN)
        );
    }
}
