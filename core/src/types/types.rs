use core::fmt;
use std::sync::Arc;

use crate::vm::{EngineType, TypeQualifier};

/// Static type of an expression, variable or function result.
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    Void,
    Int,
    Float,
    String,
    Object,
    Engine(EngineType),
    /// Three consecutive float slots.
    Vector,
    Struct(Arc<StructType>),
    /// A deferred statement; only valid as a parameter of an engine routine.
    Action,
    /// Not (yet) known. Produced by the decompiler only.
    Unknown,
}

/// A user-defined struct. Members are laid out in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub name: String,
    pub members: Vec<StructMember>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructMember {
    pub name: String,
    pub ty: DataType,
}

impl StructType {
    /// Byte offset of `member` from the start of the struct, plus its type.
    pub fn member(&self, member: &str) -> Option<(usize, &DataType)> {
        let mut offset = 0;
        for m in &self.members {
            if m.name == member {
                return Some((offset, &m.ty));
            }
            offset += m.ty.size();
        }
        None
    }

    pub fn size(&self) -> usize {
        self.members.iter().map(|m| m.ty.size()).sum()
    }
}

impl DataType {
    /// Size in bytes on the VM stack.
    pub fn size(&self) -> usize {
        match self {
            DataType::Void | DataType::Action => 0,
            DataType::Int
            | DataType::Float
            | DataType::String
            | DataType::Object
            | DataType::Engine(_)
            | DataType::Unknown => 4,
            DataType::Vector => 12,
            DataType::Struct(st) => st.size(),
        }
    }

    /// Qualifier of a single-slot value of this type.
    pub fn qualifier(&self) -> Option<TypeQualifier> {
        match self {
            DataType::Int => Some(TypeQualifier::INT),
            DataType::Float => Some(TypeQualifier::FLOAT),
            DataType::String => Some(TypeQualifier::STRING),
            DataType::Object => Some(TypeQualifier::OBJECT),
            DataType::Engine(kind) => Some(TypeQualifier::engine(*kind)),
            _ => None,
        }
    }

    /// Single-slot qualifiers making up this type, in push order.
    pub fn slot_qualifiers(&self) -> Vec<TypeQualifier> {
        match self {
            DataType::Vector => vec![TypeQualifier::FLOAT; 3],
            DataType::Struct(st) => st
                .members
                .iter()
                .flat_map(|m| m.ty.slot_qualifiers())
                .collect(),
            other => other.qualifier().into_iter().collect(),
        }
    }

    /// Inverse of [`DataType::qualifier`].
    pub fn from_qualifier(qualifier: TypeQualifier) -> Option<DataType> {
        match qualifier {
            TypeQualifier::INT => Some(DataType::Int),
            TypeQualifier::FLOAT => Some(DataType::Float),
            TypeQualifier::STRING => Some(DataType::String),
            TypeQualifier::OBJECT => Some(DataType::Object),
            other => other.as_engine().map(DataType::Engine),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int | DataType::Float)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, DataType::Unknown)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Void => f.write_str("void"),
            DataType::Int => f.write_str("int"),
            DataType::Float => f.write_str("float"),
            DataType::String => f.write_str("string"),
            DataType::Object => f.write_str("object"),
            DataType::Engine(kind) => f.write_str(kind.keyword()),
            DataType::Vector => f.write_str("vector"),
            DataType::Struct(st) => write!(f, "struct {}", st.name),
            DataType::Action => f.write_str("action"),
            DataType::Unknown => f.write_str("unknown"),
        }
    }
}
