use core::fmt;

use crate::vm::{EngineType, TypeQualifier};

/// Object id the compiler emits for `OBJECT_SELF`.
pub const OBJECT_SELF: i32 = 0;
/// Object id the compiler emits for `OBJECT_INVALID`.
pub const OBJECT_INVALID: i32 = 1;

/// The content of one 4-byte stack slot.
#[derive(Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    String(String),
    Object(i32),
    Engine(EngineType, i32),
}

impl Value {
    /// The value `RSADD` reserves for a slot of the given qualifier.
    pub fn default_for(qualifier: TypeQualifier) -> Option<Value> {
        let value = match qualifier {
            TypeQualifier::INT => Value::Int(0),
            TypeQualifier::FLOAT => Value::Float(0.0),
            TypeQualifier::STRING => Value::String(String::new()),
            TypeQualifier::OBJECT => Value::Object(OBJECT_INVALID),
            other => Value::Engine(other.as_engine()?, 0),
        };
        Some(value)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Engine(kind, _) => kind.keyword(),
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{}", value),
            Value::Float(value) => write!(f, "{:?}", value),
            Value::String(text) => write!(f, "{:?}", text),
            Value::Object(id) => write!(f, "object#{}", id),
            Value::Engine(kind, id) => write!(f, "{}#{}", kind.keyword(), id),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(text) => f.write_str(text),
            other => write!(f, "{:?}", other),
        }
    }
}
