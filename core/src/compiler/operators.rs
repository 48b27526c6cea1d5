//! Operator typing rules and their opcode encoding.
//!
//! Shared by the code generator, which picks the instruction for a typed
//! operator, and the decompiler, which maps instructions back to operators.

use crate::parser::BinaryOp;
use crate::types::DataType;
use crate::vm::{Instruction, Opcode, Operand, TypeQualifier};

pub fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::LogicalOr => Opcode::LogOr,
        BinaryOp::LogicalAnd => Opcode::LogAnd,
        BinaryOp::BitOr => Opcode::IncOr,
        BinaryOp::BitXor => Opcode::ExcOr,
        BinaryOp::BitAnd => Opcode::BoolAnd,
        BinaryOp::Eq => Opcode::Equal,
        BinaryOp::Ne => Opcode::NEqual,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Le => Opcode::Leq,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Ge => Opcode::Geq,
        BinaryOp::Shl => Opcode::ShLeft,
        BinaryOp::Shr => Opcode::ShRight,
        BinaryOp::UShr => Opcode::UShRight,
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
    }
}

/// Inverse of [`binary_opcode`].
pub fn binary_op_of(opcode: Opcode) -> Option<BinaryOp> {
    let op = match opcode {
        Opcode::LogOr => BinaryOp::LogicalOr,
        Opcode::LogAnd => BinaryOp::LogicalAnd,
        Opcode::IncOr => BinaryOp::BitOr,
        Opcode::ExcOr => BinaryOp::BitXor,
        Opcode::BoolAnd => BinaryOp::BitAnd,
        Opcode::Equal => BinaryOp::Eq,
        Opcode::NEqual => BinaryOp::Ne,
        Opcode::Lt => BinaryOp::Lt,
        Opcode::Leq => BinaryOp::Le,
        Opcode::Gt => BinaryOp::Gt,
        Opcode::Geq => BinaryOp::Ge,
        Opcode::ShLeft => BinaryOp::Shl,
        Opcode::ShRight => BinaryOp::Shr,
        Opcode::UShRight => BinaryOp::UShr,
        Opcode::Add => BinaryOp::Add,
        Opcode::Sub => BinaryOp::Sub,
        Opcode::Mul => BinaryOp::Mul,
        Opcode::Div => BinaryOp::Div,
        Opcode::Mod => BinaryOp::Mod,
        _ => return None,
    };
    Some(op)
}

/// Picks the instruction for `left op right` and the type it produces.
/// Returns `None` when the operand types are not accepted.
pub fn binary_instruction(
    op: BinaryOp,
    left: &DataType,
    right: &DataType,
) -> Option<(Instruction, DataType)> {
    use DataType::*;

    let arithmetic = || match (left, right) {
        (Int, Int) => Some((TypeQualifier::INT_INT, Int)),
        (Int, Float) => Some((TypeQualifier::INT_FLOAT, Float)),
        (Float, Int) => Some((TypeQualifier::FLOAT_INT, Float)),
        (Float, Float) => Some((TypeQualifier::FLOAT_FLOAT, Float)),
        _ => None,
    };

    let (qualifier, result) = match op {
        BinaryOp::Add => arithmetic().or(match (left, right) {
            (String, String) => Some((TypeQualifier::STRING_STRING, String)),
            (Vector, Vector) => Some((TypeQualifier::VECTOR_VECTOR, Vector)),
            _ => None,
        })?,
        BinaryOp::Sub => arithmetic().or(match (left, right) {
            (Vector, Vector) => Some((TypeQualifier::VECTOR_VECTOR, Vector)),
            _ => None,
        })?,
        BinaryOp::Mul => arithmetic().or(match (left, right) {
            (Vector, Float) => Some((TypeQualifier::VECTOR_FLOAT, Vector)),
            (Float, Vector) => Some((TypeQualifier::FLOAT_VECTOR, Vector)),
            _ => None,
        })?,
        BinaryOp::Div => arithmetic().or(match (left, right) {
            (Vector, Float) => Some((TypeQualifier::VECTOR_FLOAT, Vector)),
            _ => None,
        })?,
        BinaryOp::Mod
        | BinaryOp::Shl
        | BinaryOp::Shr
        | BinaryOp::UShr
        | BinaryOp::BitAnd
        | BinaryOp::BitOr
        | BinaryOp::BitXor
        | BinaryOp::LogicalAnd
        | BinaryOp::LogicalOr => match (left, right) {
            (Int, Int) => (TypeQualifier::INT_INT, Int),
            _ => return None,
        },
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => match (left, right) {
            (Int, Int) => (TypeQualifier::INT_INT, Int),
            (Float, Float) => (TypeQualifier::FLOAT_FLOAT, Int),
            _ => return None,
        },
        BinaryOp::Eq | BinaryOp::Ne => {
            if left != right {
                return None;
            }
            let qualifier = match left {
                Int => TypeQualifier::INT_INT,
                Float => TypeQualifier::FLOAT_FLOAT,
                String => TypeQualifier::STRING_STRING,
                Object => TypeQualifier::OBJECT_OBJECT,
                Engine(kind) => TypeQualifier::engine_pair(*kind),
                Vector | Struct(_) => {
                    let size = u16::try_from(left.size()).ok()?;
                    let instruction = Instruction::new(
                        binary_opcode(op),
                        TypeQualifier::STRUCT_STRUCT,
                        Operand::Size(size),
                    );
                    return Some((instruction, Int));
                }
                _ => return None,
            };
            (qualifier, Int)
        }
    };

    Some((Instruction::typed(binary_opcode(op), qualifier), result))
}

/// Operand and result types of a binary instruction, read from its
/// qualifier. `None` for struct comparisons, whose operand types are not
/// encoded.
pub fn operand_types(qualifier: TypeQualifier) -> Option<(DataType, DataType)> {
    use DataType::*;
    let pair = match qualifier {
        TypeQualifier::INT_INT => (Int, Int),
        TypeQualifier::INT_FLOAT => (Int, Float),
        TypeQualifier::FLOAT_INT => (Float, Int),
        TypeQualifier::FLOAT_FLOAT => (Float, Float),
        TypeQualifier::STRING_STRING => (String, String),
        TypeQualifier::OBJECT_OBJECT => (Object, Object),
        TypeQualifier::VECTOR_VECTOR => (Vector, Vector),
        TypeQualifier::VECTOR_FLOAT => (Vector, Float),
        TypeQualifier::FLOAT_VECTOR => (Float, Vector),
        other => {
            let kind = other.as_engine_pair()?;
            (Engine(kind), Engine(kind))
        }
    };
    Some(pair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_arithmetic_promotion() {
        let (instruction, ty) =
            binary_instruction(BinaryOp::Add, &DataType::Int, &DataType::Float).unwrap();
        assert_eq!(instruction.mnemonic(), "ADDIF");
        assert_eq!(ty, DataType::Float);

        let (instruction, ty) =
            binary_instruction(BinaryOp::Mul, &DataType::Float, &DataType::Vector).unwrap();
        assert_eq!(instruction.mnemonic(), "MULFV");
        assert_eq!(ty, DataType::Vector);
    }

    #[test]
    fn test_rejected_operands() {
        assert!(binary_instruction(BinaryOp::Sub, &DataType::String, &DataType::String).is_none());
        assert!(binary_instruction(BinaryOp::Mod, &DataType::Float, &DataType::Int).is_none());
        assert!(binary_instruction(BinaryOp::Lt, &DataType::Int, &DataType::Float).is_none());
        assert!(binary_instruction(BinaryOp::Div, &DataType::Float, &DataType::Vector).is_none());
        assert!(binary_instruction(BinaryOp::Eq, &DataType::Int, &DataType::Object).is_none());
    }

    #[test]
    fn test_vector_equality_compares_bytes() {
        let (instruction, ty) =
            binary_instruction(BinaryOp::Ne, &DataType::Vector, &DataType::Vector).unwrap();
        assert_eq!(instruction.to_string(), "NEQUALTT 12");
        assert_eq!(ty, DataType::Int);
    }

    #[test]
    fn test_opcode_mapping_is_invertible() {
        for op in [
            BinaryOp::LogicalOr,
            BinaryOp::BitXor,
            BinaryOp::Ge,
            BinaryOp::UShr,
            BinaryOp::Mod,
        ] {
            assert_eq!(binary_op_of(binary_opcode(op)), Some(op));
        }
        assert_eq!(binary_op_of(Opcode::Jmp), None);
    }
}
