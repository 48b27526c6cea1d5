use tracing::debug;

use crate::container::{
    DecodeError, DecodeErrorKind, HEADER_LEN, MAGIC, SIZE_MARKER, VERSION,
};
use crate::vm::{Instruction, Label, Opcode, Operand, Program, TypeQualifier};

/// Big-endian cursor over the container bytes.
struct Cursor<'b> {
    bytes: &'b [u8],
    pos: usize,
}

impl<'b> Cursor<'b> {
    fn take(&mut self, n: usize) -> Result<&'b [u8], DecodeError> {
        let end = self.pos + n;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(DecodeError::new(self.pos, DecodeErrorKind::Truncated))?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

/// Deserializes a container.
///
/// Decoding runs in two passes: the first reads every instruction and
/// remembers raw jump deltas, the second resolves each delta to an
/// instruction index. Labels are numbered by ascending target.
pub fn read_container(bytes: &[u8]) -> Result<Program, DecodeError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    if cursor.take(4)? != MAGIC {
        return Err(DecodeError::new(0, DecodeErrorKind::BadMagic));
    }
    if cursor.take(4)? != VERSION {
        return Err(DecodeError::new(4, DecodeErrorKind::BadVersion));
    }
    if cursor.u8()? != SIZE_MARKER {
        return Err(DecodeError::new(8, DecodeErrorKind::BadMagic));
    }
    let declared = cursor.u32()?;
    if declared as usize != bytes.len() {
        return Err(DecodeError::new(
            9,
            DecodeErrorKind::SizeMismatch {
                declared,
                actual: bytes.len(),
            },
        ));
    }
    debug_assert_eq!(cursor.pos, HEADER_LEN);

    // First pass: instructions with raw jump deltas.
    let mut decoded = Vec::new();
    let mut offsets = Vec::new();
    while !cursor.is_empty() {
        let start = cursor.pos;
        let (instruction, delta) = decode_instruction(&mut cursor)?;
        offsets.push(start);
        decoded.push((instruction, delta));
    }
    offsets.push(cursor.pos);

    // Second pass: deltas to indices.
    let mut targets = Vec::with_capacity(decoded.len());
    for (index, (_, delta)) in decoded.iter().enumerate() {
        let Some(delta) = delta else {
            targets.push(None);
            continue;
        };
        let target = offsets[index] as i64 + *delta as i64;
        let resolved = usize::try_from(target)
            .ok()
            .and_then(|t| offsets.binary_search(&t).ok())
            .ok_or(DecodeError::new(
                offsets[index],
                DecodeErrorKind::BadJumpTarget(target - HEADER_LEN as i64),
            ))?;
        targets.push(Some(resolved));
    }

    let mut label_targets: Vec<usize> = targets.iter().flatten().copied().collect();
    label_targets.sort_unstable();
    label_targets.dedup();

    let instructions = decoded
        .into_iter()
        .zip(targets)
        .map(|((mut instruction, _), target)| {
            if let Some(target) = target
                && let Ok(n) = label_targets.binary_search(&target)
            {
                instruction.operand = Operand::Jump(Label(n as u32));
            }
            instruction
        })
        .collect::<Vec<_>>();

    debug!(instructions = instructions.len(), labels = label_targets.len(), "Decoded container");
    Ok(Program::from_parts(
        instructions,
        label_targets.into_iter().map(Some).collect(),
    ))
}

/// Reads one instruction. Jump operands come back as `Operand::None` plus
/// the raw delta.
fn decode_instruction(cursor: &mut Cursor<'_>) -> Result<(Instruction, Option<i32>), DecodeError> {
    use Opcode::*;

    let start = cursor.pos;
    let byte = cursor.u8()?;
    let opcode =
        Opcode::from_byte(byte).ok_or(DecodeError::new(start, DecodeErrorKind::UnknownOpcode(byte)))?;
    let qualifier = TypeQualifier(cursor.u8()?);
    if !qualifier.accepted_by(opcode) {
        return Err(DecodeError::new(
            start + 1,
            DecodeErrorKind::InvalidQualifier {
                opcode: opcode.name(),
                qualifier: qualifier.0,
            },
        ));
    }

    let mut delta = None;
    let operand = match opcode {
        CpDownSp | CpTopSp | CpDownBp | CpTopBp => Operand::Stack {
            offset: cursor.i32()?,
            size: cursor.u16()?,
        },
        Const => match qualifier {
            TypeQualifier::FLOAT => Operand::Float(f32::from_bits(cursor.u32()?)),
            TypeQualifier::STRING => {
                let len = cursor.u16()? as usize;
                // Latin-1 maps every byte to the char of the same value.
                Operand::String(cursor.take(len)?.iter().map(|&b| b as char).collect())
            }
            _ => Operand::Int(cursor.i32()?),
        },
        Action => Operand::Action {
            routine: cursor.u16()?,
            argc: cursor.u8()?,
        },
        Equal | NEqual if qualifier == TypeQualifier::STRUCT_STRUCT => Operand::Size(cursor.u16()?),
        MovSp | DecISp | IncISp | DecIBp | IncIBp => Operand::Int(cursor.i32()?),
        Jmp | Jsr | Jz | Jnz => {
            delta = Some(cursor.i32()?);
            Operand::None
        }
        Destruct => Operand::Destruct {
            size: cursor.u16()?,
            offset: cursor.i16()?,
            keep: cursor.u16()?,
        },
        StoreState => Operand::StoreState {
            bp: cursor.i32()?,
            sp: cursor.i32()?,
        },
        _ => Operand::None,
    };
    Ok((Instruction::new(opcode, qualifier, operand), delta))
}
