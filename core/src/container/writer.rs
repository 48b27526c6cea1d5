use tracing::debug;

use crate::container::{EncodeError, HEADER_LEN, MAGIC, SIZE_MARKER, VERSION};
use crate::vm::{Operand, Program};

/// Serializes a program. Labels become signed byte deltas measured from
/// the start of each jump instruction; every delta is four bytes wide, so
/// the layout is known before any label is resolved.
pub fn write_container(program: &Program) -> Result<Vec<u8>, EncodeError> {
    let offsets = program.byte_offsets();
    let body = offsets.last().copied().unwrap_or(0);
    let total = HEADER_LEN + body;
    let declared = u32::try_from(total).map_err(|_| EncodeError::TooLarge(total))?;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(VERSION);
    out.push(SIZE_MARKER);
    out.extend_from_slice(&declared.to_be_bytes());

    for (index, instruction) in program.instructions().iter().enumerate() {
        out.push(instruction.opcode as u8);
        out.push(instruction.qualifier.0);
        match &instruction.operand {
            Operand::None => {}
            Operand::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
            Operand::Float(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
            Operand::String(text) => {
                let len = text.chars().count();
                let len16 =
                    u16::try_from(len).map_err(|_| EncodeError::StringTooLong { index, len })?;
                out.extend_from_slice(&len16.to_be_bytes());
                for ch in text.chars() {
                    let byte =
                        u8::try_from(u32::from(ch)).map_err(|_| EncodeError::NonLatin1 { index, ch })?;
                    out.push(byte);
                }
            }
            Operand::Stack { offset, size } => {
                out.extend_from_slice(&offset.to_be_bytes());
                out.extend_from_slice(&size.to_be_bytes());
            }
            Operand::Jump(label) => {
                let target = program
                    .target(*label)
                    .filter(|&target| target <= program.len())
                    .ok_or(EncodeError::UnboundLabel {
                        index,
                        label: *label,
                    })?;
                let delta = offsets[target] as i64 - offsets[index] as i64;
                let delta = i32::try_from(delta).map_err(|_| EncodeError::TooLarge(total))?;
                out.extend_from_slice(&delta.to_be_bytes());
            }
            Operand::Action { routine, argc } => {
                out.extend_from_slice(&routine.to_be_bytes());
                out.push(*argc);
            }
            Operand::Destruct { size, offset, keep } => {
                out.extend_from_slice(&size.to_be_bytes());
                out.extend_from_slice(&offset.to_be_bytes());
                out.extend_from_slice(&keep.to_be_bytes());
            }
            Operand::StoreState { bp, sp } => {
                out.extend_from_slice(&bp.to_be_bytes());
                out.extend_from_slice(&sp.to_be_bytes());
            }
            Operand::Size(size) => out.extend_from_slice(&size.to_be_bytes()),
        }
    }

    debug!(instructions = program.len(), bytes = out.len(), "Encoded container");
    Ok(out)
}
