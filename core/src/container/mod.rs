//! The binary NCS container.
//!
//! ```text
//! "NCS " "V1.0" 0x42 <u32 file size> <instruction>*
//! instruction = <opcode:u8> <qualifier:u8> <operands>
//! ```
//!
//! All multi-byte values are big-endian.

mod error;
mod reader;
mod writer;

pub use error::{DecodeError, DecodeErrorKind, EncodeError};
pub use reader::read_container;
pub use writer::write_container;

/// File-type tag.
pub const MAGIC: &[u8; 4] = b"NCS ";
/// Version tag.
pub const VERSION: &[u8; 4] = b"V1.0";
/// Marks the program-size record that follows the tags.
pub const SIZE_MARKER: u8 = 0x42;
/// Byte offset of the first instruction.
pub const HEADER_LEN: usize = 13;

static_assertions::const_assert_eq!(HEADER_LEN, MAGIC.len() + VERSION.len() + 1 + 4);

#[cfg(test)]
mod container_test;
