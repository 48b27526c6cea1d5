//! Code generator from the NWScript AST to NCS instructions.
//!
//! ## Design
//!
//! - Single pass over the items after a declaration pass, so functions can
//!   call each other in any order once prototyped
//! - Tracks the stack depth of the current routine in bytes; every local
//!   is addressed relative to it
//! - Jumps are emitted against symbolic labels and resolved only when the
//!   program is written to a container
//! - Functions with no reachable `JSR` calls are dropped from the output

mod bytecode;
pub mod operators;

#[cfg(test)]
mod bytecode_test;

pub use bytecode::BytecodeCompiler;
