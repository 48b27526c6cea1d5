//! NWScript - compiler, virtual machine and decompiler for NCS bytecode
//!
//! # Overview
//!
//! NWScript is the scripting language of the Odyssey engine games (K1 and
//! TSL). Scripts compile to NCS, a stack-machine bytecode. This crate
//! provides:
//!
//! - A compiler from script source to NCS programs
//! - A lossless reader and writer for the NCS container
//! - An optimizer pipeline of semantics-preserving passes
//! - A virtual machine that runs programs and records engine calls
//! - A decompiler that rebuilds approximate source from bytecode
//!
//! # Quick Start
//!
//! ```
//! use nwscript::{CompileOptions, ExecutionOptions};
//!
//! let program = nwscript::compile(
//!     "void main() { int i; for (i = 0; i < 3; i++) { PrintInteger(i); } }",
//!     &CompileOptions::default(),
//! )
//! .unwrap();
//!
//! let result = nwscript::execute(&program, &ExecutionOptions::default());
//! assert_eq!(result.snapshots.len(), 3);
//!
//! let source = nwscript::decompile(&program, nwscript::Game::K1);
//! assert!(source.contains("PrintInteger"));
//! ```
//!
//! # Errors
//!
//! Fatal failures are reported as [`Error`] and can be rendered with
//! source snippets by [`render_error`].

// Re-export public API from nwscript_core
pub use nwscript_core::api::{
    CompileOptions, Diagnostic, Error, ExecutionOptions, Severity, compile, compile_file,
    compile_with_loader, decompile, disassemble, execute, optimize, read_container,
    write_container,
};

// Re-export commonly used types
pub use nwscript_core::decompiler::{Decompiler, SubroutineAmbiguity, SubroutineDescriptor};
pub use nwscript_core::optimizer::{self, OptimizerPass, default_pipeline};
pub use nwscript_core::parser::{DirectoryLoader, MemoryLoader, SourceLoader};
pub use nwscript_core::types::{DataType, Game};
pub use nwscript_core::vm::{
    Argument, CallSnapshot, FaultKind, Instruction, Opcode, Outcome, Program, Value, VmFault,
    VmResult,
};

// Error rendering with ariadne
mod error_renderer;
pub use error_renderer::{
    render_error, render_error_to, render_error_to_string, render_error_to_string_no_color,
};
