//! Public API for the NWScript toolchain.
//!
//! Every entry point is a synchronous function over its inputs; the dialect
//! tables are the only shared state and are read-only.
//!
//! # Example
//!
//! ```
//! use nwscript_core::api::{self, CompileOptions, ExecutionOptions};
//!
//! let program = api::compile(
//!     "void main() { PrintInteger(7); }",
//!     &CompileOptions::default(),
//! )
//! .unwrap();
//!
//! let bytes = api::write_container(&program).unwrap();
//! assert_eq!(api::read_container(&bytes).unwrap(), program);
//!
//! let result = api::execute(&program, &ExecutionOptions::default());
//! assert!(result.is_halted());
//! assert_eq!(result.snapshots[0].name, "PrintInteger");
//! ```

pub mod error;
pub mod options;

use std::path::Path;

use tracing::debug;

use crate::compiler::BytecodeCompiler;
use crate::optimizer::{self, OptimizerPass};
use crate::parser::{self, DirectoryLoader, SourceLoader, decode_source};
use crate::types::Game;
use crate::vm::{Program, Vm, VmResult, disasm};

pub use error::{Diagnostic, Error, Severity};
pub use options::{CompileOptions, ExecutionOptions};

/// Compiles script source, resolving `#include`s against
/// `options.include_dirs`.
pub fn compile(source: &str, options: &CompileOptions) -> Result<Program, Error> {
    let mut loader = DirectoryLoader::new(options.include_dirs.clone());
    compile_with_loader(source, options, &mut loader)
}

/// Compiles script source, resolving `#include`s through `loader`.
pub fn compile_with_loader(
    source: &str,
    options: &CompileOptions,
    loader: &mut dyn SourceLoader,
) -> Result<Program, Error> {
    let unit = parser::parse(source, loader).map_err(|e| Error::compilation(e, source))?;
    let program = BytecodeCompiler::compile(&unit, options.dialect, options.debug)
        .map_err(|e| Error::compilation(e, source))?;
    debug!(
        instructions = program.len(),
        dialect = %options.dialect,
        "Compiled script"
    );
    Ok(if options.optimize {
        optimizer::optimize(program, &optimizer::default_pipeline())
    } else {
        program
    })
}

/// Reads and compiles a script file. Sources that are not valid UTF-8 are
/// read as Latin-1.
pub fn compile_file(path: &Path, options: &CompileOptions) -> Result<Program, Error> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    compile(&decode_source(&bytes), options)
}

/// Encodes a program as an NCS container.
pub fn write_container(program: &Program) -> Result<Vec<u8>, Error> {
    Ok(crate::container::write_container(program)?)
}

/// Decodes an NCS container.
pub fn read_container(bytes: &[u8]) -> Result<Program, Error> {
    Ok(crate::container::read_container(bytes)?)
}

/// Human-readable listing; `pretty` adds labels and subroutine separators.
pub fn disassemble(program: &Program, pretty: bool) -> String {
    disasm::disassemble(program, pretty)
}

/// Best-effort source reconstruction. Never fails: subroutines that cannot
/// be rebuilt are emitted as commented disassembly.
pub fn decompile(program: &Program, dialect: Game) -> String {
    crate::decompiler::decompile(program, dialect)
}

/// Applies `passes` until the program stops changing.
pub fn optimize(program: Program, passes: &[Box<dyn OptimizerPass>]) -> Program {
    optimizer::optimize(program, passes)
}

/// Runs a program to completion, a fault or the end of its cycle budget.
pub fn execute(program: &Program, options: &ExecutionOptions) -> VmResult {
    Vm::new(program, options).run()
}
