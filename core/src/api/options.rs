//! Configuration options for compiling and executing scripts.

use std::path::PathBuf;

use crate::types::Game;

/// Configuration options for compilation.
///
/// # Example
///
/// ```
/// use nwscript_core::api::CompileOptions;
/// use nwscript_core::types::Game;
///
/// let options = CompileOptions {
///     dialect: Game::Tsl,
///     include_dirs: vec!["scripts/include".into()],
///     ..CompileOptions::default()
/// };
/// assert!(!options.debug);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Routine and constant tables to compile against.
    ///
    /// Default: K1
    pub dialect: Game,

    /// Directories searched for `#include` targets, first match wins.
    pub include_dirs: Vec<PathBuf>,

    /// Attach source positions to the emitted instructions.
    ///
    /// Default: false
    pub debug: bool,

    /// Run the default optimizer pipeline on the result.
    ///
    /// Default: false
    pub optimize: bool,
}

/// Configuration options for program execution.
///
/// # Example
///
/// ```
/// use nwscript_core::api::ExecutionOptions;
///
/// let options = ExecutionOptions {
///     cycle_budget: 10_000,
///     ..ExecutionOptions::default()
/// };
/// assert_eq!(options.max_stack_bytes, 64 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Dialect whose routine table resolves `ACTION` calls.
    ///
    /// Default: K1
    pub dialect: Game,

    /// Maximum number of instructions to execute before faulting.
    ///
    /// Default: 1_000_000
    pub cycle_budget: u64,

    /// Maximum stack size in bytes.
    ///
    /// Default: 65536
    pub max_stack_bytes: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            dialect: Game::K1,
            cycle_budget: 1_000_000,
            max_stack_bytes: 64 * 1024,
        }
    }
}
