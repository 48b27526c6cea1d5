//! Semantics-preserving rewrites of an instruction stream.
//!
//! A pass rewrites a [`Program`] in place and reports how many changes it
//! made. [`optimize`] runs a list of passes round after round until a whole
//! round changes nothing, so the result of optimizing twice equals the
//! result of optimizing once.

mod passes;

use tracing::debug;

use crate::vm::Program;

pub use passes::{RemoveJumpToNext, RemoveNops, RemoveUnreachable, RemoveZeroMoves, ThreadJumps};

/// One rewrite over a whole program.
///
/// Implementations must keep every jump pointing at an instruction
/// boundary and must not change what the program does when executed.
pub trait OptimizerPass {
    fn name(&self) -> &'static str;

    /// Rewrites `program` and returns the number of changes made.
    fn run(&self, program: &mut Program) -> usize;
}

/// Every built-in pass, in the order they are best applied.
pub fn default_pipeline() -> Vec<Box<dyn OptimizerPass>> {
    vec![
        Box::new(RemoveNops),
        Box::new(RemoveZeroMoves),
        Box::new(ThreadJumps),
        Box::new(RemoveJumpToNext),
        Box::new(RemoveUnreachable),
    ]
}

/// Applies `passes` until the program stops changing.
pub fn optimize(mut program: Program, passes: &[Box<dyn OptimizerPass>]) -> Program {
    let before = program.len();
    let mut round = 0;
    loop {
        round += 1;
        let mut changes = 0;
        for pass in passes {
            let changed = pass.run(&mut program);
            if changed > 0 {
                debug!(pass = pass.name(), round, changed, "Optimizer pass applied");
            }
            changes += changed;
        }
        if changes == 0 {
            break;
        }
    }
    debug!(before, after = program.len(), rounds = round, "Optimization finished");
    program
}

#[cfg(test)]
mod optimizer_test;
