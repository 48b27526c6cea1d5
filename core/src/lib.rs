//! Core of the NWScript toolchain: compiler, NCS container codec,
//! optimizer, virtual machine and decompiler.
//!
//! The stable entry points live in [`api`]; the component modules are
//! public for tools that need finer control.

pub mod api;
pub mod compiler;
pub mod container;
pub mod decompiler;
pub mod optimizer;
pub mod parser;
pub mod scope_stack;
pub mod types;
pub mod vm;

/// Test utilities for enabling logging in tests
#[cfg(test)]
pub mod test_utils {
    /// Initialize tracing subscriber for tests with DEBUG level
    /// Call this at the start of tests where you want to see logging output
    ///
    /// # Example
    /// ```ignore
    /// #[test]
    /// fn test_round_trip() {
    ///     test_utils::init_test_logging();
    ///     // ... your test code
    /// }
    /// ```
    pub fn init_test_logging() {
        use tracing_subscriber::{EnvFilter, fmt};

        // Try to initialize, ignore error if already initialized
        let _ = fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    }
}
