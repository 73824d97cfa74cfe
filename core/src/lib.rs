//! Core utilities and shared types for the site migration engine.

pub mod exec;
pub mod limiter;

pub use exec::{argv, CommandOutput, ExecError, LocalExec, SystemExec};
pub use limiter::{JobLimiter, JobSlot};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Concurrency bound for the export-and-copy stage when nothing else is configured.
pub const DEFAULT_MAX_JOBS: usize = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
