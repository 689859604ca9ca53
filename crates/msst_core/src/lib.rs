//! MSST Core - Backend logic for the MSST pipeline orchestrator
//!
//! This crate drives a chain of external inference workers over a set of
//! working directories. It contains all orchestration logic with zero UI
//! dependencies and can be used by a GUI application or the `msst` CLI.

pub mod archive;
pub mod config;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod organize;
pub mod process;
pub mod stages;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_returns_value() {
        assert!(!version().is_empty());
    }
}
