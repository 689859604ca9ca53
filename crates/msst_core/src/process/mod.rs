//! External worker process lifecycle.
//!
//! - [`classify`]: progress vs. discrete lines, and their severity
//! - [`LineSplitter`]: merged byte stream to lines, keeping `\r` redraws
//! - [`augment_search_path`]: interpreter environment on the worker's `PATH`
//! - [`ProcessRunner`]: spawn, stream, cancel and reap one worker
//! - [`ProcessTree`]: platform seam for descendant listing and termination

mod classify;
mod env;
mod errors;
mod lines;
mod runner;
mod tree;

pub use classify::{classify, LineClass, PROGRESS_MARKER};
pub use env::{augment_search_path, interpreter_search_dirs};
pub use errors::{ProcessError, ProcessResult};
pub use lines::LineSplitter;
pub use runner::{OutputLine, ProcessRunner, RunnerConfig, StageRun};
pub use tree::{live_group_members, terminate_tree, ProcessTree, SystemProcessTree, Teardown};
