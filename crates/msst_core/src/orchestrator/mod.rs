//! Pipeline orchestrator for running separation stages.
//!
//! A run executes the commands of a [`StagePlan`](crate::stages::StagePlan)
//! strictly one after another. After each stage its output directory is
//! reorganized before the next stage reads it.
//!
//! # Architecture
//!
//! ```text
//! Session
//!     ├── StagePlanner ── StagePlan
//!     ├── Pipeline
//!     │     ├── Stage: Vocal   ── ProcessRunner ── reorganize
//!     │     ├── Stage: Karaoke ── ProcessRunner ── reorganize
//!     │     ├── Stage: Reverb  ── ProcessRunner ── reorganize
//!     │     └── Stage: Other   ── ProcessRunner ── reorganize
//!     └── Archiver
//! ```
//!
//! # Example
//!
//! ```no_run
//! use msst_core::config::Settings;
//! use msst_core::models::{InferenceFlags, ModelSelection, StageKind};
//! use msst_core::orchestrator::Session;
//!
//! let session = Session::open(Settings::default()).unwrap();
//! let selection = ModelSelection::none().with(StageKind::Vocal, "MelBandRoformer_kim.ckpt");
//! let plan = session.plan(&selection, InferenceFlags::default());
//!
//! let handle = session.spawn_run(plan).unwrap();
//! for event in handle.events() {
//!     println!("{:?}", event);
//! }
//! let summary = handle.join().unwrap();
//! println!("{}", summary);
//! ```

mod errors;
mod handle;
mod pipeline;
mod session;
mod types;

pub use errors::{PipelineError, PipelineResult};
pub use handle::{RunHandle, EVENT_BUFFER};
pub use pipeline::{count_files, CancelHandle, Pipeline};
pub use session::Session;
pub use types::{CompletedStage, EventCallback, RunEvent, RunOutcome, RunSummary};
