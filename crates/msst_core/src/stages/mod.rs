//! Stage graph: which stages run, in what order, reading and writing where.

mod chain;
mod command;
mod planner;

pub use chain::{build_chain, stage_output_dir, ChainLink, StageChain};
pub use command::{CommandContext, StageCommand};
pub use planner::{SkippedStage, StagePlan, StagePlanner};
