//! Turns a model selection into the commands of one run.
//!
//! Each selected model is resolved against the registry first. A model that
//! does not resolve is skipped with a warning and does not take part in
//! directory threading.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::models::{InferenceFlags, ModelRegistry, ModelSelection, StageKind};

use super::chain::{build_chain, StageChain};
use super::command::{CommandContext, StageCommand};

/// A selected stage that could not be scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedStage {
    pub kind: StageKind,
    pub model: String,
    pub reason: String,
}

/// Commands for one run, plus what was left out.
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub input_dir: PathBuf,
    pub chain: StageChain,
    pub commands: Vec<StageCommand>,
    pub skipped: Vec<SkippedStage>,
    pub flags: InferenceFlags,
}

impl StagePlan {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Checklist of every category: enabled or not, model and directories.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Input folder: {}", self.input_dir.display());
        let _ = writeln!(
            out,
            "Mode: {}{}{}",
            if self.flags.fast { "fast" } else { "normal" },
            if self.flags.force_cpu { ", force CPU" } else { "" },
            if self.flags.use_tta { ", TTA" } else { "" },
        );

        for kind in StageKind::ORDER {
            if let Some(cmd) = self.commands.iter().find(|c| c.kind == kind) {
                let _ = writeln!(
                    out,
                    "[x] {}: {} ({} -> {})",
                    kind.label(),
                    cmd.model,
                    cmd.input_dir.display(),
                    cmd.output_dir.display()
                );
            } else if let Some(skip) = self.skipped.iter().find(|s| s.kind == kind) {
                let _ = writeln!(
                    out,
                    "[!] {}: {} skipped, {}",
                    kind.label(),
                    skip.model,
                    skip.reason
                );
            } else {
                let _ = writeln!(out, "[ ] {}: disabled", kind.label());
            }
        }

        if self.commands.is_empty() {
            out.push_str("No stages to run.\n");
        }
        out
    }
}

/// Resolves selections against a registry.
#[derive(Debug, Clone)]
pub struct StagePlanner<'a> {
    registry: &'a ModelRegistry,
    input_dir: PathBuf,
    work_root: PathBuf,
    script: PathBuf,
    pretrain_dir: PathBuf,
}

impl<'a> StagePlanner<'a> {
    pub fn new(registry: &'a ModelRegistry, input_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            input_dir: input_dir.into(),
            work_root: PathBuf::from("."),
            script: PathBuf::from("inference.py"),
            pretrain_dir: PathBuf::from("pretrain"),
        }
    }

    pub fn from_settings(registry: &'a ModelRegistry, settings: &Settings) -> Self {
        Self::new(registry, settings.paths.input_dir())
            .work_root(settings.paths.work_root())
            .script(&settings.inference.script)
            .pretrain_dir(&settings.inference.pretrain_folder)
    }

    pub fn work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_root = dir.into();
        self
    }

    pub fn script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = script.into();
        self
    }

    pub fn pretrain_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pretrain_dir = dir.into();
        self
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn plan(&self, selection: &ModelSelection, flags: InferenceFlags) -> StagePlan {
        let mut schedulable = ModelSelection::none();
        let mut resolved = Vec::new();
        let mut skipped = Vec::new();

        for kind in StageKind::ORDER {
            let Some(model) = selection.get(kind) else {
                continue;
            };
            match self.registry.resolve(model, flags.fast) {
                Ok(found) => {
                    schedulable.set(kind, Some(model.to_string()));
                    resolved.push(found);
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", kind.label(), e);
                    skipped.push(SkippedStage {
                        kind,
                        model: model.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let chain = build_chain(&self.input_dir, &self.work_root, &schedulable);
        let interpreter = self.registry.interpreter();
        let ctx = CommandContext {
            interpreter: &interpreter,
            script: &self.script,
            pretrain_dir: &self.pretrain_dir,
            flags,
        };

        let commands: Vec<StageCommand> = chain
            .iter()
            .zip(&resolved)
            .map(|(link, model)| StageCommand::build(link, model, &ctx))
            .collect();

        for cmd in &commands {
            tracing::debug!("Planned {}: {}", cmd.label(), cmd.display());
        }

        StagePlan {
            input_dir: self.input_dir.clone(),
            chain,
            commands,
            skipped,
            flags,
        }
    }
}
