//! Worker command composition.

use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::models::{InferenceFlags, ResolvedModel, StageKind};

use super::chain::ChainLink;

/// Fully composed invocation of the worker for one stage.
///
/// Arguments are kept as a vector and handed to the OS as-is; no shell is
/// involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub kind: StageKind,
    pub model: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Values shared by every command of one run.
#[derive(Debug, Clone)]
pub struct CommandContext<'a> {
    pub interpreter: &'a Path,
    pub script: &'a Path,
    pub pretrain_dir: &'a Path,
    pub flags: InferenceFlags,
}

impl StageCommand {
    /// Compose the command for a chain link whose model resolved.
    pub fn build(link: &ChainLink, resolved: &ResolvedModel, ctx: &CommandContext<'_>) -> Self {
        let checkpoint = ctx.pretrain_dir.join(&resolved.model_id);

        let mut args: Vec<OsString> = vec![
            ctx.script.into(),
            "--model_type".into(),
            resolved.model_type.clone().into(),
            "--start_check_point".into(),
            checkpoint.into(),
            "--input_folder".into(),
            link.input_dir.clone().into(),
            "--store_dir".into(),
            link.output_dir.clone().into(),
            "--extract_instrumental".into(),
            "--config_path".into(),
            resolved.config_path.clone().into(),
        ];
        if ctx.flags.force_cpu {
            args.push("--force_cpu".into());
        }
        if ctx.flags.use_tta {
            args.push("--use_tta".into());
        }

        Self {
            kind: link.kind,
            model: link.model.clone(),
            program: ctx.interpreter.to_path_buf(),
            args,
            input_dir: link.input_dir.clone(),
            output_dir: link.output_dir.clone(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.kind.label()
    }

    /// Shell-quoted rendering for logs and dry runs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(quote)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// A `std::process::Command` with program and arguments set.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|arg| arg == flag)
    }

    /// Value following `flag`, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|idx| self.args.get(idx + 1))
            .map(OsString::as_os_str)
    }
}

fn quote(arg: &OsStr) -> String {
    shell_escape::escape(Cow::Owned(arg.to_string_lossy().into_owned())).into_owned()
}
