//! Pipeline runner - executes a stage plan in order.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use walkdir::WalkDir;

use crate::archive::TIMESTAMP_FORMAT;
use crate::config::Settings;
use crate::logging::{LogConfig, RunLogger};
use crate::organize::reorganize;
use crate::process::{OutputLine, ProcessRunner, RunnerConfig};
use crate::stages::{StageCommand, StagePlan};

use super::errors::{PipelineError, PipelineResult};
use super::types::{CompletedStage, EventCallback, RunEvent, RunOutcome, RunSummary};

/// Runs the commands of a [`StagePlan`] one after another.
///
/// Each stage is spawned only after the previous one has exited and its
/// output has been reorganized. Cancellation is checked before every spawn
/// and forwarded to the running worker.
pub struct Pipeline {
    runner: ProcessRunner,
    log_config: LogConfig,
    logs_dir: Option<PathBuf>,
    callback: Option<EventCallback>,
    cancelled: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(runner: ProcessRunner) -> Self {
        Self {
            runner,
            log_config: LogConfig::default(),
            logs_dir: None,
            callback: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Pipeline with runner, logging and log directory taken from `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(ProcessRunner::new(RunnerConfig::from(&settings.inference)))
            .with_log_config(LogConfig::from(&settings.logging))
            .with_logs_dir(settings.paths.logs_dir())
    }

    pub fn with_log_config(mut self, config: LogConfig) -> Self {
        self.log_config = config;
        self
    }

    /// Write a per-run log file into `dir`.
    pub fn with_logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = Some(dir.into());
        self
    }

    pub fn with_callback(mut self, callback: EventCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Get a handle for cancelling the pipeline from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancelled),
        }
    }

    /// Check if the pipeline has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn emit(&self, event: RunEvent) {
        if let Some(ref cb) = self.callback {
            cb(&event);
        }
    }

    /// Check that the plan can start: the input directory exists and has at
    /// least one entry, and an interpreter given as a path exists.
    pub fn validate(&self, run_name: &str, plan: &StagePlan) -> PipelineResult<()> {
        let input = &plan.input_dir;
        if !input.is_dir() {
            return Err(PipelineError::validation_failed(
                run_name,
                format!("Input folder does not exist: {}", input.display()),
            ));
        }

        let has_entries = fs::read_dir(input)
            .map_err(|e| {
                PipelineError::validation_failed(
                    run_name,
                    format!("Cannot read input folder {}: {}", input.display(), e),
                )
            })?
            .next()
            .is_some();
        if !has_entries {
            return Err(PipelineError::validation_failed(
                run_name,
                format!("Input folder is empty: {}", input.display()),
            ));
        }

        if let Some(cmd) = plan.commands.first() {
            if is_path_like(&cmd.program) && !cmd.program.exists() {
                return Err(PipelineError::validation_failed(
                    run_name,
                    format!("Interpreter not found: {}", cmd.program.display()),
                ));
            }
        }

        Ok(())
    }

    /// Execute the plan.
    ///
    /// Worker failures do not make this return `Err`: a non-zero exit is
    /// recorded and the chain continues, and a worker that cannot be spawned
    /// ends the run with [`RunOutcome::Failed`].
    pub fn run(&self, plan: &StagePlan) -> PipelineResult<RunSummary> {
        let run_name = format!("run_{}", Local::now().format(TIMESTAMP_FORMAT));
        let start = Instant::now();
        let mut summary = RunSummary::new(run_name.as_str());
        summary.skipped = plan.skipped.clone();

        for skip in &plan.skipped {
            self.emit(RunEvent::StageSkipped {
                kind: skip.kind,
                model: skip.model.clone(),
                reason: skip.reason.clone(),
            });
        }

        if plan.is_empty() {
            tracing::info!("No stages selected, nothing to run");
            summary.duration = start.elapsed();
            return Ok(summary);
        }

        self.validate(&run_name, plan)?;

        let logger = self.open_logger(&run_name);
        summary.log_path = logger.log_path().map(Path::to_path_buf);

        logger.section(&format!("Run {}", run_name));
        for skip in &plan.skipped {
            logger.warn(&format!("{} skipped: {}", skip.kind.label(), skip.reason));
        }

        summary.total_files = count_files(&plan.input_dir);
        logger.info(&format!(
            "Total files in input folder: {}",
            summary.total_files
        ));
        self.emit(RunEvent::RunStarted {
            total_files: summary.total_files,
            stages: plan.commands.len(),
        });

        let total = plan.commands.len();
        for (index, cmd) in plan.commands.iter().enumerate() {
            if self.is_cancelled() {
                logger.warn(&format!("Cancelled before {}", cmd.label()));
                summary.outcome = RunOutcome::Cancelled;
                self.emit(RunEvent::Cancelled {
                    kind: Some(cmd.kind),
                });
                break;
            }

            match self.run_stage(&logger, cmd, index, total) {
                Ok(StageOutcome::Completed(stage)) => {
                    summary.error_lines += stage.error_lines;
                    summary.completed.push(stage);
                }
                Ok(StageOutcome::Cancelled { error_lines }) => {
                    summary.error_lines += error_lines;
                    summary.outcome = RunOutcome::Cancelled;
                    self.emit(RunEvent::Cancelled {
                        kind: Some(cmd.kind),
                    });
                    break;
                }
                Err(message) => {
                    logger.error(&message);
                    summary.outcome = RunOutcome::Failed {
                        stage: cmd.label().to_string(),
                        message,
                    };
                    break;
                }
            }
        }

        summary.duration = start.elapsed();
        match &summary.outcome {
            RunOutcome::Completed => logger.success(&format!(
                "Run finished: {} stage(s) in {:.1}s, {} error line(s)",
                summary.completed.len(),
                summary.duration.as_secs_f64(),
                summary.error_lines
            )),
            outcome => logger.warn(&format!(
                "Run {} after {} of {} stage(s)",
                outcome,
                summary.completed.len(),
                total
            )),
        }
        for line in summary.to_string().lines() {
            logger.info(line);
        }
        logger.close();

        Ok(summary)
    }

    /// Run one stage. `Err` carries a spawn or supervision failure.
    fn run_stage(
        &self,
        logger: &RunLogger,
        cmd: &StageCommand,
        index: usize,
        total: usize,
    ) -> Result<StageOutcome, String> {
        let label = cmd.label().to_string();
        let display = cmd.display();

        logger.phase(&format!("[{}/{}] {}", index + 1, total, label));
        logger.command(&display);
        self.emit(RunEvent::StageStarted {
            index,
            total,
            kind: cmd.kind,
            command: display,
        });

        let kind = cmd.kind;
        let mut on_line = |line: &OutputLine| {
            logger.output_line(&line.text, line.class.is_progress());
            self.emit(RunEvent::Line {
                kind,
                line: line.clone(),
            });
        };

        let stage_run = self
            .runner
            .run(cmd, &self.cancelled, &mut on_line)
            .map_err(|e| e.to_string())?;

        if stage_run.cancelled {
            logger.warn(&format!("{} cancelled", label));
            return Ok(StageOutcome::Cancelled {
                error_lines: stage_run.error_lines,
            });
        }

        if stage_run.success {
            logger.success(&format!(
                "{} finished in {:.1}s",
                label,
                stage_run.elapsed.as_secs_f64()
            ));
        } else {
            let code = stage_run
                .exit_code
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            logger.warn(&format!("{} exited with code {}", label, code));
            logger.show_tail(&label);
        }
        logger.clear_tail();

        self.emit(RunEvent::StageFinished {
            kind,
            exit_code: stage_run.exit_code,
            error_lines: stage_run.error_lines,
            elapsed: stage_run.elapsed,
        });

        let reorganized = match reorganize(&cmd.output_dir) {
            Ok(result) => {
                self.emit(RunEvent::Reorganized {
                    kind,
                    dir: result.dir,
                    moved: result.moved,
                    elapsed: result.elapsed,
                });
                result.moved
            }
            Err(e) => {
                logger.warn(&format!(
                    "Could not organize {}: {}",
                    cmd.output_dir.display(),
                    e
                ));
                self.emit(RunEvent::Reorganized {
                    kind,
                    dir: cmd.output_dir.clone(),
                    moved: 0,
                    elapsed: Default::default(),
                });
                0
            }
        };

        Ok(StageOutcome::Completed(CompletedStage {
            kind,
            label,
            output_dir: cmd.output_dir.clone(),
            exit_code: stage_run.exit_code,
            error_lines: stage_run.error_lines,
            reorganized,
            elapsed: stage_run.elapsed,
        }))
    }

    fn open_logger(&self, run_name: &str) -> RunLogger {
        let Some(dir) = &self.logs_dir else {
            return RunLogger::detached(run_name, self.log_config.clone());
        };
        match RunLogger::new(run_name, dir, self.log_config.clone(), None) {
            Ok(logger) => logger,
            Err(e) => {
                tracing::warn!("Could not create run log in {}: {}", dir.display(), e);
                RunLogger::detached(run_name, self.log_config.clone())
            }
        }
    }
}

/// How a single stage ended.
enum StageOutcome {
    Completed(CompletedStage),
    /// Torn down on request. Error lines seen before that still count.
    Cancelled { error_lines: usize },
}

/// Handle for cancelling a pipeline from another thread.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Request cancellation. The running worker is torn down and no further
    /// stage is started.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Whether `program` names a file rather than relying on `PATH` lookup.
fn is_path_like(program: &Path) -> bool {
    program.is_absolute() || program.components().count() > 1
}

/// Count regular files below `dir`, recursively.
pub fn count_files(dir: &Path) -> usize {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .count()
}
