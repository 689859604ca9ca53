//! Worker process supervision.
//!
//! One worker runs at a time. Its stdout and stderr are read on two threads
//! that feed a single bounded channel, so the caller sees one merged stream
//! and the readers block if the caller falls behind. The control loop polls
//! that channel with a short timeout so a cancellation request is noticed
//! even while the worker is silent.
//!
//! On Unix the worker leads its own process group. Anything still running in
//! that group once the worker has exited is torn down before `run` returns.

use std::io::Read;
use std::process::{Child, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::InferenceSettings;
use crate::stages::StageCommand;

use super::classify::{classify, LineClass};
use super::env::augment_search_path;
use super::errors::{ProcessError, ProcessResult};
use super::lines::LineSplitter;
use super::tree::{live_group_members, terminate_tree, ProcessTree, SystemProcessTree, Teardown};

const READ_CHUNK: usize = 8 * 1024;

/// How long to keep draining output after the worker exits while one of its
/// own children still holds the pipes open.
const DRAIN_AFTER_EXIT: Duration = Duration::from_secs(2);

/// How long to wait for the readers to reach EOF once nothing should be
/// holding the pipes any more.
const FINAL_DRAIN: Duration = Duration::from_secs(1);

/// Supervisor tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    pub grace_period: Duration,
    pub poll_interval: Duration,
    pub line_buffer: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&InferenceSettings::default())
    }
}

impl From<&InferenceSettings> for RunnerConfig {
    fn from(settings: &InferenceSettings) -> Self {
        Self {
            grace_period: settings.grace_period(),
            poll_interval: settings.poll_interval(),
            line_buffer: settings.line_buffer.max(1),
        }
    }
}

/// One classified line of worker output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub text: String,
    pub class: LineClass,
}

impl OutputLine {
    pub fn new(text: String) -> Self {
        let class = classify(&text);
        Self { text, class }
    }

    /// Text without the carriage return and trailing whitespace.
    pub fn display_text(&self) -> &str {
        self.text.trim_start_matches('\r').trim_end()
    }
}

/// Result of supervising one worker.
#[derive(Debug, Clone, Default)]
pub struct StageRun {
    /// Exit code, `None` if the worker was killed by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub lines: usize,
    pub error_lines: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
    pub teardown: Option<Teardown>,
}

impl StageRun {
    fn record(&mut self, line: &OutputLine) {
        self.lines += 1;
        if line.class.is_error() {
            self.error_lines += 1;
        }
    }
}

/// Spawns and supervises worker processes.
pub struct ProcessRunner {
    config: RunnerConfig,
    tree: Arc<dyn ProcessTree>,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_tree(config, Arc::new(SystemProcessTree))
    }

    pub fn with_tree(config: RunnerConfig, tree: Arc<dyn ProcessTree>) -> Self {
        Self { config, tree }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn tree(&self) -> &dyn ProcessTree {
        self.tree.as_ref()
    }

    /// Run `cmd` to completion or until `cancel` is set.
    ///
    /// Every line goes to `on_line` in arrival order. On cancellation the
    /// worker and its descendants are torn down before this returns, and so
    /// is anything the worker left running in its process group.
    pub fn run(
        &self,
        cmd: &StageCommand,
        cancel: &AtomicBool,
        on_line: &mut dyn FnMut(&OutputLine),
    ) -> ProcessResult<StageRun> {
        let start = Instant::now();

        let mut command = cmd.to_command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        match augment_search_path(&cmd.program, std::env::var_os("PATH").as_deref()) {
            Ok(path) => {
                command.env("PATH", path);
            }
            Err(e) => tracing::warn!("Leaving PATH unchanged: {}", e),
        }

        tracing::debug!("Spawning {}", cmd.display());
        let mut child = command
            .spawn()
            .map_err(|e| ProcessError::spawn(&cmd.program, e))?;
        let pid = child.id();
        tracing::info!("{} started (pid {})", cmd.label(), pid);

        let (tx, rx) = mpsc::sync_channel::<OutputLine>(self.config.line_buffer);
        let readers = match spawn_readers(&mut child, tx) {
            Ok(readers) => readers,
            Err(e) => {
                let _ = terminate_tree(self.tree(), &mut child, self.config.grace_period);
                return Err(e);
            }
        };

        let mut run = StageRun::default();
        let mut exited_at: Option<Instant> = None;

        loop {
            if cancel.load(Ordering::SeqCst) {
                run.cancelled = true;
                break;
            }

            match rx.recv_timeout(self.config.poll_interval) {
                Ok(line) => {
                    run.record(&line);
                    on_line(&line);
                }
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    // Readers stay connected while a grandchild holds the
                    // pipes, so watch the worker itself too.
                    if exited_at.is_none() && matches!(child.try_wait(), Ok(Some(_))) {
                        exited_at = Some(Instant::now());
                    }
                    if exited_at.is_some_and(|t| t.elapsed() >= DRAIN_AFTER_EXIT) {
                        tracing::debug!("{} exited but its output is still open", cmd.label());
                        break;
                    }
                }
            }
        }

        let mut status = None;
        if !run.cancelled {
            status = wait_or_cancel(&mut child, cancel, self.config.poll_interval)?;
            run.cancelled = status.is_none();
        }
        if run.cancelled {
            tracing::info!("Cancelling {} (pid {})", cmd.label(), pid);
            let teardown = terminate_tree(self.tree(), &mut child, self.config.grace_period)?;
            run.teardown = Some(teardown);
            status = child.try_wait().ok().flatten();
        } else {
            let leftover = live_group_members(self.tree(), pid);
            if !leftover.is_empty() {
                tracing::warn!(
                    "{} exited leaving {} process(es) running: {:?}, terminating them",
                    cmd.label(),
                    leftover.len(),
                    leftover
                );
                let teardown = terminate_tree(self.tree(), &mut child, self.config.grace_period)?;
                run.teardown = Some(teardown);
            }
        }

        if drain(&rx, self.config.poll_interval, &mut run, on_line) {
            for handle in readers {
                let _ = handle.join();
            }
        } else {
            tracing::warn!(
                "{} output is still held open by a process outside its group, detaching readers",
                cmd.label()
            );
        }

        if let Some(status) = status {
            run.exit_code = status.code();
            run.success = status.success() && !run.cancelled;
        }
        run.elapsed = start.elapsed();

        tracing::debug!(
            "{} finished: exit {:?}, {} line(s), {} error line(s), cancelled={}",
            cmd.label(),
            run.exit_code,
            run.lines,
            run.error_lines,
            run.cancelled
        );
        Ok(run)
    }
}

/// Wait for the worker to exit. `None` means cancellation was requested first.
fn wait_or_cancel(
    child: &mut Child,
    cancel: &AtomicBool,
    poll: Duration,
) -> ProcessResult<Option<ExitStatus>> {
    let pid = child.id();
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) => thread::sleep(poll),
            Err(source) => return Err(ProcessError::Wait { pid, source }),
        }
    }
}

fn spawn_readers(
    child: &mut Child,
    tx: SyncSender<OutputLine>,
) -> ProcessResult<Vec<JoinHandle<()>>> {
    let stdout = child.stdout.take().ok_or(ProcessError::Pipe("stdout"))?;
    let stderr = child.stderr.take().ok_or(ProcessError::Pipe("stderr"))?;

    let out_tx = tx.clone();
    Ok(vec![
        thread::spawn(move || pump(stdout, out_tx)),
        thread::spawn(move || pump(stderr, tx)),
    ])
}

/// Read a pipe to EOF, forwarding complete lines.
fn pump<R: Read>(mut source: R, tx: SyncSender<OutputLine>) {
    let mut splitter = LineSplitter::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        match source.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                for line in splitter.push(&chunk[..n]) {
                    if tx.send(OutputLine::new(line)).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("Worker pipe read failed: {}", e);
                break;
            }
        }
    }

    if let Some(rest) = splitter.finish() {
        let _ = tx.send(OutputLine::new(rest));
    }
}

/// Forward output still queued once the worker is gone, so blocked readers
/// can reach EOF. Returns whether every reader finished.
fn drain(
    rx: &mpsc::Receiver<OutputLine>,
    poll: Duration,
    run: &mut StageRun,
    on_line: &mut dyn FnMut(&OutputLine),
) -> bool {
    let deadline = Instant::now() + FINAL_DRAIN;
    while Instant::now() < deadline {
        match rx.recv_timeout(poll) {
            Ok(line) => {
                run.record(&line);
                on_line(&line);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return true,
        }
    }
    false
}
