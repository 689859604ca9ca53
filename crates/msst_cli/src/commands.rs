//! Subcommand implementations.

use std::future::Future;
use std::io::{self, Write};
use std::thread;

use anyhow::{bail, Context, Result};

use msst_core::models::{InferenceFlags, LineKind, ModelSelection, Preset, StageKind};
use msst_core::orchestrator::{CancelHandle, RunEvent, RunOutcome, Session};

use crate::cli::{ModelAction, PresetAction, RunArgs};

pub fn run(session: &Session, args: RunArgs, verbose: bool) -> Result<()> {
    let (mut selection, mut flags) = match &args.preset {
        Some(name) => {
            let preset = session
                .presets()
                .load(name)
                .with_context(|| format!("Failed to load preset '{}'", name))?;
            (preset.selection(), preset.flags())
        }
        None => (ModelSelection::none(), InferenceFlags::default()),
    };

    for (kind, model) in [
        (StageKind::Vocal, &args.vocal),
        (StageKind::Karaoke, &args.karaoke),
        (StageKind::Reverb, &args.reverb),
        (StageKind::Other, &args.other),
    ] {
        if let Some(model) = model {
            selection.set(kind, Some(model.clone()));
        }
    }
    if let Some(fast) = args.fast {
        flags.fast = fast;
    }
    flags.force_cpu |= args.force_cpu;
    flags.use_tta |= args.tta;

    if let Some(name) = &args.save_preset {
        let path = session
            .presets()
            .save(&Preset::new(name.as_str(), &selection, flags))
            .with_context(|| format!("Failed to save preset '{}'", name))?;
        println!("Saved preset to {}", path.display());
    }

    let plan = session.plan(&selection, flags);
    println!("{}", plan.describe());

    if args.dry_run {
        for cmd in &plan.commands {
            println!("$ {}", cmd.display());
        }
        return Ok(());
    }
    if plan.is_empty() {
        return Ok(());
    }

    let handle = session.spawn_run(plan).context("Failed to start run")?;
    watch_ctrl_c(handle.cancel_handle());

    for event in handle.events() {
        print_event(&event, verbose);
    }

    let summary = handle.join().context("Run did not complete")?;
    println!("{}", summary);

    if let RunOutcome::Failed { stage, message } = &summary.outcome {
        bail!("{} failed: {}", stage, message);
    }
    Ok(())
}

pub fn archive(session: &Session) -> Result<()> {
    let report = session
        .archive(&mut |event| println!("{}", event))
        .context("Archival failed")?;

    println!(
        "Archived {} file(s) ({} renamed) in {:.1}s",
        report.files_moved,
        report.renamed,
        report.duration.as_secs_f64()
    );
    Ok(())
}

pub fn presets(session: &Session, action: PresetAction) -> Result<()> {
    let store = session.presets();
    match action {
        PresetAction::List => {
            let names = store.list().context("Failed to list presets")?;
            if names.is_empty() {
                println!("No presets in {}", store.dir().display());
            }
            for name in names {
                println!("{}", name);
            }
        }
        PresetAction::Show { name } => {
            let preset = store
                .load(&name)
                .with_context(|| format!("Failed to load preset '{}'", name))?;
            let selection = preset.selection();
            println!("Preset: {}", preset.preset_name);
            for kind in StageKind::ORDER {
                println!("  {}: {}", kind.label(), selection.get(kind).unwrap_or("disabled"));
            }
            println!("  Fast: {}", preset.if_fast);
            println!("  Force CPU: {}", preset.force_cpu);
            println!("  TTA: {}", preset.use_tta);
        }
        PresetAction::Delete { name } => {
            store
                .delete(&name)
                .with_context(|| format!("Failed to delete preset '{}'", name))?;
            println!("Deleted preset '{}'", name);
        }
    }
    Ok(())
}

pub fn models(session: &Session, action: ModelAction) -> Result<()> {
    let ModelAction::List { category } = action;
    let kinds = match category {
        Some(name) => match StageKind::from_name(&name) {
            Some(kind) => vec![kind],
            None => bail!("Unknown model category '{}'", name),
        },
        None => StageKind::ORDER.to_vec(),
    };

    let registry = session.registry();
    for kind in kinds {
        println!("{} ({}):", kind.label(), kind.category_key());
        for (id, description) in registry.selectable(kind) {
            println!("  {} [{}] {}", id, registry.model_type(id), description);
        }
    }
    Ok(())
}

fn print_event(event: &RunEvent, verbose: bool) {
    match event {
        RunEvent::RunStarted { total_files, stages } => {
            println!("Total files in input folder: {}, {} stage(s)", total_files, stages);
        }
        RunEvent::StageStarted {
            index,
            total,
            kind,
            command,
        } => {
            println!("=== [{}/{}] {} ===", index + 1, total, kind.label());
            if verbose {
                println!("$ {}", command);
            }
        }
        RunEvent::Line { line, .. } => match line.class.kind {
            LineKind::Progress => {
                let mut err = io::stderr();
                let _ = write!(err, "\r{}", line.display_text());
                let _ = err.flush();
            }
            LineKind::Discrete => println!("{}", line.display_text()),
        },
        RunEvent::StageFinished {
            kind,
            exit_code,
            elapsed,
            ..
        } => {
            eprintln!();
            match exit_code {
                Some(0) => println!("{} finished in {:.1}s", kind.label(), elapsed.as_secs_f64()),
                Some(code) => println!("{} exited with code {}", kind.label(), code),
                None => println!("{} was terminated by a signal", kind.label()),
            }
        }
        RunEvent::StageSkipped { kind, reason, .. } => {
            println!("Skipping {}: {}", kind.label(), reason);
        }
        RunEvent::Reorganized { moved, dir, .. } => {
            if *moved > 0 {
                println!("Organized {} instrumental file(s) in {}", moved, dir.display());
            }
        }
        RunEvent::Cancelled { kind } => match kind {
            Some(kind) => println!("Cancelled during {}", kind.label()),
            None => println!("Cancelled"),
        },
    }
}

/// Exit status after a forced quit, as a shell reports SIGINT.
const FORCED_EXIT_CODE: i32 = 130;

/// Cancel the run on the first Ctrl-C, exit immediately on the second.
fn watch_ctrl_c(cancel: CancelHandle) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!("Ctrl-C handling unavailable: {}", e);
                return;
            }
        };

        if runtime.block_on(handle_interrupts(tokio::signal::ctrl_c, &cancel)) {
            eprintln!("\nQuitting without waiting for the worker");
            std::process::exit(FORCED_EXIT_CODE);
        }
    });
}

/// Cancel on the first interrupt. Returns `true` once a second one arrives.
async fn handle_interrupts<S, F>(mut interrupt: S, cancel: &CancelHandle) -> bool
where
    S: FnMut() -> F,
    F: Future<Output = io::Result<()>>,
{
    if interrupt().await.is_err() {
        return false;
    }
    eprintln!("\nCancelling, waiting for the worker to exit (Ctrl-C again to quit)...");
    cancel.cancel();

    interrupt().await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use msst_core::orchestrator::Pipeline;
    use msst_core::process::{ProcessRunner, RunnerConfig};
    use std::future::ready;

    fn cancel_handle() -> CancelHandle {
        Pipeline::new(ProcessRunner::new(RunnerConfig::default())).cancel_handle()
    }

    #[tokio::test]
    async fn second_interrupt_quits() {
        let cancel = cancel_handle();
        let quit = handle_interrupts(|| ready(Ok(())), &cancel).await;
        assert!(cancel.is_cancelled());
        assert!(quit);
    }

    #[tokio::test]
    async fn lost_listener_after_first_interrupt_only_cancels() {
        let cancel = cancel_handle();
        let mut presses = 0;
        let quit = handle_interrupts(
            || {
                presses += 1;
                ready(if presses == 1 {
                    Ok(())
                } else {
                    Err(io::Error::other("listener closed"))
                })
            },
            &cancel,
        )
        .await;
        assert!(cancel.is_cancelled());
        assert!(!quit);
    }

    #[tokio::test]
    async fn failed_listener_does_not_cancel() {
        let cancel = cancel_handle();
        let quit = handle_interrupts(|| ready(Err(io::Error::other("no handler"))), &cancel).await;
        assert!(!cancel.is_cancelled());
        assert!(!quit);
    }
}
