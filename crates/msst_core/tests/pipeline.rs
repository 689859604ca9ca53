//! End-to-end runs against shell scripts standing in for the inference
//! worker.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::{tempdir, TempDir};

use msst_core::models::{InferenceFlags, ModelRegistry, ModelSelection, StageKind};
use msst_core::orchestrator::{Pipeline, RunEvent, RunOutcome};
use msst_core::organize::INSTRUMENTAL_DIR;
use msst_core::process::{ProcessRunner, ProcessTree, RunnerConfig, SystemProcessTree};
use msst_core::stages::{StagePlan, StagePlanner};

/// Parses the worker flags, writes a vocal and an instrumental stem per
/// input file, and prints one progress line and one error line.
const SEPARATOR: &str = r#"
input=""
store=""
while [ $# -gt 0 ]; do
  case "$1" in
    --input_folder) input="$2"; shift ;;
    --store_dir) store="$2"; shift ;;
  esac
  shift
done
mkdir -p "$store"
for f in "$input"/*; do
  [ -f "$f" ] || continue
  name=$(basename "$f" .wav)
  : > "$store/${name}_vocals.wav"
  : > "$store/${name}_instrumental.wav"
done
echo "Processing $input"
printf '\r50%%|#####| 1/2 [00:01<00:01, 1.00it/s]\n'
echo "Error: something failed" >&2
exit "${EXIT_CODE:-0}"
"#;

struct Fixture {
    dir: TempDir,
    registry: ModelRegistry,
}

impl Fixture {
    fn new(script_body: &str) -> Self {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("input")).unwrap();
        fs::write(dir.path().join("input/song.wav"), b"pcm").unwrap();
        fs::write(dir.path().join("worker.sh"), script_body).unwrap();

        let mut registry = ModelRegistry::empty();
        registry.inference_env = "sh".to_string();
        for (kind, model) in [
            (StageKind::Vocal, "vocal.ckpt"),
            (StageKind::Karaoke, "kara.ckpt"),
        ] {
            registry.upsert_model(
                kind,
                model,
                "test model",
                ["configs/normal.yaml".into(), "configs/fast.yaml".into()],
                "mel_band_roformer",
            );
        }

        Self { dir, registry }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn plan(&self, selection: &ModelSelection) -> StagePlan {
        StagePlanner::new(&self.registry, self.root().join("input"))
            .work_root(self.root())
            .script(self.root().join("worker.sh"))
            .pretrain_dir(self.root().join("pretrain"))
            .plan(selection, InferenceFlags::default())
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(ProcessRunner::new(RunnerConfig::default()))
            .with_logs_dir(self.root().join("logs"))
    }
}

fn collect_events(pipeline: Pipeline) -> (Pipeline, Arc<Mutex<Vec<RunEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let pipeline = pipeline.with_callback(Box::new(move |event| sink.lock().push(event.clone())));
    (pipeline, events)
}

#[test]
fn vocal_only_run_separates_and_reorganizes() {
    let fx = Fixture::new(SEPARATOR);
    let plan = fx.plan(&ModelSelection::none().with(StageKind::Vocal, "vocal.ckpt"));
    assert_eq!(plan.commands.len(), 1);

    let summary = fx.pipeline().run(&plan).unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.total_files, 1);
    assert_eq!(summary.completed.len(), 1);
    assert_eq!(summary.error_lines, 1);

    let stage = &summary.completed[0];
    assert_eq!(stage.kind, StageKind::Vocal);
    assert_eq!(stage.exit_code, Some(0));
    assert_eq!(stage.reorganized, 1);

    let out = fx.root().join("separation_results");
    assert_eq!(stage.output_dir, out);
    assert!(out.join("song_vocals.wav").exists());
    assert!(out.join(INSTRUMENTAL_DIR).join("song_instrumental.wav").exists());
    assert!(!out.join("song_instrumental.wav").exists());

    let log_path: PathBuf = summary.log_path.clone().unwrap();
    let log = fs::read_to_string(log_path).unwrap();
    assert!(log.contains("Vocal Model"));
    assert!(log.contains("--store_dir"));
}

#[test]
fn chained_stage_reads_previous_output() {
    let fx = Fixture::new(SEPARATOR);
    let selection = ModelSelection::none()
        .with(StageKind::Vocal, "vocal.ckpt")
        .with(StageKind::Karaoke, "kara.ckpt");
    let plan = fx.plan(&selection);

    let (pipeline, events) = collect_events(fx.pipeline());
    let summary = pipeline.run(&plan).unwrap();

    assert_eq!(summary.completed.len(), 2);
    assert_eq!(summary.error_lines, 2);

    // Karaoke only saw the vocal stem, the instrumental had been moved aside.
    let kara = fx.root().join("karaoke_results");
    assert!(kara.join("song_vocals_vocals.wav").exists());
    assert!(kara.join(INSTRUMENTAL_DIR).join("song_vocals_instrumental.wav").exists());
    assert!(!kara.join("song_instrumental_vocals.wav").exists());

    let events = events.lock();
    let started: Vec<StageKind> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::StageStarted { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![StageKind::Vocal, StageKind::Karaoke]);

    let progress = events
        .iter()
        .filter(|e| matches!(e, RunEvent::Line { line, .. } if line.class.is_progress()))
        .count();
    assert_eq!(progress, 2);

    // Each stage is reorganized before the next one starts.
    let order: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::StageStarted { .. } => Some("start"),
            RunEvent::StageFinished { .. } => Some("finish"),
            RunEvent::Reorganized { .. } => Some("organize"),
            _ => None,
        })
        .collect();
    assert_eq!(
        order,
        vec!["start", "finish", "organize", "start", "finish", "organize"]
    );
}

#[test]
fn failing_stage_does_not_stop_chain() {
    let fx = Fixture::new(&format!("EXIT_CODE=3\n{}", SEPARATOR));
    let selection = ModelSelection::none()
        .with(StageKind::Vocal, "vocal.ckpt")
        .with(StageKind::Karaoke, "kara.ckpt");

    let summary = fx.pipeline().run(&fx.plan(&selection)).unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.completed.len(), 2);
    assert!(summary.completed.iter().all(|s| s.exit_code == Some(3)));
}

#[test]
fn misconfigured_stage_is_skipped() {
    let fx = Fixture::new(SEPARATOR);
    let selection = ModelSelection::none()
        .with(StageKind::Vocal, "vocal.ckpt")
        .with(StageKind::Reverb, "not-in-registry.ckpt");
    let plan = fx.plan(&selection);

    let summary = fx.pipeline().run(&plan).unwrap();

    assert_eq!(summary.completed.len(), 1);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].kind, StageKind::Reverb);
    assert!(!fx.root().join("deverb_results").exists());
}

#[test]
fn unspawnable_worker_fails_run() {
    let mut fx = Fixture::new(SEPARATOR);
    fx.registry.inference_env = "msst-no-such-interpreter".to_string();
    let selection = ModelSelection::none()
        .with(StageKind::Vocal, "vocal.ckpt")
        .with(StageKind::Karaoke, "kara.ckpt");

    let summary = fx.pipeline().run(&fx.plan(&selection)).unwrap();

    assert!(matches!(
        summary.outcome,
        RunOutcome::Failed { ref stage, .. } if stage == "Vocal Model"
    ));
    assert!(summary.completed.is_empty());
}

#[cfg(target_os = "linux")]
#[test]
fn cancellation_tears_down_worker_tree() {
    let fx = Fixture::new(concat!(
        "echo 'Error: first failure'\n",
        "echo 'Error: second failure'\n",
        "sleep 30 &\n",
        "echo \"child $!\"\n",
        "wait\n",
    ));
    let selection = ModelSelection::none()
        .with(StageKind::Vocal, "vocal.ckpt")
        .with(StageKind::Karaoke, "kara.ckpt");
    let plan = fx.plan(&selection);

    let grandchild = Arc::new(Mutex::new(None::<u32>));
    let seen = Arc::clone(&grandchild);
    let pipeline = fx.pipeline();
    let cancel = pipeline.cancel_handle();
    let pipeline = pipeline.with_callback(Box::new(move |event| {
        if let RunEvent::Line { line, .. } = event {
            if let Some(pid) = line.text.strip_prefix("child ") {
                *seen.lock() = pid.trim().parse().ok();
                cancel.cancel();
            }
        }
    }));

    let summary = pipeline.run(&plan).unwrap();

    assert!(summary.is_cancelled());
    assert!(summary.completed.len() < selection.enabled_count());
    assert_eq!(summary.error_lines, 2);
    let pid = grandchild.lock().expect("worker printed its child pid");
    assert!(!SystemProcessTree.is_alive(pid));
}
