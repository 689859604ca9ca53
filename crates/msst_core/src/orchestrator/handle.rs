//! Running a pipeline on its own thread.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::stages::StagePlan;

use super::errors::{PipelineError, PipelineResult};
use super::pipeline::{CancelHandle, Pipeline};
use super::types::{RunEvent, RunSummary};

/// Events buffered between the run thread and the consumer.
pub const EVENT_BUFFER: usize = 256;

/// A pipeline running in the background.
///
/// Events arrive on [`events`](Self::events) in order. The run thread blocks
/// when the buffer is full, so keep draining it until it closes.
pub struct RunHandle {
    events: Receiver<RunEvent>,
    cancel: CancelHandle,
    thread: JoinHandle<PipelineResult<RunSummary>>,
}

impl RunHandle {
    pub fn events(&self) -> &Receiver<RunEvent> {
        &self.events
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Request cancellation of the run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run to end. Unread events are discarded.
    pub fn join(self) -> PipelineResult<RunSummary> {
        let RunHandle { events, thread, .. } = self;
        drop(events);
        thread.join().map_err(|_| PipelineError::WorkerPanicked {
            run_name: "background".to_string(),
        })?
    }
}

impl Pipeline {
    /// Run `plan` on a new thread, replacing any callback with the handle's
    /// event channel.
    pub fn spawn(self, plan: StagePlan) -> RunHandle {
        self.spawn_holding(plan, ())
    }

    /// Like [`spawn`](Self::spawn), keeping `guard` alive until the run ends.
    pub(crate) fn spawn_holding<G: Send + 'static>(self, plan: StagePlan, guard: G) -> RunHandle {
        let (tx, rx) = mpsc::sync_channel(EVENT_BUFFER);
        let cancel = self.cancel_handle();
        let pipeline = self.with_callback(channel_callback(tx));

        let thread = thread::spawn(move || {
            let _guard = guard;
            pipeline.run(&plan)
        });

        RunHandle {
            events: rx,
            cancel,
            thread,
        }
    }
}

fn channel_callback(tx: SyncSender<RunEvent>) -> super::types::EventCallback {
    let tx = Mutex::new(tx);
    Box::new(move |event| {
        // A closed receiver only means nobody is listening anymore.
        let _ = tx.lock().send(event.clone());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InferenceFlags, ModelRegistry, ModelSelection, StageKind};
    use crate::process::{ProcessRunner, RunnerConfig};
    use crate::stages::StagePlanner;
    use tempfile::tempdir;

    #[test]
    fn skipped_stage_events_reach_channel() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::empty();
        let selection = ModelSelection::none().with(StageKind::Reverb, "unknown.ckpt");
        let plan = StagePlanner::new(&registry, dir.path())
            .plan(&selection, InferenceFlags::default());

        let handle = Pipeline::new(ProcessRunner::new(RunnerConfig::default())).spawn(plan);
        let events: Vec<RunEvent> = handle.events().iter().collect();
        let summary = handle.join().unwrap();

        assert!(summary.completed.is_empty());
        assert_eq!(summary.skipped.len(), 1);
        assert!(matches!(
            events.as_slice(),
            [RunEvent::StageSkipped {
                kind: StageKind::Reverb,
                ..
            }]
        ));
    }

    #[test]
    fn validation_error_surfaces_on_join() {
        let dir = tempdir().unwrap();
        let mut registry = ModelRegistry::empty();
        registry.upsert_model(
            StageKind::Vocal,
            "v.ckpt",
            "",
            ["a.yaml".into(), "b.yaml".into()],
            "bs_roformer",
        );
        let selection = ModelSelection::none().with(StageKind::Vocal, "v.ckpt");
        let plan = StagePlanner::new(&registry, dir.path().join("nope"))
            .plan(&selection, InferenceFlags::default());

        let handle = Pipeline::new(ProcessRunner::new(RunnerConfig::default())).spawn(plan);
        let err = handle.join().unwrap_err();
        assert!(matches!(err, PipelineError::ValidationFailed { .. }));
    }
}
