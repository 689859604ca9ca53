//! Session state shared by the front ends.
//!
//! A [`Session`] owns the settings, model registry and preset store, and
//! makes sure a pipeline run and an archival never overlap.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::archive::{ArchiveEvent, ArchiveReport, Archiver};
use crate::config::Settings;
use crate::models::{InferenceFlags, ModelRegistry, ModelSelection, Preset, PresetStore};
use crate::stages::{StagePlan, StagePlanner};

use super::errors::{PipelineError, PipelineResult};
use super::handle::RunHandle;
use super::pipeline::Pipeline;
use super::types::{EventCallback, RunSummary};

const RUN_ACTIVITY: &str = "a pipeline run";
const ARCHIVE_ACTIVITY: &str = "archival";

pub struct Session {
    settings: Settings,
    registry: ModelRegistry,
    presets: PresetStore,
    active: Arc<Mutex<Option<&'static str>>>,
}

impl Session {
    pub fn new(settings: Settings, registry: ModelRegistry) -> Self {
        let presets = PresetStore::new(settings.paths.presets_dir());
        Self {
            settings,
            registry,
            presets,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Open a session, loading the registry named in `settings` or creating
    /// it from the built-in catalogue.
    pub fn open(settings: Settings) -> PipelineResult<Self> {
        let registry = ModelRegistry::load_or_create(&settings.paths.registry_path())?;
        Ok(Self::new(settings, registry))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModelRegistry {
        &mut self.registry
    }

    pub fn save_registry(&self) -> PipelineResult<()> {
        self.registry.save(&self.settings.paths.registry_path())?;
        Ok(())
    }

    pub fn presets(&self) -> &PresetStore {
        &self.presets
    }

    /// Name of the operation currently holding the session, if any.
    pub fn active(&self) -> Option<&'static str> {
        *self.active.lock()
    }

    pub fn is_busy(&self) -> bool {
        self.active().is_some()
    }

    /// Resolve `selection` against the registry.
    pub fn plan(&self, selection: &ModelSelection, flags: InferenceFlags) -> StagePlan {
        StagePlanner::from_settings(&self.registry, &self.settings).plan(selection, flags)
    }

    /// Plan a saved preset.
    pub fn plan_preset(&self, name: &str) -> PipelineResult<StagePlan> {
        let preset: Preset = self.presets.load(name)?;
        Ok(self.plan(&preset.selection(), preset.flags()))
    }

    /// Run `plan` on the calling thread.
    pub fn run(
        &self,
        plan: &StagePlan,
        callback: Option<EventCallback>,
    ) -> PipelineResult<RunSummary> {
        let _guard = self.acquire(RUN_ACTIVITY)?;
        let mut pipeline = Pipeline::from_settings(&self.settings);
        if let Some(callback) = callback {
            pipeline = pipeline.with_callback(callback);
        }
        pipeline.run(plan)
    }

    /// Run `plan` in the background. The session stays busy until the run
    /// thread ends.
    pub fn spawn_run(&self, plan: StagePlan) -> PipelineResult<RunHandle> {
        let guard = self.acquire(RUN_ACTIVITY)?;
        Ok(Pipeline::from_settings(&self.settings).spawn_holding(plan, guard))
    }

    /// Archive results and inputs.
    pub fn archive(
        &self,
        on_event: &mut dyn FnMut(&ArchiveEvent),
    ) -> PipelineResult<ArchiveReport> {
        let _guard = self.acquire(ARCHIVE_ACTIVITY)?;
        Ok(Archiver::from_settings(&self.settings).run(on_event)?)
    }

    fn acquire(&self, requested: &'static str) -> PipelineResult<ActivityGuard> {
        let mut active = self.active.lock();
        if let Some(current) = *active {
            return Err(PipelineError::busy(requested, current));
        }
        *active = Some(requested);
        Ok(ActivityGuard {
            slot: Arc::clone(&self.active),
        })
    }
}

/// Clears the session's active operation when dropped.
struct ActivityGuard {
    slot: Arc<Mutex<Option<&'static str>>>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StageKind;
    use std::fs;
    use tempfile::tempdir;

    fn session_in(root: &std::path::Path) -> Session {
        let mut settings = Settings::default();
        let paths = &mut settings.paths;
        paths.input_folder = root.join("input").display().to_string();
        paths.work_root = root.display().to_string();
        paths.archive_folder = root.join("archive").display().to_string();
        paths.presets_folder = root.join("presets").display().to_string();
        paths.registry_file = root.join("data/msst_model_map.json").display().to_string();
        paths.logs_folder = root.join("logs").display().to_string();
        Session::open(settings).unwrap()
    }

    #[test]
    fn open_creates_registry() {
        let dir = tempdir().unwrap();
        let session = session_in(dir.path());
        assert!(dir.path().join("data/msst_model_map.json").exists());
        assert!(!session.registry().models(StageKind::Vocal).is_empty());
    }

    #[test]
    fn archive_is_refused_while_running() {
        let dir = tempdir().unwrap();
        let session = session_in(dir.path());

        let guard = session.acquire(RUN_ACTIVITY).unwrap();
        let err = session.archive(&mut |_| {}).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Busy {
                requested: "archival",
                active: "a pipeline run"
            }
        ));

        drop(guard);
        assert!(!session.is_busy());
        session.archive(&mut |_| {}).unwrap();
    }

    #[test]
    fn run_is_refused_while_archiving() {
        let dir = tempdir().unwrap();
        let session = session_in(dir.path());
        let plan = session.plan(&ModelSelection::none(), InferenceFlags::default());

        let _guard = session.acquire(ARCHIVE_ACTIVITY).unwrap();
        assert!(matches!(
            session.run(&plan, None),
            Err(PipelineError::Busy { .. })
        ));
        assert!(session.spawn_run(plan).is_err());
    }

    #[test]
    fn background_run_releases_session() {
        crate::logging::init_test_tracing();
        let dir = tempdir().unwrap();
        let session = session_in(dir.path());
        let plan = session.plan(&ModelSelection::none(), InferenceFlags::default());

        let handle = session.spawn_run(plan).unwrap();
        for _ in handle.events().iter() {}
        handle.join().unwrap();
        assert!(!session.is_busy());
    }

    #[test]
    fn plan_preset_uses_saved_selection() {
        let dir = tempdir().unwrap();
        let session = session_in(dir.path());
        let selection = ModelSelection::none().with(StageKind::Vocal, "MelBandRoformer_kim.ckpt");
        session
            .presets()
            .save(&Preset::new("vocals", &selection, InferenceFlags::default()))
            .unwrap();
        fs::create_dir_all(dir.path().join("input")).unwrap();

        let plan = session.plan_preset("vocals").unwrap();
        assert_eq!(plan.commands.len(), 1);
        assert_eq!(plan.commands[0].kind, StageKind::Vocal);
    }
}
