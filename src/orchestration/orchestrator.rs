//! Ingestion entry points over cached, per-version locked [`Version`]s.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::{normalize_extensions, Config, DEFAULT_AUDIO_EXTENSIONS};
use crate::core::{ChannelHint, Recording, RecordingId};
use crate::orchestration::collaborators::Collaborators;
use crate::orchestration::engine::{TaskEngine, TaskSubmitter};
use crate::orchestration::pipeline::Pipeline;
use crate::orchestration::version::{IngestOptions, Version};
use crate::store::Store;
use crate::util;
use crate::{flog, Error, Result};

/// Task type of queued pipeline runs.
pub const PROCESS_RECORDING: &str = "process_recording";

/// Payload of a [`PROCESS_RECORDING`] task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecordingParams {
    pub project: String,
    pub version: String,
    pub recording_id: RecordingId,
}

type VersionKey = (String, String);

/// Composes the store, the pipeline and the task queue.
///
/// Each loaded version sits behind its own mutex; blocking ingestion and
/// queued pipeline runs for the same version therefore never interleave
/// their step-forest writes.
pub struct Orchestrator {
    store: Store,
    pipeline: Pipeline,
    submitter: TaskSubmitter,
    audio_extensions: Vec<String>,
    versions: Mutex<HashMap<VersionKey, Arc<Mutex<Version>>>>,
}

impl Orchestrator {
    pub fn new(store: Store, collaborators: Collaborators, submitter: TaskSubmitter) -> Self {
        Self {
            store,
            pipeline: Pipeline::new(collaborators),
            submitter,
            audio_extensions: DEFAULT_AUDIO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            versions: Mutex::new(HashMap::new()),
        }
    }

    /// Wire a store, engine and orchestrator from `config`. The engine is
    /// returned unstarted with the [`PROCESS_RECORDING`] handler installed.
    pub fn from_config(
        config: &Config,
        collaborators: Collaborators,
    ) -> Result<(Arc<Self>, TaskEngine)> {
        let store = Store::new(config.data_dir()?);
        let engine = TaskEngine::new(store.clone(), config.poll_interval())?;
        let orchestrator = Arc::new(
            Self::new(store, collaborators, engine.submitter())
                .with_audio_extensions(config.effective_audio_extensions()),
        );
        orchestrator.register_with(&engine);
        flog!(
            "Orchestrator::from_config data_dir={} audio_extensions={:?}",
            orchestrator.store.root().display(),
            orchestrator.audio_extensions
        );
        Ok((orchestrator, engine))
    }

    /// Accepted audio extensions, matched case-insensitively with or
    /// without a leading dot.
    pub fn with_audio_extensions(mut self, extensions: Vec<String>) -> Self {
        self.audio_extensions = normalize_extensions(&extensions);
        self
    }

    pub fn audio_extensions(&self) -> &[String] {
        &self.audio_extensions
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Install the [`PROCESS_RECORDING`] handler on `engine`.
    ///
    /// The handler holds a weak reference; once the orchestrator is dropped
    /// its queued tasks fail with an engine error.
    pub fn register_with(self: &Arc<Self>, engine: &TaskEngine) {
        let orchestrator = Arc::downgrade(self);
        engine.register(PROCESS_RECORDING, move |params: &serde_json::Value| {
            let orchestrator = orchestrator
                .upgrade()
                .ok_or_else(|| Error::Engine("orchestrator has been dropped".to_string()))?;
            let params: ProcessRecordingParams = serde_json::from_value(params.clone())?;
            orchestrator
                .process_recording(&params.project, &params.version, params.recording_id)
                .map(|_| ())
        });
    }

    pub fn create_version(
        &self,
        project: &str,
        version: &str,
        prompt: &str,
        success_criteria: Option<&str>,
    ) -> Result<Arc<Mutex<Version>>> {
        let created = Version::create(&self.store, project, version, prompt, success_criteria)?;
        let handle = Arc::new(Mutex::new(created));
        util::lock(&self.versions).insert(
            (project.to_string(), version.to_string()),
            Arc::clone(&handle),
        );
        Ok(handle)
    }

    /// Cached load of one version.
    ///
    /// # Errors
    /// `NotFound` if the version directory does not exist.
    pub fn load(&self, project: &str, version: &str) -> Result<Arc<Mutex<Version>>> {
        let key = (project.to_string(), version.to_string());
        let mut versions = util::lock(&self.versions);
        if let Some(handle) = versions.get(&key) {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(Mutex::new(Version::load(&self.store, project, version)?));
        versions.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Submit one audio file.
    ///
    /// `channel` must be `mono` or `stereo`. With `blocking`, the pipeline
    /// runs on the caller's thread and the terminal recording is returned
    /// (a pipeline failure is returned as the error after the recording is
    /// persisted as Failed). Otherwise a task is queued and the recording is
    /// returned in `Processing` with `processing_task_id` set.
    pub fn ingest(
        &self,
        project: &str,
        version: &str,
        audio: &Path,
        channel: &str,
        options: IngestOptions,
        blocking: bool,
    ) -> Result<Recording> {
        let channel: ChannelHint = channel.parse()?;
        let handle = self.load(project, version)?;
        let mut version_guard = util::lock(&handle);
        let mut recording =
            version_guard.begin_recording(audio, channel, options, &self.audio_extensions)?;

        if blocking {
            flog!("Orchestrator::ingest {}/{} {} inline", project, version, recording.id.short());
            return self.pipeline.run(&mut version_guard, recording.id);
        }

        let params = ProcessRecordingParams {
            project: project.to_string(),
            version: version.to_string(),
            recording_id: recording.id,
        };
        let task_id = self
            .submitter
            .add_task(PROCESS_RECORDING, serde_json::to_value(&params)?)?;
        recording.processing_task_id = Some(task_id);
        version_guard.save_recording(recording.clone())?;
        flog!(
            "Orchestrator::ingest {}/{} {} queued as task {}",
            project,
            version,
            recording.id.short(),
            task_id.short()
        );
        Ok(recording)
    }

    /// Task-side entry: run the pipeline for a previously ingested recording.
    pub fn process_recording(
        &self,
        project: &str,
        version: &str,
        recording_id: RecordingId,
    ) -> Result<Recording> {
        let handle = self.load(project, version)?;
        let mut version_guard = util::lock(&handle);
        self.pipeline.run(&mut version_guard, recording_id)
    }

    pub fn paths(&self, project: &str, version: &str) -> Result<Vec<String>> {
        let handle = self.load(project, version)?;
        let paths = util::lock(&handle).paths();
        Ok(paths)
    }

    pub fn recording(&self, project: &str, version: &str, id: &RecordingId) -> Result<Recording> {
        let handle = self.load(project, version)?;
        let recording = util::lock(&handle).recording(id)?.clone();
        Ok(recording)
    }

    pub fn recordings(&self, project: &str, version: &str) -> Result<Vec<Recording>> {
        let handle = self.load(project, version)?;
        let guard = util::lock(&handle);
        Ok(guard.recordings().into_iter().cloned().collect())
    }

    /// [`ingest`](Self::ingest) off the async runtime.
    pub async fn ingest_async(
        self: &Arc<Self>,
        project: String,
        version: String,
        audio: PathBuf,
        channel: String,
        options: IngestOptions,
        blocking: bool,
    ) -> Result<Recording> {
        let orchestrator = Arc::clone(self);
        util::blocking(move || {
            orchestrator.ingest(&project, &version, &audio, &channel, options, blocking)
        })
        .await
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let loaded = util::lock(&self.versions).len();
        f.debug_struct("Orchestrator")
            .field("store", &self.store)
            .field("loaded_versions", &loaded)
            .finish()
    }
}

