//! One product version: its step forest, its recordings, and their
//! on-disk records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::recording::validate_audio;
use crate::core::{ChannelHint, Recording, RecordingId, Step, StepGraph, StepId};
use crate::store::{validate_name, Store};
use crate::{flog, flog_debug, flog_error, flog_warn, Error, Result};

/// Persisted version record (`{project}/{version}/info.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub id: String,
    pub project_id: String,
    pub prompt: String,
    pub success_criteria: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied extras for one ingestion.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Merged into the recording's metadata.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Pre-computed transcript; skips the transcription provider.
    pub transcript: Option<String>,
    /// Duration in seconds that goes with `transcript`.
    pub duration: Option<f64>,
}

impl IngestOptions {
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_transcript(mut self, transcript: &str, duration: Option<f64>) -> Self {
        self.transcript = Some(transcript.to_string());
        self.duration = duration;
        self
    }
}

/// In-memory cache and persistence unit for one version.
///
/// Step and recording mutations go through here so every change is written
/// to the store. Committed files are only ever added or overwritten.
#[derive(Debug)]
pub struct Version {
    info: VersionInfo,
    graph: StepGraph,
    recordings: HashMap<RecordingId, Recording>,
    store: Store,
}

impl Version {
    /// Create and persist a new, empty version.
    ///
    /// # Errors
    /// Validation error if the identifiers are not path-safe or the version
    /// already exists.
    pub fn create(
        store: &Store,
        project: &str,
        version: &str,
        prompt: &str,
        success_criteria: Option<&str>,
    ) -> Result<Self> {
        validate_name("project", project)?;
        validate_name("version", version)?;
        let dir = store.version_dir(project, version);
        if dir.exists() {
            return Err(Error::Validation(format!(
                "version {}/{} already exists",
                project, version
            )));
        }

        let info = VersionInfo {
            id: version.to_string(),
            project_id: project.to_string(),
            prompt: prompt.to_string(),
            success_criteria: success_criteria.map(str::to_string),
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
        };
        store.write(&store.version_info_path(project, version), &info)?;
        flog!("Version::create {}/{}", project, version);

        Ok(Self {
            info,
            graph: StepGraph::new(project, version),
            recordings: HashMap::new(),
            store: store.clone(),
        })
    }

    /// Load a version and rebuild its step forest from persisted steps.
    ///
    /// # Errors
    /// `NotFound` if the version directory is absent; validation errors if
    /// the persisted steps do not form a forest.
    pub fn load(store: &Store, project: &str, version: &str) -> Result<Self> {
        validate_name("project", project)?;
        validate_name("version", version)?;
        let dir = store.version_dir(project, version);
        if !dir.is_dir() {
            return Err(Error::not_found("version", format!("{}/{}", project, version)));
        }

        let info_path = store.version_info_path(project, version);
        let info = if info_path.is_file() {
            store.read(&info_path)?
        } else {
            flog_warn!("Version::load {}/{} has no info.json, using defaults", project, version);
            VersionInfo {
                id: version.to_string(),
                project_id: project.to_string(),
                prompt: String::new(),
                success_criteria: None,
                metadata: serde_json::Map::new(),
                created_at: Utc::now(),
            }
        };

        let steps: Vec<Step> = store.read_children(&store.steps_dir(project, version))?;
        let graph = StepGraph::from_steps(project, version, steps)?;
        let recordings: HashMap<RecordingId, Recording> = store
            .read_children::<Recording>(&store.recordings_dir(project, version))?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        flog!(
            "Version::load {}/{} steps={} recordings={}",
            project,
            version,
            graph.len(),
            recordings.len()
        );

        Ok(Self {
            info,
            graph,
            recordings,
            store: store.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn project_id(&self) -> &str {
        &self.info.project_id
    }

    pub fn prompt(&self) -> &str {
        &self.info.prompt
    }

    pub fn success_criteria(&self) -> Option<&str> {
        self.info.success_criteria.as_deref()
    }

    pub fn info(&self) -> &VersionInfo {
        &self.info
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// All root-to-leaf step paths.
    pub fn paths(&self) -> Vec<String> {
        self.graph.paths()
    }

    pub fn step(&self, id: &StepId) -> Result<&Step> {
        self.graph.get(id).ok_or_else(|| Error::not_found("step", id))
    }

    pub fn recording(&self, id: &RecordingId) -> Result<&Recording> {
        self.recordings
            .get(id)
            .ok_or_else(|| Error::not_found("recording", id))
    }

    /// Recordings, oldest first.
    pub fn recordings(&self) -> Vec<&Recording> {
        let mut all: Vec<&Recording> = self.recordings.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn update_metadata(&mut self, entries: serde_json::Map<String, serde_json::Value>) -> Result<()> {
        self.info.metadata.extend(entries);
        let path = self.store.version_info_path(self.project_id(), self.id());
        self.store.write(&path, &self.info)
    }

    /// Edit a recording's metadata before processing has finished.
    pub fn update_recording_metadata(
        &mut self,
        id: &RecordingId,
        entries: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Recording> {
        let mut recording = self.recording(id)?.clone();
        recording.merge_metadata(entries)?;
        self.save_recording(recording.clone())?;
        Ok(recording)
    }

    /// Validate the audio, store a copy, and persist a new `Processing`
    /// recording. Nothing is written if validation fails.
    pub fn begin_recording(
        &mut self,
        audio: &Path,
        channel: ChannelHint,
        options: IngestOptions,
        audio_extensions: &[String],
    ) -> Result<Recording> {
        let ext = validate_audio(audio, audio_extensions)?;
        let id = RecordingId::new();
        let dir = self
            .store
            .recording_dir(self.project_id(), self.id(), &id.to_string());
        fs::create_dir_all(&dir)?;
        let stored = dir.join(format!("audio.{}", ext));
        fs::copy(audio, &stored)?;
        flog_debug!("Version::begin_recording copied {} -> {}", audio.display(), stored.display());

        let source_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut recording = Recording::new(
            id,
            self.project_id(),
            self.id(),
            stored,
            &source_name,
            channel,
        );
        recording.merge_metadata(options.metadata)?;
        recording.transcript = options.transcript;
        recording.duration = options.duration;

        self.save_recording(recording.clone())?;
        flog!(
            "Version::begin_recording {}/{} recording={} source={}",
            self.project_id(),
            self.id(),
            id.short(),
            source_name
        );
        Ok(recording)
    }

    /// Persist a recording and refresh the cached copy.
    pub fn save_recording(&mut self, recording: Recording) -> Result<()> {
        let path = self
            .store
            .recording_path(self.project_id(), self.id(), &recording.id.to_string());
        self.store.write(&path, &recording)?;
        self.recordings.insert(recording.id, recording);
        Ok(())
    }

    /// Merge a step-name sequence into the forest and persist every
    /// traversed step, root first.
    ///
    /// The merge runs on a copy of the forest that replaces the live one
    /// only after all writes succeed. On a failed write the files already
    /// written by this merge are restored (or removed, for steps it
    /// created), so neither memory nor disk keeps a partial contribution.
    pub fn merge_steps(
        &mut self,
        names: &[String],
        recording_id: RecordingId,
        successful: bool,
    ) -> Result<Vec<Step>> {
        let mut staged = self.graph.clone();
        let path = staged.merge(names, recording_id, successful)?;

        for (written, step) in path.iter().enumerate() {
            if let Err(e) = self.store.write(&self.step_file(&step.id), step) {
                flog_error!(
                    "Version::merge_steps {}/{} recording={} failed writing step '{}': {}",
                    self.project_id(),
                    self.id(),
                    recording_id.short(),
                    step.name,
                    e
                );
                self.restore_steps(&path[..written]);
                return Err(e);
            }
        }
        self.graph = staged;

        flog!(
            "Version::merge_steps {}/{} recording={} path={}",
            self.project_id(),
            self.id(),
            recording_id.short(),
            names.join(crate::core::graph::PATH_SEPARATOR)
        );
        Ok(path)
    }

    fn step_file(&self, id: &StepId) -> PathBuf {
        self.store
            .step_path(self.project_id(), self.id(), &id.to_string())
    }

    /// Put step files back to the live forest's state.
    fn restore_steps(&self, written: &[Step]) {
        for step in written {
            let file = self.step_file(&step.id);
            let restored = match self.graph.get(&step.id) {
                Some(previous) => self.store.write(&file, previous),
                None => match file.parent() {
                    Some(dir) => fs::remove_dir_all(dir).map_err(Error::from),
                    None => Ok(()),
                },
            };
            if let Err(e) = restored {
                flog_warn!("Version::merge_steps could not restore step {}: {}", step.id, e);
            }
        }
    }
}
