//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Scripted collaborators driven by the contents of fake audio files
//! - A workspace bundling a temp data directory, engine and orchestrator

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use callflow::core::ChannelHint;
use callflow::orchestration::{
    Collaborators, MetricScorer, StepNamer, SuccessClassifier, SuccessVerdict, Summarizer,
    Transcriber, Transcription,
};
use callflow::{Config, Error, Orchestrator, Result, Store, TaskEngine};

pub const PROJECT: &str = "acme";
pub const VERSION: &str = "v1";
pub const POLL: Duration = Duration::from_millis(5);
pub const WAIT: Option<Duration> = Some(Duration::from_secs(10));

/// Audio whose script starts with this marker cannot be transcribed.
pub const CORRUPT: &str = "CORRUPT";

/// "Transcribes" a fake audio file by reading its text: step names
/// separated by `|`.
#[derive(Default)]
pub struct ScriptTranscriber {
    pub calls: AtomicUsize,
}

impl Transcriber for ScriptTranscriber {
    fn transcribe(&self, audio: &Path, _channel: ChannelHint) -> Result<Transcription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = std::fs::read_to_string(audio)?;
        if script.starts_with(CORRUPT) {
            return Err(Error::collaborator("transcriber", "unreadable audio stream"));
        }
        Ok(Transcription {
            transcript: script.trim().to_string(),
            duration: 30.0,
        })
    }
}

pub struct PipeNamer;

impl StepNamer for PipeNamer {
    fn derive_step_names(&self, transcript: &str, _existing: &[String]) -> Result<Vec<String>> {
        Ok(transcript
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// A call succeeds when an appointment was set.
pub struct AppointmentClassifier;

impl SuccessClassifier for AppointmentClassifier {
    fn classify(&self, transcript: &str, _criteria: Option<&str>) -> Result<SuccessVerdict> {
        let success = transcript.contains("Set Appointment");
        Ok(SuccessVerdict {
            success,
            explanation: if success {
                "appointment booked".to_string()
            } else {
                "no appointment".to_string()
            },
        })
    }
}

pub struct StepCountSummarizer;

impl Summarizer for StepCountSummarizer {
    fn summarize(&self, transcript: &str) -> Result<String> {
        Ok(format!("{} steps", transcript.split('|').count()))
    }
}

pub struct FixedMetric;

impl MetricScorer for FixedMetric {
    fn name(&self) -> &str {
        "politeness"
    }

    fn score(&self, _transcript: &str, _prompt: &str) -> Result<(String, String)> {
        Ok(("5".to_string(), "greeted caller by name".to_string()))
    }
}

pub struct BrokenMetric;

impl MetricScorer for BrokenMetric {
    fn name(&self) -> &str {
        "latency"
    }

    fn score(&self, _transcript: &str, _prompt: &str) -> Result<(String, String)> {
        Err(Error::collaborator("latency scorer", "malformed response"))
    }
}

/// Config rooted in the workspace's temp directory.
pub fn config(temp_dir: &TempDir) -> Config {
    Config {
        data_dir: Some(temp_dir.path().join("data").display().to_string()),
        poll_interval_ms: Some(POLL.as_millis() as u64),
        ..Config::default()
    }
}

/// The scripted collaborator set, sharing `transcriber` so tests can count
/// its calls.
pub fn collaborators(transcriber: &Arc<ScriptTranscriber>) -> Collaborators {
    Collaborators::new(
        transcriber.clone(),
        Arc::new(PipeNamer),
        Arc::new(AppointmentClassifier),
    )
    .with_summarizer(Arc::new(StepCountSummarizer))
    .with_metric(Arc::new(FixedMetric))
    .with_metric(Arc::new(BrokenMetric))
}

/// Temp data directory with a started engine and an orchestrator wired to
/// it. The `acme/v1` version exists.
pub struct TestWorkspace {
    pub temp_dir: TempDir,
    pub store: Store,
    pub engine: TaskEngine,
    pub orchestrator: Arc<Orchestrator>,
    pub transcriber: Arc<ScriptTranscriber>,
}

impl TestWorkspace {
    /// Workspace with the worker running.
    pub fn new() -> Self {
        let ws = Self::stopped();
        ws.engine.start().expect("Failed to start engine");
        ws
    }

    /// Workspace whose engine has not been started; queued work stays
    /// Pending.
    pub fn stopped() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ws = Self::open(temp_dir);
        ws.orchestrator
            .create_version(PROJECT, VERSION, "Book dental appointments", Some("appointment set"))
            .expect("Failed to create version");
        ws
    }

    /// Build a fresh engine and orchestrator over an existing data
    /// directory, as a restarted process would.
    pub fn open(temp_dir: TempDir) -> Self {
        let transcriber = Arc::new(ScriptTranscriber::default());
        let (orchestrator, engine) =
            Orchestrator::from_config(&config(&temp_dir), collaborators(&transcriber))
                .expect("Failed to wire orchestrator");
        Self {
            store: orchestrator.store().clone(),
            temp_dir,
            engine,
            orchestrator,
            transcriber,
        }
    }

    /// Stop this process and start a new one over the same data.
    pub fn restart(self) -> Self {
        let TestWorkspace {
            temp_dir, engine, ..
        } = self;
        engine.stop().expect("Failed to stop engine");
        drop(engine);
        let ws = Self::open(temp_dir);
        ws.engine.start().expect("Failed to start engine");
        ws
    }

    /// Write a fake audio file whose "transcript" is `steps` joined by `|`.
    pub fn audio(&self, name: &str, steps: &[&str]) -> PathBuf {
        let path = self.temp_dir.path().join("incoming").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, steps.join(" | ")).unwrap();
        path
    }

    pub fn corrupt_audio(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join("incoming").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, CORRUPT).unwrap();
        path
    }

    pub fn paths(&self) -> Vec<String> {
        self.orchestrator.paths(PROJECT, VERSION).unwrap()
    }

    /// Number of task files on disk.
    pub fn task_files(&self) -> usize {
        std::fs::read_dir(self.store.tasks_dir())
            .map(|dir| dir.count())
            .unwrap_or(0)
    }

    /// Number of recording directories on disk.
    pub fn recording_dirs(&self) -> usize {
        std::fs::read_dir(self.store.recordings_dir(PROJECT, VERSION))
            .map(|dir| dir.count())
            .unwrap_or(0)
    }
}

pub const BOOKED: &[&str] = &["Greeting", "Set Appointment", "Farewell"];
pub const INQUIRY: &[&str] = &["Greeting", "Inquiry Handling", "Farewell"];
