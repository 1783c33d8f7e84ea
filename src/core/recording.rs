//! Recording value object and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::step::StepId;
use super::task::TaskId;
use crate::{Error, Result};

uuid_id!(
    /// Unique identifier for a recording.
    RecordingId
);

/// Placeholder value for a score or text a collaborator could not produce.
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    #[default]
    Processing,
    Completed,
    Failed,
}

impl RecordingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordingStatus::Completed | RecordingStatus::Failed)
    }
}

impl std::fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingStatus::Processing => write!(f, "processing"),
            RecordingStatus::Completed => write!(f, "completed"),
            RecordingStatus::Failed => write!(f, "failed"),
        }
    }
}

/// How the call audio is laid out, passed through to transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelHint {
    /// Both parties mixed on one channel.
    Mono,
    /// Agent and caller on separate channels.
    Stereo,
}

impl std::fmt::Display for ChannelHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelHint::Mono => write!(f, "mono"),
            ChannelHint::Stereo => write!(f, "stereo"),
        }
    }
}

impl std::str::FromStr for ChannelHint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mono" => Ok(ChannelHint::Mono),
            "stereo" => Ok(ChannelHint::Stereo),
            other => Err(Error::Validation(format!(
                "channel hint must be 'mono' or 'stereo', got '{}'",
                other
            ))),
        }
    }
}

/// Result of one metric scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub value: String,
    #[serde(default)]
    pub explanation: String,
}

impl MetricResult {
    pub fn new(value: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            explanation: explanation.into(),
        }
    }

    /// Degraded result recorded when the scorer failed.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::new(NOT_AVAILABLE, reason)
    }

    pub fn is_available(&self) -> bool {
        self.value != NOT_AVAILABLE
    }
}

/// Check an audio reference before anything is persisted: it must be an
/// existing regular file with one of the accepted container extensions.
/// Returns the normalized (lowercase) extension.
pub fn validate_audio(path: &Path, extensions: &[String]) -> Result<String> {
    if !path.is_file() {
        return Err(Error::Validation(format!(
            "audio file not found: {}",
            path.display()
        )));
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if !extensions.iter().any(|allowed| *allowed == ext) {
        return Err(Error::Validation(format!(
            "unsupported audio type '{}' for {} (accepted: {})",
            ext,
            path.display(),
            extensions.join(", ")
        )));
    }
    Ok(ext)
}

/// One ingested call.
///
/// Created in `Processing` when ingestion begins, mutated only by the
/// pipeline that processes it, and frozen once `Completed` or `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: RecordingId,
    pub project_id: String,
    pub version_id: String,
    /// Stored copy of the audio inside the recording directory.
    pub audio_path: PathBuf,
    /// File name the audio was ingested from.
    pub source_name: String,
    pub channel: ChannelHint,
    pub created_at: DateTime<Utc>,
    pub transcript: Option<String>,
    /// Seconds.
    pub duration: Option<f64>,
    pub summary: Option<String>,
    pub success: Option<bool>,
    pub success_explanation: Option<String>,
    /// Steps traversed, root first.
    #[serde(default)]
    pub step_ids: Vec<StepId>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricResult>,
    pub status: RecordingStatus,
    pub processing_task_id: Option<TaskId>,
    pub error: Option<String>,
}

impl Recording {
    pub fn new(
        id: RecordingId,
        project_id: &str,
        version_id: &str,
        audio_path: PathBuf,
        source_name: &str,
        channel: ChannelHint,
    ) -> Self {
        Self {
            id,
            project_id: project_id.to_string(),
            version_id: version_id.to_string(),
            audio_path,
            source_name: source_name.to_string(),
            channel,
            created_at: Utc::now(),
            transcript: None,
            duration: None,
            summary: None,
            success: None,
            success_explanation: None,
            step_ids: Vec::new(),
            metadata: serde_json::Map::new(),
            metrics: BTreeMap::new(),
            status: RecordingStatus::Processing,
            processing_task_id: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_successful(&self) -> bool {
        self.success == Some(true)
    }

    /// Merge metadata entries. Only allowed before processing finishes.
    pub fn merge_metadata(&mut self, entries: serde_json::Map<String, serde_json::Value>) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::Validation(format!(
                "recording {} is {} and can no longer be edited",
                self.id, self.status
            )));
        }
        self.metadata.extend(entries);
        Ok(())
    }

    pub fn complete(&mut self) {
        self.status = RecordingStatus::Completed;
        self.error = None;
    }

    pub fn fail(&mut self, error: &str) {
        self.status = RecordingStatus::Failed;
        self.error = Some(error.to_string());
    }
}
