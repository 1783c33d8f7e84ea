//! Contracts for the external services the ingestion pipeline calls.
//!
//! Transcription, step naming, success classification, summarization and
//! metric scoring are provided by the surrounding service (speech-to-text
//! vendors, LLM prompts). They are consumed here as blocking trait objects
//! so the task engine's worker thread can call them directly.

use std::path::Path;
use std::sync::Arc;

use crate::core::ChannelHint;
use crate::Result;

/// Output of a transcription provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    /// Combined transcript of both parties.
    pub transcript: String,
    /// Seconds of audio.
    pub duration: f64,
}

/// Verdict of the success classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct SuccessVerdict {
    pub success: bool,
    pub explanation: String,
}

pub trait Transcriber: Send + Sync {
    /// # Errors
    /// Transport or format failures; fatal to the recording.
    fn transcribe(&self, audio: &Path, channel: ChannelHint) -> Result<Transcription>;
}

pub trait StepNamer: Send + Sync {
    /// Ordered step names for one transcript. `existing` lists names already
    /// present in the version so the namer can reuse them. Must return at
    /// least one name.
    fn derive_step_names(&self, transcript: &str, existing: &[String]) -> Result<Vec<String>>;
}

pub trait SuccessClassifier: Send + Sync {
    fn classify(&self, transcript: &str, criteria: Option<&str>) -> Result<SuccessVerdict>;
}

pub trait Summarizer: Send + Sync {
    fn summarize(&self, transcript: &str) -> Result<String>;
}

pub trait MetricScorer: Send + Sync {
    /// Key under which the result is stored on the recording.
    fn name(&self) -> &str;

    /// Score a transcript against the version's prompt. Returns the value
    /// and an explanation.
    fn score(&self, transcript: &str, prompt: &str) -> Result<(String, String)>;
}

/// The full set of collaborators one pipeline run needs.
#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub step_namer: Arc<dyn StepNamer>,
    pub classifier: Arc<dyn SuccessClassifier>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub metrics: Vec<Arc<dyn MetricScorer>>,
}

impl Collaborators {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        step_namer: Arc<dyn StepNamer>,
        classifier: Arc<dyn SuccessClassifier>,
    ) -> Self {
        Self {
            transcriber,
            step_namer,
            classifier,
            summarizer: None,
            metrics: Vec::new(),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_metric(mut self, scorer: Arc<dyn MetricScorer>) -> Self {
        self.metrics.push(scorer);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let metrics: Vec<&str> = self.metrics.iter().map(|m| m.name()).collect();
        f.debug_struct("Collaborators")
            .field("summarizer", &self.summarizer.is_some())
            .field("metrics", &metrics)
            .finish()
    }
}
