//! The per-recording ingestion pipeline.
//!
//! transcription -> success classification -> step derivation -> forest
//! merge -> summary -> metrics -> persist.
//!
//! Transcription and step derivation are fatal: the recording is marked
//! `Failed`, persisted, and the original error is returned. The success
//! classifier, summarizer and each metric scorer degrade to "N/A" instead.
//! Failure always happens before the merge, so a failed recording never
//! adds steps.

use crate::core::recording::NOT_AVAILABLE;
use crate::core::{MetricResult, Recording, RecordingId};
use crate::orchestration::collaborators::Collaborators;
use crate::orchestration::version::Version;
use crate::{flog, flog_debug, flog_error, flog_warn, Error, Result};

#[derive(Debug, Clone)]
pub struct Pipeline {
    collaborators: Collaborators,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    /// Process one recording of `version` to a terminal status.
    ///
    /// A recording that is already terminal is returned unchanged, so a
    /// recovered task that re-runs after the work was done is a no-op.
    pub fn run(&self, version: &mut Version, recording_id: RecordingId) -> Result<Recording> {
        let mut recording = version.recording(&recording_id)?.clone();
        if recording.is_terminal() {
            flog_debug!(
                "Pipeline::run recording={} already {}, skipping",
                recording_id.short(),
                recording.status
            );
            return Ok(recording);
        }

        match self.process(version, &mut recording) {
            Ok(()) => {
                recording.complete();
                version.save_recording(recording.clone())?;
                flog!(
                    "Pipeline::run recording={} completed steps={} success={:?}",
                    recording_id.short(),
                    recording.step_ids.len(),
                    recording.success
                );
                Ok(recording)
            }
            Err(e) => {
                flog_error!("Pipeline::run recording={} failed: {}", recording_id.short(), e);
                recording.fail(&e.to_string());
                if let Err(save_err) = version.save_recording(recording) {
                    flog_error!(
                        "Pipeline::run could not persist failure of {}: {}",
                        recording_id.short(),
                        save_err
                    );
                }
                Err(e)
            }
        }
    }

    fn process(&self, version: &mut Version, recording: &mut Recording) -> Result<()> {
        let transcript = match &recording.transcript {
            Some(t) => t.clone(),
            None => {
                let result = self
                    .collaborators
                    .transcriber
                    .transcribe(&recording.audio_path, recording.channel)?;
                recording.transcript = Some(result.transcript.clone());
                recording.duration = Some(result.duration);
                // Keep the transcript if a later stage crashes the process.
                version.save_recording(recording.clone())?;
                result.transcript
            }
        };

        match self
            .collaborators
            .classifier
            .classify(&transcript, version.success_criteria())
        {
            Ok(verdict) => {
                recording.success = Some(verdict.success);
                recording.success_explanation = Some(verdict.explanation);
            }
            Err(e) => {
                flog_warn!("success classifier failed for {}: {}", recording.id.short(), e);
                recording.success = None;
                recording.success_explanation = Some(NOT_AVAILABLE.to_string());
            }
        }

        let existing = version.graph().names();
        let names: Vec<String> = self
            .collaborators
            .step_namer
            .derive_step_names(&transcript, &existing)?
            .into_iter()
            .map(|n| n.trim().to_string())
            .collect();
        if names.is_empty() {
            return Err(Error::Pipeline(format!(
                "no steps derived for recording {}",
                recording.id
            )));
        }

        let steps = version.merge_steps(&names, recording.id, recording.is_successful())?;
        recording.step_ids = steps.iter().map(|s| s.id).collect();

        if let Some(summarizer) = &self.collaborators.summarizer {
            let summary = summarizer.summarize(&transcript).unwrap_or_else(|e| {
                flog_warn!("summarizer failed for {}: {}", recording.id.short(), e);
                NOT_AVAILABLE.to_string()
            });
            recording.summary = Some(summary);
        }

        for scorer in &self.collaborators.metrics {
            let result = match scorer.score(&transcript, version.prompt()) {
                Ok((value, explanation)) => MetricResult::new(value, explanation),
                Err(e) => {
                    flog_warn!(
                        "metric '{}' failed for {}: {}",
                        scorer.name(),
                        recording.id.short(),
                        e
                    );
                    MetricResult::unavailable(e.to_string())
                }
            };
            recording.metrics.insert(scorer.name().to_string(), result);
        }

        Ok(())
    }
}
