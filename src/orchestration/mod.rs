//! Ingestion orchestration for callflow.
//!
//! The [`Orchestrator`] accepts recordings for a version and either runs
//! the [`Pipeline`] inline or queues it on the [`TaskEngine`]. External
//! services (transcription, LLM scoring) plug in through the traits in
//! [`collaborators`].

pub mod collaborators;
mod engine;
mod orchestrator;
mod pipeline;
mod version;

pub use collaborators::{
    Collaborators, MetricScorer, StepNamer, SuccessClassifier, SuccessVerdict, Summarizer,
    Transcriber, Transcription,
};
pub use engine::{TaskEngine, TaskHandler, TaskSubmitter};
pub use orchestrator::{Orchestrator, ProcessRecordingParams, PROCESS_RECORDING};
pub use pipeline::Pipeline;
pub use version::{IngestOptions, Version, VersionInfo};
