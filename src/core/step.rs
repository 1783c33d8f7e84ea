//! Conversation steps.
//!
//! A step is one recognizable phase of a call ("Greeting", "Set
//! Appointment", ...). Steps link to at most one parent and any number of
//! ordered children, forming the per-version forest held by
//! [`StepGraph`](super::StepGraph). Links are stored as ids so the forest
//! can be persisted one file per step and re-wired at load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::recording::RecordingId;

uuid_id!(
    /// Unique identifier for a step.
    StepId
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    /// Display name, unique only among siblings.
    pub name: String,
    pub project_id: String,
    pub version_id: String,
    /// Parent step; `None` for roots.
    pub previous_id: Option<StepId>,
    /// Children in insertion order.
    #[serde(default)]
    pub next_ids: Vec<StepId>,
    /// Recordings that traversed this step, in arrival order.
    #[serde(default)]
    pub recording_ids: Vec<RecordingId>,
    /// Recordings that ended here and were classified successful.
    #[serde(default)]
    pub success_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Step {
    pub fn new(name: &str, project_id: &str, version_id: &str, previous_id: Option<StepId>) -> Self {
        Self {
            id: StepId::new(),
            name: name.to_string(),
            project_id: project_id.to_string(),
            version_id: version_id.to_string(),
            previous_id,
            next_ids: Vec::new(),
            recording_ids: Vec::new(),
            success_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.previous_id.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.next_ids.is_empty()
    }

    pub fn traversal_count(&self) -> usize {
        self.recording_ids.len()
    }

    pub fn has_recording(&self, recording_id: &RecordingId) -> bool {
        self.recording_ids.contains(recording_id)
    }

    /// Share of traversals that ended successfully at this step.
    pub fn success_rate(&self) -> f64 {
        if self.recording_ids.is_empty() {
            0.0
        } else {
            self.success_count as f64 / self.recording_ids.len() as f64
        }
    }
}
