//! Core domain models for callflow.
//!
//! Recordings, the steps they traverse, the per-version step forest, and
//! the durable tasks that drive asynchronous ingestion.

/// Declare a UUID-backed identifier with a short display form.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// First 8 characters of the UUID, for display.
            pub fn short(&self) -> String {
                self.0.to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(uuid::Uuid::parse_str(s)?))
            }
        }
    };
}

pub mod graph;
pub mod recording;
pub mod step;
pub mod task;

pub use graph::StepGraph;
pub use recording::{ChannelHint, MetricResult, Recording, RecordingId, RecordingStatus};
pub use step::{Step, StepId};
pub use task::{Task, TaskId, TaskStatus};
