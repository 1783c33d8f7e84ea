//! End-to-end ingestion tests.
//!
//! Recordings go through the orchestrator in blocking and queued mode and
//! the resulting recordings, tasks and step paths are checked.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use callflow::core::{RecordingStatus, TaskStatus};
use callflow::{Config, Error, IngestOptions, Orchestrator};
use serde_json::json;

use crate::fixtures::*;

/// Test: Booking then inquiry scenario
/// Given an empty version
/// When a booked call and then an inquiry call are ingested
/// Then the inquiry adds exactly one branch under the shared greeting
#[test]
fn test_booking_then_inquiry_paths() {
    let ws = TestWorkspace::new();

    let booked = ws
        .orchestrator
        .ingest(PROJECT, VERSION, &ws.audio("booked.wav", BOOKED), "stereo", IngestOptions::default(), true)
        .unwrap();
    assert_eq!(booked.status, RecordingStatus::Completed);
    assert_eq!(ws.paths(), vec!["Greeting->Set Appointment->Farewell"]);

    let inquiry = ws
        .orchestrator
        .ingest(PROJECT, VERSION, &ws.audio("inquiry.wav", INQUIRY), "stereo", IngestOptions::default(), true)
        .unwrap();

    assert_eq!(
        ws.paths(),
        vec![
            "Greeting->Set Appointment->Farewell",
            "Greeting->Inquiry Handling->Farewell"
        ]
    );
    assert_eq!(booked.step_ids[0], inquiry.step_ids[0]);
    assert_ne!(booked.step_ids[1], inquiry.step_ids[1]);

    let handle = ws.orchestrator.load(PROJECT, VERSION).unwrap();
    let version = handle.lock().unwrap();
    assert_eq!(version.graph().len(), 5);
    let greeting = version.step(&booked.step_ids[0]).unwrap();
    assert_eq!(greeting.traversal_count(), 2);
    let booked_farewell = version.step(&booked.step_ids[2]).unwrap();
    assert_eq!(booked_farewell.success_count, 1);
    let inquiry_farewell = version.step(&inquiry.step_ids[2]).unwrap();
    assert_eq!(inquiry_farewell.success_count, 0);
}

/// Test: Missing audio is rejected up front
/// Given an audio path that does not exist
/// When it is ingested in either mode
/// Then validation fails and no task or recording record is written
#[test]
fn test_missing_audio_creates_nothing() {
    let ws = TestWorkspace::new();
    let missing = ws.temp_dir.path().join("nope.wav");

    for blocking in [true, false] {
        let err = ws
            .orchestrator
            .ingest(PROJECT, VERSION, &missing, "mono", IngestOptions::default(), blocking)
            .unwrap_err();
        assert!(err.is_validation(), "unexpected error: {}", err);
    }

    assert_eq!(ws.task_files(), 0);
    assert_eq!(ws.recording_dirs(), 0);
    assert!(ws.engine.tasks().is_empty());
}

#[test]
fn test_invalid_channel_and_container_are_rejected() {
    let ws = TestWorkspace::new();
    let audio = ws.audio("call.wav", BOOKED);

    let err = ws
        .orchestrator
        .ingest(PROJECT, VERSION, &audio, "surround", IngestOptions::default(), false)
        .unwrap_err();
    assert!(err.is_validation());

    let text = ws.temp_dir.path().join("notes.txt");
    std::fs::write(&text, "Greeting").unwrap();
    let err = ws
        .orchestrator
        .ingest(PROJECT, VERSION, &text, "mono", IngestOptions::default(), false)
        .unwrap_err();
    assert!(err.is_validation());

    assert_eq!(ws.task_files(), 0);
    assert_eq!(ws.recording_dirs(), 0);
}

#[test]
fn test_unknown_version_is_not_found() {
    let ws = TestWorkspace::new();
    let err = ws
        .orchestrator
        .ingest(PROJECT, "v9", &ws.audio("call.wav", BOOKED), "mono", IngestOptions::default(), true)
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Test: Queued ingestion
/// Given a running engine
/// When a recording is ingested without blocking
/// Then it returns Processing with a task id, and the task later completes
/// the recording with the same result a blocking ingest would give
#[test]
fn test_queued_ingest_matches_blocking() {
    let queued_ws = TestWorkspace::new();
    let recording = queued_ws
        .orchestrator
        .ingest(PROJECT, VERSION, &queued_ws.audio("a.wav", BOOKED), "mono", IngestOptions::default(), false)
        .unwrap();
    assert_eq!(recording.status, RecordingStatus::Processing);
    let task_id = recording.processing_task_id.expect("task id set");

    let task = queued_ws.engine.wait_for_task(&task_id, WAIT).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    let queued = queued_ws
        .orchestrator
        .recording(PROJECT, VERSION, &recording.id)
        .unwrap();

    let inline_ws = TestWorkspace::new();
    let inline = inline_ws
        .orchestrator
        .ingest(PROJECT, VERSION, &inline_ws.audio("a.wav", BOOKED), "mono", IngestOptions::default(), true)
        .unwrap();

    assert_eq!(queued.status, inline.status);
    assert_eq!(queued.transcript, inline.transcript);
    assert_eq!(queued.success, inline.success);
    assert_eq!(queued.summary, inline.summary);
    assert_eq!(queued.metrics, inline.metrics);
    assert_eq!(queued.step_ids.len(), inline.step_ids.len());
    assert_eq!(queued.processing_task_id, Some(task_id));
    assert!(inline.processing_task_id.is_none());
    assert_eq!(queued_ws.paths(), inline_ws.paths());
}

/// Test: Transcription failure
/// Given audio the transcriber cannot read
/// When it is processed by the engine
/// Then both the task and the recording are Failed with the error text
/// and no steps are added
#[test]
fn test_transcription_failure_fails_task_and_recording() {
    let ws = TestWorkspace::new();
    let recording = ws
        .orchestrator
        .ingest(PROJECT, VERSION, &ws.corrupt_audio("bad.wav"), "mono", IngestOptions::default(), false)
        .unwrap();

    let task = ws
        .engine
        .wait_for_task(&recording.processing_task_id.unwrap(), WAIT)
        .unwrap();
    assert!(task.error().unwrap().contains("unreadable audio stream"));

    let failed = ws.orchestrator.recording(PROJECT, VERSION, &recording.id).unwrap();
    assert_eq!(failed.status, RecordingStatus::Failed);
    assert!(failed.error.unwrap().contains("unreadable audio stream"));
    assert!(failed.step_ids.is_empty());
    assert!(ws.paths().is_empty());
}

#[test]
fn test_blocking_failure_returns_original_error() {
    let ws = TestWorkspace::new();
    let err = ws
        .orchestrator
        .ingest(PROJECT, VERSION, &ws.corrupt_audio("bad.wav"), "mono", IngestOptions::default(), true)
        .unwrap_err();
    assert!(matches!(err, Error::Collaborator { collaborator: "transcriber", .. }));

    let recordings = ws.orchestrator.recordings(PROJECT, VERSION).unwrap();
    assert_eq!(recordings.len(), 1);
    assert_eq!(recordings[0].status, RecordingStatus::Failed);
}

#[test]
fn test_scores_and_degraded_metrics() {
    let ws = TestWorkspace::new();
    let recording = ws
        .orchestrator
        .ingest(PROJECT, VERSION, &ws.audio("call.wav", INQUIRY), "mono", IngestOptions::default(), true)
        .unwrap();

    assert_eq!(recording.success, Some(false));
    assert_eq!(recording.success_explanation.as_deref(), Some("no appointment"));
    assert_eq!(recording.summary.as_deref(), Some("3 steps"));
    assert_eq!(recording.metrics["politeness"].value, "5");
    assert_eq!(recording.metrics["latency"].value, "N/A");
    assert!(recording.metrics["latency"]
        .explanation
        .contains("malformed response"));
}

#[test]
fn test_overrides_are_applied() {
    let ws = TestWorkspace::new();
    let options = IngestOptions::default()
        .with_metadata("caller", json!("+15550100"))
        .with_transcript("Greeting | Set Appointment", Some(61.0));

    let recording = ws
        .orchestrator
        .ingest(PROJECT, VERSION, &ws.audio("call.wav", INQUIRY), "mono", options, true)
        .unwrap();

    assert_eq!(ws.transcriber.calls.load(Ordering::SeqCst), 0);
    assert_eq!(recording.duration, Some(61.0));
    assert_eq!(recording.metadata["caller"], "+15550100");
    assert_eq!(recording.source_name, "call.wav");
    assert_eq!(ws.paths(), vec!["Greeting->Set Appointment"]);
}

/// Test: Mixed blocking and queued ingestion
/// Given producers ingesting inline while the engine processes queued work
/// When all work has drained
/// Then every recording is counted exactly once on the shared steps
#[test]
fn test_mixed_concurrent_ingestion() {
    let ws = TestWorkspace::new();
    let audio = ws.audio("call.wav", BOOKED);

    let producers: Vec<_> = (0..4)
        .map(|i| {
            let orchestrator = Arc::clone(&ws.orchestrator);
            let audio = audio.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    orchestrator
                        .ingest(PROJECT, VERSION, &audio, "mono", IngestOptions::default(), i % 2 == 0)
                        .unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    assert!(ws.engine.wait_for_all(WAIT));

    let recordings = ws.orchestrator.recordings(PROJECT, VERSION).unwrap();
    assert_eq!(recordings.len(), 20);
    assert!(recordings
        .iter()
        .all(|r| r.status == RecordingStatus::Completed));

    let handle = ws.orchestrator.load(PROJECT, VERSION).unwrap();
    let version = handle.lock().unwrap();
    assert_eq!(version.paths(), vec!["Greeting->Set Appointment->Farewell"]);
    let root = version.graph().roots()[0];
    assert_eq!(root.traversal_count(), 20);
    let leaf = version.step(&recordings[0].step_ids[2]).unwrap();
    assert_eq!(leaf.success_count, 20);
}

#[tokio::test]
async fn test_async_ingest() {
    let ws = TestWorkspace::new();
    let audio = ws.audio("call.wav", BOOKED);

    let recording = ws
        .orchestrator
        .ingest_async(
            PROJECT.to_string(),
            VERSION.to_string(),
            audio,
            "stereo".to_string(),
            IngestOptions::default(),
            false,
        )
        .await
        .unwrap();

    let task = ws
        .engine
        .wait_for_task_async(&recording.processing_task_id.unwrap(), WAIT)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(ws.engine.wait_for_all_async(WAIT).await);
    assert_eq!(ws.paths(), vec!["Greeting->Set Appointment->Farewell"]);
}

/// Test: Configured audio extensions
/// Given a config listing " WAV" and ".Mp3"
/// When the orchestrator is wired from it
/// Then those containers are accepted regardless of case and others are
/// rejected before anything is persisted
#[test]
fn test_configured_audio_extensions_are_normalized() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let config = Config {
        audio_extensions: Some(vec![" WAV".to_string(), ".Mp3".to_string()]),
        ..config(&temp_dir)
    };
    let transcriber = Arc::new(ScriptTranscriber::default());
    let (orchestrator, engine) =
        Orchestrator::from_config(&config, collaborators(&transcriber)).unwrap();
    assert_eq!(orchestrator.audio_extensions(), ["wav", "mp3"]);
    orchestrator
        .create_version(PROJECT, VERSION, "Book dental appointments", None)
        .unwrap();

    let wav = temp_dir.path().join("call.WAV");
    std::fs::write(&wav, BOOKED.join(" | ")).unwrap();
    let recording = orchestrator
        .ingest(PROJECT, VERSION, &wav, "mono", IngestOptions::default(), true)
        .unwrap();
    assert_eq!(recording.status, RecordingStatus::Completed);

    let ogg = temp_dir.path().join("call.ogg");
    std::fs::write(&ogg, BOOKED.join(" | ")).unwrap();
    let err = orchestrator
        .ingest(PROJECT, VERSION, &ogg, "mono", IngestOptions::default(), true)
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(orchestrator.recordings(PROJECT, VERSION).unwrap().len(), 1);

    engine.stop().unwrap();
}
