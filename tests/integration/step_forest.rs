//! Forest invariants of persisted steps.

use std::collections::{HashMap, HashSet};

use callflow::core::{Step, StepId};
use callflow::{IngestOptions, Store, Version};

use crate::fixtures::*;

fn ingest_all(ws: &TestWorkspace, scripts: &[&[&str]]) {
    for (i, script) in scripts.iter().enumerate() {
        ws.orchestrator
            .ingest(
                PROJECT,
                VERSION,
                &ws.audio(&format!("call-{}.wav", i), script),
                "mono",
                IngestOptions::default(),
                true,
            )
            .unwrap();
    }
}

/// Read every step file directly, bypassing the graph.
fn persisted_steps(store: &Store) -> Vec<Step> {
    store
        .read_children(&store.steps_dir(PROJECT, VERSION))
        .unwrap()
}

const SCRIPTS: &[&[&str]] = &[
    BOOKED,
    INQUIRY,
    &["Greeting", "Set Appointment", "Reschedule", "Farewell"],
    &["Voicemail"],
    &["Greeting", "Inquiry Handling", "Transfer"],
    &["Farewell", "Greeting"],
    BOOKED,
];

/// Test: Persisted links form a forest
/// Given a version with branching and repeated step names
/// When the step files are read back
/// Then every non-root step has exactly one parent that lists it as a
/// child, and no step is reachable from itself
#[test]
fn test_persisted_links_form_forest() {
    let ws = TestWorkspace::new();
    ingest_all(&ws, SCRIPTS);

    let steps = persisted_steps(&ws.store);
    let by_id: HashMap<StepId, &Step> = steps.iter().map(|s| (s.id, s)).collect();

    let mut parents: HashMap<StepId, usize> = HashMap::new();
    for step in &steps {
        for child in &step.next_ids {
            *parents.entry(*child).or_default() += 1;
            assert_eq!(by_id[child].previous_id, Some(step.id));
        }
    }
    for step in &steps {
        let expected = usize::from(step.previous_id.is_some());
        assert_eq!(parents.get(&step.id).copied().unwrap_or(0), expected);

        let mut seen = HashSet::new();
        let mut cursor = step.previous_id;
        while let Some(id) = cursor {
            assert_ne!(id, step.id, "cycle through {}", step.name);
            assert!(seen.insert(id));
            cursor = by_id[&id].previous_id;
        }
    }
}

#[test]
fn test_reload_reproduces_paths_and_counts() {
    let ws = TestWorkspace::new();
    ingest_all(&ws, SCRIPTS);
    let before = ws.paths();

    let reloaded = Version::load(&ws.store, PROJECT, VERSION).unwrap();
    assert_eq!(reloaded.paths(), before);
    assert!(reloaded.graph().is_forest());
    assert_eq!(
        before,
        vec![
            "Greeting->Set Appointment->Farewell",
            "Greeting->Set Appointment->Reschedule->Farewell",
            "Greeting->Inquiry Handling->Farewell",
            "Greeting->Inquiry Handling->Transfer",
            "Voicemail",
            "Farewell->Greeting",
        ]
    );

    let greeting = reloaded.graph().roots()[0];
    assert_eq!(greeting.name, "Greeting");
    assert_eq!(greeting.traversal_count(), 5);
}

/// Test: Same name on different branches stays distinct
/// Given "Farewell" reached through two different parents
/// Then there are two Farewell steps, each counted separately
#[test]
fn test_sibling_scoped_names() {
    let ws = TestWorkspace::new();
    ingest_all(&ws, &[BOOKED, INQUIRY, BOOKED]);

    let farewells: Vec<Step> = persisted_steps(&ws.store)
        .into_iter()
        .filter(|s| s.name == "Farewell")
        .collect();
    assert_eq!(farewells.len(), 2);

    let mut counts: Vec<(usize, u64)> = farewells
        .iter()
        .map(|s| (s.traversal_count(), s.success_count))
        .collect();
    counts.sort();
    assert_eq!(counts, vec![(1, 0), (2, 2)]);
}

#[test]
fn test_further_ingestion_after_reload_extends_forest() {
    let ws = TestWorkspace::new();
    ingest_all(&ws, &[BOOKED]);

    let ws = ws.restart();
    ingest_all(&ws, &[INQUIRY]);

    assert_eq!(
        ws.paths(),
        vec![
            "Greeting->Set Appointment->Farewell",
            "Greeting->Inquiry Handling->Farewell"
        ]
    );
    assert_eq!(persisted_steps(&ws.store).len(), 5);
}
