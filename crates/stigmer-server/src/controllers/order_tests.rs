//! Pipeline ordering invariants
//!
//! Every controller's pipelines must keep:
//! - ResolveSlug before CheckDuplicate
//! - ValidateProto before anything that dereferences input fields
//! - Persist before StartWorkflow
//! - the apply prelude's LoadForApply before the create branch's
//!   CheckDuplicate (apply delegates, so the prelude always runs first)

use std::sync::Arc;

use stigmer_core::Resource;
use stigmer_store::ResourceStore;

use crate::controllers::Pipelines;
use crate::engine_cell::EngineCell;
use crate::subscribe::SubscribeHub;
use crate::transport::ClientSlot;

fn store() -> (tempfile::TempDir, ResourceStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = ResourceStore::open(dir.path().join("kv")).unwrap();
    (dir, store)
}

fn position(names: &[&'static str], step: &str) -> usize {
    names
        .iter()
        .position(|n| *n == step)
        .unwrap_or_else(|| panic!("step {step} missing from {names:?}"))
}

fn assert_invariants<R: Resource>(pipelines: &Pipelines<R>) {
    let create = pipelines.create.step_names();

    // structural validation leads
    assert_eq!(create[0], "ValidateProto", "{create:?}");

    // slug resolution precedes the duplicate scan
    assert!(
        position(&create, "ResolveSlug") < position(&create, "CheckDuplicate"),
        "{create:?}"
    );

    // apply decides create-vs-update before the create branch runs;
    // the prelude ends in LoadForApply and never checks duplicates itself
    let apply = pipelines.apply.step_names();
    assert_eq!(*apply.last().unwrap(), "LoadForApply", "{apply:?}");
    assert!(!apply.contains(&"CheckDuplicate"), "{apply:?}");

    // updates must load before they mutate
    let update = pipelines.update.step_names();
    assert!(
        position(&update, "LoadExisting") < position(&update, "Persist"),
        "{update:?}"
    );
}

#[test]
fn skill_pipelines_hold_the_invariants() {
    let (_dir, store) = store();
    assert_invariants(&super::skill::pipelines(&store));
}

#[test]
fn agent_pipelines_hold_the_invariants() {
    let (_dir, store) = store();
    let slot = Arc::new(ClientSlot::new());
    assert_invariants(&super::agent::agent_pipelines(&store, &slot));
    assert_invariants(&super::agent::instance_pipelines(&store));
}

#[test]
fn workflow_pipelines_hold_the_invariants() {
    let (_dir, store) = store();
    let slot = Arc::new(ClientSlot::new());
    assert_invariants(&super::workflow::workflow_pipelines(&store, &slot));
    assert_invariants(&super::workflow::instance_pipelines(&store));
}

#[test]
fn execution_pipelines_hold_the_invariants() {
    let (_dir, store) = store();
    let hub = SubscribeHub::new();
    let engine = EngineCell::empty();
    let slot = Arc::new(ClientSlot::new());

    let workflow_execution = super::execution::workflow_execution_pipelines(
        &store,
        &hub,
        &engine,
        &slot,
        "orchestrator-q",
        "runner-q",
    );
    assert_invariants(&workflow_execution);

    // the record is persisted before the engine hears about it
    let create = workflow_execution.create.step_names();
    assert!(
        position(&create, "Persist") < position(&create, "StartWorkflow"),
        "{create:?}"
    );
    // instance recovery resolves before the parent loads
    assert!(
        position(&create, "CreateDefaultChildIfNeeded") < position(&create, "LoadParent"),
        "{create:?}"
    );

    assert_invariants(&super::execution::agent_execution_pipelines(&store));
}

#[test]
fn parent_creation_ends_with_default_child() {
    let (_dir, store) = store();
    let slot = Arc::new(ClientSlot::new());
    let workflow = super::workflow::workflow_pipelines(&store, &slot);
    let create = workflow.create.step_names();
    assert!(
        position(&create, "Persist") < position(&create, "CreateDefaultChildIfNeeded"),
        "{create:?}"
    );
}
