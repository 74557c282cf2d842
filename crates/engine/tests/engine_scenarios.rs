//! End-to-end case execution scenarios driven through the engine facade.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use docket_engine::{CaseEngine, DeploymentBuilder, EngineError, Operation, TriggerOutcome};
use docket_storage::{CaseState, CaseStorage, InMemoryStorage, PlanItemState};

fn setup(resources: &[(&str, Value)]) -> (Arc<InMemoryStorage>, CaseEngine) {
    let storage = Arc::new(InMemoryStorage::new());
    let engine = CaseEngine::new(storage.clone());
    let mut builder = DeploymentBuilder::new("scenario tests");
    for (name, doc) in resources {
        builder = builder.add_resource(*name, serde_json::to_vec(doc).unwrap());
    }
    engine.deployments().deploy(builder).unwrap();
    (storage, engine)
}

fn case_definition_id(engine: &CaseEngine, key: &str) -> String {
    engine
        .deployments()
        .resolve_latest_case_definition(key, None)
        .unwrap()
        .record
        .id
        .clone()
}

fn vars(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Render the executed operations with plan item definition ids instead of
/// runtime uuids, so traces can be asserted against the model.
fn trace(outcome: &TriggerOutcome) -> Vec<String> {
    let names: HashMap<&str, &str> = outcome
        .plan_items
        .iter()
        .map(|item| (item.id.as_str(), item.plan_item_definition_id.as_str()))
        .collect();
    let name = |id: &String| names.get(id.as_str()).copied().unwrap_or("?");
    outcome
        .operations
        .iter()
        .map(|op| match op {
            Operation::InitPlanModel => "init".to_string(),
            Operation::InitStage { stage_instance_id } => {
                format!("init-stage:{}", name(stage_instance_id))
            }
            Operation::EvaluateCriteria { .. } => "evaluate".to_string(),
            Operation::Activate {
                plan_item_instance_id,
            } => format!("activate:{}", name(plan_item_instance_id)),
            Operation::Trigger {
                plan_item_instance_id,
            } => format!("trigger:{}", name(plan_item_instance_id)),
            Operation::Complete {
                plan_item_instance_id,
            } => format!("complete:{}", name(plan_item_instance_id)),
            Operation::Occur {
                plan_item_instance_id,
            } => format!("occur:{}", name(plan_item_instance_id)),
            Operation::Exit {
                plan_item_instance_id,
            } => format!("exit:{}", name(plan_item_instance_id)),
            Operation::Terminate {
                plan_item_instance_id,
            } => format!("terminate:{}", name(plan_item_instance_id)),
            Operation::CompleteCase => "complete-case".to_string(),
            Operation::TerminateCase { .. } => "terminate-case".to_string(),
        })
        .collect()
}

fn instance_id(outcome: &TriggerOutcome, definition_id: &str) -> String {
    outcome
        .plan_items
        .iter()
        .find(|item| item.plan_item_definition_id == definition_id)
        .map(|item| item.id.clone())
        .unwrap()
}

fn state_of(outcome: &TriggerOutcome, definition_id: &str) -> PlanItemState {
    outcome
        .plan_items
        .iter()
        .find(|item| item.plan_item_definition_id == definition_id)
        .map(|item| item.state)
        .unwrap()
}

// ──────────────────────────────────────────────
// Cascading activation
// ──────────────────────────────────────────────

fn chain_case() -> Value {
    json!({
        "key": "chain",
        "planItems": [
            { "id": "A", "type": "task" },
            { "id": "B", "type": "task", "entryCriteria": [
                { "onParts": [{ "source": "A", "event": "complete" }] }
            ]},
            { "id": "C", "type": "task", "entryCriteria": [
                { "onParts": [{ "source": "B", "event": "complete" }] }
            ]}
        ]
    })
}

#[test]
fn chained_completions_activate_one_item_per_pass() {
    let (_, engine) = setup(&[("chain.case.json", chain_case())]);
    let definition_id = case_definition_id(&engine, "chain");

    let started = engine.start_case(&definition_id, Map::new()).unwrap();
    assert_eq!(trace(&started), vec!["init", "activate:A"]);
    assert_eq!(state_of(&started, "A"), PlanItemState::Active);
    assert_eq!(state_of(&started, "B"), PlanItemState::Available);
    assert_eq!(state_of(&started, "C"), PlanItemState::Available);

    let case_id = started.case.id.clone();
    let after_a = engine
        .complete_plan_item(&case_id, &instance_id(&started, "A"))
        .unwrap();
    assert_eq!(
        trace(&after_a),
        vec!["complete:A", "evaluate", "activate:B", "evaluate"]
    );
    assert_eq!(state_of(&after_a, "B"), PlanItemState::Active);
    assert_eq!(state_of(&after_a, "C"), PlanItemState::Available);

    let after_b = engine
        .complete_plan_item(&case_id, &instance_id(&after_a, "B"))
        .unwrap();
    assert_eq!(
        trace(&after_b),
        vec!["complete:B", "evaluate", "activate:C", "evaluate"]
    );

    let after_c = engine
        .complete_plan_item(&case_id, &instance_id(&after_b, "C"))
        .unwrap();
    assert_eq!(trace(&after_c), vec!["complete:C", "evaluate", "complete-case"]);
    assert_eq!(after_c.case.state, CaseState::Completed);
    assert!(after_c.case.ended_at.is_some());
}

// ──────────────────────────────────────────────
// Termination cascade
// ──────────────────────────────────────────────

fn teardown_case() -> Value {
    json!({
        "key": "teardown",
        "planItems": [
            { "id": "S", "type": "stage", "children": [
                { "id": "t1", "type": "task" },
                { "id": "t2", "type": "task" }
            ]}
        ]
    })
}

#[test]
fn case_termination_cascades_without_criteria_passes() {
    let (_, engine) = setup(&[("teardown.case.json", teardown_case())]);
    let definition_id = case_definition_id(&engine, "teardown");

    let started = engine.start_case(&definition_id, Map::new()).unwrap();
    assert_eq!(
        trace(&started),
        vec!["init", "activate:S", "init-stage:S", "activate:t1", "activate:t2"]
    );
    assert_eq!(state_of(&started, "S"), PlanItemState::Active);
    assert_eq!(state_of(&started, "t1"), PlanItemState::Active);
    assert_eq!(state_of(&started, "t2"), PlanItemState::Active);

    let terminated = engine.terminate_case(&started.case.id).unwrap();
    let ops = trace(&terminated);
    assert_eq!(&ops[..2], ["terminate-case", "terminate:S"]);
    let mut tail: Vec<&str> = ops[2..].iter().map(String::as_str).collect();
    tail.sort_unstable();
    assert_eq!(tail, ["terminate:t1", "terminate:t2"]);
    // Teardown never evaluates sentries.
    assert!(!ops.iter().any(|op| op == "evaluate"));

    assert_eq!(terminated.case.state, CaseState::Terminated);
    for item in &terminated.plan_items {
        assert_eq!(item.state, PlanItemState::Terminated);
    }
}

#[test]
fn root_level_termination_terminates_each_child_exactly_once() {
    let doc = json!({
        "key": "flat-teardown",
        "planItems": [
            { "id": "a", "type": "task" },
            { "id": "b", "type": "task" }
        ]
    });
    let (_, engine) = setup(&[("flat-teardown.case.json", doc)]);
    let definition_id = case_definition_id(&engine, "flat-teardown");

    let started = engine.start_case(&definition_id, Map::new()).unwrap();
    assert_eq!(state_of(&started, "a"), PlanItemState::Active);
    assert_eq!(state_of(&started, "b"), PlanItemState::Active);

    let terminated = engine.terminate_case(&started.case.id).unwrap();
    let ops = trace(&terminated);
    // One terminate per child, nothing else, and no sentry passes.
    assert_eq!(ops.len(), 3);
    assert_eq!(ops[0], "terminate-case");
    let mut tail: Vec<&str> = ops[1..].iter().map(String::as_str).collect();
    tail.sort_unstable();
    assert_eq!(tail, ["terminate:a", "terminate:b"]);
    assert!(!ops.iter().any(|op| op == "evaluate"));

    assert_eq!(terminated.case.state, CaseState::Terminated);
    for item in &terminated.plan_items {
        assert_eq!(item.state, PlanItemState::Terminated);
    }
}

// ──────────────────────────────────────────────
// Repetition
// ──────────────────────────────────────────────

fn repeat_case() -> Value {
    json!({
        "key": "repeat",
        "planItems": [
            { "id": "R", "type": "task", "repetition": {
                "condition": { "equals": { "variable": "again", "value": true } }
            }}
        ]
    })
}

#[test]
fn repetition_re_arms_and_restarts_one_sibling() {
    let (_, engine) = setup(&[("repeat.case.json", repeat_case())]);
    let definition_id = case_definition_id(&engine, "repeat");

    let started = engine
        .start_case(&definition_id, vars(&[("again", json!(true))]))
        .unwrap();
    let completed = engine
        .complete_plan_item(&started.case.id, &instance_id(&started, "R"))
        .unwrap();

    // A criteria-less item never waits in available, so the re-armed
    // sibling starts the same way the first instance did at case start.
    assert_eq!(trace(&completed), vec!["complete:R", "activate:R", "evaluate"]);
    let instances: Vec<_> = completed
        .plan_items
        .iter()
        .filter(|item| item.plan_item_definition_id == "R")
        .collect();
    assert_eq!(instances.len(), 2);
    assert!(instances
        .iter()
        .any(|i| i.state == PlanItemState::Completed && i.repetition_counter == 1));
    assert!(instances
        .iter()
        .any(|i| i.state == PlanItemState::Active && i.repetition_counter == 2));
    // The running sibling keeps the case open.
    assert_eq!(completed.case.state, CaseState::Active);
}

#[test]
fn repetition_loop_closes_once_the_condition_drops() {
    let (_, engine) = setup(&[("repeat.case.json", repeat_case())]);
    let definition_id = case_definition_id(&engine, "repeat");

    let started = engine
        .start_case(&definition_id, vars(&[("again", json!(true))]))
        .unwrap();
    let case_id = started.case.id.clone();
    let first_round = engine
        .complete_plan_item(&case_id, &instance_id(&started, "R"))
        .unwrap();
    let sibling_id = first_round
        .plan_items
        .iter()
        .find(|item| item.repetition_counter == 2)
        .map(|item| item.id.clone())
        .unwrap();

    engine
        .set_variables(&case_id, vars(&[("again", json!(false))]))
        .unwrap();
    let second_round = engine.complete_plan_item(&case_id, &sibling_id).unwrap();

    // No third instance; the loop is over and the case completes.
    assert_eq!(
        trace(&second_round),
        vec!["complete:R", "evaluate", "complete-case"]
    );
    assert_eq!(second_round.plan_items.len(), 2);
    assert_eq!(second_round.case.state, CaseState::Completed);
}

#[test]
fn guarded_repetition_siblings_wait_for_their_entry_criteria() {
    let doc = json!({
        "key": "guarded-repeat",
        "planItems": [
            { "id": "R", "type": "task",
              "entryCriteria": [
                  { "condition": { "equals": { "variable": "go", "value": true } } }
              ],
              "repetition": { "condition": { "literal": true } }
            }
        ]
    });
    let (_, engine) = setup(&[("guarded-repeat.case.json", doc)]);
    let definition_id = case_definition_id(&engine, "guarded-repeat");

    let started = engine
        .start_case(&definition_id, vars(&[("go", json!(true))]))
        .unwrap();
    assert_eq!(state_of(&started, "R"), PlanItemState::Active);
    let case_id = started.case.id.clone();

    engine
        .set_variables(&case_id, vars(&[("go", json!(false))]))
        .unwrap();
    let completed = engine
        .complete_plan_item(&case_id, &instance_id(&started, "R"))
        .unwrap();

    // The sibling has entry criteria of its own, so it arms but does not
    // start while the gate is closed.
    let sibling = completed
        .plan_items
        .iter()
        .find(|item| item.repetition_counter == 2)
        .unwrap();
    assert_eq!(sibling.state, PlanItemState::Available);
    assert!(!trace(&completed).iter().any(|op| op.starts_with("activate:")));
    assert_eq!(completed.case.state, CaseState::Active);

    let reopened = engine
        .set_variables(&case_id, vars(&[("go", json!(true))]))
        .unwrap();
    assert_eq!(
        reopened
            .plan_items
            .iter()
            .find(|item| item.repetition_counter == 2)
            .unwrap()
            .state,
        PlanItemState::Active
    );
}

#[test]
fn repetition_condition_false_means_no_re_arm() {
    let (_, engine) = setup(&[("repeat.case.json", repeat_case())]);
    let definition_id = case_definition_id(&engine, "repeat");

    let started = engine
        .start_case(&definition_id, vars(&[("again", json!(false))]))
        .unwrap();
    let completed = engine
        .complete_plan_item(&started.case.id, &instance_id(&started, "R"))
        .unwrap();

    assert_eq!(
        trace(&completed),
        vec!["complete:R", "evaluate", "complete-case"]
    );
    assert_eq!(completed.plan_items.len(), 1);
    assert_eq!(completed.case.state, CaseState::Completed);
}

// ──────────────────────────────────────────────
// Manual activation
// ──────────────────────────────────────────────

#[test]
fn manually_activated_items_pause_in_enabled_until_triggered() {
    let doc = json!({
        "key": "manual",
        "planItems": [
            { "id": "M", "type": "task", "manualActivation": true }
        ]
    });
    let (_, engine) = setup(&[("manual.case.json", doc)]);
    let definition_id = case_definition_id(&engine, "manual");

    let started = engine.start_case(&definition_id, Map::new()).unwrap();
    assert_eq!(state_of(&started, "M"), PlanItemState::Enabled);

    let case_id = started.case.id.clone();
    let item_id = instance_id(&started, "M");

    // Completing an enabled item is an illegal transition.
    let err = engine.complete_plan_item(&case_id, &item_id).unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation { .. }));

    let triggered = engine.trigger_plan_item(&case_id, &item_id).unwrap();
    assert_eq!(state_of(&triggered, "M"), PlanItemState::Active);

    let done = engine.complete_plan_item(&case_id, &item_id).unwrap();
    assert_eq!(done.case.state, CaseState::Completed);
}

// ──────────────────────────────────────────────
// Exit sentries and unsatisfiable pruning
// ──────────────────────────────────────────────

fn withdrawal_case() -> Value {
    json!({
        "key": "withdrawal",
        "planItems": [
            { "id": "cancel", "type": "eventListener" },
            { "id": "work", "type": "task", "exitCriteria": [
                { "onParts": [{ "source": "cancel", "event": "occur" }] }
            ]},
            { "id": "wrapup", "type": "task", "entryCriteria": [
                { "onParts": [{ "source": "work", "event": "complete" }] }
            ]}
        ]
    })
}

#[test]
fn exit_sentry_withdraws_and_prunes_dependents() {
    let (_, engine) = setup(&[("withdrawal.case.json", withdrawal_case())]);
    let definition_id = case_definition_id(&engine, "withdrawal");

    let started = engine.start_case(&definition_id, Map::new()).unwrap();
    // The event listener waits for an external occurrence.
    assert_eq!(state_of(&started, "cancel"), PlanItemState::Available);
    assert_eq!(state_of(&started, "work"), PlanItemState::Active);
    assert_eq!(state_of(&started, "wrapup"), PlanItemState::Available);

    let occurred = engine
        .occur_plan_item(&started.case.id, &instance_id(&started, "cancel"))
        .unwrap();
    // work exits; wrapup's entry criteria can never hold once work exited,
    // so the case completes with wrapup exited as well.
    assert_eq!(state_of(&occurred, "cancel"), PlanItemState::Occurred);
    assert_eq!(state_of(&occurred, "work"), PlanItemState::Exited);
    assert_eq!(state_of(&occurred, "wrapup"), PlanItemState::Exited);
    assert_eq!(occurred.case.state, CaseState::Completed);

    let ops = trace(&occurred);
    assert_eq!(ops.first().map(String::as_str), Some("occur:cancel"));
    assert!(ops.contains(&"exit:work".to_string()));
    assert!(ops.contains(&"exit:wrapup".to_string()));
    assert!(ops.contains(&"complete-case".to_string()));
}

// ──────────────────────────────────────────────
// Condition-gated sentries and variables
// ──────────────────────────────────────────────

#[test]
fn variable_change_re_evaluates_condition_gated_sentries() {
    let doc = json!({
        "key": "gated",
        "planItems": [
            { "id": "A", "type": "task" },
            { "id": "B", "type": "task", "entryCriteria": [
                { "condition": { "equals": { "variable": "ok", "value": true } } }
            ]}
        ]
    });
    let (_, engine) = setup(&[("gated.case.json", doc)]);
    let definition_id = case_definition_id(&engine, "gated");

    let started = engine
        .start_case(&definition_id, vars(&[("ok", json!(false))]))
        .unwrap();
    assert_eq!(state_of(&started, "B"), PlanItemState::Available);

    let updated = engine
        .set_variables(&started.case.id, vars(&[("ok", json!(true))]))
        .unwrap();
    assert_eq!(state_of(&updated, "B"), PlanItemState::Active);
}

// ──────────────────────────────────────────────
// Rollback
// ──────────────────────────────────────────────

#[test]
fn evaluation_failure_rolls_back_the_whole_unit_of_work() {
    let doc = json!({
        "key": "broken",
        "planItems": [
            { "id": "A", "type": "task" },
            { "id": "B", "type": "task", "entryCriteria": [{
                "onParts": [{ "source": "A", "event": "complete" }],
                "condition": { "equals": { "variable": "missing", "value": true } }
            }]}
        ]
    });
    let (storage, engine) = setup(&[("broken.case.json", doc)]);
    let definition_id = case_definition_id(&engine, "broken");

    let started = engine.start_case(&definition_id, Map::new()).unwrap();
    let case_id = started.case.id.clone();
    let item_id = instance_id(&started, "A");

    // The completion itself is legal, but the criteria pass it triggers
    // hits an undefined variable. Nothing may be committed, not even the
    // completion.
    let err = engine.complete_plan_item(&case_id, &item_id).unwrap_err();
    assert!(matches!(err, EngineError::Evaluation { .. }));

    let persisted = storage.find_plan_item_instances(&case_id).unwrap();
    let a = persisted.iter().find(|item| item.id == item_id).unwrap();
    assert_eq!(a.state, PlanItemState::Active);
}

// ──────────────────────────────────────────────
// Suspension and deletion
// ──────────────────────────────────────────────

#[test]
fn suspended_cases_reject_triggers_until_resumed() {
    let (_, engine) = setup(&[("chain.case.json", chain_case())]);
    let definition_id = case_definition_id(&engine, "chain");

    let started = engine.start_case(&definition_id, Map::new()).unwrap();
    let case_id = started.case.id.clone();
    let item_id = instance_id(&started, "A");

    let suspended = engine.suspend_case(&case_id).unwrap();
    assert_eq!(suspended.state, CaseState::Suspended);

    // Suspending twice is illegal.
    let err = engine.suspend_case(&case_id).unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation { .. }));

    let resumed = engine.resume_case(&case_id).unwrap();
    assert_eq!(resumed.case.state, CaseState::Active);

    let done = engine.complete_plan_item(&case_id, &item_id).unwrap();
    assert_eq!(state_of(&done, "B"), PlanItemState::Active);
}

#[test]
fn deleting_a_case_removes_it_and_its_plan_items() {
    let (storage, engine) = setup(&[("chain.case.json", chain_case())]);
    let definition_id = case_definition_id(&engine, "chain");

    let started = engine.start_case(&definition_id, Map::new()).unwrap();
    let case_id = started.case.id.clone();

    engine.delete_case_instance(&case_id).unwrap();
    assert!(storage.find_case_instance(&case_id).unwrap().is_none());
    assert!(storage.find_plan_item_instances(&case_id).unwrap().is_empty());

    let err = engine.delete_case_instance(&case_id).unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

// ──────────────────────────────────────────────
// Nested stages
// ──────────────────────────────────────────────

#[test]
fn completing_all_stage_children_completes_the_stage_then_the_case() {
    let doc = json!({
        "key": "nested",
        "planItems": [
            { "id": "S", "type": "stage", "children": [
                { "id": "inner", "type": "task" }
            ]},
            { "id": "after", "type": "task", "entryCriteria": [
                { "onParts": [{ "source": "S", "event": "complete" }] }
            ]}
        ]
    });
    let (_, engine) = setup(&[("nested.case.json", doc)]);
    let definition_id = case_definition_id(&engine, "nested");

    let started = engine.start_case(&definition_id, Map::new()).unwrap();
    let case_id = started.case.id.clone();

    let after_inner = engine
        .complete_plan_item(&case_id, &instance_id(&started, "inner"))
        .unwrap();
    // Stage completion satisfies the downstream entry sentry.
    assert_eq!(state_of(&after_inner, "S"), PlanItemState::Completed);
    assert_eq!(state_of(&after_inner, "after"), PlanItemState::Active);
    let ops = trace(&after_inner);
    assert!(ops.contains(&"complete:S".to_string()));
    assert!(ops.contains(&"activate:after".to_string()));

    let done = engine
        .complete_plan_item(&case_id, &instance_id(&after_inner, "after"))
        .unwrap();
    assert_eq!(done.case.state, CaseState::Completed);
}
