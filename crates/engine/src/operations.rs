//! Agenda operation execution.
//!
//! Every operation mutates the working set only through checked lifecycle
//! transitions and stages follow-up operations at the agenda tail. The
//! drain loop in [`crate::engine`] pops and executes until the agenda is
//! empty; any error aborts the unit of work with all staged mutations.

use docket_model::{eval_condition, CaseDefinition, PlanItemModel};
use docket_storage::{CaseState, PlanItemInstanceRecord, PlanItemState};

use crate::agenda::{Agenda, LifecycleEvent, Operation};
use crate::criteria;
use crate::error::EngineError;
use crate::instance::{new_instance_id, CaseWorkingSet};
use crate::state::{check_case_transition, check_plan_item_transition};

/// Execute one agenda operation against the working set.
pub(crate) fn execute(
    operation: &Operation,
    definition: &CaseDefinition,
    working_set: &mut CaseWorkingSet,
    agenda: &mut Agenda,
) -> Result<(), EngineError> {
    tracing::trace!(operation = ?operation, "executing agenda operation");
    match operation {
        Operation::InitPlanModel => {
            criteria::instantiate_scope(definition, working_set, None, agenda)?;
            Ok(())
        }
        Operation::InitStage { stage_instance_id } => {
            init_stage(definition, working_set, agenda, stage_instance_id)
        }
        Operation::EvaluateCriteria { event } => {
            evaluate_criteria(definition, working_set, agenda, event.as_ref())
        }
        Operation::Activate {
            plan_item_instance_id,
        } => activate(definition, working_set, agenda, plan_item_instance_id),
        Operation::Trigger {
            plan_item_instance_id,
        } => trigger(definition, working_set, agenda, plan_item_instance_id),
        Operation::Complete {
            plan_item_instance_id,
        } => complete(definition, working_set, agenda, plan_item_instance_id),
        Operation::Occur {
            plan_item_instance_id,
        } => occur(working_set, agenda, plan_item_instance_id),
        Operation::Exit {
            plan_item_instance_id,
        } => exit(definition, working_set, agenda, plan_item_instance_id),
        Operation::Terminate {
            plan_item_instance_id,
        } => terminate(definition, working_set, agenda, plan_item_instance_id),
        Operation::CompleteCase => complete_case(working_set),
        Operation::TerminateCase { manual } => terminate_case(working_set, agenda, *manual),
    }
}

fn require_item<'a>(
    working_set: &'a CaseWorkingSet,
    plan_item_instance_id: &str,
) -> Result<&'a PlanItemInstanceRecord, EngineError> {
    working_set
        .item(plan_item_instance_id)
        .ok_or_else(|| EngineError::not_found("plan item instance", plan_item_instance_id))
}

fn require_model<'a>(
    definition: &'a CaseDefinition,
    item: &PlanItemInstanceRecord,
) -> Result<&'a PlanItemModel, EngineError> {
    definition
        .find_item(&item.plan_item_definition_id)
        .ok_or_else(|| {
            EngineError::invariant(format!(
                "plan item instance '{}' references unknown model '{}'",
                item.id, item.plan_item_definition_id
            ))
        })
}

fn init_stage(
    definition: &CaseDefinition,
    working_set: &mut CaseWorkingSet,
    agenda: &mut Agenda,
    stage_instance_id: &str,
) -> Result<(), EngineError> {
    let item = require_item(working_set, stage_instance_id)?;
    let model = require_model(definition, item)?;
    if !model.item_type.is_stage() {
        return Err(EngineError::invariant(format!(
            "plan item instance '{}' is not a stage",
            stage_instance_id
        )));
    }
    let stage_definition_id = model.id.clone();
    criteria::instantiate_scope(
        definition,
        working_set,
        Some((&stage_definition_id, stage_instance_id)),
        agenda,
    )?;
    Ok(())
}

fn evaluate_criteria(
    definition: &CaseDefinition,
    working_set: &mut CaseWorkingSet,
    agenda: &mut Agenda,
    event: Option<&LifecycleEvent>,
) -> Result<(), EngineError> {
    if working_set.case().state != CaseState::Active {
        tracing::debug!(
            case_instance_id = %working_set.case().id,
            "skipping criteria pass on a closed case"
        );
        return Ok(());
    }
    let evaluation = criteria::evaluate_pass(definition, working_set, agenda, event)?;
    if evaluation.criteria_changed {
        // The staged transitions may satisfy further sentries; re-run after
        // they execute.
        agenda.enqueue_evaluate_criteria(None);
    } else {
        criteria::check_completion(definition, working_set, agenda)?;
    }
    Ok(())
}

fn activate(
    definition: &CaseDefinition,
    working_set: &mut CaseWorkingSet,
    agenda: &mut Agenda,
    plan_item_instance_id: &str,
) -> Result<(), EngineError> {
    let item = require_item(working_set, plan_item_instance_id)?;
    let from = item.state;
    let model = require_model(definition, item)?;
    let to = if model.manual_activation {
        PlanItemState::Enabled
    } else {
        PlanItemState::Active
    };
    let is_stage = model.item_type.is_stage();
    check_plan_item_transition(plan_item_instance_id, from, to)?;
    working_set.set_item_state(plan_item_instance_id, to);
    if to == PlanItemState::Active && is_stage {
        agenda.enqueue(Operation::InitStage {
            stage_instance_id: plan_item_instance_id.to_string(),
        });
    }
    Ok(())
}

fn trigger(
    definition: &CaseDefinition,
    working_set: &mut CaseWorkingSet,
    agenda: &mut Agenda,
    plan_item_instance_id: &str,
) -> Result<(), EngineError> {
    let item = require_item(working_set, plan_item_instance_id)?;
    let from = item.state;
    let is_stage = require_model(definition, item)?.item_type.is_stage();
    if from != PlanItemState::Enabled {
        return Err(EngineError::invariant(format!(
            "plan item instance '{}' cannot be triggered from {:?}; only enabled items accept a trigger",
            plan_item_instance_id, from
        )));
    }
    check_plan_item_transition(plan_item_instance_id, from, PlanItemState::Active)?;
    working_set.set_item_state(plan_item_instance_id, PlanItemState::Active);
    if is_stage {
        agenda.enqueue(Operation::InitStage {
            stage_instance_id: plan_item_instance_id.to_string(),
        });
    }
    Ok(())
}

fn complete(
    definition: &CaseDefinition,
    working_set: &mut CaseWorkingSet,
    agenda: &mut Agenda,
    plan_item_instance_id: &str,
) -> Result<(), EngineError> {
    let item = require_item(working_set, plan_item_instance_id)?;
    let from = item.state;
    let repetition_counter = item.repetition_counter;
    let stage_instance_id = item.stage_instance_id.clone();
    let case_instance_id = item.case_instance_id.clone();
    let model = require_model(definition, item)?;
    let model_id = model.id.clone();
    let repetition = model.repetition.clone();
    let auto_start = model.entry_criteria.is_empty() && !model.item_type.is_occurrable();
    check_plan_item_transition(plan_item_instance_id, from, PlanItemState::Completed)?;
    if model.item_type.is_stage() {
        let blocking = working_set
            .children_of(Some(plan_item_instance_id))
            .iter()
            .filter(|child| !child.state.is_terminal())
            .count();
        if blocking > 0 {
            return Err(EngineError::invariant(format!(
                "stage instance '{}' cannot complete with {} non-terminal children",
                plan_item_instance_id, blocking
            )));
        }
    }
    working_set.set_item_state(plan_item_instance_id, PlanItemState::Completed);

    if let Some(rule) = repetition {
        if eval_condition(&rule.condition, working_set.variables())? {
            let sibling_id = new_instance_id();
            let sibling = PlanItemInstanceRecord {
                id: sibling_id.clone(),
                case_instance_id,
                stage_instance_id,
                plan_item_definition_id: model_id.clone(),
                state: PlanItemState::Available,
                repetition_counter: repetition_counter + 1,
            };
            tracing::debug!(
                plan_item_definition_id = %model_id,
                repetition_counter = sibling.repetition_counter,
                "repetition re-armed a new instance"
            );
            working_set.add_item(sibling);
            // Criteria-less items never wait in available; start the new
            // instance the same way scope instantiation would. Guarded
            // siblings wait for their entry criteria like any other item.
            if auto_start {
                agenda.enqueue(Operation::Activate {
                    plan_item_instance_id: sibling_id,
                });
            }
        }
    }

    agenda.enqueue_evaluate_criteria(Some(LifecycleEvent {
        plan_item_instance_id: plan_item_instance_id.to_string(),
        state: PlanItemState::Completed,
    }));
    Ok(())
}

fn occur(
    working_set: &mut CaseWorkingSet,
    agenda: &mut Agenda,
    plan_item_instance_id: &str,
) -> Result<(), EngineError> {
    let from = require_item(working_set, plan_item_instance_id)?.state;
    check_plan_item_transition(plan_item_instance_id, from, PlanItemState::Occurred)?;
    working_set.set_item_state(plan_item_instance_id, PlanItemState::Occurred);
    agenda.enqueue_evaluate_criteria(Some(LifecycleEvent {
        plan_item_instance_id: plan_item_instance_id.to_string(),
        state: PlanItemState::Occurred,
    }));
    Ok(())
}

fn exit(
    definition: &CaseDefinition,
    working_set: &mut CaseWorkingSet,
    agenda: &mut Agenda,
    plan_item_instance_id: &str,
) -> Result<(), EngineError> {
    let item = require_item(working_set, plan_item_instance_id)?;
    let from = item.state;
    let is_stage = require_model(definition, item)?.item_type.is_stage();
    check_plan_item_transition(plan_item_instance_id, from, PlanItemState::Exited)?;
    working_set.set_item_state(plan_item_instance_id, PlanItemState::Exited);
    if is_stage {
        cascade(working_set, agenda, plan_item_instance_id, |id| {
            Operation::Exit {
                plan_item_instance_id: id,
            }
        });
    }
    agenda.enqueue_evaluate_criteria(Some(LifecycleEvent {
        plan_item_instance_id: plan_item_instance_id.to_string(),
        state: PlanItemState::Exited,
    }));
    Ok(())
}

fn terminate(
    definition: &CaseDefinition,
    working_set: &mut CaseWorkingSet,
    agenda: &mut Agenda,
    plan_item_instance_id: &str,
) -> Result<(), EngineError> {
    let item = require_item(working_set, plan_item_instance_id)?;
    let from = item.state;
    let is_stage = require_model(definition, item)?.item_type.is_stage();
    check_plan_item_transition(plan_item_instance_id, from, PlanItemState::Terminated)?;
    working_set.set_item_state(plan_item_instance_id, PlanItemState::Terminated);
    if is_stage {
        cascade(working_set, agenda, plan_item_instance_id, |id| {
            Operation::Terminate {
                plan_item_instance_id: id,
            }
        });
    }
    // No criteria pass: termination is a teardown, it never triggers
    // sentry-driven activations.
    Ok(())
}

/// Enqueue one operation per non-terminal child of a stage instance.
fn cascade(
    working_set: &CaseWorkingSet,
    agenda: &mut Agenda,
    stage_instance_id: &str,
    make: impl Fn(String) -> Operation,
) {
    let children: Vec<String> = working_set
        .children_of(Some(stage_instance_id))
        .iter()
        .filter(|child| !child.state.is_terminal())
        .map(|child| child.id.clone())
        .collect();
    for id in children {
        agenda.enqueue(make(id));
    }
}

fn complete_case(working_set: &mut CaseWorkingSet) -> Result<(), EngineError> {
    let case_id = working_set.case().id.clone();
    check_case_transition(&case_id, working_set.case().state, CaseState::Completed)?;
    let live = working_set
        .all_items()
        .filter(|item| !item.state.is_terminal())
        .count();
    if live > 0 {
        return Err(EngineError::invariant(format!(
            "case instance '{}' cannot complete with {} non-terminal plan items",
            case_id, live
        )));
    }
    working_set.close_case(CaseState::Completed);
    tracing::info!(case_instance_id = %case_id, "case completed");
    Ok(())
}

fn terminate_case(
    working_set: &mut CaseWorkingSet,
    agenda: &mut Agenda,
    manual: bool,
) -> Result<(), EngineError> {
    let case_id = working_set.case().id.clone();
    check_case_transition(&case_id, working_set.case().state, CaseState::Terminated)?;
    working_set.close_case(CaseState::Terminated);
    let children: Vec<String> = working_set
        .children_of(None)
        .iter()
        .filter(|child| !child.state.is_terminal())
        .map(|child| child.id.clone())
        .collect();
    for id in children {
        agenda.enqueue(Operation::Terminate {
            plan_item_instance_id: id,
        });
    }
    tracing::info!(case_instance_id = %case_id, manual, "case terminated");
    Ok(())
}
