//! Sentry evaluation and scope instantiation.
//!
//! Each evaluation pass rescans the whole case: every available item with
//! entry criteria and every active item with exit criteria, in the root
//! scope and every active stage scope. The pass only STAGES transitions
//! (as agenda operations); it never mutates instance state itself, so the
//! set of states it reads is stable for the duration of the scan.
//!
//! Termination: a pass either changes nothing (and the drain ends after a
//! completion check) or moves at least one item toward a terminal state.
//! Items whose entry criteria are proven permanently unsatisfiable are
//! marked and skipped on later passes.

use docket_model::{
    eval_condition, CaseDefinition, Combinator, OnPart, PlanItemEvent, Sentry,
};
use docket_storage::{CaseState, PlanItemInstanceRecord, PlanItemState};

use crate::agenda::{Agenda, LifecycleEvent, Operation};
use crate::error::EngineError;
use crate::instance::{new_instance_id, CaseWorkingSet};

/// Outcome of one evaluation pass or scope instantiation.
#[derive(Debug, Default)]
pub(crate) struct CriteriaEvaluation {
    /// Number of activations (or occurrences) staged on the agenda.
    pub newly_active: usize,
    /// Whether the pass staged any transition at all. A true value means
    /// another pass must run before the completion check.
    pub criteria_changed: bool,
}

/// How far a sentry (or a criteria list) can still get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SentryStatus {
    Satisfied,
    /// Not satisfied now, but a future transition or variable change could
    /// still satisfy it.
    Pending,
    /// Can never be satisfied in this case instance: every source the
    /// on-parts wait on is already in a different terminal state.
    Unsatisfiable,
}

/// Create the plan item instances of a scope. `None` is the case root,
/// `Some((stage_definition_id, stage_instance_id))` a freshly activated
/// stage.
///
/// Items without entry criteria start immediately: tasks and stages get an
/// `Activate`, occurrable items stay available and wait for an external
/// occurrence. A criteria evaluation is queued when nothing started (the
/// scope may be empty or already completable) or when some new item carries
/// a condition-only sentry that could hold right away.
pub(crate) fn instantiate_scope(
    definition: &CaseDefinition,
    working_set: &mut CaseWorkingSet,
    scope: Option<(&str, &str)>,
    agenda: &mut Agenda,
) -> Result<CriteriaEvaluation, EngineError> {
    let (scope_definition_id, scope_instance_id) = match scope {
        Some((definition_id, instance_id)) => (Some(definition_id), Some(instance_id)),
        None => (None, None),
    };
    let models = definition.children_of(scope_definition_id).ok_or_else(|| {
        EngineError::invariant(format!(
            "'{}' is not a stage of case definition '{}'",
            scope_definition_id.unwrap_or("<root>"),
            definition.key
        ))
    })?;

    let mut evaluation = CriteriaEvaluation::default();
    let mut needs_pass = false;
    let mut created = Vec::with_capacity(models.len());
    for model in models {
        let record = PlanItemInstanceRecord {
            id: new_instance_id(),
            case_instance_id: working_set.case().id.clone(),
            stage_instance_id: scope_instance_id.map(str::to_string),
            plan_item_definition_id: model.id.clone(),
            state: PlanItemState::Available,
            repetition_counter: 1,
        };
        if model.entry_criteria.is_empty() {
            if !model.item_type.is_occurrable() {
                agenda.enqueue(Operation::Activate {
                    plan_item_instance_id: record.id.clone(),
                });
                evaluation.newly_active += 1;
            }
        } else if model
            .entry_criteria
            .iter()
            .any(|sentry| sentry.on_parts.is_empty())
        {
            needs_pass = true;
        }
        created.push(record);
    }
    for record in created {
        working_set.add_item(record);
    }

    evaluation.criteria_changed = evaluation.newly_active > 0;
    if evaluation.newly_active == 0 || needs_pass {
        agenda.enqueue_evaluate_criteria(None);
    }
    Ok(evaluation)
}

/// One evaluation pass over the whole case: the root scope and every active
/// stage scope. Stages activations, occurrences, and exits on the agenda;
/// marks items whose entry criteria can never hold.
pub(crate) fn evaluate_pass(
    definition: &CaseDefinition,
    working_set: &mut CaseWorkingSet,
    agenda: &mut Agenda,
    event: Option<&LifecycleEvent>,
) -> Result<CriteriaEvaluation, EngineError> {
    let mut evaluation = CriteriaEvaluation::default();
    if working_set.case().state != CaseState::Active {
        return Ok(evaluation);
    }
    if let Some(event) = event {
        tracing::trace!(
            plan_item_instance_id = %event.plan_item_instance_id,
            state = ?event.state,
            "criteria pass after lifecycle event"
        );
    }

    let mut scopes: Vec<Option<String>> = vec![None];
    for item in working_set.all_items() {
        if item.state != PlanItemState::Active {
            continue;
        }
        if let Some(model) = definition.find_item(&item.plan_item_definition_id) {
            if model.item_type.is_stage() {
                scopes.push(Some(item.id.clone()));
            }
        }
    }

    let mut activations: Vec<(String, bool)> = Vec::new();
    let mut exits: Vec<String> = Vec::new();
    let mut unsatisfiable: Vec<String> = Vec::new();
    for scope in &scopes {
        for child in working_set.children_of(scope.as_deref()) {
            let model = definition
                .find_item(&child.plan_item_definition_id)
                .ok_or_else(|| {
                    EngineError::invariant(format!(
                        "plan item instance '{}' references unknown model '{}'",
                        child.id, child.plan_item_definition_id
                    ))
                })?;
            match child.state {
                PlanItemState::Available
                    if !model.entry_criteria.is_empty()
                        && !working_set.is_entry_unsatisfiable(&child.id) =>
                {
                    match criteria_status(&model.entry_criteria, definition, working_set)? {
                        SentryStatus::Satisfied => {
                            activations.push((child.id.clone(), model.item_type.is_occurrable()));
                        }
                        SentryStatus::Unsatisfiable => unsatisfiable.push(child.id.clone()),
                        SentryStatus::Pending => {}
                    }
                }
                PlanItemState::Active if !model.exit_criteria.is_empty() => {
                    if criteria_status(&model.exit_criteria, definition, working_set)?
                        == SentryStatus::Satisfied
                    {
                        exits.push(child.id.clone());
                    }
                }
                _ => {}
            }
        }
    }

    for id in unsatisfiable {
        tracing::debug!(plan_item_instance_id = %id, "entry criteria unsatisfiable");
        working_set.mark_entry_unsatisfiable(&id);
    }
    evaluation.newly_active = activations.len();
    evaluation.criteria_changed = !activations.is_empty() || !exits.is_empty();
    for (id, occurrable) in activations {
        if occurrable {
            agenda.enqueue(Operation::Occur {
                plan_item_instance_id: id,
            });
        } else {
            agenda.enqueue(Operation::Activate {
                plan_item_instance_id: id,
            });
        }
    }
    for id in exits {
        agenda.enqueue(Operation::Exit {
            plan_item_instance_id: id,
        });
    }
    Ok(evaluation)
}

/// After a pass that changed nothing: complete every active stage whose
/// children are all done, then the case itself. Available children whose
/// entry criteria can never hold do not block completion; they are exited
/// just before their scope completes.
pub(crate) fn check_completion(
    definition: &CaseDefinition,
    working_set: &CaseWorkingSet,
    agenda: &mut Agenda,
) -> Result<(), EngineError> {
    let mut completable_stages: Vec<(String, Vec<String>)> = Vec::new();
    for item in working_set.all_items() {
        if item.state != PlanItemState::Active {
            continue;
        }
        let model = definition
            .find_item(&item.plan_item_definition_id)
            .ok_or_else(|| {
                EngineError::invariant(format!(
                    "plan item instance '{}' references unknown model '{}'",
                    item.id, item.plan_item_definition_id
                ))
            })?;
        if !model.item_type.is_stage() {
            continue;
        }
        if let Some(dead) = scope_done(working_set, Some(&item.id)) {
            completable_stages.push((item.id.clone(), dead));
        }
    }

    if !completable_stages.is_empty() {
        for (stage_instance_id, dead) in completable_stages {
            for id in dead {
                agenda.enqueue(Operation::Exit {
                    plan_item_instance_id: id,
                });
            }
            agenda.enqueue(Operation::Complete {
                plan_item_instance_id: stage_instance_id,
            });
        }
        return Ok(());
    }

    if let Some(dead) = scope_done(working_set, None) {
        for id in dead {
            agenda.enqueue(Operation::Exit {
                plan_item_instance_id: id,
            });
        }
        agenda.enqueue(Operation::CompleteCase);
    }
    Ok(())
}

/// `Some(dead_children)` when every child of the scope is terminal or
/// provably stuck; the returned ids are the stuck available children that
/// must be exited first. `None` when a live child still blocks the scope.
fn scope_done(working_set: &CaseWorkingSet, scope: Option<&str>) -> Option<Vec<String>> {
    let mut dead = Vec::new();
    for child in working_set.children_of(scope) {
        if child.state.is_terminal() {
            continue;
        }
        if child.state == PlanItemState::Available && working_set.is_entry_unsatisfiable(&child.id)
        {
            dead.push(child.id.clone());
            continue;
        }
        return None;
    }
    Some(dead)
}

/// Status of a criteria list: satisfied when ANY sentry is satisfied,
/// unsatisfiable only when EVERY sentry is unsatisfiable.
pub(crate) fn criteria_status(
    criteria: &[Sentry],
    definition: &CaseDefinition,
    working_set: &CaseWorkingSet,
) -> Result<SentryStatus, EngineError> {
    let mut all_unsatisfiable = !criteria.is_empty();
    for sentry in criteria {
        match sentry_status(sentry, definition, working_set)? {
            SentryStatus::Satisfied => return Ok(SentryStatus::Satisfied),
            SentryStatus::Pending => all_unsatisfiable = false,
            SentryStatus::Unsatisfiable => {}
        }
    }
    if all_unsatisfiable {
        Ok(SentryStatus::Unsatisfiable)
    } else {
        Ok(SentryStatus::Pending)
    }
}

fn sentry_status(
    sentry: &Sentry,
    definition: &CaseDefinition,
    working_set: &CaseWorkingSet,
) -> Result<SentryStatus, EngineError> {
    let parts = if sentry.on_parts.is_empty() {
        // Condition-only sentry: gated by the condition alone.
        SentryStatus::Satisfied
    } else {
        let statuses: Vec<SentryStatus> = sentry
            .on_parts
            .iter()
            .map(|part| on_part_status(part, definition, working_set))
            .collect();
        match sentry.combinator {
            Combinator::All => {
                if statuses.contains(&SentryStatus::Unsatisfiable) {
                    SentryStatus::Unsatisfiable
                } else if statuses.iter().all(|s| *s == SentryStatus::Satisfied) {
                    SentryStatus::Satisfied
                } else {
                    SentryStatus::Pending
                }
            }
            Combinator::Any => {
                if statuses.contains(&SentryStatus::Satisfied) {
                    SentryStatus::Satisfied
                } else if statuses.iter().all(|s| *s == SentryStatus::Unsatisfiable) {
                    SentryStatus::Unsatisfiable
                } else {
                    SentryStatus::Pending
                }
            }
        }
    };
    match parts {
        SentryStatus::Satisfied => match &sentry.condition {
            None => Ok(SentryStatus::Satisfied),
            // A false condition may still flip on a later variable change;
            // only the on-parts can prove a sentry dead.
            Some(condition) => {
                if eval_condition(condition, working_set.variables())? {
                    Ok(SentryStatus::Satisfied)
                } else {
                    Ok(SentryStatus::Pending)
                }
            }
        },
        other => Ok(other),
    }
}

/// On-part satisfaction is a pure function of current instance states: the
/// awaited events all correspond to terminal states of the source item.
fn on_part_status(
    part: &OnPart,
    definition: &CaseDefinition,
    working_set: &CaseWorkingSet,
) -> SentryStatus {
    let awaited = match part.event {
        PlanItemEvent::Complete => PlanItemState::Completed,
        PlanItemEvent::Occur => PlanItemState::Occurred,
        PlanItemEvent::Exit => PlanItemState::Exited,
        PlanItemEvent::Terminate => PlanItemState::Terminated,
    };
    let instances = working_set.instances_of(&part.source_ref);
    if instances.iter().any(|instance| instance.state == awaited) {
        return SentryStatus::Satisfied;
    }
    if instances.is_empty() {
        // The source lives in a scope that has not been instantiated yet.
        return SentryStatus::Pending;
    }
    if instances.iter().all(|instance| instance.state.is_terminal()) {
        // Every existing instance ended in some other terminal state. Unless
        // repetition can still create a fresh instance, the event will never
        // fire.
        let repeats = definition
            .find_item(&part.source_ref)
            .map(|model| model.repetition.is_some())
            .unwrap_or(false);
        if !repeats {
            return SentryStatus::Unsatisfiable;
        }
    }
    SentryStatus::Pending
}
