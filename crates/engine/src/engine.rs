//! The engine facade: external triggers and the unit-of-work drain loop.
//!
//! Every trigger is one unit of work. The engine loads the case into a
//! working set, seeds a fresh agenda with one root operation, and drains it
//! to a fixpoint; the accumulated mutations then commit as a single atomic
//! change set. Any error during the drain discards the working set, so a
//! half-applied cascade can never be observed.

use std::sync::Arc;

use serde_json::{Map, Value};
use time::OffsetDateTime;

use docket_model::CaseDefinition;
use docket_storage::{CaseInstanceRecord, CaseState, CaseStorage, PlanItemInstanceRecord};

use crate::agenda::{Agenda, Operation};
use crate::deploy::DeploymentManager;
use crate::error::EngineError;
use crate::instance::{new_instance_id, CaseWorkingSet};
use crate::lock::LockManager;
use crate::operations;
use crate::state::check_case_transition;

/// Result of one trigger: the final case record, the final plan item
/// records, and the agenda operations executed in order.
#[derive(Debug)]
pub struct TriggerOutcome {
    pub case: CaseInstanceRecord,
    pub plan_items: Vec<PlanItemInstanceRecord>,
    pub operations: Vec<Operation>,
}

/// The Docket case engine.
///
/// Triggers do not claim the case lock themselves; a multi-worker setup
/// wraps trigger calls with [`LockManager::try_lock`] / `unlock` on the
/// manager exposed by [`locks`](CaseEngine::locks).
pub struct CaseEngine {
    storage: Arc<dyn CaseStorage>,
    deployments: DeploymentManager,
    locks: LockManager,
}

impl CaseEngine {
    /// Engine with a random worker identity and the default lock TTL.
    pub fn new(storage: Arc<dyn CaseStorage>) -> Self {
        let owner = format!("worker-{}", new_instance_id());
        Self::with_worker(storage, owner, LockManager::DEFAULT_TTL)
    }

    pub fn with_worker(
        storage: Arc<dyn CaseStorage>,
        owner: impl Into<String>,
        lock_ttl: time::Duration,
    ) -> Self {
        let locks = LockManager::new(storage.clone(), owner, lock_ttl);
        let deployments = DeploymentManager::new(storage.clone());
        Self {
            storage,
            deployments,
            locks,
        }
    }

    pub fn deployments(&self) -> &DeploymentManager {
        &self.deployments
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    // ── Case lifecycle triggers ───────────────────────────────────────────

    /// Start a case instance from a specific case definition id.
    pub fn start_case(
        &self,
        case_definition_id: &str,
        variables: Map<String, Value>,
    ) -> Result<TriggerOutcome, EngineError> {
        let cached = self.deployments.resolve_case_definition(case_definition_id)?;
        let case = CaseInstanceRecord {
            id: new_instance_id(),
            case_definition_id: cached.record.id.clone(),
            state: CaseState::Active,
            variables,
            lock_owner: None,
            lock_expires_at: None,
            started_at: OffsetDateTime::now_utc(),
            ended_at: None,
        };
        tracing::info!(
            case_instance_id = %case.id,
            case_definition_id = %cached.record.id,
            "starting case"
        );
        let working_set = CaseWorkingSet::for_new_case(case);
        self.drain(&cached.parsed, working_set, Operation::InitPlanModel)
    }

    /// Start a case instance from the latest version of a case key.
    pub fn start_case_latest(
        &self,
        key: &str,
        tenant_id: Option<&str>,
        variables: Map<String, Value>,
    ) -> Result<TriggerOutcome, EngineError> {
        let cached = self
            .deployments
            .resolve_latest_case_definition(key, tenant_id)?;
        self.start_case(&cached.record.id, variables)
    }

    /// Complete an active plan item (human task finished, etc.).
    pub fn complete_plan_item(
        &self,
        case_id: &str,
        plan_item_instance_id: &str,
    ) -> Result<TriggerOutcome, EngineError> {
        self.run_on_case(
            case_id,
            Operation::Complete {
                plan_item_instance_id: plan_item_instance_id.to_string(),
            },
        )
    }

    /// Start an enabled (manually activated) plan item.
    pub fn trigger_plan_item(
        &self,
        case_id: &str,
        plan_item_instance_id: &str,
    ) -> Result<TriggerOutcome, EngineError> {
        self.run_on_case(
            case_id,
            Operation::Trigger {
                plan_item_instance_id: plan_item_instance_id.to_string(),
            },
        )
    }

    /// Fire an available event listener from the outside.
    pub fn occur_plan_item(
        &self,
        case_id: &str,
        plan_item_instance_id: &str,
    ) -> Result<TriggerOutcome, EngineError> {
        self.run_on_case(
            case_id,
            Operation::Occur {
                plan_item_instance_id: plan_item_instance_id.to_string(),
            },
        )
    }

    /// Terminate a case and cascade to every non-terminal plan item.
    pub fn terminate_case(&self, case_id: &str) -> Result<TriggerOutcome, EngineError> {
        self.run_on_case(case_id, Operation::TerminateCase { manual: true })
    }

    /// Re-run sentry evaluation without a lifecycle event (used after
    /// out-of-band changes).
    pub fn evaluate_criteria(&self, case_id: &str) -> Result<TriggerOutcome, EngineError> {
        self.run_on_case(case_id, Operation::EvaluateCriteria { event: None })
    }

    /// Merge case variables and re-evaluate criteria: condition-gated
    /// sentries may become satisfied.
    pub fn set_variables(
        &self,
        case_id: &str,
        variables: Map<String, Value>,
    ) -> Result<TriggerOutcome, EngineError> {
        let (mut working_set, definition) = self.load_case(case_id)?;
        working_set.merge_variables(variables);
        self.drain(
            &definition.parsed,
            working_set,
            Operation::EvaluateCriteria { event: None },
        )
    }

    /// Suspend an active case. Triggers and criteria passes are inert until
    /// it resumes.
    pub fn suspend_case(&self, case_id: &str) -> Result<CaseInstanceRecord, EngineError> {
        let case = self
            .storage
            .find_case_instance(case_id)?
            .ok_or_else(|| EngineError::not_found("case instance", case_id))?;
        check_case_transition(case_id, case.state, CaseState::Suspended)?;
        let mut working_set = CaseWorkingSet::load(case, Vec::new());
        working_set.set_case_state(CaseState::Suspended);
        let (case, _, changes) = working_set.into_parts();
        self.storage.apply_change_set(changes)?;
        tracing::info!(case_instance_id = %case_id, "case suspended");
        Ok(case)
    }

    /// Resume a suspended case and run a criteria pass.
    pub fn resume_case(&self, case_id: &str) -> Result<TriggerOutcome, EngineError> {
        let (mut working_set, definition) = self.load_case(case_id)?;
        check_case_transition(case_id, working_set.case().state, CaseState::Active)?;
        working_set.set_case_state(CaseState::Active);
        self.drain(
            &definition.parsed,
            working_set,
            Operation::EvaluateCriteria { event: None },
        )
    }

    /// Delete a case instance and all of its plan item instances.
    pub fn delete_case_instance(&self, case_id: &str) -> Result<(), EngineError> {
        self.storage.delete_case_instance(case_id)?;
        tracing::info!(case_instance_id = %case_id, "case instance deleted");
        Ok(())
    }

    pub fn find_case_instance(
        &self,
        case_id: &str,
    ) -> Result<Option<CaseInstanceRecord>, EngineError> {
        Ok(self.storage.find_case_instance(case_id)?)
    }

    pub fn find_plan_item_instances(
        &self,
        case_id: &str,
    ) -> Result<Vec<PlanItemInstanceRecord>, EngineError> {
        Ok(self.storage.find_plan_item_instances(case_id)?)
    }

    // ── Decision and form services ────────────────────────────────────────

    /// Evaluate a decision table, first-hit policy. `Ok(None)` means no
    /// rule matched.
    pub fn evaluate_decision(
        &self,
        decision_definition_id: &str,
        inputs: &Map<String, Value>,
    ) -> Result<Option<Map<String, Value>>, EngineError> {
        let cached = self
            .deployments
            .resolve_decision_definition(decision_definition_id)?;
        let missing: Vec<&str> = cached
            .parsed
            .required_inputs
            .iter()
            .map(String::as_str)
            .filter(|name| !inputs.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::Evaluation {
                message: format!(
                    "decision '{}' is missing required inputs: {}",
                    cached.parsed.key,
                    missing.join(", ")
                ),
            });
        }
        Ok(cached.parsed.evaluate(inputs)?)
    }

    /// Evaluate the latest version of a decision key.
    pub fn evaluate_decision_latest(
        &self,
        key: &str,
        tenant_id: Option<&str>,
        inputs: &Map<String, Value>,
    ) -> Result<Option<Map<String, Value>>, EngineError> {
        let cached = self
            .deployments
            .resolve_latest_decision_definition(key, tenant_id)?;
        self.evaluate_decision(&cached.record.id, inputs)
    }

    /// Validate a form submission against its definition.
    pub fn validate_form_values(
        &self,
        form_definition_id: &str,
        values: &Map<String, Value>,
    ) -> Result<(), EngineError> {
        let cached = self.deployments.resolve_form_definition(form_definition_id)?;
        let missing = cached.parsed.missing_required(values);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Evaluation {
                message: format!(
                    "form '{}' is missing required fields: {}",
                    cached.parsed.key,
                    missing.join(", ")
                ),
            })
        }
    }

    // ── Unit of work ──────────────────────────────────────────────────────

    fn load_case(
        &self,
        case_id: &str,
    ) -> Result<
        (
            CaseWorkingSet,
            Arc<crate::deploy::CachedDefinition<CaseDefinition>>,
        ),
        EngineError,
    > {
        let case = self
            .storage
            .find_case_instance(case_id)?
            .ok_or_else(|| EngineError::not_found("case instance", case_id))?;
        let items = self.storage.find_plan_item_instances(case_id)?;
        let definition = self
            .deployments
            .resolve_case_definition(&case.case_definition_id)?;
        Ok((CaseWorkingSet::load(case, items), definition))
    }

    fn run_on_case(&self, case_id: &str, root: Operation) -> Result<TriggerOutcome, EngineError> {
        let (working_set, definition) = self.load_case(case_id)?;
        self.drain(&definition.parsed, working_set, root)
    }

    /// Drain one agenda to a fixpoint and commit the working set.
    fn drain(
        &self,
        definition: &CaseDefinition,
        mut working_set: CaseWorkingSet,
        root: Operation,
    ) -> Result<TriggerOutcome, EngineError> {
        let mut agenda = Agenda::new();
        agenda.enqueue(root);
        let mut journal = Vec::new();
        while let Some(operation) = agenda.pop() {
            operations::execute(&operation, definition, &mut working_set, &mut agenda)?;
            journal.push(operation);
        }
        let (case, plan_items, changes) = working_set.into_parts();
        if !changes.is_empty() {
            self.storage.apply_change_set(changes)?;
        }
        tracing::debug!(
            case_instance_id = %case.id,
            operations = journal.len(),
            "unit of work committed"
        );
        Ok(TriggerOutcome {
            case,
            plan_items,
            operations: journal,
        })
    }
}
