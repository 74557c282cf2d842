use docket_model::ConditionError;
use docket_storage::{PlanItemState, StorageError};

/// All errors surfaced by the Docket engine.
///
/// Lock contention is deliberately absent: a worker that cannot claim a
/// case simply skips it (`LockManager::try_lock` returns `Ok(false)`).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An unknown or deleted definition, deployment, case, or plan item id.
    /// Distinct from transient failures so callers can tell "doesn't exist"
    /// apart from "try again".
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A programming or configuration defect: an illegal lifecycle
    /// transition was attempted, or a deployer failed to populate the cache
    /// entry it was responsible for. Aborts the current unit of work.
    #[error("invariant violation: {message}")]
    InvariantViolation { message: String },

    /// A sentry or repetition condition failed to evaluate. Aborts the
    /// whole unit of work; cascading transitions are all-or-nothing.
    #[error("evaluation failure: {message}")]
    Evaluation { message: String },

    /// A deployment resource could not be parsed into a definition.
    #[error("invalid definition resource '{resource}': {message}")]
    Definition { resource: String, message: String },

    /// A storage backend failure.
    #[error(transparent)]
    Storage(StorageError),
}

impl EngineError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        EngineError::InvariantViolation {
            message: message.into(),
        }
    }

    pub(crate) fn illegal_transition(
        plan_item_instance_id: &str,
        from: PlanItemState,
        to: PlanItemState,
    ) -> Self {
        EngineError::InvariantViolation {
            message: format!(
                "illegal transition {:?} -> {:?} on plan item instance '{}'",
                from, to, plan_item_instance_id
            ),
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        // Missing-entity storage results keep their NotFound identity so
        // callers never have to unwrap backend errors to spot them.
        match err {
            StorageError::CaseNotFound { case_id } => {
                EngineError::not_found("case instance", case_id)
            }
            StorageError::PlanItemNotFound { plan_item_id } => {
                EngineError::not_found("plan item instance", plan_item_id)
            }
            StorageError::DeploymentNotFound { deployment_id } => {
                EngineError::not_found("deployment", deployment_id)
            }
            other => EngineError::Storage(other),
        }
    }
}

impl From<ConditionError> for EngineError {
    fn from(err: ConditionError) -> Self {
        EngineError::Evaluation {
            message: err.to_string(),
        }
    }
}
