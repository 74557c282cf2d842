/// All errors that can be returned by a CaseStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No case instance with the given id.
    #[error("case instance not found: {case_id}")]
    CaseNotFound { case_id: String },

    /// No plan item instance with the given id.
    #[error("plan item instance not found: {plan_item_id}")]
    PlanItemNotFound { plan_item_id: String },

    /// No deployment with the given id.
    #[error("deployment not found: {deployment_id}")]
    DeploymentNotFound { deployment_id: String },

    /// A record with this id already exists.
    #[error("record already exists: {kind} {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
