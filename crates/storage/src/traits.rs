use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{
    CaseInstanceRecord, ChangeSet, DefinitionKind, DefinitionRecord, DeploymentRecord,
    PlanItemInstanceRecord, ResourceRecord,
};

/// The storage port consumed by the Docket engine.
///
/// ## Atomicity
///
/// Runtime mutations arrive as one [`ChangeSet`] per unit of work via
/// [`apply_change_set`](CaseStorage::apply_change_set). Implementations must
/// apply a change set atomically: other readers see all of it or none of it.
///
/// ## Locking contract
///
/// [`update_lock`](CaseStorage::update_lock) claims a case instance for a
/// worker by writing its owner id and an expiration timestamp. The claim
/// fails (returns `Ok(false)`) while a different owner holds a non-expired
/// lock; an expired foreign lock may be reclaimed. Clearing a lock is
/// explicit, idempotent, and must be safe for an instance the caller no
/// longer owns.
///
/// ## Thread safety
///
/// Implementations must be `Send + Sync + 'static`; many engine workers
/// share one storage handle.
pub trait CaseStorage: Send + Sync + 'static {
    // ── Runtime case state ────────────────────────────────────────────────

    fn find_case_instance(&self, case_id: &str)
        -> Result<Option<CaseInstanceRecord>, StorageError>;

    fn find_plan_item_instances(
        &self,
        case_id: &str,
    ) -> Result<Vec<PlanItemInstanceRecord>, StorageError>;

    /// Apply one unit of work's mutations atomically.
    ///
    /// Inserting an id that already exists or updating one that does not is
    /// an error, and the whole change set is rejected.
    fn apply_change_set(&self, changes: ChangeSet) -> Result<(), StorageError>;

    /// Delete a case instance and all of its plan item instances.
    fn delete_case_instance(&self, case_id: &str) -> Result<(), StorageError>;

    // ── Locking ───────────────────────────────────────────────────────────

    /// Claim the case for `owner` until `expires_at`. Returns `Ok(false)`
    /// when a different owner holds a non-expired lock (expected under
    /// contention, not an error). Re-claiming by the same owner refreshes
    /// the expiration.
    fn update_lock(
        &self,
        case_id: &str,
        owner: &str,
        expires_at: OffsetDateTime,
    ) -> Result<bool, StorageError>;

    /// Clear the lock on a case. Idempotent; clearing an unlocked case or
    /// one owned by someone else succeeds.
    fn clear_lock(&self, case_id: &str) -> Result<(), StorageError>;

    /// Clear every lock held by `owner` (worker shutdown / crash cleanup).
    fn clear_all_locks(&self, owner: &str) -> Result<(), StorageError>;

    // ── Deployments and resources ─────────────────────────────────────────

    /// Persist a deployment together with its immutable resources.
    fn insert_deployment(
        &self,
        deployment: DeploymentRecord,
        resources: Vec<ResourceRecord>,
    ) -> Result<(), StorageError>;

    fn find_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Option<DeploymentRecord>, StorageError>;

    fn find_resources_by_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<ResourceRecord>, StorageError>;

    /// Delete a deployment, its resources, and every definition record
    /// derived from it, as one cascade.
    fn delete_deployment(&self, deployment_id: &str) -> Result<(), StorageError>;

    // ── Definition records ────────────────────────────────────────────────

    fn insert_definition(&self, definition: DefinitionRecord) -> Result<(), StorageError>;

    fn find_definition(
        &self,
        kind: DefinitionKind,
        definition_id: &str,
    ) -> Result<Option<DefinitionRecord>, StorageError>;

    /// Highest version for (kind, key, tenant), or `None` when the key was
    /// never deployed for that tenant.
    fn find_latest_definition(
        &self,
        kind: DefinitionKind,
        key: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<DefinitionRecord>, StorageError>;

    fn find_definitions_by_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<DefinitionRecord>, StorageError>;
}
