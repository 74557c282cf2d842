//! In-memory storage backend.
//!
//! A complete [`CaseStorage`] implementation over a single mutex, used as
//! the reference backend in engine tests. It additionally counts resource
//! reads so cache tests can assert that a warm definition cache performs no
//! further resource loads.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{
    CaseInstanceRecord, ChangeSet, DefinitionKind, DefinitionRecord, DeploymentRecord,
    PlanItemInstanceRecord, ResourceRecord,
};
use crate::traits::CaseStorage;

#[derive(Default)]
struct Inner {
    cases: BTreeMap<String, CaseInstanceRecord>,
    plan_items: BTreeMap<String, PlanItemInstanceRecord>,
    deployments: BTreeMap<String, DeploymentRecord>,
    resources: BTreeMap<String, ResourceRecord>,
    definitions: BTreeMap<String, DefinitionRecord>,
}

/// Mutex-guarded in-memory backend.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
    resource_reads: AtomicUsize,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `find_resources_by_deployment` calls served so far.
    pub fn resource_read_count(&self) -> usize {
        self.resource_reads.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Backend("storage mutex poisoned".to_string()))
    }
}

impl CaseStorage for InMemoryStorage {
    fn find_case_instance(
        &self,
        case_id: &str,
    ) -> Result<Option<CaseInstanceRecord>, StorageError> {
        Ok(self.lock()?.cases.get(case_id).cloned())
    }

    fn find_plan_item_instances(
        &self,
        case_id: &str,
    ) -> Result<Vec<PlanItemInstanceRecord>, StorageError> {
        Ok(self
            .lock()?
            .plan_items
            .values()
            .filter(|item| item.case_instance_id == case_id)
            .cloned()
            .collect())
    }

    fn apply_change_set(&self, changes: ChangeSet) -> Result<(), StorageError> {
        let mut inner = self.lock()?;

        // Validate everything before mutating anything: the change set is
        // all-or-nothing.
        for case in &changes.case_inserts {
            if inner.cases.contains_key(&case.id) {
                return Err(StorageError::AlreadyExists {
                    kind: "case instance",
                    id: case.id.clone(),
                });
            }
        }
        for case in &changes.case_updates {
            if !inner.cases.contains_key(&case.id) {
                return Err(StorageError::CaseNotFound {
                    case_id: case.id.clone(),
                });
            }
        }
        for item in &changes.plan_item_inserts {
            if inner.plan_items.contains_key(&item.id) {
                return Err(StorageError::AlreadyExists {
                    kind: "plan item instance",
                    id: item.id.clone(),
                });
            }
        }
        for item in &changes.plan_item_updates {
            if !inner.plan_items.contains_key(&item.id) {
                return Err(StorageError::PlanItemNotFound {
                    plan_item_id: item.id.clone(),
                });
            }
        }

        for case in changes.case_inserts {
            inner.cases.insert(case.id.clone(), case);
        }
        for case in changes.case_updates {
            // Lock columns are owned by the lock methods, not by change sets.
            let (owner, expires) = inner
                .cases
                .get(&case.id)
                .map(|c| (c.lock_owner.clone(), c.lock_expires_at))
                .unwrap_or((None, None));
            let mut case = case;
            case.lock_owner = owner;
            case.lock_expires_at = expires;
            inner.cases.insert(case.id.clone(), case);
        }
        for item in changes.plan_item_inserts {
            inner.plan_items.insert(item.id.clone(), item);
        }
        for item in changes.plan_item_updates {
            inner.plan_items.insert(item.id.clone(), item);
        }
        Ok(())
    }

    fn delete_case_instance(&self, case_id: &str) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if inner.cases.remove(case_id).is_none() {
            return Err(StorageError::CaseNotFound {
                case_id: case_id.to_string(),
            });
        }
        inner
            .plan_items
            .retain(|_, item| item.case_instance_id != case_id);
        Ok(())
    }

    fn update_lock(
        &self,
        case_id: &str,
        owner: &str,
        expires_at: OffsetDateTime,
    ) -> Result<bool, StorageError> {
        let mut inner = self.lock()?;
        let case = inner
            .cases
            .get_mut(case_id)
            .ok_or_else(|| StorageError::CaseNotFound {
                case_id: case_id.to_string(),
            })?;

        let now = OffsetDateTime::now_utc();
        match (&case.lock_owner, case.lock_expires_at) {
            // Held by someone else and not expired: skip.
            (Some(current), Some(expiry)) if current != owner && expiry > now => Ok(false),
            _ => {
                case.lock_owner = Some(owner.to_string());
                case.lock_expires_at = Some(expires_at);
                Ok(true)
            }
        }
    }

    fn clear_lock(&self, case_id: &str) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if let Some(case) = inner.cases.get_mut(case_id) {
            case.lock_owner = None;
            case.lock_expires_at = None;
        }
        Ok(())
    }

    fn clear_all_locks(&self, owner: &str) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        for case in inner.cases.values_mut() {
            if case.lock_owner.as_deref() == Some(owner) {
                case.lock_owner = None;
                case.lock_expires_at = None;
            }
        }
        Ok(())
    }

    fn insert_deployment(
        &self,
        deployment: DeploymentRecord,
        resources: Vec<ResourceRecord>,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if inner.deployments.contains_key(&deployment.id) {
            return Err(StorageError::AlreadyExists {
                kind: "deployment",
                id: deployment.id.clone(),
            });
        }
        inner.deployments.insert(deployment.id.clone(), deployment);
        for resource in resources {
            inner.resources.insert(resource.id.clone(), resource);
        }
        Ok(())
    }

    fn find_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Option<DeploymentRecord>, StorageError> {
        Ok(self.lock()?.deployments.get(deployment_id).cloned())
    }

    fn find_resources_by_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<ResourceRecord>, StorageError> {
        self.resource_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lock()?
            .resources
            .values()
            .filter(|r| r.deployment_id == deployment_id)
            .cloned()
            .collect())
    }

    fn delete_deployment(&self, deployment_id: &str) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if inner.deployments.remove(deployment_id).is_none() {
            return Err(StorageError::DeploymentNotFound {
                deployment_id: deployment_id.to_string(),
            });
        }
        inner
            .resources
            .retain(|_, r| r.deployment_id != deployment_id);
        inner
            .definitions
            .retain(|_, d| d.deployment_id != deployment_id);
        Ok(())
    }

    fn insert_definition(&self, definition: DefinitionRecord) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        if inner.definitions.contains_key(&definition.id) {
            return Err(StorageError::AlreadyExists {
                kind: "definition",
                id: definition.id.clone(),
            });
        }
        inner.definitions.insert(definition.id.clone(), definition);
        Ok(())
    }

    fn find_definition(
        &self,
        kind: DefinitionKind,
        definition_id: &str,
    ) -> Result<Option<DefinitionRecord>, StorageError> {
        Ok(self
            .lock()?
            .definitions
            .get(definition_id)
            .filter(|d| d.kind == kind)
            .cloned())
    }

    fn find_latest_definition(
        &self,
        kind: DefinitionKind,
        key: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<DefinitionRecord>, StorageError> {
        Ok(self
            .lock()?
            .definitions
            .values()
            .filter(|d| d.kind == kind && d.key == key && d.tenant_id.as_deref() == tenant_id)
            .max_by_key(|d| d.version)
            .cloned())
    }

    fn find_definitions_by_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<DefinitionRecord>, StorageError> {
        Ok(self
            .lock()?
            .definitions
            .values()
            .filter(|d| d.deployment_id == deployment_id)
            .cloned()
            .collect())
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
