//! Deployment management and the definition cache.
//!
//! A deployment is an immutable bundle of definition resources. Deploying
//! persists the bundle, runs the deployer chain to parse each resource into
//! typed definitions, versions them per (kind, key, tenant), and populates
//! the in-memory caches. A cache miss later (another node, a restart)
//! re-runs the same chain against the persisted resources WITHOUT touching
//! version numbers: versioning happens exactly once, at deploy time.
//!
//! Concurrency: first resolution of a deployment is serialized per
//! deployment id, so concurrent misses on the same bundle run the deployer
//! chain once while resolutions of unrelated deployments proceed in
//! parallel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;

use docket_model::{
    case_from_resource, decisions_from_resource, form_from_resource, CaseDefinition,
    DecisionDefinition, FormDefinition, ModelError,
};
use docket_storage::{
    CaseStorage, DefinitionKind, DefinitionRecord, DeploymentRecord, ResourceRecord,
};

use crate::error::EngineError;
use crate::instance::new_instance_id;

const CASE_RESOURCE_SUFFIX: &str = ".case.json";
const DECISION_RESOURCE_SUFFIX: &str = ".decision.json";
const FORM_RESOURCE_SUFFIX: &str = ".form.json";

/// A parsed definition together with its persistent record.
#[derive(Debug)]
pub struct CachedDefinition<T> {
    pub record: DefinitionRecord,
    pub parsed: T,
}

/// Read-mostly cache of parsed definitions, keyed by definition id.
pub(crate) struct DefinitionCache<T> {
    entries: RwLock<HashMap<String, Arc<CachedDefinition<T>>>>,
}

impl<T> Default for DefinitionCache<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> DefinitionCache<T> {
    pub fn get(&self, definition_id: &str) -> Option<Arc<CachedDefinition<T>>> {
        self.entries.read().get(definition_id).cloned()
    }

    pub fn insert(&self, entry: CachedDefinition<T>) {
        self.entries
            .write()
            .insert(entry.record.id.clone(), Arc::new(entry));
    }

    pub fn evict(&self, definition_id: &str) {
        self.entries.write().remove(definition_id);
    }
}

/// The engine's definition caches, one per definition kind.
#[derive(Default)]
pub(crate) struct EngineCaches {
    pub cases: DefinitionCache<CaseDefinition>,
    pub decisions: DefinitionCache<DecisionDefinition>,
    pub forms: DefinitionCache<FormDefinition>,
}

impl EngineCaches {
    fn evict(&self, record: &DefinitionRecord) {
        match record.kind {
            DefinitionKind::Case => self.cases.evict(&record.id),
            DefinitionKind::Decision => self.decisions.evict(&record.id),
            DefinitionKind::Form => self.forms.evict(&record.id),
        }
    }
}

/// Context handed to each deployer in the chain.
pub(crate) struct DeploymentContext<'a> {
    pub deployment: &'a DeploymentRecord,
    pub resources: &'a [ResourceRecord],
    /// True at deploy time, false when a cache miss repopulates from
    /// persisted resources. Deployers assign versions and insert definition
    /// records only when true.
    pub is_new: bool,
    storage: &'a dyn CaseStorage,
    caches: &'a EngineCaches,
    /// Definition records already persisted for this deployment; consulted
    /// on the repopulation path instead of re-versioning.
    existing: Vec<DefinitionRecord>,
}

impl DeploymentContext<'_> {
    /// Produce (at deploy time) or look up (on repopulation) the definition
    /// record for one parsed definition.
    fn definition_record(
        &self,
        kind: DefinitionKind,
        key: &str,
        name: &str,
        resource_name: &str,
    ) -> Result<DefinitionRecord, EngineError> {
        if self.is_new {
            let version = self
                .storage
                .find_latest_definition(kind, key, self.deployment.tenant_id.as_deref())?
                .map(|latest| latest.version + 1)
                .unwrap_or(1);
            let record = DefinitionRecord {
                id: new_instance_id(),
                kind,
                key: key.to_string(),
                version,
                name: name.to_string(),
                deployment_id: self.deployment.id.clone(),
                resource_name: resource_name.to_string(),
                tenant_id: self.deployment.tenant_id.clone(),
            };
            self.storage.insert_definition(record.clone())?;
            Ok(record)
        } else {
            self.existing
                .iter()
                .find(|record| record.kind == kind && record.key == key)
                .cloned()
                .ok_or_else(|| {
                    EngineError::invariant(format!(
                        "deployment '{}' has no persisted {:?} definition for key '{}'",
                        self.deployment.id, kind, key
                    ))
                })
        }
    }
}

fn definition_error(resource: &str, err: ModelError) -> EngineError {
    EngineError::Definition {
        resource: resource.to_string(),
        message: err.to_string(),
    }
}

/// One link of the deployer chain. Each deployer picks the resources it
/// understands by name suffix, parses them, and populates its cache.
pub(crate) trait Deployer: Send + Sync {
    fn name(&self) -> &'static str;
    fn deploy(&self, ctx: &DeploymentContext<'_>) -> Result<(), EngineError>;
}

struct CaseDeployer;

impl Deployer for CaseDeployer {
    fn name(&self) -> &'static str {
        "case"
    }

    fn deploy(&self, ctx: &DeploymentContext<'_>) -> Result<(), EngineError> {
        for resource in ctx.resources {
            if !resource.name.ends_with(CASE_RESOURCE_SUFFIX) {
                continue;
            }
            let parsed = case_from_resource(&resource.bytes)
                .map_err(|err| definition_error(&resource.name, err))?;
            let record = ctx.definition_record(
                DefinitionKind::Case,
                &parsed.key,
                &parsed.name,
                &resource.name,
            )?;
            tracing::debug!(
                definition_id = %record.id,
                key = %record.key,
                version = record.version,
                "case definition cached"
            );
            ctx.caches.cases.insert(CachedDefinition { record, parsed });
        }
        Ok(())
    }
}

struct DecisionDeployer;

impl Deployer for DecisionDeployer {
    fn name(&self) -> &'static str {
        "decision"
    }

    fn deploy(&self, ctx: &DeploymentContext<'_>) -> Result<(), EngineError> {
        for resource in ctx.resources {
            if !resource.name.ends_with(DECISION_RESOURCE_SUFFIX) {
                continue;
            }
            let parsed = decisions_from_resource(&resource.bytes)
                .map_err(|err| definition_error(&resource.name, err))?;
            // One resource may carry several decision tables; each gets its
            // own definition record.
            for decision in parsed.decisions {
                let record = ctx.definition_record(
                    DefinitionKind::Decision,
                    &decision.key,
                    &decision.name,
                    &resource.name,
                )?;
                ctx.caches.decisions.insert(CachedDefinition {
                    record,
                    parsed: decision,
                });
            }
        }
        Ok(())
    }
}

struct FormDeployer;

impl Deployer for FormDeployer {
    fn name(&self) -> &'static str {
        "form"
    }

    fn deploy(&self, ctx: &DeploymentContext<'_>) -> Result<(), EngineError> {
        for resource in ctx.resources {
            if !resource.name.ends_with(FORM_RESOURCE_SUFFIX) {
                continue;
            }
            let parsed = form_from_resource(&resource.bytes)
                .map_err(|err| definition_error(&resource.name, err))?;
            let record = ctx.definition_record(
                DefinitionKind::Form,
                &parsed.key,
                &parsed.name,
                &resource.name,
            )?;
            ctx.caches.forms.insert(CachedDefinition { record, parsed });
        }
        Ok(())
    }
}

/// Builder for one deployment bundle.
pub struct DeploymentBuilder {
    name: String,
    tenant_id: Option<String>,
    resources: Vec<(String, Vec<u8>)>,
}

impl DeploymentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tenant_id: None,
            resources: Vec::new(),
        }
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn add_resource(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.resources.push((name.into(), bytes.into()));
        self
    }
}

/// Deploys bundles, resolves definitions, and owns the caches.
pub struct DeploymentManager {
    storage: Arc<dyn CaseStorage>,
    deployers: Vec<Box<dyn Deployer>>,
    caches: EngineCaches,
    /// Per-deployment gates serializing first resolution.
    resolving: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeploymentManager {
    pub fn new(storage: Arc<dyn CaseStorage>) -> Self {
        Self {
            storage,
            deployers: vec![
                Box::new(CaseDeployer),
                Box::new(DecisionDeployer),
                Box::new(FormDeployer),
            ],
            caches: EngineCaches::default(),
            resolving: Mutex::new(HashMap::new()),
        }
    }

    /// Persist and activate a deployment bundle. On a deployer failure the
    /// half-deployed bundle is removed again (best effort) so it can never
    /// be resolved.
    pub fn deploy(&self, builder: DeploymentBuilder) -> Result<DeploymentRecord, EngineError> {
        let deployment = DeploymentRecord {
            id: new_instance_id(),
            name: builder.name,
            tenant_id: builder.tenant_id,
            deploy_time: OffsetDateTime::now_utc(),
        };
        let resources: Vec<ResourceRecord> = builder
            .resources
            .into_iter()
            .map(|(name, bytes)| ResourceRecord {
                id: new_instance_id(),
                deployment_id: deployment.id.clone(),
                name,
                bytes,
            })
            .collect();
        self.storage
            .insert_deployment(deployment.clone(), resources.clone())?;

        if let Err(err) = self.run_deployers(&deployment, &resources, true) {
            if let Err(cleanup) = self.remove_deployment(&deployment.id) {
                tracing::warn!(
                    deployment_id = %deployment.id,
                    error = %cleanup,
                    "failed to clean up after a failed deployment"
                );
            }
            return Err(err);
        }
        tracing::info!(
            deployment_id = %deployment.id,
            name = %deployment.name,
            "deployment completed"
        );
        Ok(deployment)
    }

    /// Delete a deployment and every definition derived from it. The whole
    /// delete-then-evict sequence holds the deployment's resolution gate, so
    /// an in-flight cache miss either finishes before the delete or observes
    /// the deployment as gone; it can never repopulate an entry after the
    /// eviction.
    pub fn remove_deployment(&self, deployment_id: &str) -> Result<(), EngineError> {
        let gate = {
            let mut resolving = self.resolving.lock();
            resolving
                .entry(deployment_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        {
            let _guard = gate.lock();
            let definitions = self.storage.find_definitions_by_deployment(deployment_id)?;
            self.storage.delete_deployment(deployment_id)?;
            for record in &definitions {
                self.caches.evict(record);
            }
        }
        self.resolving.lock().remove(deployment_id);
        tracing::info!(deployment_id = %deployment_id, "deployment removed");
        Ok(())
    }

    pub fn resolve_case_definition(
        &self,
        definition_id: &str,
    ) -> Result<Arc<CachedDefinition<CaseDefinition>>, EngineError> {
        self.resolve(&self.caches.cases, DefinitionKind::Case, "case definition", definition_id)
    }

    pub fn resolve_decision_definition(
        &self,
        definition_id: &str,
    ) -> Result<Arc<CachedDefinition<DecisionDefinition>>, EngineError> {
        self.resolve(
            &self.caches.decisions,
            DefinitionKind::Decision,
            "decision definition",
            definition_id,
        )
    }

    pub fn resolve_form_definition(
        &self,
        definition_id: &str,
    ) -> Result<Arc<CachedDefinition<FormDefinition>>, EngineError> {
        self.resolve(&self.caches.forms, DefinitionKind::Form, "form definition", definition_id)
    }

    pub fn resolve_latest_case_definition(
        &self,
        key: &str,
        tenant_id: Option<&str>,
    ) -> Result<Arc<CachedDefinition<CaseDefinition>>, EngineError> {
        let record = self
            .storage
            .find_latest_definition(DefinitionKind::Case, key, tenant_id)?
            .ok_or_else(|| EngineError::not_found("case definition", key))?;
        self.resolve_case_definition(&record.id)
    }

    pub fn resolve_latest_decision_definition(
        &self,
        key: &str,
        tenant_id: Option<&str>,
    ) -> Result<Arc<CachedDefinition<DecisionDefinition>>, EngineError> {
        let record = self
            .storage
            .find_latest_definition(DefinitionKind::Decision, key, tenant_id)?
            .ok_or_else(|| EngineError::not_found("decision definition", key))?;
        self.resolve_decision_definition(&record.id)
    }

    pub fn resolve_latest_form_definition(
        &self,
        key: &str,
        tenant_id: Option<&str>,
    ) -> Result<Arc<CachedDefinition<FormDefinition>>, EngineError> {
        let record = self
            .storage
            .find_latest_definition(DefinitionKind::Form, key, tenant_id)?
            .ok_or_else(|| EngineError::not_found("form definition", key))?;
        self.resolve_form_definition(&record.id)
    }

    fn resolve<T>(
        &self,
        cache: &DefinitionCache<T>,
        kind: DefinitionKind,
        kind_name: &'static str,
        definition_id: &str,
    ) -> Result<Arc<CachedDefinition<T>>, EngineError> {
        if let Some(hit) = cache.get(definition_id) {
            return Ok(hit);
        }
        let record = self
            .storage
            .find_definition(kind, definition_id)?
            .ok_or_else(|| EngineError::not_found(kind_name, definition_id))?;
        self.resolve_deployment(&record.deployment_id, || cache.get(definition_id).is_some())?;
        // A deployer that accepted the resource must have produced the entry.
        cache.get(definition_id).ok_or_else(|| {
            EngineError::invariant(format!(
                "resolving deployment '{}' did not populate {} '{}'",
                record.deployment_id, kind_name, definition_id
            ))
        })
    }

    /// Repopulate all caches from a persisted deployment, serialized per
    /// deployment id. `already_cached` short-circuits the chain when a
    /// concurrent resolution finished while this thread waited on the gate.
    fn resolve_deployment(
        &self,
        deployment_id: &str,
        already_cached: impl Fn() -> bool,
    ) -> Result<(), EngineError> {
        let gate = {
            let mut resolving = self.resolving.lock();
            resolving
                .entry(deployment_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock();
        if already_cached() {
            return Ok(());
        }
        let deployment = self
            .storage
            .find_deployment(deployment_id)?
            .ok_or_else(|| EngineError::not_found("deployment", deployment_id))?;
        let resources = self.storage.find_resources_by_deployment(deployment_id)?;
        self.run_deployers(&deployment, &resources, false)
    }

    fn run_deployers(
        &self,
        deployment: &DeploymentRecord,
        resources: &[ResourceRecord],
        is_new: bool,
    ) -> Result<(), EngineError> {
        let existing = if is_new {
            Vec::new()
        } else {
            self.storage.find_definitions_by_deployment(&deployment.id)?
        };
        let ctx = DeploymentContext {
            deployment,
            resources,
            is_new,
            storage: self.storage.as_ref(),
            caches: &self.caches,
            existing,
        };
        for deployer in &self.deployers {
            tracing::debug!(
                deployment_id = %deployment.id,
                deployer = deployer.name(),
                is_new,
                "running deployer"
            );
            deployer.deploy(&ctx)?;
        }
        Ok(())
    }
}
