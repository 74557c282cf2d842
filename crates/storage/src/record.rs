use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Lifecycle status of a case instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseState {
    Active,
    Completed,
    Terminated,
    Suspended,
}

impl CaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CaseState::Completed | CaseState::Terminated)
    }
}

/// Lifecycle state of a plan item instance. Closed set; the engine owns the
/// legal transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanItemState {
    Available,
    Enabled,
    Active,
    Completed,
    Occurred,
    Exited,
    Terminated,
    Suspended,
}

impl PlanItemState {
    /// Terminal states are never left again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanItemState::Completed
                | PlanItemState::Occurred
                | PlanItemState::Exited
                | PlanItemState::Terminated
        )
    }
}

/// The root runtime record for one case execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseInstanceRecord {
    pub id: String,
    pub case_definition_id: String,
    pub state: CaseState,
    /// Case variables, visible to sentry conditions and repetition rules.
    pub variables: Map<String, Value>,
    /// Worker currently holding this instance, if any.
    pub lock_owner: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub lock_expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
}

/// One runtime occurrence of a plan item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItemInstanceRecord {
    pub id: String,
    pub case_instance_id: String,
    /// Owning stage instance; `None` means the case root scope.
    pub stage_instance_id: Option<String>,
    /// Id of the plan item model inside the case definition.
    pub plan_item_definition_id: String,
    pub state: PlanItemState,
    /// 1 for the first instance, incremented for each repetition re-arm.
    pub repetition_counter: u32,
}

/// An immutable bag of deployed resources plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub name: String,
    pub tenant_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub deploy_time: OffsetDateTime,
}

/// One raw resource (file) inside a deployment. Immutable after deploy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    pub deployment_id: String,
    pub name: String,
    pub bytes: Vec<u8>,
}

/// The sub-engine kind a definition record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefinitionKind {
    Case,
    Decision,
    Form,
}

/// A persisted, versioned definition derived from a deployment resource.
///
/// Version numbers are monotonically increasing per (kind, key, tenant) and
/// never reused; "latest" lookups select the highest version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionRecord {
    pub id: String,
    pub kind: DefinitionKind,
    pub key: String,
    pub version: i32,
    pub name: String,
    pub deployment_id: String,
    /// Name of the resource within the deployment this was parsed from.
    pub resource_name: String,
    pub tenant_id: Option<String>,
}

/// Atomic commit unit for one unit of work's runtime mutations.
///
/// All-or-nothing: a backend applies every record in one transaction or
/// none of them.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub case_inserts: Vec<CaseInstanceRecord>,
    pub case_updates: Vec<CaseInstanceRecord>,
    pub plan_item_inserts: Vec<PlanItemInstanceRecord>,
    pub plan_item_updates: Vec<PlanItemInstanceRecord>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.case_inserts.is_empty()
            && self.case_updates.is_empty()
            && self.plan_item_inserts.is_empty()
            && self.plan_item_updates.is_empty()
    }
}
