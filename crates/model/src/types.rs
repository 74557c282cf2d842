//! Typed case definition model.
//!
//! A case definition is a tree of plan items. Stages contain child plan
//! items and form nested scopes; tasks, milestones, and event listeners are
//! leaves. Entry and exit sentries gate lifecycle transitions of the runtime
//! instances created from these models.

use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// A parsed case definition: the root plan model and its plan item tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDefinition {
    /// Stable key of the case model. Versioning is applied at deploy time;
    /// the model itself is version-agnostic.
    pub key: String,
    pub name: String,
    /// Direct children of the case plan model (the root scope).
    pub plan_items: Vec<PlanItemModel>,
}

/// One plan item within a case model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItemModel {
    /// Unique within the whole case definition, including nested stages.
    pub id: String,
    pub name: String,
    pub item_type: PlanItemType,
    /// Entry sentries. Empty means the item starts as soon as its scope
    /// initializes. A list is satisfied when ANY single sentry is satisfied.
    pub entry_criteria: Vec<Sentry>,
    /// Exit sentries. Satisfied while the item is non-terminal, it is
    /// withdrawn (exited).
    pub exit_criteria: Vec<Sentry>,
    /// Manually activated items pause in the enabled state until an
    /// explicit trigger moves them to active.
    pub manual_activation: bool,
    /// Repetition rule: when the item completes and the rule's condition
    /// still holds, one new available sibling instance is created.
    pub repetition: Option<RepetitionRule>,
}

/// The kind of a plan item. Stages carry their child plan items inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlanItemType {
    Task,
    Stage(Vec<PlanItemModel>),
    Milestone,
    EventListener,
}

impl PlanItemType {
    /// Milestones and event listeners have no running phase: they occur
    /// rather than activate.
    pub fn is_occurrable(&self) -> bool {
        matches!(self, PlanItemType::Milestone | PlanItemType::EventListener)
    }

    pub fn is_stage(&self) -> bool {
        matches!(self, PlanItemType::Stage(_))
    }
}

/// A sentry: on-parts tied to lifecycle events of sibling plan items,
/// combined with an optional free condition over case variables.
///
/// The sentry is satisfied when the combinator over its on-parts holds AND
/// the free condition (when present) evaluates to true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentry {
    pub combinator: Combinator,
    pub on_parts: Vec<OnPart>,
    pub condition: Option<Condition>,
}

/// How a sentry's on-parts combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combinator {
    All,
    Any,
}

/// One on-part: a lifecycle event of another plan item this sentry waits on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnPart {
    /// Plan item definition id of the source item.
    pub source_ref: String,
    pub event: PlanItemEvent,
}

/// Lifecycle events a sentry on-part can wait on. All four are terminal
/// states of the source item, so on-part satisfaction is a pure function of
/// the current instance states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanItemEvent {
    Complete,
    Occur,
    Exit,
    Terminate,
}

/// Repetition rule: re-arm a new sibling instance on completion while the
/// condition holds against the case variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepetitionRule {
    pub condition: Condition,
}

impl CaseDefinition {
    /// Find a plan item model anywhere in the tree by its definition id.
    pub fn find_item(&self, id: &str) -> Option<&PlanItemModel> {
        fn walk<'a>(items: &'a [PlanItemModel], id: &str) -> Option<&'a PlanItemModel> {
            for item in items {
                if item.id == id {
                    return Some(item);
                }
                if let PlanItemType::Stage(children) = &item.item_type {
                    if let Some(found) = walk(children, id) {
                        return Some(found);
                    }
                }
            }
            None
        }
        walk(&self.plan_items, id)
    }

    /// Direct children of a scope: `None` is the case root, `Some(id)` the
    /// stage with that definition id.
    pub fn children_of(&self, scope: Option<&str>) -> Option<&[PlanItemModel]> {
        match scope {
            None => Some(&self.plan_items),
            Some(stage_id) => match self.find_item(stage_id) {
                Some(PlanItemModel {
                    item_type: PlanItemType::Stage(children),
                    ..
                }) => Some(children.as_slice()),
                _ => None,
            },
        }
    }
}
