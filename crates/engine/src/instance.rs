//! The case working set: one unit of work's in-memory view of a case.
//!
//! Agenda operations mutate the working set, never storage directly. When
//! the drain finishes cleanly the accumulated inserts and updates become a
//! single [`ChangeSet`] committed atomically; when it fails the working set
//! is dropped and nothing reaches storage.

use serde_json::{Map, Value};
use time::OffsetDateTime;

use docket_storage::{
    CaseInstanceRecord, CaseState, ChangeSet, PlanItemInstanceRecord, PlanItemState,
};

/// Fresh identifier for a runtime instance (case, plan item, deployment).
pub(crate) fn new_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

struct ItemSlot {
    record: PlanItemInstanceRecord,
    inserted: bool,
    dirty: bool,
    /// Entry criteria proven permanently unsatisfiable this unit of work;
    /// the evaluator skips the item on later passes to guarantee fixpoint
    /// termination.
    entry_unsatisfiable: bool,
}

/// In-memory view of one case instance and its plan items.
pub struct CaseWorkingSet {
    case: CaseInstanceRecord,
    case_inserted: bool,
    case_dirty: bool,
    items: Vec<ItemSlot>,
}

impl CaseWorkingSet {
    /// Working set for a case being started in this unit of work.
    pub fn for_new_case(case: CaseInstanceRecord) -> Self {
        Self {
            case,
            case_inserted: true,
            case_dirty: false,
            items: Vec::new(),
        }
    }

    /// Working set loaded from persisted state.
    pub fn load(case: CaseInstanceRecord, items: Vec<PlanItemInstanceRecord>) -> Self {
        Self {
            case,
            case_inserted: false,
            case_dirty: false,
            items: items
                .into_iter()
                .map(|record| ItemSlot {
                    record,
                    inserted: false,
                    dirty: false,
                    entry_unsatisfiable: false,
                })
                .collect(),
        }
    }

    pub fn case(&self) -> &CaseInstanceRecord {
        &self.case
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.case.variables
    }

    /// Flip the case state without closing it (suspend / resume).
    pub fn set_case_state(&mut self, state: CaseState) {
        self.case.state = state;
        self.case_dirty = true;
    }

    /// Merge variables into the case, overwriting existing keys.
    pub fn merge_variables(&mut self, variables: Map<String, Value>) {
        for (key, value) in variables {
            self.case.variables.insert(key, value);
        }
        self.case_dirty = true;
    }

    /// Close the case: set a terminal state and stamp the end time.
    pub fn close_case(&mut self, state: CaseState) {
        self.case.state = state;
        self.case.ended_at = Some(OffsetDateTime::now_utc());
        self.case_dirty = true;
    }

    pub fn item(&self, plan_item_instance_id: &str) -> Option<&PlanItemInstanceRecord> {
        self.items
            .iter()
            .find(|slot| slot.record.id == plan_item_instance_id)
            .map(|slot| &slot.record)
    }

    /// Move an item to a new state. The caller checks transition legality.
    pub fn set_item_state(&mut self, plan_item_instance_id: &str, state: PlanItemState) {
        if let Some(slot) = self
            .items
            .iter_mut()
            .find(|slot| slot.record.id == plan_item_instance_id)
        {
            slot.record.state = state;
            slot.dirty = true;
        }
    }

    /// Stage a newly created instance into the working set.
    pub fn add_item(&mut self, record: PlanItemInstanceRecord) {
        self.items.push(ItemSlot {
            record,
            inserted: true,
            dirty: false,
            entry_unsatisfiable: false,
        });
    }

    pub fn all_items(&self) -> impl Iterator<Item = &PlanItemInstanceRecord> {
        self.items.iter().map(|slot| &slot.record)
    }

    /// Direct children of a scope: `None` is the case root, `Some(id)` a
    /// stage instance id.
    pub fn children_of(&self, scope: Option<&str>) -> Vec<&PlanItemInstanceRecord> {
        self.items
            .iter()
            .map(|slot| &slot.record)
            .filter(|record| record.stage_instance_id.as_deref() == scope)
            .collect()
    }

    /// Every instance created from the given plan item model, case-wide.
    pub fn instances_of(&self, plan_item_definition_id: &str) -> Vec<&PlanItemInstanceRecord> {
        self.items
            .iter()
            .map(|slot| &slot.record)
            .filter(|record| record.plan_item_definition_id == plan_item_definition_id)
            .collect()
    }

    pub fn mark_entry_unsatisfiable(&mut self, plan_item_instance_id: &str) {
        if let Some(slot) = self
            .items
            .iter_mut()
            .find(|slot| slot.record.id == plan_item_instance_id)
        {
            slot.entry_unsatisfiable = true;
        }
    }

    pub fn is_entry_unsatisfiable(&self, plan_item_instance_id: &str) -> bool {
        self.items
            .iter()
            .find(|slot| slot.record.id == plan_item_instance_id)
            .map(|slot| slot.entry_unsatisfiable)
            .unwrap_or(false)
    }

    /// Consume the working set: final case record, final item records, and
    /// the change set to commit.
    pub fn into_parts(self) -> (CaseInstanceRecord, Vec<PlanItemInstanceRecord>, ChangeSet) {
        let mut changes = ChangeSet::default();
        if self.case_inserted {
            changes.case_inserts.push(self.case.clone());
        } else if self.case_dirty {
            changes.case_updates.push(self.case.clone());
        }
        let mut records = Vec::with_capacity(self.items.len());
        for slot in self.items {
            if slot.inserted {
                changes.plan_item_inserts.push(slot.record.clone());
            } else if slot.dirty {
                changes.plan_item_updates.push(slot.record.clone());
            }
            records.push(slot.record);
        }
        (self.case, records, changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: &str) -> CaseInstanceRecord {
        CaseInstanceRecord {
            id: id.to_string(),
            case_definition_id: "def".to_string(),
            state: CaseState::Active,
            variables: Map::new(),
            lock_owner: None,
            lock_expires_at: None,
            started_at: OffsetDateTime::now_utc(),
            ended_at: None,
        }
    }

    fn item(id: &str, scope: Option<&str>) -> PlanItemInstanceRecord {
        PlanItemInstanceRecord {
            id: id.to_string(),
            case_instance_id: "c1".to_string(),
            stage_instance_id: scope.map(str::to_string),
            plan_item_definition_id: format!("def-{}", id),
            state: PlanItemState::Available,
            repetition_counter: 1,
        }
    }

    #[test]
    fn new_case_produces_inserts_only() {
        let mut ws = CaseWorkingSet::for_new_case(case("c1"));
        ws.add_item(item("p1", None));
        ws.set_item_state("p1", PlanItemState::Active);

        let (_, records, changes) = ws.into_parts();
        assert_eq!(records.len(), 1);
        assert_eq!(changes.case_inserts.len(), 1);
        assert!(changes.case_updates.is_empty());
        // An item created in this unit of work stays an insert even after
        // later state changes.
        assert_eq!(changes.plan_item_inserts.len(), 1);
        assert_eq!(changes.plan_item_inserts[0].state, PlanItemState::Active);
        assert!(changes.plan_item_updates.is_empty());
    }

    #[test]
    fn loaded_case_tracks_dirty_records_only() {
        let mut ws = CaseWorkingSet::load(case("c1"), vec![item("p1", None), item("p2", None)]);
        ws.set_item_state("p1", PlanItemState::Active);

        let (_, _, changes) = ws.into_parts();
        assert!(changes.case_inserts.is_empty());
        assert!(changes.case_updates.is_empty());
        assert_eq!(changes.plan_item_updates.len(), 1);
        assert_eq!(changes.plan_item_updates[0].id, "p1");
    }

    #[test]
    fn close_case_marks_case_dirty_and_stamps_end() {
        let mut ws = CaseWorkingSet::load(case("c1"), vec![]);
        ws.close_case(CaseState::Completed);
        let (record, _, changes) = ws.into_parts();
        assert_eq!(record.state, CaseState::Completed);
        assert!(record.ended_at.is_some());
        assert_eq!(changes.case_updates.len(), 1);
    }

    #[test]
    fn scope_queries() {
        let mut ws = CaseWorkingSet::load(
            case("c1"),
            vec![item("root-a", None), item("stage-1", None), item("child", Some("stage-1"))],
        );
        assert_eq!(ws.children_of(None).len(), 2);
        assert_eq!(ws.children_of(Some("stage-1")).len(), 1);
        assert_eq!(ws.instances_of("def-child").len(), 1);

        ws.mark_entry_unsatisfiable("child");
        assert!(ws.is_entry_unsatisfiable("child"));
        assert!(!ws.is_entry_unsatisfiable("root-a"));
    }
}
