//! The execution agenda: a command-scoped FIFO operation queue.
//!
//! One external trigger enqueues one root operation on a fresh agenda; the
//! engine then drains the queue head-first until it is empty. Operations
//! enqueue follow-up operations at the tail, so deep cascades unfold
//! breadth-first through the queue instead of recursing through the call
//! stack. Any error stops the drain and discards the remaining queue; the
//! unit-of-work boundary throws away all staged mutations.

use std::collections::VecDeque;

use docket_storage::PlanItemState;

/// A lifecycle event carried by a criteria evaluation, naming the
/// transition that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub plan_item_instance_id: String,
    pub state: PlanItemState,
}

/// One queued unit of work on the agenda. Transient: operations live only
/// for the duration of one unit of work and are never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Create the root scope's plan item instances for a fresh case.
    InitPlanModel,
    /// Create the child instances of a newly activated stage.
    InitStage { stage_instance_id: String },
    /// Run one sentry evaluation pass over the case.
    EvaluateCriteria { event: Option<LifecycleEvent> },
    /// Move an available item into active (or enabled, when the item is
    /// manually activated).
    Activate { plan_item_instance_id: String },
    /// Finish an active item.
    Complete { plan_item_instance_id: String },
    /// Fire an instantaneous item (milestone / event listener).
    Occur { plan_item_instance_id: String },
    /// Withdraw a non-terminal item (exit sentry or stage exit).
    Exit { plan_item_instance_id: String },
    /// Terminate a non-terminal item as part of a case/stage cascade.
    Terminate { plan_item_instance_id: String },
    /// Explicitly start an enabled (manually activated) item.
    Trigger { plan_item_instance_id: String },
    /// Close the case as completed.
    CompleteCase,
    /// Close the case as terminated and cascade to every descendant.
    TerminateCase { manual: bool },
}

/// FIFO operation queue for one unit of work.
#[derive(Debug, Default)]
pub struct Agenda {
    queue: VecDeque<Operation>,
}

impl Agenda {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation at the tail.
    pub fn enqueue(&mut self, operation: Operation) {
        self.queue.push_back(operation);
    }

    /// Append a criteria evaluation unless one is already queued. A single
    /// pending pass is enough: each pass rescans the whole case, so queueing
    /// duplicates would only repeat work (and double-fire scope completion).
    pub fn enqueue_evaluate_criteria(&mut self, event: Option<LifecycleEvent>) {
        let already_queued = self
            .queue
            .iter()
            .any(|op| matches!(op, Operation::EvaluateCriteria { .. }));
        if !already_queued {
            self.queue.push_back(Operation::EvaluateCriteria { event });
        }
    }

    /// Remove and return the head operation.
    pub fn pop(&mut self) -> Option<Operation> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
