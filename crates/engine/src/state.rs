//! Legal lifecycle transitions for plan items and case instances.
//!
//! The transition tables are the single source of truth for state-machine
//! safety: every operation that moves an instance consults them before
//! mutating, and an illegal pair is an invariant violation, not a runtime
//! condition to recover from. No transition ever leaves a terminal state.

use docket_storage::{CaseState, PlanItemState};

use crate::error::EngineError;

/// Whether `from -> to` is a legal plan item transition.
pub fn plan_item_transition_allowed(from: PlanItemState, to: PlanItemState) -> bool {
    use PlanItemState::*;
    if from.is_terminal() {
        return false;
    }
    match (from, to) {
        // Activation. Manually activated items pause in Enabled first.
        (Available, Active) => true,
        (Available, Enabled) => true,
        (Enabled, Active) => true,
        // Normal finish.
        (Active, Completed) => true,
        // Instantaneous items occur straight out of Available.
        (Available, Occurred) => true,
        // Withdrawal and termination apply to every non-terminal state.
        (_, Exited) => true,
        (_, Terminated) => true,
        // Suspension resumes to the running state.
        (Suspended, Active) => true,
        _ => false,
    }
}

/// Whether `from -> to` is a legal case transition.
pub fn case_transition_allowed(from: CaseState, to: CaseState) -> bool {
    use CaseState::*;
    match (from, to) {
        (Active, Completed) => true,
        (Active, Terminated) => true,
        (Active, Suspended) => true,
        (Suspended, Active) => true,
        (Suspended, Terminated) => true,
        _ => false,
    }
}

/// Check a plan item transition, returning an invariant violation for an
/// illegal pair.
pub fn check_plan_item_transition(
    plan_item_instance_id: &str,
    from: PlanItemState,
    to: PlanItemState,
) -> Result<(), EngineError> {
    if plan_item_transition_allowed(from, to) {
        Ok(())
    } else {
        Err(EngineError::illegal_transition(
            plan_item_instance_id,
            from,
            to,
        ))
    }
}

/// Check a case transition, returning an invariant violation for an illegal
/// pair.
pub fn check_case_transition(
    case_id: &str,
    from: CaseState,
    to: CaseState,
) -> Result<(), EngineError> {
    if case_transition_allowed(from, to) {
        Ok(())
    } else {
        Err(EngineError::invariant(format!(
            "illegal case transition {:?} -> {:?} on case instance '{}'",
            from, to, case_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PlanItemState::*;

    const ALL: [PlanItemState; 8] = [
        Available, Enabled, Active, Completed, Occurred, Exited, Terminated, Suspended,
    ];

    #[test]
    fn terminal_states_are_never_left() {
        for from in [Completed, Occurred, Exited, Terminated] {
            for to in ALL {
                assert!(
                    !plan_item_transition_allowed(from, to),
                    "{:?} -> {:?} must be illegal",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn activation_paths() {
        assert!(plan_item_transition_allowed(Available, Active));
        assert!(plan_item_transition_allowed(Available, Enabled));
        assert!(plan_item_transition_allowed(Enabled, Active));
        assert!(!plan_item_transition_allowed(Available, Completed));
        assert!(!plan_item_transition_allowed(Enabled, Completed));
    }

    #[test]
    fn completion_and_occurrence() {
        assert!(plan_item_transition_allowed(Active, Completed));
        assert!(plan_item_transition_allowed(Available, Occurred));
        assert!(!plan_item_transition_allowed(Active, Occurred));
        assert!(!plan_item_transition_allowed(Enabled, Occurred));
    }

    #[test]
    fn exit_and_terminate_cover_every_non_terminal_state() {
        for from in [Available, Enabled, Active, Suspended] {
            assert!(plan_item_transition_allowed(from, Exited));
            assert!(plan_item_transition_allowed(from, Terminated));
        }
    }

    #[test]
    fn case_transitions() {
        use CaseState::*;
        assert!(case_transition_allowed(Active, Completed));
        assert!(case_transition_allowed(Active, Terminated));
        assert!(case_transition_allowed(Suspended, Active));
        assert!(!case_transition_allowed(Completed, Active));
        assert!(!case_transition_allowed(Terminated, Completed));
    }

    #[test]
    fn check_reports_invariant_violation() {
        let err = check_plan_item_transition("pi-1", Completed, Active).unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation { .. }));
    }
}
