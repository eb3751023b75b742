//! The task transition table.
//!
//! Every edge a task may take is listed here. Store code never writes a
//! `(previous, new)` pair that [`permits`] rejects, which keeps the history
//! ledger replayable.

use crate::types::{Action, TaskState};

/// Ordinary successors of a state. `SPLIT` and privileged resets are handled
/// separately by [`is_edge`] and [`permits`].
pub fn successors(from: TaskState) -> &'static [TaskState] {
    use TaskState::*;
    match from {
        Ready => &[LockedForMapping],
        LockedForMapping => &[Ready, Mapped, BadImagery],
        Mapped => &[LockedForValidation],
        LockedForValidation => &[Mapped, Validated, Invalidated],
        Validated => &[LockedForValidation],
        Invalidated => &[LockedForMapping],
        BadImagery => &[],
        Split => &[],
    }
}

/// Whether `from -> to` is an edge of the table, including the
/// split-coordinator edge from any non-terminal state.
pub fn is_edge(from: TaskState, to: TaskState) -> bool {
    if from.is_terminal() {
        return false;
    }
    to == TaskState::Split || successors(from).contains(&to)
}

/// Unlocked states a lock of the given kind may be taken from.
pub fn lock_predecessors(locked: TaskState) -> &'static [TaskState] {
    match locked {
        TaskState::LockedForMapping => &[TaskState::Ready, TaskState::Invalidated],
        TaskState::LockedForValidation => &[TaskState::Mapped, TaskState::Validated],
        _ => &[],
    }
}

/// The history action recorded when a lock of the given kind is taken.
pub fn lock_action(locked: TaskState) -> Option<Action> {
    match locked {
        TaskState::LockedForMapping => Some(Action::LockForMapping),
        TaskState::LockedForValidation => Some(Action::LockForValidation),
        _ => None,
    }
}

/// Whether `action` may move a task from `from` to `to`.
pub fn permits(action: Action, from: Option<TaskState>, to: TaskState) -> bool {
    use TaskState::*;

    let Some(from) = from else {
        return action == Action::Created && to == Ready;
    };
    if from.is_terminal() {
        return false;
    }

    match action {
        Action::Created => false,
        Action::LockForMapping => {
            to == LockedForMapping && lock_predecessors(LockedForMapping).contains(&from)
        }
        Action::LockForValidation => {
            to == LockedForValidation && lock_predecessors(LockedForValidation).contains(&from)
        }
        Action::StopMapping => from == LockedForMapping && to == Ready,
        Action::MarkMapped => from == LockedForMapping && to == Mapped,
        Action::MarkBadImagery => from == LockedForMapping && to == BadImagery,
        Action::StopValidation => from == LockedForValidation && matches!(to, Mapped | Validated),
        Action::Validate => from == LockedForValidation && to == Validated,
        Action::Invalidate => from == LockedForValidation && to == Invalidated,
        Action::ForceUnlock => match from {
            LockedForMapping => to == Ready,
            LockedForValidation => matches!(to, Mapped | Validated),
            _ => false,
        },
        Action::Reset => from != Ready && to == Ready,
        Action::Split => to == Split,
        Action::Undo => to != Split && is_edge(to, from),
    }
}

/// Final states a mapper may choose when releasing a mapping lock.
pub fn mapping_release_action(to: TaskState) -> Option<Action> {
    match to {
        TaskState::Mapped => Some(Action::MarkMapped),
        TaskState::BadImagery => Some(Action::MarkBadImagery),
        _ => None,
    }
}

/// Final states a validator may choose when releasing a validation lock.
pub fn validation_release_action(to: TaskState) -> Option<Action> {
    match to {
        TaskState::Validated => Some(Action::Validate),
        TaskState::Invalidated => Some(Action::Invalidate),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskState::*;

    #[test]
    fn table_matches_documented_edges() {
        let expected = [
            (Ready, LockedForMapping),
            (LockedForMapping, Ready),
            (LockedForMapping, Mapped),
            (LockedForMapping, BadImagery),
            (Mapped, LockedForValidation),
            (LockedForValidation, Mapped),
            (LockedForValidation, Validated),
            (LockedForValidation, Invalidated),
            (Invalidated, LockedForMapping),
            (Validated, LockedForValidation),
        ];
        for from in TaskState::ALL {
            for to in TaskState::ALL {
                if to == Split {
                    continue;
                }
                assert_eq!(
                    is_edge(from, to),
                    expected.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn split_is_reachable_from_every_non_terminal_state() {
        for from in TaskState::ALL {
            assert_eq!(is_edge(from, Split), from != Split, "{from}");
        }
    }

    #[test]
    fn split_is_terminal_for_every_action() {
        for action in Action::ALL {
            for to in TaskState::ALL {
                assert!(!permits(action, Some(Split), to), "{action} from SPLIT");
            }
        }
    }

    #[test]
    fn ordinary_actions_stay_inside_the_table() {
        for action in Action::ALL {
            if matches!(action, Action::Reset | Action::Undo | Action::Created) {
                continue;
            }
            for from in TaskState::ALL {
                for to in TaskState::ALL {
                    if permits(action, Some(from), to) {
                        assert!(is_edge(from, to), "{action}: {from} -> {to}");
                    }
                }
            }
        }
    }

    #[test]
    fn undo_reverses_a_table_edge() {
        assert!(permits(Action::Undo, Some(Mapped), LockedForMapping));
        assert!(permits(Action::Undo, Some(LockedForMapping), Invalidated));
        assert!(!permits(Action::Undo, Some(Mapped), Ready));
    }

    #[test]
    fn creation_only_produces_ready() {
        assert!(permits(Action::Created, None, Ready));
        assert!(!permits(Action::Created, None, Mapped));
        assert!(!permits(Action::LockForMapping, None, LockedForMapping));
    }

    #[test]
    fn reset_moves_any_live_state_to_ready() {
        for from in [LockedForMapping, Mapped, LockedForValidation, Validated, Invalidated, BadImagery] {
            assert!(permits(Action::Reset, Some(from), Ready), "{from}");
        }
        assert!(!permits(Action::Reset, Some(Ready), Ready));
    }

    #[test]
    fn invalidated_tasks_can_be_remapped() {
        assert!(permits(Action::LockForMapping, Some(Invalidated), LockedForMapping));
        assert!(!permits(Action::LockForMapping, Some(Mapped), LockedForMapping));
    }
}
